//! Command-line edit syntax
//!
//! - `KEY=JSON` replaces a whole value
//! - `KEY:FIELD=JSON` addresses a list item by FIELD, or by tuple position
//!   when FIELD is a number
//!
//! JSON that does not parse is taken as a plain string, so `--set lang=fr`
//! works without quoting.

use serde_json::Value;

use settings_overlay::{ItemKey, SettingKey, SettingValue};

#[derive(Debug, Clone, PartialEq)]
pub struct SetArg {
    pub key: SettingKey,
    pub value: SettingValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemArg {
    pub key: SettingKey,
    pub item_key: ItemKey,
    pub value: SettingValue,
}

pub fn parse_set(raw: &str) -> Result<SetArg, String> {
    let (key, value) = split_assignment(raw)?;
    if key.contains(':') {
        return Err(format!("'{key}' addresses a list item; use --upsert or --remove"));
    }
    Ok(SetArg {
        key: SettingKey::from(key),
        value: parse_value(value),
    })
}

pub fn parse_item(raw: &str) -> Result<ItemArg, String> {
    let (target, value) = split_assignment(raw)?;
    let (key, field) = target
        .split_once(':')
        .ok_or_else(|| format!("expected KEY:FIELD=JSON, got '{raw}'"))?;
    if key.is_empty() || field.is_empty() {
        return Err(format!("expected KEY:FIELD=JSON, got '{raw}'"));
    }
    let item_key = match field.parse::<usize>() {
        Ok(index) => ItemKey::Position(index),
        Err(_) => ItemKey::field(field),
    };
    Ok(ItemArg {
        key: SettingKey::from(key),
        item_key,
        value: parse_value(value),
    })
}

fn split_assignment(raw: &str) -> Result<(&str, &str), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{raw}'"));
    }
    Ok((key, value))
}

fn parse_value(raw: &str) -> SettingValue {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
