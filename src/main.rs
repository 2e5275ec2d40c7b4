#![forbid(unsafe_code)]

mod cli;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn, Level as TraceLevel};
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

use cli::{ItemArg, SetArg};
use settings_overlay::config::{parse_log_level, ToolConfig};
use settings_overlay::constants::config::LOG_LEVEL_ENV;
use settings_overlay::ipc::{IpcBackend, SettingsServer};
use settings_overlay::persistence::SettingsStore;
use settings_overlay::{SettingKey, SettingsBackend, SettingsSession, StoreBackend};

#[derive(Parser)]
#[command(version, about = "Stage and commit settings against a settings server")]
struct Cli {
    /// Tool config file (defaults to the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve a settings store over the IPC socket
    Serve {
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Print confirmed settings
    Get {
        #[command(flatten)]
        target: Target,
        keys: Vec<String>,
    },
    /// Stage edits and commit them in one update
    Apply {
        #[command(flatten)]
        target: Target,
        #[arg(long = "set", value_name = "KEY=JSON", value_parser = cli::parse_set)]
        sets: Vec<SetArg>,
        #[arg(long = "upsert", value_name = "KEY:FIELD=JSON", value_parser = cli::parse_item)]
        upserts: Vec<ItemArg>,
        #[arg(long = "remove", value_name = "KEY:FIELD=JSON", value_parser = cli::parse_item)]
        removes: Vec<ItemArg>,
        /// Print the effective values without committing
        #[arg(long)]
        dry_run: bool,
    },
}

/// Where settings come from: a running server or a store file opened directly
#[derive(Args)]
struct Target {
    #[arg(long, conflicts_with = "store")]
    socket: Option<PathBuf>,
    #[arg(long)]
    store: Option<PathBuf>,
}

struct Edits {
    sets: Vec<SetArg>,
    upserts: Vec<ItemArg>,
    removes: Vec<ItemArg>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let env_level = std::env::var(LOG_LEVEL_ENV).ok();
    let bootstrap_level = env_level
        .as_deref()
        .and_then(parse_log_level)
        .unwrap_or(TraceLevel::INFO);
    let config = load_config(cli.config.as_deref(), bootstrap_level, std::io::stdout)?;

    // LOG_LEVEL wins over the config file
    let requested = env_level.unwrap_or_else(|| config.log_level.clone());
    let log_level = parse_log_level(&requested);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.unwrap_or(TraceLevel::INFO))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    if log_level.is_none() {
        warn!(log_level = %requested, "Unknown log level, using info");
    }

    match cli.command {
        Command::Serve { store, socket } => serve(&config, store, socket).await,
        Command::Get { target, keys } => match open_target(&config, target)? {
            Backend::Ipc(backend) => get(backend, &keys).await,
            Backend::Store(backend) => get(backend, &keys).await,
        },
        Command::Apply {
            target,
            sets,
            upserts,
            removes,
            dry_run,
        } => {
            let edits = Edits {
                sets,
                upserts,
                removes,
            };
            match open_target(&config, target)? {
                Backend::Ipc(backend) => apply(backend, &edits, dry_run).await,
                Backend::Store(backend) => apply(backend, &edits, dry_run).await,
            }
        }
    }
}

/// Load the tool config under a temporary subscriber so its warnings are not lost
fn load_config<W>(path: Option<&Path>, level: TraceLevel, writer: W) -> Result<ToolConfig>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let bootstrap = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(writer)
        .finish();
    tracing::subscriber::with_default(bootstrap, || match path {
        Some(path) => ToolConfig::load_from(path),
        None => ToolConfig::load(),
    })
}

fn open_store(config: &ToolConfig, path: Option<PathBuf>) -> Result<SettingsStore> {
    let path = path.unwrap_or_else(|| config.store_path());
    Ok(SettingsStore::open(path)?.with_read_only(config.read_only_keys.iter().cloned()))
}

async fn serve(config: &ToolConfig, store: Option<PathBuf>, socket: Option<PathBuf>) -> Result<()> {
    let store = Arc::new(Mutex::new(open_store(config, store)?));
    let socket = match socket {
        Some(path) => path,
        None => config.socket_path()?,
    };
    let server = SettingsServer::bind_to(socket)?;

    tokio::select! {
        result = server.serve(store) => result?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("Interrupted, shutting down settings server");
        }
    }
    Ok(())
}

enum Backend {
    Ipc(IpcBackend),
    Store(StoreBackend),
}

fn open_target(config: &ToolConfig, target: Target) -> Result<Backend> {
    if target.store.is_some() {
        return Ok(Backend::Store(StoreBackend::new(open_store(config, target.store)?)));
    }
    let socket = match target.socket {
        Some(path) => path,
        None => config.socket_path()?,
    };
    Ok(Backend::Ipc(IpcBackend::new(socket)))
}

async fn get<B: SettingsBackend>(backend: B, keys: &[String]) -> Result<()> {
    let snapshot = backend
        .fetch_settings()
        .await
        .context("Failed to fetch settings")?;

    let mut values = snapshot.values;
    if !keys.is_empty() {
        values.retain(|key, _| keys.iter().any(|k| k == key.as_str()));
        for key in keys {
            if !values.contains_key(key.as_str()) {
                warn!(key = %key, "Setting not found");
            }
        }
    }
    println!("{}", serde_json::to_string_pretty(&values)?);
    Ok(())
}

async fn apply<B: SettingsBackend>(backend: B, edits: &Edits, dry_run: bool) -> Result<()> {
    let session = SettingsSession::open(backend)
        .await
        .context("Failed to fetch settings")?;

    let mut touched: Vec<SettingKey> = Vec::new();
    for edit in &edits.sets {
        session.update_single_value(edit.key.clone(), edit.value.clone());
        touched.push(edit.key.clone());
    }
    for edit in &edits.upserts {
        session
            .update_array_item(edit.key.clone(), &edit.item_key, edit.value.clone())
            .with_context(|| format!("Failed to stage upsert into {}", edit.key))?;
        touched.push(edit.key.clone());
    }
    for edit in &edits.removes {
        let staged = session
            .remove_array_item(edit.key.clone(), &edit.item_key, edit.value.clone())
            .with_context(|| format!("Failed to stage removal from {}", edit.key))?;
        if !staged {
            warn!(key = %edit.key, item_key = %edit.item_key, identity = %edit.value, "No such item to remove");
        }
        touched.push(edit.key.clone());
    }
    touched.sort();
    touched.dedup();

    for key in &touched {
        let value = session.resolve(key.as_str()).unwrap_or_default();
        let marker = if session.is_dirty(key.as_str()) { "*" } else { " " };
        println!("{marker} {key} = {value}");
    }

    if dry_run {
        info!(staged = session.dirty_keys().len(), "Dry run, nothing committed");
        return Ok(());
    }

    let report = session.commit().await?;
    if report.is_noop() {
        println!("Nothing to commit");
    } else {
        match report.revision {
            Some(revision) => println!("Committed {} setting(s) at revision {revision}", report.sent()),
            None => println!("Committed {} setting(s)", report.sent()),
        }
    }
    Ok(())
}
