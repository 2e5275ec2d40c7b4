//! IPC (Inter-Process Communication) via Unix sockets
//!
//! Carries settings fetches and patches between sessions and the settings
//! server. Uses length-prefixed JSON over Unix domain sockets.

use anyhow::{anyhow, Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

mod messages;
pub use messages::{SettingsRequest, SettingsResponse};

use crate::backend::{BackendError, SettingsBackend, SettingsSnapshot};
use crate::constants::ipc::{MAX_MESSAGE_SIZE, SOCKET_DIR, SOCKET_FILENAME};
use crate::overlay::SettingsPatch;
use crate::persistence::{SettingsStore, StoreError};

/// Get default socket path (XDG_RUNTIME_DIR with fallback to cache)
pub fn default_socket_path() -> Result<PathBuf> {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return Ok(PathBuf::from(runtime_dir).join(SOCKET_DIR).join(SOCKET_FILENAME));
    }

    // Fallback to cache dir
    let cache = dirs::cache_dir()
        .context("Failed to determine cache directory (no XDG_RUNTIME_DIR or HOME)")?;
    Ok(cache.join(SOCKET_DIR).join(SOCKET_FILENAME))
}

/// Client connection to the settings server
pub struct SettingsClient {
    stream: UnixStream,
}

impl SettingsClient {
    /// Connect to specific socket path
    pub async fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .context(format!("Failed to connect to settings server at {}", path.display()))?;
        Ok(Self { stream })
    }

    pub async fn send_request(&mut self, req: &SettingsRequest) -> Result<()> {
        write_message(&mut self.stream, req).await
    }

    pub async fn recv_response(&mut self) -> Result<SettingsResponse> {
        read_message(&mut self.stream)
            .await?
            .ok_or_else(|| anyhow!("Settings server closed the connection"))
    }

    /// Send request and wait for response (convenience method)
    pub async fn request(&mut self, req: SettingsRequest) -> Result<SettingsResponse> {
        self.send_request(&req).await?;
        self.recv_response().await
    }
}

/// [`SettingsBackend`] that talks to a settings server
///
/// Opens one connection per call, so a restarted server is picked up
/// without reconnect logic.
#[derive(Debug, Clone)]
pub struct IpcBackend {
    socket_path: PathBuf,
}

impl IpcBackend {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn call(&self, req: SettingsRequest) -> Result<SettingsResponse, BackendError> {
        let mut client = SettingsClient::connect_to(&self.socket_path)
            .await
            .map_err(transport)?;
        client.request(req).await.map_err(transport)
    }
}

fn transport(e: anyhow::Error) -> BackendError {
    BackendError::Transport(format!("{e:#}"))
}

impl SettingsBackend for IpcBackend {
    async fn fetch_settings(&self) -> Result<SettingsSnapshot, BackendError> {
        match self.call(SettingsRequest::Fetch).await? {
            SettingsResponse::Settings(snapshot) => Ok(snapshot),
            SettingsResponse::Error(reason) => Err(BackendError::Transport(reason)),
            other => Err(unexpected(&other)),
        }
    }

    async fn patch_settings(&self, partial: SettingsPatch) -> Result<Option<u64>, BackendError> {
        match self.call(SettingsRequest::Patch(partial)).await? {
            SettingsResponse::Patched { revision } => Ok(Some(revision)),
            SettingsResponse::Rejected(reason) => Err(BackendError::Rejected(reason)),
            SettingsResponse::Error(reason) => Err(BackendError::Transport(reason)),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(resp: &SettingsResponse) -> BackendError {
    BackendError::Transport(format!("Unexpected response from settings server: {resp:?}"))
}

/// Server listener hosting a [`SettingsStore`]
pub struct SettingsServer {
    listener: UnixListener,
    socket_path: PathBuf,
    shutdown: Arc<Notify>,
}

impl SettingsServer {
    /// Create server and bind to specific socket path
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind_to(socket_path: PathBuf) -> Result<Self> {
        // Create directory if needed
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create socket directory: {}", parent.display()))?;
        }

        // Remove stale socket if exists
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)
                .context(format!("Failed to remove stale socket: {}", socket_path.display()))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .context(format!("Failed to bind socket at {}", socket_path.display()))?;

        // Set permissions to 0700 (owner only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o700))
                .context("Failed to set socket permissions")?;
        }

        Ok(Self {
            listener,
            socket_path,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Get socket path
    pub fn path(&self) -> &Path {
        &self.socket_path
    }

    /// Handle that stops [`serve`](Self::serve) when notified
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Accept connections until a shutdown is requested
    pub async fn serve(&self, store: Arc<Mutex<SettingsStore>>) -> Result<()> {
        info!(socket = %self.socket_path.display(), "Settings server listening");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Settings server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, _addr) = accepted.context("Failed to accept IPC connection")?;
                    let store = Arc::clone(&store);
                    let shutdown = Arc::clone(&self.shutdown);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &store, &shutdown).await {
                            warn!(error = ?e, "IPC connection closed with error");
                        }
                    });
                }
            }
        }
    }
}

impl Drop for SettingsServer {
    fn drop(&mut self) {
        // Clean up socket file
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    store: &Mutex<SettingsStore>,
    shutdown: &Notify,
) -> Result<()> {
    debug!("Settings client connected");

    while let Some(req) = read_message::<_, SettingsRequest>(&mut stream).await? {
        let stop = matches!(req, SettingsRequest::Shutdown);
        let resp = handle_request(store, req);
        write_message(&mut stream, &resp).await?;
        if stop {
            shutdown.notify_one();
            break;
        }
    }

    debug!("Settings client disconnected");
    Ok(())
}

fn handle_request(store: &Mutex<SettingsStore>, req: SettingsRequest) -> SettingsResponse {
    let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
    match req {
        SettingsRequest::Fetch => SettingsResponse::Settings(store.snapshot()),
        SettingsRequest::Patch(patch) => match store.apply_patch(patch) {
            Ok(revision) => SettingsResponse::Patched { revision },
            Err(e @ StoreError::ReadOnly(_)) => SettingsResponse::Rejected(e.to_string()),
            Err(e) => SettingsResponse::Error(e.to_string()),
        },
        SettingsRequest::Ping => SettingsResponse::Pong,
        SettingsRequest::Shutdown => {
            info!("Received shutdown request via IPC");
            SettingsResponse::Ready
        }
    }
}

/// Write length-prefixed message to stream
pub(crate) async fn write_message<W, T>(stream: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_vec(msg).context("Failed to serialize message to JSON")?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(anyhow!("Message too large: {} bytes (max: {})", json.len(), MAX_MESSAGE_SIZE));
    }

    // Write length prefix (u32 little-endian)
    let len = json.len() as u32;
    stream
        .write_all(&len.to_le_bytes())
        .await
        .context("Failed to write message length")?;

    // Write JSON payload
    stream
        .write_all(&json)
        .await
        .context("Failed to write message payload")?;

    stream.flush().await.context("Failed to flush stream")?;

    Ok(())
}

/// Read length-prefixed message from stream
///
/// Returns `Ok(None)` when the peer closed the stream between messages.
pub(crate) async fn read_message<R, T>(stream: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    // Read length prefix
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("Failed to read message length"),
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    // Sanity check (prevent DoS via huge allocation)
    if len > MAX_MESSAGE_SIZE {
        return Err(anyhow!("Message too large: {} bytes (max: {})", len, MAX_MESSAGE_SIZE));
    }

    // Read JSON payload
    let mut json_buf = vec![0u8; len];
    stream
        .read_exact(&mut json_buf)
        .await
        .context("Failed to read message payload")?;

    // Deserialize
    serde_json::from_slice(&json_buf)
        .map(Some)
        .context("Failed to deserialize message from JSON")
}
