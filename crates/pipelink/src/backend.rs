//! Storage backend reached through a helper process
//!
//! [`Backend::open`] resolves the helper command line, launches it, runs
//! HTTP/2 over its stdio pipes and probes it with a handshake before any
//! repository request is made. [`Backend::close`] drops the connection,
//! which the helper sees as EOF, then waits for it to exit.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::rest::{FileInfo, FileType, Handle, RestClient};
use crate::shell::split_shell_args;
use async_trait::async_trait;
use bytes::Bytes;
use pipelink_transport::{FramedTransport, ProcessHandle, handshake, launch};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

/// Program started when no command override is configured.
pub const DEFAULT_PROGRAM: &str = "rclone";

/// Operations a repository backend offers
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Human-readable location of the repository
    fn location(&self) -> &str;

    /// Create the repository layout on the remote
    async fn init(&self) -> Result<()>;

    /// Store `data` under `handle`
    async fn save(&self, handle: &Handle, data: Bytes) -> Result<()>;

    /// Read `length` bytes at `offset`; length 0 reads to the end
    async fn load(&self, handle: &Handle, length: u64, offset: u64) -> Result<Bytes>;

    /// Name and size of a file
    async fn stat(&self, handle: &Handle) -> Result<FileInfo>;

    /// Whether a file exists
    async fn exists(&self, handle: &Handle) -> Result<bool>;

    /// Remove a file
    async fn remove(&self, handle: &Handle) -> Result<()>;

    /// List all files of one type
    async fn list(&self, kind: FileType) -> Result<Vec<FileInfo>>;

    /// Remove every file of the repository, config last
    async fn delete(&self) -> Result<()> {
        for kind in FileType::ALL.into_iter().filter(|k| *k != FileType::Config) {
            for file in self.list(kind).await? {
                self.remove(&Handle::new(kind, file.name)).await?;
            }
        }
        match self.remove(&Handle::config()).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

/// Lifecycle of a backend; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackendState {
    /// Helper not launched yet
    NotStarted,
    /// Helper launched, handshake in progress
    Handshaking,
    /// Handshake passed, requests may be sent
    Ready,
    /// Connection dropped and helper reaped, or startup failed
    Closed,
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BackendState::NotStarted => "not started",
            BackendState::Handshaking => "handshaking",
            BackendState::Ready => "ready",
            BackendState::Closed => "closed",
        })
    }
}

/// Program and arguments the helper is started with
///
/// Without an override this is `rclone serve restic --stdin <remote>`.
pub fn resolve_command(config: &Config) -> Result<(String, Vec<String>)> {
    if config.command.is_empty() {
        let args = ["serve", "restic", "--stdin", config.remote.as_str()];
        return Ok((
            DEFAULT_PROGRAM.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
        ));
    }
    split_shell_args(&config.command)
}

struct Session {
    client: RestClient,
    transport: Arc<FramedTransport>,
}

/// Backend that talks to a repository through a helper process
pub struct Backend {
    config: Config,
    location: String,
    state: std::sync::Mutex<BackendState>,
    session: OnceLock<Session>,
    process: Mutex<Option<ProcessHandle>>,
}

impl Backend {
    /// Backend for `config`; nothing is launched until [`Backend::start`]
    pub fn new(config: Config) -> Self {
        Self {
            location: format!("{}:{}", crate::config::SCHEME, config.remote),
            config,
            state: std::sync::Mutex::new(BackendState::NotStarted),
            session: OnceLock::new(),
            process: Mutex::new(None),
        }
    }

    /// Launch the helper and verify it answers the handshake
    pub async fn open(config: Config) -> Result<Self> {
        let backend = Self::new(config);
        backend.start().await?;
        Ok(backend)
    }

    /// Open the backend and create the repository layout
    pub async fn create(config: Config) -> Result<Self> {
        let backend = Self::open(config).await?;
        if let Err(err) = backend.init().await {
            if let Err(close_err) = backend.close().await {
                tracing::warn!(error = %close_err, "failed to close helper after create error");
            }
            return Err(err);
        }
        Ok(backend)
    }

    /// Current lifecycle state
    pub fn state(&self) -> BackendState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move forward to `to`; returns the state before the call.
    ///
    /// Backward transitions leave the state untouched.
    fn advance(&self, to: BackendState) -> BackendState {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = *state;
        if to > previous {
            *state = to;
            tracing::debug!(from = %previous, to = %to, location = %self.location, "backend state");
        }
        previous
    }

    /// Launch the helper, run the handshake and make the backend ready.
    ///
    /// Only valid on a backend that was never started. Any failure moves
    /// the backend to [`BackendState::Closed`].
    pub async fn start(&self) -> Result<()> {
        match self.advance(BackendState::Handshaking) {
            BackendState::NotStarted => {}
            state => {
                return Err(Error::InvalidState {
                    state,
                    operation: "start",
                });
            }
        }

        match self.spawn_helper().await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.advance(BackendState::Closed);
                Err(err)
            }
        }
    }

    async fn spawn_helper(&self) -> Result<()> {
        let (program, args) = resolve_command(&self.config)?;
        tracing::debug!(%program, ?args, "starting helper");

        let (conn, mut process) = launch(&program, &args)?;
        let transport = match FramedTransport::over(conn).await {
            Ok(transport) => transport,
            Err(err) => {
                if let Err(kill_err) = process.kill().await {
                    tracing::warn!(error = %kill_err, "failed to kill helper");
                }
                return Err(err.into());
            }
        };
        handshake(&transport, &mut process, self.config.handshake_timeout).await?;

        let transport = Arc::new(transport);
        let client = RestClient::new(transport.clone(), self.config.connections);

        let mut slot = self.process.lock().await;
        if self.advance(BackendState::Ready) == BackendState::Closed {
            // closed while the handshake was running
            transport.close_idle_connections();
            if let Err(kill_err) = process.kill().await {
                tracing::warn!(error = %kill_err, "failed to kill helper");
            }
            return Err(Error::AlreadyClosed);
        }
        self.session.get_or_init(|| Session { client, transport });
        *slot = Some(process);
        Ok(())
    }

    fn session(&self) -> Result<&Session> {
        self.session.get().ok_or_else(|| Error::InvalidState {
            state: self.state(),
            operation: "send requests on",
        })
    }

    /// Process id of the helper while it is running
    pub async fn helper_pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(|p| p.pid())
    }

    /// Close the connection and wait for the helper to exit.
    ///
    /// Blocks until the helper is gone; a non-zero exit is returned as
    /// [`Error::ChildExit`]. Calling this again returns
    /// [`Error::AlreadyClosed`] and leaves the reaped helper alone.
    pub async fn close(&self) -> Result<()> {
        let mut slot = self.process.lock().await;
        if self.advance(BackendState::Closed) == BackendState::Closed {
            return Err(Error::AlreadyClosed);
        }
        // not started, or still handshaking: `start` reaps its own helper
        let Some(mut process) = slot.take() else {
            return Ok(());
        };
        drop(slot);

        if let Some(session) = self.session.get() {
            session.transport.close_idle_connections();
            if let Err(e) = session.transport.shutdown().await {
                tracing::debug!(error = %e, "transport already shut down");
            }
        }

        let status = process.wait().await?;
        tracing::info!(%status, location = %self.location, "helper exited");
        if status.success() {
            Ok(())
        } else {
            Err(Error::ChildExit(status))
        }
    }
}

#[async_trait]
impl StorageBackend for Backend {
    fn location(&self) -> &str {
        &self.location
    }

    async fn init(&self) -> Result<()> {
        self.session()?.client.create().await
    }

    async fn save(&self, handle: &Handle, data: Bytes) -> Result<()> {
        self.session()?.client.save(handle, data).await
    }

    async fn load(&self, handle: &Handle, length: u64, offset: u64) -> Result<Bytes> {
        self.session()?.client.load(handle, length, offset).await
    }

    async fn stat(&self, handle: &Handle) -> Result<FileInfo> {
        self.session()?.client.stat(handle).await
    }

    async fn exists(&self, handle: &Handle) -> Result<bool> {
        self.session()?.client.exists(handle).await
    }

    async fn remove(&self, handle: &Handle) -> Result<()> {
        self.session()?.client.remove(handle).await
    }

    async fn list(&self, kind: FileType) -> Result<Vec<FileInfo>> {
        self.session()?.client.list(kind).await
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("location", &self.location)
            .field("state", &self.state())
            .finish()
    }
}
