//! REST protocol client spoken over the helper transport
//!
//! Repository files live under one directory per file type (`data/`,
//! `keys/`, `locks/`, `snapshots/`, `index/`) plus a single `config`
//! file. Every request goes through the shared [`FramedTransport`], with
//! the number of concurrent requests bounded by a semaphore.

use crate::error::{Error, Result};
use bytes::Bytes;
use http::StatusCode;
use pipelink_transport::{FramedTransport, HttpRequest, HttpResponse, Transport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Media type selecting the listing format that includes file sizes.
pub const CONTENT_TYPE_V2: &str = "application/vnd.x.restic.rest.v2";

/// Kind of repository file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// The repository config
    Config,
    /// Pack files
    Data,
    /// Key files
    Key,
    /// Lock files
    Lock,
    /// Snapshot files
    Snapshot,
    /// Index files
    Index,
}

impl FileType {
    /// All file types, config first
    pub const ALL: [FileType; 6] = [
        FileType::Config,
        FileType::Data,
        FileType::Key,
        FileType::Lock,
        FileType::Snapshot,
        FileType::Index,
    ];

    /// Directory (or, for config, file) name in the repository layout
    pub fn dir(&self) -> &'static str {
        match self {
            FileType::Config => "config",
            FileType::Data => "data",
            FileType::Key => "keys",
            FileType::Lock => "locks",
            FileType::Snapshot => "snapshots",
            FileType::Index => "index",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir())
    }
}

impl FromStr for FileType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        FileType::ALL
            .into_iter()
            .find(|t| t.dir() == s)
            .ok_or_else(|| Error::InvalidHandle(format!("unknown file type {s:?}")))
    }
}

/// Names one file in the repository
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    /// File type
    pub kind: FileType,
    /// File name; empty for the config
    pub name: String,
}

impl Handle {
    /// Handle for a named file
    pub fn new(kind: FileType, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Handle for the repository config
    pub fn config() -> Self {
        Self::new(FileType::Config, "")
    }

    /// Check that the handle can be addressed
    pub fn validate(&self) -> Result<()> {
        if self.kind == FileType::Config {
            return Ok(());
        }
        if self.name.is_empty() {
            return Err(Error::InvalidHandle(format!("{}: empty name", self.kind)));
        }
        if self.name.contains('/') || self.name == "." || self.name == ".." {
            return Err(Error::InvalidHandle(format!("{}/{}", self.kind, self.name)));
        }
        Ok(())
    }

    /// Request path for this handle
    pub fn path(&self) -> String {
        match self.kind {
            FileType::Config => "/config".to_string(),
            kind => format!("/{}/{}", kind.dir(), self.name),
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FileType::Config => f.write_str("config"),
            kind => write!(f, "{}/{}", kind, self.name),
        }
    }
}

/// Name and size of a stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// File name
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

/// Value of a `Range` header for `length` bytes at `offset`.
///
/// A zero length means "to the end"; `None` means the whole file. A range
/// whose last byte lies past `u64::MAX` is rejected.
pub fn range_header(length: u64, offset: u64) -> Result<Option<String>> {
    match (length, offset) {
        (0, 0) => Ok(None),
        (0, offset) => Ok(Some(format!("bytes={}-", offset))),
        (length, offset) => {
            let last = offset.checked_add(length - 1).ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("range of {length} bytes at offset {offset} overflows"),
                ))
            })?;
            Ok(Some(format!("bytes={}-{}", offset, last)))
        }
    }
}

/// Client for the repository REST layout
#[derive(Debug, Clone)]
pub struct RestClient {
    transport: Arc<FramedTransport>,
    permits: Arc<Semaphore>,
}

impl RestClient {
    /// Build a client on an already verified transport
    ///
    /// At most `connections` requests are in flight at once.
    pub fn new(transport: Arc<FramedTransport>, connections: usize) -> Self {
        Self {
            transport,
            permits: Arc::new(Semaphore::new(connections.max(1))),
        }
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::AlreadyClosed)?;
        tracing::trace!(method = %request.method, path = %request.path, "request");
        Ok(self.transport.send_http(request).await?)
    }

    /// Create the repository layout on the remote
    pub async fn create(&self) -> Result<()> {
        let response = self.send(HttpRequest::new("POST", "/?create=true")).await?;
        expect_success(response, "repository")?;
        Ok(())
    }

    /// Store `data` under `handle`
    pub async fn save(&self, handle: &Handle, data: Bytes) -> Result<()> {
        handle.validate()?;
        let request = HttpRequest::new("POST", handle.path())
            .with_header("content-type", "application/octet-stream")
            .with_body(data);
        let response = self.send(request).await?;
        expect_success(response, &handle.to_string())?;
        Ok(())
    }

    /// Read `length` bytes at `offset` from `handle`; length 0 reads to the end
    pub async fn load(&self, handle: &Handle, length: u64, offset: u64) -> Result<Bytes> {
        handle.validate()?;
        let mut request = HttpRequest::new("GET", handle.path());
        if let Some(range) = range_header(length, offset)? {
            request = request.with_header("range", range);
        }
        let response = expect_success(self.send(request).await?, &handle.to_string())?;

        let body = response.body;
        if length > 0 && (body.len() as u64) < length {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{handle}: short read, wanted {length} bytes, got {}", body.len()),
            )));
        }
        Ok(body)
    }

    /// Size of the file behind `handle`
    pub async fn stat(&self, handle: &Handle) -> Result<FileInfo> {
        handle.validate()?;
        let response = self.send(HttpRequest::new("HEAD", handle.path())).await?;
        let response = expect_success(response, &handle.to_string())?;

        let size = response
            .get_header("content-length")
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("{handle}: missing content-length"),
                ))
            })?;

        Ok(FileInfo {
            name: handle.name.clone(),
            size,
        })
    }

    /// Whether `handle` exists
    pub async fn exists(&self, handle: &Handle) -> Result<bool> {
        match self.stat(handle).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove the file behind `handle`
    pub async fn remove(&self, handle: &Handle) -> Result<()> {
        handle.validate()?;
        let response = self.send(HttpRequest::new("DELETE", handle.path())).await?;
        expect_success(response, &handle.to_string())?;
        Ok(())
    }

    /// List all files of one type
    pub async fn list(&self, kind: FileType) -> Result<Vec<FileInfo>> {
        if kind == FileType::Config {
            return Err(Error::InvalidHandle("config cannot be listed".to_string()));
        }
        let request = HttpRequest::new("GET", format!("/{}/", kind.dir()))
            .with_header("accept", CONTENT_TYPE_V2);
        let response = self.send(request).await?;

        // a repository without this directory simply has no such files
        if response.status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = expect_success(response, kind.dir())?;
        Ok(response.json()?)
    }
}

fn expect_success(response: HttpResponse, target: &str) -> Result<HttpResponse> {
    match response.status {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(Error::NotFound(target.to_string())),
        status => Err(Error::UnexpectedStatus {
            status,
            target: target.to_string(),
        }),
    }
}
