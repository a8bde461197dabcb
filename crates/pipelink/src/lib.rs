//! Repository storage backend reached through a helper process
//!
//! The backend starts a helper (by default `rclone serve restic --stdin
//! <remote>`), speaks HTTP/2 to it over the helper's stdin/stdout and
//! issues repository REST requests on that single connection.
//!
//! # Example
//!
//! ```ignore
//! use pipelink::{Backend, Config, FileType, StorageBackend};
//!
//! let backend = Backend::open(Config::new("b2:bucket/repo")).await?;
//! for file in backend.list(FileType::Snapshot).await? {
//!     println!("{} {}", file.name, file.size);
//! }
//! backend.close().await?;
//! ```
//!
//! The same binary also ships the helper side: `pipelink serve restic
//! --stdin local:<dir>` serves a directory over its own stdio, see
//! [`server`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod error;
pub mod rest;
pub mod server;
pub mod shell;

pub use backend::{Backend, BackendState, DEFAULT_PROGRAM, StorageBackend, resolve_command};
pub use config::{Config, ConfigRegistry, ParseFn, SCHEME};
pub use error::{Error, Result};
pub use rest::{FileInfo, FileType, Handle, RestClient};
pub use server::{LocalStore, ServeOptions, Server};
pub use shell::split_shell_args;

pub use pipelink_transport as transport;
