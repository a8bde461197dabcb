//! HTTP/2 transport over the stdio pipes of a helper process
//!
//! Launches an external helper, treats its stdin/stdout as a single
//! full-duplex connection and runs cleartext HTTP/2 over it. A startup
//! handshake verifies that the helper speaks the protocol before the
//! transport is handed out.
//!
//! # Architecture
//!
//! - **Duplex pipe**: two unidirectional pipes presented as one stream
//! - **Launcher**: spawns the helper and manages its process group
//! - **Framed transport**: HTTP/2 client bound to exactly one connection

#![deny(unsafe_code)]
#![warn(missing_docs)]
//! - **Handshake**: a single `GET /` liveness probe
//!
//! # Usage
//!
//! ```ignore
//! use pipelink_transport::{FramedTransport, HANDSHAKE_TIMEOUT, handshake, launch};
//!
//! let (conn, mut process) = launch("rclone", &["serve", "restic", "--stdin", "local:/srv"])?;
//! let transport = FramedTransport::over(conn).await?;
//! handshake(&transport, &mut process, HANDSHAKE_TIMEOUT).await?;
//! ```

pub mod error;
pub mod http;
pub mod subprocess;
pub mod traits;

// Re-export commonly used types
pub use error::{Result, TransportError};
pub use http::{FramedTransport, HANDSHAKE_TIMEOUT, PipeDialer, handshake};
pub use subprocess::{DuplexPipe, PipeAddr, ProcessHandle, StdioConn, launch};
pub use traits::{HttpRequest, HttpResponse, Transport};
