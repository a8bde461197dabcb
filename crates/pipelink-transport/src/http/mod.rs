//! HTTP/2 transport over the pipe connection
//!
//! Provides a single-connection HTTP/2 client that implements the
//! Transport trait, and the startup handshake run against it.

pub mod client;
pub mod handshake;

pub use client::{FramedTransport, PipeDialer};
pub use handshake::{HANDSHAKE_TIMEOUT, handshake};
