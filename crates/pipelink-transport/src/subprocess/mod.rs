//! Subprocess side of the transport
//!
//! Starts the helper process and presents its stdin/stdout as a single
//! bidirectional connection.

pub mod conn;
pub mod process;

pub use conn::{DuplexPipe, PipeAddr, StdioConn};
pub use process::{ProcessHandle, launch};
