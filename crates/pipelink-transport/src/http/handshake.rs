//! Startup handshake against a freshly launched helper

use super::client::FramedTransport;
use crate::error::{Result, TransportError};
use crate::subprocess::ProcessHandle;
use crate::traits::{HttpRequest, Transport};
use http::StatusCode;
use std::time::Duration;

/// Default bound on the handshake request.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Probe the helper with a single `GET /`.
///
/// A 200 moves the helper out of the terminal's foreground group and
/// returns. Anything else (transport error, timeout, other status) is
/// fatal: the helper is backgrounded, killed and reaped, and the error is
/// returned. The response body is not inspected.
pub async fn handshake(
    transport: &FramedTransport,
    process: &mut ProcessHandle,
    timeout: Duration,
) -> Result<()> {
    let outcome = match tokio::time::timeout(timeout, transport.send_http(HttpRequest::new("GET", "/")))
        .await
    {
        Err(_) => Err(TransportError::Timeout(timeout)),
        Ok(Err(e)) => Err(e),
        Ok(Ok(response)) if response.status == StatusCode::OK => Ok(()),
        Ok(Ok(response)) => Err(TransportError::HandshakeStatus {
            status: response.status,
        }),
    };

    match outcome {
        Ok(()) => {
            process.background();
            tracing::info!(pid = ?process.pid(), command = %process.command_line(), "helper is ready");
            Ok(())
        }
        Err(err) => {
            tracing::warn!(pid = ?process.pid(), error = %err, "helper handshake failed");
            transport.close_idle_connections();
            if let Err(kill_err) = process.kill().await {
                tracing::warn!(pid = ?process.pid(), error = %kill_err, "failed to kill helper");
            }
            Err(err)
        }
    }
}
