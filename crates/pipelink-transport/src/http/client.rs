//! Framed transport client implementation
//!
//! Implements the Transport trait with an HTTP/2 client that runs in
//! cleartext over a single pre-established connection.

use crate::error::{Result, TransportError};
use crate::traits::{HttpRequest, HttpResponse, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http2::SendRequest;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

/// Authority used for every request; the helper ignores it.
pub const BASE_URL: &str = "http://localhost";

/// How long a closing connection may take to drain in-flight streams.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Dial hook that always yields the one pre-established connection
///
/// The network and address it is asked for are logged and otherwise
/// ignored, there is no TLS step. The connection is handed out once; any
/// later dial is an error since the transport never redials.
pub struct PipeDialer<T> {
    conn: Mutex<Option<T>>,
}

impl<T> PipeDialer<T> {
    /// Wrap an already-open connection
    pub fn new(conn: T) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    /// Hand out the connection
    pub fn dial(&self, network: &str, address: &str) -> Result<T> {
        tracing::debug!(network, address, "new connection requested");
        lock(&self.conn)
            .take()
            .ok_or_else(|| TransportError::Redial(address.to_string()))
    }
}

/// HTTP/2 transport bound to a single connection
///
/// Handles requests with:
/// - Stream multiplexing over the one connection
/// - Graceful close that lets the peer see EOF
pub struct FramedTransport {
    sender: Mutex<Option<SendRequest<Full<Bytes>>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl FramedTransport {
    /// Run the HTTP/2 client handshake over `conn`
    pub async fn over<T>(conn: T) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::connect(&PipeDialer::new(conn)).await
    }

    /// Dial through `dialer` and start the connection driver
    pub async fn connect<T>(dialer: &PipeDialer<T>) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let io = dialer.dial("tcp", "localhost:80")?;

        // prior knowledge: the pipe carries h2c, no upgrade and no TLS
        let (sender, connection) = hyper::client::conn::http2::Builder::new(TokioExecutor::new())
            .handshake::<_, Full<Bytes>>(TokioIo::new(io))
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let driver = tokio::spawn(async move {
            match connection.await {
                Ok(()) => tracing::debug!("HTTP/2 connection finished"),
                Err(e) => tracing::debug!(error = %e, "HTTP/2 connection ended with error"),
            }
        });

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Drop our handle on the connection.
    ///
    /// Once in-flight streams finish the connection shuts down and the pipe
    /// ends are closed, which the helper sees as EOF.
    pub fn close_idle_connections(&self) {
        if lock(&self.sender).take().is_some() {
            tracing::debug!("closing idle HTTP/2 connection");
        }
    }

    /// Close the connection and wait for its driver to finish.
    pub async fn shutdown(&self) -> Result<()> {
        self.close_idle_connections();

        let Some(mut driver) = lock(&self.driver).take() else {
            return Err(TransportError::Closed("transport"));
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut driver).await.is_err() {
            tracing::warn!("HTTP/2 connection did not drain, aborting");
            driver.abort();
        }
        Ok(())
    }

    fn sender(&self) -> Result<SendRequest<Full<Bytes>>> {
        lock(&self.sender)
            .as_ref()
            .cloned()
            .ok_or(TransportError::Closed("transport"))
    }

    async fn exchange(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = http::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| TransportError::Http(format!("Unsupported HTTP method: {}", request.method)))?;

        let uri = if request.path.starts_with('/') {
            format!("{}{}", BASE_URL, request.path)
        } else {
            format!("{}/{}", BASE_URL, request.path)
        };

        let mut builder = http::Request::builder().method(method).uri(uri);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        let req = builder.body(Full::new(request.body.unwrap_or_default()))?;

        let mut sender = self.sender()?;
        sender.ready().await?;
        let response = sender.send_request(req).await?;

        let (parts, body) = response.into_parts();
        let mut headers = std::collections::HashMap::new();
        for (key, value) in &parts.headers {
            if let Ok(v) = value.to_str() {
                headers.insert(key.to_string(), v.to_string());
            }
        }

        let body = body.collect().await?.to_bytes();

        Ok(HttpResponse::new(parts.status, headers, body))
    }
}

#[async_trait]
impl Transport for FramedTransport {
    async fn send_http(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.exchange(request).await
    }

    async fn is_connected(&self) -> bool {
        lock(&self.sender)
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }

    async fn close(&self) -> Result<()> {
        self.shutdown().await
    }
}

impl std::fmt::Debug for FramedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedTransport")
            .field("open", &lock(&self.sender).is_some())
            .finish()
    }
}
