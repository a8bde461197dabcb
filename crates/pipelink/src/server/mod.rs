//! Helper side: serve a repository over HTTP/2 on stdin/stdout
//!
//! This is what `pipelink serve restic --stdin local:<dir>` runs. It speaks
//! the same REST layout as [`RestClient`](crate::rest::RestClient) and exits
//! once the client closes the pipes.

pub mod store;

pub use store::LocalStore;

use crate::error::{Error, Result};
use crate::rest::{CONTENT_TYPE_V2, FileInfo, FileType, Handle};
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use pipelink_transport::DuplexPipe;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Media type of the name-only listing format.
pub const CONTENT_TYPE_V1: &str = "application/vnd.x.restic.rest.v1";

/// Behavior switches for the helper
#[derive(Debug, Clone, Copy, Default)]
pub struct ServeOptions {
    /// Refuse deletes (except locks) and overwrites
    pub append_only: bool,

    /// Answer every request with 503, e.g. during maintenance
    pub unavailable: bool,
}

/// Serves one repository over one connection
#[derive(Debug)]
pub struct Server {
    store: LocalStore,
    options: ServeOptions,
}

/// Read and write halves of the process's own stdio.
pub type StdioPipe =
    DuplexPipe<Box<dyn AsyncRead + Send + Unpin>, Box<dyn AsyncWrite + Send + Unpin>>;

/// Our own stdin/stdout as one connection.
///
/// When they are pipes they are driven by the reactor directly; otherwise
/// tokio's blocking stdio handles are used.
pub fn stdio_pipe() -> StdioPipe {
    #[cfg(unix)]
    {
        use std::os::fd::AsFd;
        use tokio::net::unix::pipe;

        let reader: Box<dyn AsyncRead + Send + Unpin> = match std::io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .and_then(|fd| pipe::Receiver::from_file(std::fs::File::from(fd)))
        {
            Ok(rx) => Box::new(rx),
            Err(_) => Box::new(tokio::io::stdin()),
        };
        let writer: Box<dyn AsyncWrite + Send + Unpin> = match std::io::stdout()
            .as_fd()
            .try_clone_to_owned()
            .and_then(|fd| pipe::Sender::from_file(std::fs::File::from(fd)))
        {
            Ok(tx) => Box::new(tx),
            Err(_) => Box::new(tokio::io::stdout()),
        };
        DuplexPipe::new(reader, writer)
    }

    #[cfg(not(unix))]
    {
        DuplexPipe::new(
            Box::new(tokio::io::stdin()) as Box<dyn AsyncRead + Send + Unpin>,
            Box::new(tokio::io::stdout()) as Box<dyn AsyncWrite + Send + Unpin>,
        )
    }
}

impl Server {
    /// Server for `store`
    pub fn new(store: LocalStore, options: ServeOptions) -> Self {
        Self { store, options }
    }

    /// Server for a remote of the form `local:<path>`
    pub fn for_remote(remote: &str, options: ServeOptions) -> Result<Self> {
        Ok(Self::new(LocalStore::from_remote(remote)?, options))
    }

    /// Serve HTTP/2 on `io` until the client goes away.
    ///
    /// The connection ending, cleanly or not, is how a helper is told to
    /// quit, so connection errors are logged rather than returned.
    pub async fn serve<T>(self, io: T)
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let server = Arc::new(self);
        let service = service_fn(move |req: Request<Incoming>| {
            let server = server.clone();
            async move { Ok::<_, Infallible>(server.handle(req).await) }
        });

        match hyper::server::conn::http2::Builder::new(TokioExecutor::new())
            .serve_connection(TokioIo::new(io), service)
            .await
        {
            Ok(()) => tracing::debug!("client closed the connection"),
            Err(e) => tracing::debug!(error = %e, "connection ended"),
        }
    }

    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        tracing::debug!(%method, %path, "request");

        if self.options.unavailable {
            return status(StatusCode::SERVICE_UNAVAILABLE);
        }

        let result = match Target::parse(&path) {
            Some(Target::Root) => self.root(&method, req).await,
            Some(Target::Dir(kind)) if method == Method::GET => self.list(kind, &req).await,
            Some(Target::File(handle)) => self.file(&method, handle, req).await,
            Some(Target::Dir(_)) => Ok(status(StatusCode::METHOD_NOT_ALLOWED)),
            None => Ok(status(StatusCode::NOT_FOUND)),
        };

        result.unwrap_or_else(|err| {
            let code = match &err {
                Error::NotFound(_) => StatusCode::NOT_FOUND,
                Error::InvalidHandle(_) => StatusCode::BAD_REQUEST,
                Error::Io(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                    StatusCode::RANGE_NOT_SATISFIABLE
                }
                _ => {
                    tracing::warn!(%method, %path, error = %err, "request failed");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            status(code)
        })
    }

    async fn root(&self, method: &Method, req: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        match *method {
            Method::GET | Method::HEAD => Ok(status(StatusCode::OK)),
            Method::POST if req.uri().query() == Some("create=true") => {
                self.store.create().await?;
                Ok(status(StatusCode::OK))
            }
            Method::POST => Ok(status(StatusCode::BAD_REQUEST)),
            _ => Ok(status(StatusCode::METHOD_NOT_ALLOWED)),
        }
    }

    async fn list(&self, kind: FileType, req: &Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        let files = self.store.list(kind).await?;
        let wants_v2 = req
            .headers()
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains(CONTENT_TYPE_V2));

        let (content_type, body) = if wants_v2 {
            (CONTENT_TYPE_V2, serde_json::to_vec(&files)?)
        } else {
            let names: Vec<&str> = files.iter().map(|f: &FileInfo| f.name.as_str()).collect();
            (CONTENT_TYPE_V1, serde_json::to_vec(&names)?)
        };

        Ok(Response::builder()
            .header(header::CONTENT_TYPE, content_type)
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|_| status(StatusCode::INTERNAL_SERVER_ERROR)))
    }

    async fn file(
        &self,
        method: &Method,
        handle: Handle,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>> {
        match *method {
            Method::HEAD => {
                let size = self.store.stat(&handle).await?;
                Ok(Response::builder()
                    .header(header::CONTENT_LENGTH, size)
                    .body(Full::new(Bytes::new()))
                    .unwrap_or_else(|_| status(StatusCode::INTERNAL_SERVER_ERROR)))
            }
            Method::GET => {
                let range = req
                    .headers()
                    .get(header::RANGE)
                    .and_then(|v| v.to_str().ok())
                    .map(parse_range)
                    .transpose()?;
                let (start, end) = range.unwrap_or((0, None));
                let data = self.store.load(&handle, start, end).await?;
                let code = if range.is_some() {
                    StatusCode::PARTIAL_CONTENT
                } else {
                    StatusCode::OK
                };
                Ok(Response::builder()
                    .status(code)
                    .header(header::CONTENT_TYPE, "application/octet-stream")
                    .body(Full::new(data))
                    .unwrap_or_else(|_| status(StatusCode::INTERNAL_SERVER_ERROR)))
            }
            Method::POST => {
                if self.options.append_only && self.store.stat(&handle).await.is_ok() {
                    return Ok(status(StatusCode::FORBIDDEN));
                }
                let body = req
                    .into_body()
                    .collect()
                    .await
                    .map_err(|e| Error::Io(std::io::Error::other(e)))?
                    .to_bytes();
                self.store.save(&handle, &body).await?;
                Ok(status(StatusCode::OK))
            }
            Method::DELETE => {
                if self.options.append_only && handle.kind != FileType::Lock {
                    return Ok(status(StatusCode::FORBIDDEN));
                }
                self.store.remove(&handle).await?;
                Ok(status(StatusCode::OK))
            }
            _ => Ok(status(StatusCode::METHOD_NOT_ALLOWED)),
        }
    }
}

enum Target {
    Root,
    Dir(FileType),
    File(Handle),
}

impl Target {
    fn parse(path: &str) -> Option<Self> {
        if path == "/" {
            return Some(Target::Root);
        }
        if path == "/config" {
            return Some(Target::File(Handle::config()));
        }
        let (dir, name) = path.strip_prefix('/')?.split_once('/')?;
        let kind = dir.parse::<FileType>().ok()?;
        if kind == FileType::Config {
            return None;
        }
        if name.is_empty() {
            Some(Target::Dir(kind))
        } else {
            Some(Target::File(Handle::new(kind, name)))
        }
    }
}

/// Parse `bytes=<start>-[<end>]` into an inclusive range.
fn parse_range(value: &str) -> Result<(u64, Option<u64>)> {
    let invalid = || {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unsupported range {value:?}"),
        ))
    };
    let (start, end) = value
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .ok_or_else(invalid)?;
    let start = start.parse::<u64>().map_err(|_| invalid())?;
    let end = match end {
        "" => None,
        end => Some(end.parse::<u64>().map_err(|_| invalid())?),
    };
    if end.is_some_and(|end| end < start) {
        return Err(invalid());
    }
    Ok((start, end))
}

fn status(code: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = code;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::RestClient;
    use pipelink_transport::{FramedTransport, HttpRequest, Transport};
    use rstest::rstest;

    async fn client_for(dir: &std::path::Path, options: ServeOptions) -> RestClient {
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);
        let server = Server::new(LocalStore::new(dir), options);
        tokio::spawn(server.serve(server_io));

        let transport = FramedTransport::over(client_io).await.unwrap();
        RestClient::new(Arc::new(transport), 4)
    }

    #[rstest]
    #[case("bytes=0-", (0, None))]
    #[case("bytes=10-19", (10, Some(19)))]
    fn test_parse_range(#[case] value: &str, #[case] expected: (u64, Option<u64>)) {
        assert_eq!(parse_range(value).unwrap(), expected);
    }

    #[rstest]
    #[case("bytes=5-1")]
    #[case("items=0-1")]
    #[case("bytes=-5")]
    fn test_parse_range_rejects(#[case] value: &str) {
        assert!(parse_range(value).is_err());
    }

    #[tokio::test]
    async fn test_round_trip_through_rest_client() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(dir.path(), ServeOptions::default()).await;
        client.create().await.unwrap();

        let handle = Handle::new(FileType::Snapshot, "0a1b2c");
        client.save(&handle, Bytes::from_static(b"snapshot")).await.unwrap();

        assert_eq!(&client.load(&handle, 0, 0).await.unwrap()[..], b"snapshot");
        assert_eq!(&client.load(&handle, 4, 4).await.unwrap()[..], b"shot");
        assert_eq!(client.stat(&handle).await.unwrap().size, 8);
        assert_eq!(client.list(FileType::Snapshot).await.unwrap().len(), 1);

        client.remove(&handle).await.unwrap();
        assert!(!client.exists(&handle).await.unwrap());
        assert!(client.load(&handle, 0, 0).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_open_ended_range_up_to_u64_max() {
        let dir = tempfile::tempdir().unwrap();
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        tokio::spawn(Server::new(LocalStore::new(dir.path()), ServeOptions::default()).serve(server_io));
        let transport = FramedTransport::over(client_io).await.unwrap();

        let handle = Handle::new(FileType::Index, "big-range");
        LocalStore::new(dir.path())
            .save(&handle, b"0123456789")
            .await
            .unwrap();

        let request = HttpRequest::new("GET", handle.path())
            .with_header("range", format!("bytes=4-{}", u64::MAX));
        let response = transport.send_http(request).await.unwrap();
        assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(&response.body[..], b"456789");
    }

    #[tokio::test]
    async fn test_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(dir.path(), ServeOptions::default()).await;

        assert!(!client.exists(&Handle::config()).await.unwrap());
        client
            .save(&Handle::config(), Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert!(dir.path().join("config").is_file());
        assert!(client.exists(&Handle::config()).await.unwrap());
    }

    #[tokio::test]
    async fn test_listing_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(dir.path(), ServeOptions::default()).await;
        assert!(client.list(FileType::Key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_only_refuses_delete_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let options = ServeOptions {
            append_only: true,
            ..ServeOptions::default()
        };
        let client = client_for(dir.path(), options).await;

        let data = Handle::new(FileType::Data, "ffee");
        client.save(&data, Bytes::from_static(b"x")).await.unwrap();
        assert!(matches!(
            client.save(&data, Bytes::from_static(b"y")).await,
            Err(Error::UnexpectedStatus { status: StatusCode::FORBIDDEN, .. })
        ));
        assert!(matches!(
            client.remove(&data).await,
            Err(Error::UnexpectedStatus { status: StatusCode::FORBIDDEN, .. })
        ));

        let lock = Handle::new(FileType::Lock, "l1");
        client.save(&lock, Bytes::from_static(b"lock")).await.unwrap();
        client.remove(&lock).await.unwrap();
    }

    #[tokio::test]
    async fn test_unavailable_answers_503() {
        let dir = tempfile::tempdir().unwrap();
        let options = ServeOptions {
            unavailable: true,
            ..ServeOptions::default()
        };
        let client = client_for(dir.path(), options).await;

        assert!(matches!(
            client.create().await,
            Err(Error::UnexpectedStatus { status: StatusCode::SERVICE_UNAVAILABLE, .. })
        ));
    }
}
