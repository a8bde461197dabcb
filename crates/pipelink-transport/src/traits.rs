//! Transport trait and request/response types
//!
//! Defines the generic Transport trait implemented by the framed
//! transport, and the plain request/response values passed through it.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;

/// HTTP request to send over the transport
///
/// Represents an HTTP request to be sent via the Transport. The target is
/// a path relative to the transport's base URL.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method (GET, POST, etc.)
    pub method: String,

    /// Request path, including any query string
    pub path: String,

    /// Request headers
    pub headers: std::collections::HashMap<String, String>,

    /// Request body (optional)
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// Create a new HTTP request
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: std::collections::HashMap::new(),
            body: None,
        }
    }

    /// Add a header to the request
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the request body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// HTTP response
///
/// Represents an HTTP response received from the helper.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: StatusCode,

    /// Response headers
    pub headers: std::collections::HashMap<String, String>,

    /// Response body
    pub body: Bytes,
}

impl HttpResponse {
    /// Create a new HTTP response
    pub fn new(
        status: StatusCode,
        headers: std::collections::HashMap<String, String>,
        body: Bytes,
    ) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Check if response is successful (2xx)
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Parse response body as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the response body cannot be parsed as valid JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> crate::error::Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| crate::error::TransportError::Http(format!("invalid JSON body: {}", e)))
    }

    /// Get a header value by name (case-insensitive)
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Generic transport trait for request/response exchange with the helper
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an HTTP request and receive a response
    async fn send_http(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Check if transport is connected
    async fn is_connected(&self) -> bool;

    /// Close the transport connection
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = HttpRequest::new("POST", "/data/abc")
            .with_header("Content-Type", "application/octet-stream")
            .with_body(vec![1u8, 2, 3]);

        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/data/abc");
        assert_eq!(request.body.as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_json_body() {
        let body = Bytes::from_static(br#"[{"name":"ab","size":3}]"#);
        let response = HttpResponse::new(StatusCode::OK, Default::default(), body);
        let parsed: Vec<serde_json::Value> = response.json().unwrap();
        assert_eq!(parsed[0]["size"], 3);

        let broken = HttpResponse::new(StatusCode::OK, Default::default(), Bytes::from_static(b"[{"));
        assert!(matches!(
            broken.json::<Vec<serde_json::Value>>(),
            Err(crate::error::TransportError::Http(_))
        ));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut headers = std::collections::HashMap::new();
        headers.insert("content-length".to_string(), "42".to_string());
        let response = HttpResponse::new(StatusCode::OK, headers, Bytes::new());

        assert!(response.is_success());
        assert_eq!(response.get_header("Content-Length"), Some("42"));
        assert_eq!(response.get_header("etag"), None);
    }
}
