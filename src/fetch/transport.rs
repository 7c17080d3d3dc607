//! HTTP transport boundary.
//!
//! The engine only needs a request/response primitive with query-string
//! support. [`ReqwestTransport`] is the production implementation; tests
//! supply in-memory backends.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("response from {url} is not valid JSON: {message}")]
    Decode { url: String, message: String },

    #[error("unsupported HTTP method {0:?}")]
    InvalidMethod(String),
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send one request and return the decoded JSON body.
    async fn request(
        &self,
        method: &str,
        url: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Value, TransportError>;
}

/// `reqwest`-backed transport. Relative endpoints are joined onto `base_url`.
pub struct ReqwestTransport {
    client: Client,
    base_url: Option<String>,
}

impl ReqwestTransport {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request {
                url: base_url.clone().unwrap_or_default(),
                message: e.to_string(),
            })?;
        Ok(Self { client, base_url })
    }

    pub fn with_client(client: Client, base_url: Option<String>) -> Self {
        Self { client, base_url }
    }

    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        match &self.base_url {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            ),
            None => url.to_string(),
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn request(
        &self,
        method: &str,
        url: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Value, TransportError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| TransportError::InvalidMethod(method.to_string()))?;
        let url = self.resolve_url(url);

        debug!(%method, url = %url, "Sending request");

        let response = self
            .client
            .request(method, &url)
            .query(params)
            .send()
            .await
            .map_err(|e| TransportError::Request {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url,
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Decode {
                url,
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_url() {
        let transport = ReqwestTransport::with_client(
            Client::new(),
            Some("https://api.example.com/".to_string()),
        );
        assert_eq!(
            transport.resolve_url("/v1/posts?page=1"),
            "https://api.example.com/v1/posts?page=1"
        );
        assert_eq!(
            transport.resolve_url("http://other.host/x"),
            "http://other.host/x"
        );
    }

    #[test]
    fn test_resolve_without_base() {
        let transport = ReqwestTransport::with_client(Client::new(), None);
        assert_eq!(transport.resolve_url("/v1/posts"), "/v1/posts");
    }
}
