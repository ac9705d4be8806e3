//! HTTP access for network-backed resolution strategies.

use std::time::Duration;

use crate::error::{Error, Result};

/// Response of a GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into [`Error::Network`].
    pub fn into_body(self, url: &str) -> Result<String> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(Error::Network(format!("GET {} returned HTTP {}", url, self.status)))
        }
    }
}

/// Blocking HTTP client.
///
/// Resolution runs on the session's thread, so the client blocks.
pub trait HttpClient: Send + Sync {
    /// Perform a GET request with extra headers.
    ///
    /// Transport failures are [`Error::Network`]; HTTP error statuses are
    /// returned as responses.
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse>;
}

/// [`HttpClient`] backed by `reqwest`.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Create a client with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("jotter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse> {
        tracing::debug!("GET {}", url);

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request
            .send()
            .map_err(|e| Error::Network(format!("Failed to fetch {}: {}", url, e)))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| Error::Network(format!("Failed to read response from {}: {}", url, e)))?;

        Ok(HttpResponse { status, body })
    }
}
