//! HTTP round trips against the cluster's administrative endpoints.
//!
//! See [`ScrapeClient`] for details.

use std::time::Duration;

use bytes::Bytes;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

/// Failure of a single scrape.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The request could not be sent or the response could not be read.
    #[error("failed to get from {url}: {source}")]
    Transport {
        /// Requested URL.
        url: Url,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The upstream answered with anything but `200 OK`.
    #[error("HTTP request to {url} failed with code {code}")]
    Status {
        /// Requested URL.
        url: Url,
        /// HTTP status code of the response.
        code: u16,
    },
    /// The body is not the expected JSON document.
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        /// Requested URL.
        url: Url,
        /// Position and cause of the decode failure.
        #[source]
        source: serde_json::Error,
    },
}

impl ScrapeError {
    /// Whether the body arrived but did not decode. Only these failures count
    /// as JSON parse failures.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// The URL the failed request was sent to.
    pub fn url(&self) -> &Url {
        match self {
            Self::Transport { url, .. } | Self::Status { url, .. } | Self::Decode { url, .. } => {
                url
            }
        }
    }
}

/// The HTTP method and body of a scrape.
#[derive(Clone, Debug, PartialEq)]
pub enum ScrapeRequest {
    /// Plain GET without a body.
    Get,
    /// POST with `Content-Type: application/json`.
    PostJson(String),
}

/// A blocking HTTP client shared by all collectors.
///
/// Cloning is cheap and clones share the connection pool, so one client
/// built from the exporter configuration serves every collector.
#[derive(Clone, Debug)]
pub struct ScrapeClient {
    http: Client,
}

impl ScrapeClient {
    /// Build a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        Ok(Self { http })
    }

    /// Issue one request and return the full response body.
    ///
    /// The response, and with it the pooled connection, is released when it
    /// goes out of scope on every return path.
    pub fn fetch(&self, url: &Url, request: &ScrapeRequest) -> Result<Bytes, ScrapeError> {
        let builder = match request {
            ScrapeRequest::Get => self.http.get(url.clone()),
            ScrapeRequest::PostJson(body) => self
                .http
                .post(url.clone())
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone()),
        };

        let transport = |source: reqwest::Error| ScrapeError::Transport {
            url: url.clone(),
            source,
        };

        let response = builder.send().map_err(transport)?;
        if response.status() != StatusCode::OK {
            return Err(ScrapeError::Status {
                url: url.clone(),
                code: response.status().as_u16(),
            });
        }

        response.bytes().map_err(transport)
    }
}

/// Append `path` to the path of `base`, keeping any prefix `base` carries.
pub fn join_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url
}
