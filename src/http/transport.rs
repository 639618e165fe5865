//! Transport seam: the only place that touches the network.
//!
//! The interception layer never talks HTTP itself; it decides whether and
//! when to (re)issue a call through a [`Transport`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use url::Url;

use crate::config::TransportConfig;
use crate::http::request::{ApiRequest, X_REQUEST_ID};
use crate::http::response::{ApiResponse, TransportError};

/// Issues a single request and reports the outcome.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn issue(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Error building a [`ReqwestTransport`].
#[derive(Debug, thiserror::Error)]
pub enum TransportBuildError {
    #[error("invalid base URL '{url}': {source}")]
    BaseUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// [`Transport`] backed by a cookie-carrying reqwest client.
///
/// Session tokens live in the cookie jar; nothing here reads or stores them.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportBuildError> {
        let base_url = Url::parse(&config.base_url).map_err(|source| TransportBuildError::BaseUrl {
            url: config.base_url.clone(),
            source,
        })?;

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, base_url })
    }

    /// Resolve a request path against the base URL, keeping any base path.
    fn resolve(&self, path: &str) -> Result<Url, TransportError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let joined = if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        };
        Url::parse(&joined).map_err(|e| TransportError::Network(format!("invalid URL '{}': {}", joined, e)))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn issue(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.resolve(&request.path)?;

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if let Ok(id) = HeaderValue::from_str(&request.id.to_string()) {
            builder = builder.header(X_REQUEST_ID, id);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        tracing::trace!(
            request_id = %request.id,
            method = %request.method,
            path = %request.path,
            retry = request.is_retry,
            "Issuing request"
        );

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(ApiResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}
