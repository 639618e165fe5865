//! Response and transport failure types.
//!
//! # Design Decisions
//! - Non-2xx statuses are failures, not responses; the body is kept so a
//!   propagated error still carries the server's message
//! - Network and timeout failures are distinct from HTTP errors because
//!   retry eligibility depends on the difference

use bytes::Bytes;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Body as UTF-8 text, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Failure reported by the transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Server answered with a non-success status.
    #[error("HTTP {status}")]
    Status { status: u16, body: Bytes },

    /// Connection could not be established or was reset.
    #[error("network error: {0}")]
    Network(String),

    /// Client-side deadline elapsed before a response arrived.
    #[error("request timed out")]
    Timeout,
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn from_status(status: u16) -> Self {
        TransportError::Status {
            status,
            body: Bytes::new(),
        }
    }

    /// True for HTTP 401.
    pub fn is_auth(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(s) if (400..500).contains(&s))
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(s) if (500..600).contains(&s))
    }

    /// Network failure or timeout, i.e. no HTTP status at all.
    pub fn is_connection(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(TransportError::from_status(401).is_auth());
        assert!(TransportError::from_status(404).is_client_error());
        assert!(TransportError::from_status(503).is_server_error());
        assert!(!TransportError::from_status(503).is_client_error());
        assert!(TransportError::Timeout.is_connection());
        assert!(TransportError::Network("reset".into()).is_connection());
        assert_eq!(TransportError::Timeout.status(), None);
    }

    #[test]
    fn test_json_body() {
        let resp = ApiResponse::new(200, r#"{"name":"ada"}"#);
        let value: serde_json::Value = resp.json().unwrap();
        assert_eq!(value["name"], "ada");
        assert_eq!(resp.text(), r#"{"name":"ada"}"#);
    }
}
