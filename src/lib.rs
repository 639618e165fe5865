//! Session-guarded HTTP client library.
//!
//! Keeps one logical session alive across many concurrent requests: a 401
//! triggers a single shared credential refresh, requests failing meanwhile
//! wait in a bounded priority queue and are replayed afterwards.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod session;

pub use client::SessionClient;
pub use config::schema::GuardConfig;
pub use error::GuardError;
pub use http::{ApiRequest, ApiResponse, Priority, Transport, TransportError};
pub use lifecycle::Shutdown;
pub use session::TokenRefreshCoordinator;
