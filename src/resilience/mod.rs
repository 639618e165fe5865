//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Refresh call:
//!     → circuit_breaker.rs (fail fast while open; one observation per attempt)
//!     → retries.rs (refresh policy: retry network errors and 5xx)
//!     → backoff.rs (base * 2^i + jitter between retries)
//!
//! Ordinary request after the auth path declined it:
//!     → retries.rs (general policy: idempotent + transient only)
//! ```
//!
//! # Design Decisions
//! - Backoff retries happen inside each breaker-gated attempt
//! - Retries only for idempotent requests (GET, HEAD, OPTIONS, PUT, PATCH)
//! - Circuit breaker keeps a broken refresh endpoint from being hammered

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{CircuitBreaker, CircuitOpen, CircuitState};
pub use retries::{RetryFailure, RetryKind, RetryPolicy};
