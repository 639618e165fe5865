//! HTTP client subsystem.
//!
//! # Data Flow
//! ```text
//! Caller
//!     → request.rs (descriptor, request ID, priority)
//!     → pipeline.rs (issue, then classify the failure)
//!         → transport.rs (the only network access)
//!         → endpoints.rs (in scope? auth failure?)
//!         → session coordinator (refresh + replay)
//!         → resilience retries (transient failures)
//!     → response.rs (ApiResponse or TransportError)
//! ```

pub mod endpoints;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod transport;

pub use endpoints::EndpointRules;
pub use pipeline::InterceptionPipeline;
pub use request::{ApiRequest, Priority, RequestId, X_REQUEST_ID};
pub use response::{ApiResponse, TransportError};
pub use transport::{ReqwestTransport, Transport, TransportBuildError};
