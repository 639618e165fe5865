//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     teardown() → trigger → refresh task aborts, monitor + listener exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → client shutdown
//! ```
//!
//! # Design Decisions
//! - One broadcast signal per coordinator, shared by every background task
//! - Late subscribers check `is_triggered` instead of missing the signal

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
