//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! Auth failure from the pipeline
//!     → coordinator.rs (classify, single-flight refresh)
//!         → queue.rs (park failures that arrive mid-refresh)
//!         → resilience (breaker-gated, retried refresh call)
//!     → success: replay queue, notifier.rs publishes RefreshCompleted
//!     → 401 from refresh: host.rs clears session, navigates to login
//!
//! Other participants:
//!     notifier.rs → coordinator.rs (drain queue, no local refresh)
//! ```

pub mod coordinator;
pub mod host;
pub mod notifier;
pub mod queue;

pub use coordinator::{SessionEvent, TokenRefreshCoordinator, Visibility};
pub use host::{login_redirect, HeadlessHost, SessionHost};
pub use notifier::{BroadcastHub, HubChannel, SessionNotifier, SessionSignal};
pub use queue::{BoundedPriorityQueue, QueuedRequest};
