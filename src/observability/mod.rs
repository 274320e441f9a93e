//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! dedup, auth, cache, transport produce:
//!     → logging.rs (tracing events, filtered by EnvFilter)
//!     → metrics.rs (counters through the `metrics` facade)
//!
//! Consumers:
//!     → whatever subscriber/recorder the host application installs
//! ```
//!
//! # Design Decisions
//! - The library never installs a recorder; without one the counters are no-ops
//! - `init_logging` is optional and tolerates an already-installed subscriber

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
