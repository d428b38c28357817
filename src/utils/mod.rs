//! # Utility Modules
//!
//! Supporting utilities for flood detection, timing, logging and metrics.
//!
//! ## Components
//! - **Flood**: fixed-window receive-rate detector
//! - **Time**: monotonic clock abstraction used by the flood detector
//! - **Logging**: `tracing` subscriber setup from [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: thread-safe observability counters

pub mod flood;
pub mod logging;
pub mod metrics;
pub mod time;

pub use flood::{FloodDetector, FloodSignal};
pub use time::{Clock, ManualClock, MonotonicClock};
