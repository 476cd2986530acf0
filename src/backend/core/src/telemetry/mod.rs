//! Telemetry: structured logging for Warden.
//!
//! Metrics are emitted through the `metrics` facade at the call sites; the
//! embedding process decides which recorder (if any) to install.
//!
//! # Example
//!
//! ```rust,no_run
//! use warden_core::telemetry::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default()).expect("Failed to initialize logging");
//! ```

pub mod logging;

pub use logging::{build_filter, init_logging, LogFormat, LoggingConfig};
