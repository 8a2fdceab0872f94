//! Shared plumbing for the edsmq crates.
//!
//! Only cross-cutting concerns live here so that every crate in the
//! workspace can depend on it without pulling in the HTTP or runtime stack.
//!
//! - [`observability`]: centralised `tracing` initialisation
//!
//! ```rust
//! use edsmq_common::observability::{LogConfig, LogFormat};
//!
//! let cfg = LogConfig {
//!     format: LogFormat::Json,
//!     ..LogConfig::default()
//! };
//! assert_eq!(cfg.app_name, "edsmq");
//! ```

pub mod observability;

pub use observability::{init_logging, LogConfig, LogFormat};
