//! Tracing subscriber setup for loadrig
//!
//! Builds a `tracing-subscriber` registry from [`LoggingConfig`]: an
//! `EnvFilter` per target, console output in one of four formats and
//! optional rolling log files written through `tracing-appender`.

pub mod error;
pub mod init;

pub use error::LoggingError;
pub use init::{build_filter, init_logging, init_simple_tracing, LoggingGuard};

pub use loadrig_config::{LogFormat, LogLevel, LogTarget, LoggingConfig, Rotation};
