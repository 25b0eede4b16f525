//! # Agency Infra-Common
//!
//! Shared infrastructure for the agency session stack:
//!
//! - `logging`: tracing subscriber setup and component-scoped log spans
//! - `errors`: the infrastructure error type used by setup helpers

pub mod errors;
pub mod logging;

pub use errors::{Error, Result};
pub use logging::context::LogContext;
pub use logging::setup::{init_test_logging, setup_logging, LoggingConfig};
