//! Logging setup and contextual spans

pub mod context;
pub mod setup;
