//! Session authority configuration
//!
//! Defaults mirror the production web client: a 30 minute impersonation cap,
//! a 100 ms settle delay before identity-scoped caches are invalidated after
//! impersonation starts, and `salesperson` as the degrade-to role.
//!
//! ```rust
//! use agency_client_core::AuthorityConfig;
//! use agency_auth_core::Role;
//! use std::time::Duration;
//!
//! let config = AuthorityConfig::new()
//!     .with_fallback_role(Role::Assistant)
//!     .with_impersonation_timeout(Duration::from_secs(600));
//!
//! assert_eq!(config.impersonation_timeout(), Duration::from_secs(600));
//! assert_eq!(config.fallback_role, Role::Assistant);
//! ```

use agency_auth_core::Role;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AuthorityError, AuthorityResult};

/// Environment variable prefix for [`AuthorityConfig::from_env`]
pub const ENV_PREFIX: &str = "AGENCY_AUTH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Role substituted when the ledger is empty or unreadable
    pub fallback_role: Role,
    /// Hard wall-clock cap on an impersonation session
    pub impersonation_timeout_secs: u64,
    /// Delay before identity-scoped caches are invalidated on impersonation start
    pub invalidation_settle_ms: u64,
    /// Where `sign_out` navigates to
    pub sign_in_path: String,
    /// Longest accepted impersonation reason, in characters
    pub max_reason_length: usize,
    /// Capacity of the broadcast channel behind `SessionAuthority::events`
    pub event_channel_capacity: usize,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            fallback_role: Role::Salesperson,
            impersonation_timeout_secs: 30 * 60,
            invalidation_settle_ms: 100,
            sign_in_path: "/auth".to_string(),
            max_reason_length: 500,
            event_channel_capacity: 256,
        }
    }
}

impl AuthorityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `AGENCY_AUTH_*` environment variables over the defaults
    pub fn from_env() -> AuthorityResult<Self> {
        let loaded: Self = Self::base_builder()?
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Load from a TOML/JSON/YAML file over the defaults
    pub fn from_file(path: impl AsRef<Path>) -> AuthorityResult<Self> {
        let loaded: Self = Self::base_builder()?
            .add_source(config::File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn base_builder() -> AuthorityResult<config::ConfigBuilder<config::builder::DefaultState>> {
        let defaults = Self::default();
        Ok(config::Config::builder()
            .set_default("fallback_role", defaults.fallback_role.as_str())?
            .set_default(
                "impersonation_timeout_secs",
                defaults.impersonation_timeout_secs as i64,
            )?
            .set_default("invalidation_settle_ms", defaults.invalidation_settle_ms as i64)?
            .set_default("sign_in_path", defaults.sign_in_path)?
            .set_default("max_reason_length", defaults.max_reason_length as i64)?
            .set_default(
                "event_channel_capacity",
                defaults.event_channel_capacity as i64,
            )?)
    }

    pub fn validate(&self) -> AuthorityResult<()> {
        if self.impersonation_timeout_secs == 0 {
            return Err(AuthorityError::Configuration(
                "impersonation_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if !self.sign_in_path.starts_with('/') {
            return Err(AuthorityError::Configuration(format!(
                "sign_in_path must be absolute, got '{}'",
                self.sign_in_path
            )));
        }
        if self.event_channel_capacity == 0 {
            return Err(AuthorityError::Configuration(
                "event_channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn impersonation_timeout(&self) -> Duration {
        Duration::from_secs(self.impersonation_timeout_secs)
    }

    pub fn invalidation_settle_delay(&self) -> Duration {
        Duration::from_millis(self.invalidation_settle_ms)
    }

    pub fn with_fallback_role(mut self, role: Role) -> Self {
        self.fallback_role = role;
        self
    }

    pub fn with_impersonation_timeout(mut self, timeout: Duration) -> Self {
        self.impersonation_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_invalidation_settle_delay(mut self, delay: Duration) -> Self {
        self.invalidation_settle_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_sign_in_path(mut self, path: impl Into<String>) -> Self {
        self.sign_in_path = path.into();
        self
    }

    pub fn with_max_reason_length(mut self, max: usize) -> Self {
        self.max_reason_length = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_web_client() {
        let config = AuthorityConfig::default();
        assert_eq!(config.impersonation_timeout(), Duration::from_secs(1800));
        assert_eq!(config.invalidation_settle_delay(), Duration::from_millis(100));
        assert_eq!(config.fallback_role, Role::Salesperson);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_relative_sign_in_path() {
        let config = AuthorityConfig::new().with_sign_in_path("auth");
        assert!(matches!(
            config.validate(),
            Err(AuthorityError::Configuration(_))
        ));
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "fallback_role = \"assistant\"\nimpersonation_timeout_secs = 900\nsign_in_path = \"/login\""
        )
        .unwrap();

        let config = AuthorityConfig::from_file(file.path()).unwrap();
        assert_eq!(config.fallback_role, Role::Assistant);
        assert_eq!(config.impersonation_timeout_secs, 900);
        assert_eq!(config.sign_in_path, "/login");
        assert_eq!(config.invalidation_settle_ms, 100);
    }

    #[test]
    fn environment_values_override_defaults() {
        std::env::set_var("AGENCY_AUTH_INVALIDATION_SETTLE_MS", "250");
        let config = AuthorityConfig::from_env().unwrap();
        std::env::remove_var("AGENCY_AUTH_INVALIDATION_SETTLE_MS");
        assert_eq!(config.invalidation_settle_delay(), Duration::from_millis(250));
    }

    #[test]
    fn zero_timeout_is_rejected_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "impersonation_timeout_secs = 0").unwrap();
        assert!(AuthorityConfig::from_file(file.path()).is_err());
    }
}
