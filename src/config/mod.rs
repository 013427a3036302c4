//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `APCS_PREP_` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use apcs_prep::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod auth;
mod database;
mod error;
mod payment;
mod server;

pub use auth::AuthConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use payment::PaymentConfig;
pub use server::{Environment, ServerConfig};

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (PostgreSQL connection)
    pub database: DatabaseConfig,

    /// Authentication configuration (session JWT)
    pub auth: AuthConfig,

    /// Payment configuration (Stripe)
    pub payment: PaymentConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `APCS_PREP` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `APCS_PREP__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `APCS_PREP__DATABASE__URL=...` -> `database.url = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Required environment variables are missing
    /// - Values cannot be parsed into expected types
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("APCS_PREP")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.auth.validate()?;
        self.payment.validate(&self.server.environment)?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to ensure tests don't run in parallel (env vars are global)
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set environment variables for testing
    /// Uses double underscores to separate nested config values
    fn set_minimal_env() {
        env::set_var("APCS_PREP__DATABASE__URL", "postgresql://test@localhost/test");
        env::set_var(
            "APCS_PREP__AUTH__JWT_SECRET",
            "0123456789abcdef0123456789abcdef",
        );
        env::set_var("APCS_PREP__AUTH__JWT_AUDIENCE", "apcs-prep");
        env::set_var("APCS_PREP__PAYMENT__STRIPE_API_KEY", "sk_test_xxx");
        env::set_var("APCS_PREP__PAYMENT__STRIPE_WEBHOOK_SECRET", "whsec_xxx");
        env::set_var("APCS_PREP__PAYMENT__STRIPE_MONTHLY_PRICE_ID", "price_monthly");
        env::set_var("APCS_PREP__PAYMENT__STRIPE_YEARLY_PRICE_ID", "price_yearly");
        env::set_var(
            "APCS_PREP__PAYMENT__CHECKOUT_SUCCESS_URL",
            "http://localhost:3000/billing/success",
        );
        env::set_var(
            "APCS_PREP__PAYMENT__CHECKOUT_CANCEL_URL",
            "http://localhost:3000/pricing",
        );
    }

    /// Helper to clear environment variables after testing
    fn clear_env() {
        env::remove_var("APCS_PREP__DATABASE__URL");
        env::remove_var("APCS_PREP__AUTH__JWT_SECRET");
        env::remove_var("APCS_PREP__AUTH__JWT_AUDIENCE");
        env::remove_var("APCS_PREP__PAYMENT__STRIPE_API_KEY");
        env::remove_var("APCS_PREP__PAYMENT__STRIPE_WEBHOOK_SECRET");
        env::remove_var("APCS_PREP__PAYMENT__STRIPE_MONTHLY_PRICE_ID");
        env::remove_var("APCS_PREP__PAYMENT__STRIPE_YEARLY_PRICE_ID");
        env::remove_var("APCS_PREP__PAYMENT__CHECKOUT_SUCCESS_URL");
        env::remove_var("APCS_PREP__PAYMENT__CHECKOUT_CANCEL_URL");
        env::remove_var("APCS_PREP__PAYMENT__TRIAL_DURATION_DAYS");
        env::remove_var("APCS_PREP__SERVER__PORT");
        env::remove_var("APCS_PREP__SERVER__ENVIRONMENT");
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        assert!(result.is_ok(), "Failed to load config: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.database.url, "postgresql://test@localhost/test");
        assert_eq!(config.payment.stripe_monthly_price_id, "price_monthly");
    }

    #[test]
    fn test_validate_full_config() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        assert!(result.is_ok());
        let config = result.unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.environment, Environment::Development);
        assert_eq!(config.payment.trial_duration_days, 14);
    }

    #[test]
    fn test_is_production() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("APCS_PREP__SERVER__ENVIRONMENT", "production");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert!(config.is_production());
    }

    #[test]
    fn test_custom_trial_duration() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("APCS_PREP__PAYMENT__TRIAL_DURATION_DAYS", "30");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.payment.trial_duration_days, 30);
    }
}
