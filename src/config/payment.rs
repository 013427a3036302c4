//! Payment configuration

use serde::Deserialize;

use super::error::ValidationError;
use super::server::Environment;

/// Payment configuration (Stripe)
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Stripe API key
    pub stripe_api_key: String,

    /// Stripe webhook signing secret
    pub stripe_webhook_secret: String,

    /// Stripe price ID for the monthly plan
    pub stripe_monthly_price_id: String,

    /// Stripe price ID for the yearly plan
    pub stripe_yearly_price_id: String,

    /// URL the hosted checkout redirects to on success
    pub checkout_success_url: String,

    /// URL the hosted checkout redirects to on cancellation
    pub checkout_cancel_url: String,

    /// Trial length in days
    #[serde(default = "default_trial_duration_days")]
    pub trial_duration_days: u32,

    /// How long processed webhook event records are retained, in days
    #[serde(default = "default_webhook_retention_days")]
    pub webhook_retention_days: u32,
}

impl PaymentConfig {
    /// Check if using Stripe test mode
    pub fn is_test_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_test_")
    }

    /// Check if using Stripe live mode
    pub fn is_live_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_live_")
    }

    /// Validate payment configuration
    ///
    /// In production, checkout redirect URLs must use HTTPS.
    pub fn validate(&self, environment: &Environment) -> Result<(), ValidationError> {
        if self.stripe_api_key.is_empty() {
            return Err(ValidationError::MissingRequired("STRIPE_API_KEY"));
        }
        if self.stripe_webhook_secret.is_empty() {
            return Err(ValidationError::MissingRequired("STRIPE_WEBHOOK_SECRET"));
        }

        // Verify key prefixes for safety
        if !self.stripe_api_key.starts_with("sk_") {
            return Err(ValidationError::InvalidStripeKey);
        }
        if !self.stripe_webhook_secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidStripeWebhookSecret);
        }

        if !self.stripe_monthly_price_id.starts_with("price_") {
            return Err(ValidationError::InvalidStripePriceId);
        }
        if !self.stripe_yearly_price_id.starts_with("price_") {
            return Err(ValidationError::InvalidStripePriceId);
        }

        if self.checkout_success_url.is_empty() {
            return Err(ValidationError::MissingRequired("CHECKOUT_SUCCESS_URL"));
        }
        if self.checkout_cancel_url.is_empty() {
            return Err(ValidationError::MissingRequired("CHECKOUT_CANCEL_URL"));
        }
        if *environment == Environment::Production
            && (!self.checkout_success_url.starts_with("https://")
                || !self.checkout_cancel_url.starts_with("https://"))
        {
            return Err(ValidationError::CheckoutUrlMustBeHttps);
        }

        if self.trial_duration_days == 0 || self.trial_duration_days > 90 {
            return Err(ValidationError::InvalidTrialDuration);
        }

        if self.webhook_retention_days == 0 {
            return Err(ValidationError::InvalidWebhookRetention);
        }

        Ok(())
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            stripe_api_key: String::new(),
            stripe_webhook_secret: String::new(),
            stripe_monthly_price_id: String::new(),
            stripe_yearly_price_id: String::new(),
            checkout_success_url: String::new(),
            checkout_cancel_url: String::new(),
            trial_duration_days: default_trial_duration_days(),
            webhook_retention_days: default_webhook_retention_days(),
        }
    }
}

fn default_trial_duration_days() -> u32 {
    14
}

fn default_webhook_retention_days() -> u32 {
    90
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> PaymentConfig {
        PaymentConfig {
            stripe_api_key: "sk_test_abcd1234".to_string(),
            stripe_webhook_secret: "whsec_xyz789".to_string(),
            stripe_monthly_price_id: "price_monthly".to_string(),
            stripe_yearly_price_id: "price_yearly".to_string(),
            checkout_success_url: "http://localhost:3000/billing/success".to_string(),
            checkout_cancel_url: "http://localhost:3000/billing/cancel".to_string(),
            trial_duration_days: 14,
            webhook_retention_days: 90,
        }
    }

    #[test]
    fn test_is_test_mode() {
        let config = valid_config();
        assert!(config.is_test_mode());
        assert!(!config.is_live_mode());
    }

    #[test]
    fn test_is_live_mode() {
        let config = PaymentConfig {
            stripe_api_key: "sk_live_xxx".to_string(),
            ..valid_config()
        };
        assert!(config.is_live_mode());
        assert!(!config.is_test_mode());
    }

    #[test]
    fn test_validation_missing_api_key() {
        let config = PaymentConfig::default();
        assert!(config.validate(&Environment::Development).is_err());
    }

    #[test]
    fn test_validation_invalid_api_key_prefix() {
        let config = PaymentConfig {
            stripe_api_key: "pk_test_xxx".to_string(), // Wrong prefix
            ..valid_config()
        };
        assert!(config.validate(&Environment::Development).is_err());
    }

    #[test]
    fn test_validation_invalid_webhook_secret_prefix() {
        let config = PaymentConfig {
            stripe_webhook_secret: "secret_xxx".to_string(), // Wrong prefix
            ..valid_config()
        };
        assert!(config.validate(&Environment::Development).is_err());
    }

    #[test]
    fn test_validation_invalid_price_id() {
        let config = PaymentConfig {
            stripe_yearly_price_id: "yearly".to_string(),
            ..valid_config()
        };
        assert!(config.validate(&Environment::Development).is_err());
    }

    #[test]
    fn test_validation_production_requires_https_urls() {
        let config = valid_config();
        // Allowed in development
        assert!(config.validate(&Environment::Development).is_ok());
        // Rejected in production
        assert!(config.validate(&Environment::Production).is_err());
    }

    #[test]
    fn test_validation_invalid_trial_duration() {
        let config = PaymentConfig {
            trial_duration_days: 0,
            ..valid_config()
        };
        assert!(config.validate(&Environment::Development).is_err());

        let config = PaymentConfig {
            trial_duration_days: 365,
            ..valid_config()
        };
        assert!(config.validate(&Environment::Development).is_err());
    }

    #[test]
    fn test_validation_invalid_webhook_retention() {
        let config = PaymentConfig {
            webhook_retention_days: 0,
            ..valid_config()
        };
        assert!(config.validate(&Environment::Development).is_err());
    }

    #[test]
    fn test_validation_valid_config() {
        let config = PaymentConfig {
            checkout_success_url: "https://apcsprep.example.com/billing/success".to_string(),
            checkout_cancel_url: "https://apcsprep.example.com/pricing".to_string(),
            ..valid_config()
        };
        assert!(config.validate(&Environment::Production).is_ok());
    }
}
