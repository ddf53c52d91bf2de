// config.rs
use std::env;
use std::time::Duration;

use crate::errors::AppError;

pub const REQUIRED_MPESA_VARS: [&str; 5] = [
    "MPESA_CONSUMER_KEY",
    "MPESA_CONSUMER_SECRET",
    "MPESA_SHORTCODE",
    "MPESA_PASSKEY",
    "MPESA_CALLBACK_URL",
];

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub short_code: String,
    pub passkey: String,
    pub callback_url: String,
    pub environment: String,
    pub auth_timeout: Duration,
    pub stk_timeout: Duration,
}

impl MpesaConfig {
    /// Loads the gateway credentials from the environment. Missing variables
    /// are reported all at once by name, never defaulted.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| env::var(name).ok().filter(|v| !v.is_empty()))
    }

    pub fn from_lookup<F>(get: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let missing: Vec<String> = REQUIRED_MPESA_VARS
            .iter()
            .filter(|name| get(name).is_none())
            .map(|name| name.to_string())
            .collect();

        if !missing.is_empty() {
            return Err(AppError::MissingConfig(missing));
        }

        Ok(MpesaConfig {
            consumer_key: get("MPESA_CONSUMER_KEY").unwrap(),
            consumer_secret: get("MPESA_CONSUMER_SECRET").unwrap(),
            short_code: get("MPESA_SHORTCODE").unwrap(),
            passkey: get("MPESA_PASSKEY").unwrap(),
            callback_url: get("MPESA_CALLBACK_URL").unwrap(),
            environment: get("MPESA_ENVIRONMENT").unwrap_or_else(|| "sandbox".to_string()),
            auth_timeout: Duration::from_secs(15),
            stk_timeout: Duration::from_secs(20),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn base_url(&self) -> &'static str {
        if self.is_production() {
            "https://api.safaricom.co.ke"
        } else {
            "https://sandbox.safaricom.co.ke"
        }
    }

    pub fn auth_url(&self) -> String {
        format!("{}/oauth/v1/generate?grant_type=client_credentials", self.base_url())
    }

    pub fn stk_push_url(&self) -> String {
        format!("{}/mpesa/stkpush/v1/processrequest", self.base_url())
    }

    pub fn stk_query_url(&self) -> String {
        format!("{}/mpesa/stkpushquery/v1/query", self.base_url())
    }

    /// Credential presence report for the `/api/mpesa/test` probe. Booleans
    /// only, no values.
    pub fn env_report() -> serde_json::Value {
        serde_json::json!({
            "consumerKeyExists": env::var("MPESA_CONSUMER_KEY").is_ok(),
            "consumerSecretExists": env::var("MPESA_CONSUMER_SECRET").is_ok(),
            "shortcodeExists": env::var("MPESA_SHORTCODE").is_ok(),
            "passkeyExists": env::var("MPESA_PASSKEY").is_ok(),
            "callbackUrlExists": env::var("MPESA_CALLBACK_URL").is_ok(),
            "environment": env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn missing_credentials_are_enumerated() {
        let env = vars(&[
            ("MPESA_CONSUMER_KEY", "key"),
            ("MPESA_SHORTCODE", "174379"),
            ("MPESA_PASSKEY", "passkey"),
        ]);
        let err = MpesaConfig::from_lookup(|name| env.get(name).cloned()).unwrap_err();
        match err {
            AppError::MissingConfig(missing) => {
                assert_eq!(missing, vec!["MPESA_CONSUMER_SECRET", "MPESA_CALLBACK_URL"]);
            }
            other => panic!("expected MissingConfig, got {other:?}"),
        }
    }

    #[test]
    fn environment_selects_base_url() {
        let env = vars(&[
            ("MPESA_CONSUMER_KEY", "key"),
            ("MPESA_CONSUMER_SECRET", "secret"),
            ("MPESA_SHORTCODE", "174379"),
            ("MPESA_PASSKEY", "passkey"),
            ("MPESA_CALLBACK_URL", "https://example.com/api/mpesa/callback"),
        ]);
        let config = MpesaConfig::from_lookup(|name| env.get(name).cloned()).unwrap();
        assert!(!config.is_production());
        assert_eq!(config.base_url(), "https://sandbox.safaricom.co.ke");
        assert!(config.stk_push_url().ends_with("/mpesa/stkpush/v1/processrequest"));

        let mut prod = env;
        prod.insert("MPESA_ENVIRONMENT".to_string(), "production".to_string());
        let config = MpesaConfig::from_lookup(|name| prod.get(name).cloned()).unwrap();
        assert_eq!(config.base_url(), "https://api.safaricom.co.ke");
    }
}
