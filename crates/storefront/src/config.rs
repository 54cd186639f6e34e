//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `STOREFRONT_BASE_URL` - Public URL used in payment return/notify links
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `SHOP_NAME`, `SHOP_LEGAL_NAME`, `SHOP_VAT_NUMBER`, `SHOP_ADDRESS`, `SHOP_CONTACT_EMAIL`
//! - `ORDER_NUMBER_PREFIX` - Order number prefix (default: KBB)
//! - `SHOP_CURRENCY` - ISO currency code (default: ZAR)
//! - `WHATSAPP_NUMBER` - Number that receives chat orders
//! - `STRIPE_SECRET_KEY` + `STRIPE_WEBHOOK_SECRET` - Enable hosted card checkout
//! - `STRIPE_API_BASE` - Override the Stripe API host (default: <https://api.stripe.com>)
//! - `PAYFAST_MERCHANT_ID` + `PAYFAST_MERCHANT_KEY` - Enable instant EFT
//! - `PAYFAST_PASSPHRASE` - Signature passphrase
//! - `PAYFAST_MODE` - `sandbox` (default) or `live`
//! - `PAYFAST_VERIFY_SOURCE` - Check ITN source addresses (default: false)
//! - `SMTP_HOST`, `SMTP_PORT` (587), `SMTP_USERNAME`, `SMTP_PASSWORD`, `EMAIL_FROM`
//! - `SENTRY_DSN`, `SENTRY_ENVIRONMENT`, `SENTRY_SAMPLE_RATE`, `SENTRY_TRACES_SAMPLE_RATE`

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use kelp_core::CurrencyCode;
use secrecy::SecretString;
use thiserror::Error;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    pub host: IpAddr,
    pub port: u16,
    /// Public base URL, without a trailing slash
    pub base_url: String,
    pub shop: ShopConfig,
    pub stripe: Option<StripeConfig>,
    pub payfast: Option<PayFastConfig>,
    pub email: Option<EmailConfig>,
    pub sentry_dsn: Option<String>,
    pub sentry_environment: Option<String>,
    pub sentry_sample_rate: f32,
    pub sentry_traces_sample_rate: f32,
}

/// Merchant identity printed on invoices and chat orders.
#[derive(Debug, Clone)]
pub struct ShopConfig {
    pub name: String,
    pub legal_name: String,
    pub vat_number: Option<String>,
    pub address: Option<String>,
    pub contact_email: Option<String>,
    pub order_number_prefix: String,
    pub currency: CurrencyCode,
    pub whatsapp_number: Option<String>,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            name: "Kelp Board Bags".to_owned(),
            legal_name: "Kelp Board Bags".to_owned(),
            vat_number: None,
            address: None,
            contact_email: None,
            order_number_prefix: "KBB".to_owned(),
            currency: CurrencyCode::ZAR,
            whatsapp_number: None,
        }
    }
}

/// Stripe Checkout configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: SecretString,
    pub webhook_secret: SecretString,
    pub api_base: String,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayFastMode {
    #[default]
    Sandbox,
    Live,
}

impl PayFastMode {
    #[must_use]
    pub const fn process_url(self) -> &'static str {
        match self {
            Self::Sandbox => "https://sandbox.payfast.co.za/eng/process",
            Self::Live => "https://www.payfast.co.za/eng/process",
        }
    }
}

impl std::str::FromStr for PayFastMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "live" => Ok(Self::Live),
            other => Err(format!("expected sandbox or live, got {other}")),
        }
    }
}

/// PayFast merchant configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct PayFastConfig {
    pub merchant_id: String,
    pub merchant_key: SecretString,
    pub passphrase: Option<SecretString>,
    pub mode: PayFastMode,
    pub verify_source: bool,
}

impl std::fmt::Debug for PayFastConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayFastConfig")
            .field("merchant_id", &self.merchant_id)
            .field("merchant_key", &"[REDACTED]")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .field("mode", &self.mode)
            .field("verify_source", &self.verify_source)
            .finish()
    }
}

/// SMTP configuration for order confirmation email.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: SecretString,
    pub from_address: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;
        let host = get_env_or_default("STOREFRONT_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_HOST".to_string(), e.to_string())
            })?;
        let port = get_env_or_default("STOREFRONT_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_PORT".to_string(), e.to_string())
            })?;
        let base_url = normalize_base_url(&get_required_env("STOREFRONT_BASE_URL")?)?;

        let shop = ShopConfig::from_env()?;
        let stripe = StripeConfig::from_env()?;
        let payfast = PayFastConfig::from_env()?;
        let email = EmailConfig::from_env()?;

        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.1);

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            shop,
            stripe,
            payfast,
            email,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether session cookies should be marked `Secure`.
    #[must_use]
    pub fn is_https(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

impl ShopConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let name = get_env_or_default("SHOP_NAME", &defaults.name);
        let currency = get_env_or_default("SHOP_CURRENCY", defaults.currency.code())
            .parse::<CurrencyCode>()
            .map_err(|e| ConfigError::InvalidEnvVar("SHOP_CURRENCY".to_string(), e.to_string()))?;

        Ok(Self {
            legal_name: get_optional_env("SHOP_LEGAL_NAME").unwrap_or_else(|| name.clone()),
            name,
            vat_number: get_optional_env("SHOP_VAT_NUMBER"),
            address: get_optional_env("SHOP_ADDRESS"),
            contact_email: get_optional_env("SHOP_CONTACT_EMAIL"),
            order_number_prefix: get_env_or_default(
                "ORDER_NUMBER_PREFIX",
                &defaults.order_number_prefix,
            ),
            currency,
            whatsapp_number: get_optional_env("WHATSAPP_NUMBER"),
        })
    }
}

impl StripeConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        if get_optional_pair("STRIPE_SECRET_KEY", "STRIPE_WEBHOOK_SECRET")?.is_none() {
            return Ok(None);
        }

        Ok(Some(Self {
            secret_key: get_validated_secret("STRIPE_SECRET_KEY")?,
            webhook_secret: get_validated_secret("STRIPE_WEBHOOK_SECRET")?,
            api_base: get_env_or_default("STRIPE_API_BASE", STRIPE_API_BASE)
                .trim_end_matches('/')
                .to_owned(),
        }))
    }
}

impl PayFastConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some((merchant_id, merchant_key)) =
            get_optional_pair("PAYFAST_MERCHANT_ID", "PAYFAST_MERCHANT_KEY")?
        else {
            return Ok(None);
        };

        let mode = get_env_or_default("PAYFAST_MODE", "sandbox")
            .parse::<PayFastMode>()
            .map_err(|e| ConfigError::InvalidEnvVar("PAYFAST_MODE".to_string(), e))?;
        let verify_source = get_env_or_default("PAYFAST_VERIFY_SOURCE", "false")
            .parse::<bool>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("PAYFAST_VERIFY_SOURCE".to_string(), e.to_string())
            })?;

        Ok(Some(Self {
            merchant_id,
            merchant_key: SecretString::from(merchant_key),
            passphrase: get_optional_env("PAYFAST_PASSPHRASE")
                .filter(|p| !p.trim().is_empty())
                .map(SecretString::from),
            mode,
            verify_source,
        }))
    }
}

impl EmailConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(smtp_host) = get_optional_env("SMTP_HOST") else {
            return Ok(None);
        };
        let smtp_port = get_env_or_default("SMTP_PORT", "587")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("SMTP_PORT".to_string(), e.to_string()))?;

        Ok(Some(Self {
            smtp_host,
            smtp_port,
            smtp_username: get_required_env("SMTP_USERNAME")?,
            smtp_password: get_validated_secret("SMTP_PASSWORD")?,
            from_address: get_required_env("EMAIL_FROM")?,
        }))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Both or neither: a half-configured gateway is an error, not a silent skip.
fn get_optional_pair(first: &str, second: &str) -> Result<Option<(String, String)>, ConfigError> {
    match (get_optional_env(first), get_optional_env(second)) {
        (Some(a), Some(b)) => Ok(Some((a, b))),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::MissingEnvVar(second.to_string())),
        (None, Some(_)) => Err(ConfigError::MissingEnvVar(first.to_string())),
    }
}

fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(raw.trim()).map_err(|e| {
        ConfigError::InvalidEnvVar("STOREFRONT_BASE_URL".to_string(), e.to_string())
    })?;
    Ok(parsed.as_str().trim_end_matches('/').to_owned())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use the value issued by the provider."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("sk_test_your-key-here", "STRIPE_SECRET_KEY");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaa", "STRIPE_SECRET_KEY");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_provider_key() {
        let result = validate_secret_strength(
            "whsec_9fK2mQ7xLp4TzR8vN3cW6bY1hJ5dG0sA",
            "STRIPE_WEBHOOK_SECRET",
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_payfast_mode_parse() {
        assert_eq!("LIVE".parse::<PayFastMode>().unwrap(), PayFastMode::Live);
        assert_eq!("sandbox".parse::<PayFastMode>().unwrap(), PayFastMode::Sandbox);
        assert!("prod".parse::<PayFastMode>().is_err());
        assert!(PayFastMode::Sandbox.process_url().contains("sandbox"));
    }

    #[test]
    fn test_normalize_base_url_strips_trailing_slash() {
        assert_eq!(
            normalize_base_url("https://kelpboardbags.co.za/").unwrap(),
            "https://kelpboardbags.co.za"
        );
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn test_secret_configs_redact_debug() {
        let stripe = StripeConfig {
            secret_key: SecretString::from("sk_live_abc123"),
            webhook_secret: SecretString::from("whsec_abc123"),
            api_base: STRIPE_API_BASE.to_owned(),
        };
        let payfast = PayFastConfig {
            merchant_id: "10000100".to_owned(),
            merchant_key: SecretString::from("46f0cd694581a"),
            passphrase: Some(SecretString::from("jt7NOE43FZPn")),
            mode: PayFastMode::Sandbox,
            verify_source: false,
        };

        let debug_output = format!("{stripe:?} {payfast:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(debug_output.contains("10000100"));
        assert!(!debug_output.contains("sk_live_abc123"));
        assert!(!debug_output.contains("whsec_abc123"));
        assert!(!debug_output.contains("46f0cd694581a"));
        assert!(!debug_output.contains("jt7NOE43FZPn"));
    }

    #[test]
    fn test_socket_addr() {
        let config = StorefrontConfig {
            database_url: SecretString::from("postgres://localhost/test"),
            host: "127.0.0.1".parse().unwrap(),
            port: 3000,
            base_url: "http://localhost:3000".to_string(),
            shop: ShopConfig::default(),
            stripe: None,
            payfast: None,
            email: None,
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.1,
        };

        let addr = config.socket_addr();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");
        assert!(!config.is_https());
    }
}
