//! Service configuration
//!
//! Everything is read once from the process environment (plus `.env` when
//! present) at startup.

use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::autopay::AutoPayConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue {
                key: "ENVIRONMENT".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl Environment {
    pub fn is_production(&self) -> bool {
        *self == Environment::Production
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Transfer gateway connection settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the facilitated-transfer API
    pub base_url: String,
    pub api_key: Option<String>,
    /// Platform funding source that sits between the two transfer legs
    pub platform_funding_source_url: String,
    pub currency: String,
}

/// Outbound email settings
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Resend API key; emails are only logged when absent
    pub resend_api_key: Option<String>,
    pub from_address: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub database_url: String,
    pub db_max_connections: u32,
    pub port: u16,
    pub log_level: String,
    /// Comma-separated list; permissive CORS when unset
    pub cors_allowed_origins: Option<String>,

    /// Shared secret expected in `Authorization: Bearer` on the cron endpoints
    pub cron_secret: Option<String>,
    /// Secret expected in `X-Webhook-Secret` on transfer status webhooks
    pub webhook_secret: Option<String>,
    /// Optional in-process schedule for the batch (6-field cron expression)
    pub autopay_cron: Option<String>,

    pub autopay: AutoPayConfig,
    pub gateway: GatewayConfig,
    pub email: EmailConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = match optional("ENVIRONMENT") {
            Some(value) => value.parse()?,
            None => Environment::default(),
        };

        let cron_secret = optional("CRON_SECRET");
        if cron_secret.is_none() && environment.is_production() {
            return Err(ConfigError::MissingEnvVar("CRON_SECRET".to_string()));
        }

        let gateway = GatewayConfig {
            base_url: or_default("TRANSFER_GATEWAY_URL", "http://localhost:4010"),
            api_key: optional("TRANSFER_GATEWAY_API_KEY"),
            platform_funding_source_url: or_default("PLATFORM_FUNDING_SOURCE_URL", ""),
            currency: or_default("TRANSFER_CURRENCY", "USD"),
        };

        let autopay = AutoPayConfig::new(
            parsed_or("AUTOPAY_BATCH_SIZE", AutoPayConfig::DEFAULT_BATCH_SIZE)?,
            parsed_or("AUTOPAY_CONCURRENCY", AutoPayConfig::DEFAULT_CONCURRENCY)?,
            or_default("APP_URL", "http://localhost:3000"),
        )
        .with_currency(gateway.currency.clone());

        Ok(Config {
            environment,
            database_url: required("DATABASE_URL")?,
            db_max_connections: parsed_or("DB_MAX_CONNECTIONS", 5)?,
            port: parsed_or("PORT", 3001)?,
            log_level: or_default("RUST_LOG", "info"),
            cors_allowed_origins: optional("CORS_ALLOWED_ORIGINS"),
            cron_secret,
            webhook_secret: optional("WEBHOOK_SECRET"),
            autopay_cron: optional("AUTOPAY_CRON"),
            autopay,
            gateway,
            email: EmailConfig {
                resend_api_key: optional("RESEND_API_KEY"),
                from_address: or_default("EMAIL_FROM", "Payments <payments@localhost>"),
            },
        })
    }

    /// Database URL with the password replaced, for logs
    pub fn database_url_masked(&self) -> String {
        mask_password(&self.database_url)
    }
}

fn mask_password(url: &str) -> String {
    let Some((credentials, host)) = url.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.rsplit_once(':') {
        // `scheme://user:pass` has a colon in the scheme too
        Some((user, _)) if user.contains("://") => format!("{}:****@{}", user, host),
        _ => url.to_string(),
    }
}

/// Set and not blank
fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &str) -> Result<String, ConfigError> {
    optional(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn or_default(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match optional(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
        None => Ok(default),
    }
}
