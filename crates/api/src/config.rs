//! Process configuration, read once from the environment at startup.

use std::net::SocketAddr;

use anyhow::Context;
use chrono::Duration;

use forgecrm_auth::{AuthConfig, password::DEFAULT_COST};
use forgecrm_observability::LogFormat;

const DEV_JWT_SECRET: &str = "dev-secret";
const DEV_API_KEY_PEPPER: &str = "dev-pepper";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_JWT_TTL_MINUTES: i64 = 60;

/// Optional first administrator, created at startup if the email is free.
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub jwt_ttl: Duration,
    pub api_key_pepper: String,
    pub bcrypt_cost: u32,
    /// Postgres connection string; the in-memory store is used when unset.
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub log_format: LogFormat,
    pub bootstrap_admin: Option<BootstrapAdmin>,
    /// Problems worth logging once the subscriber is installed.
    pub warnings: Vec<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("jwt_ttl", &self.jwt_ttl)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("database", &self.database_url.as_ref().map(|_| "postgres"))
            .field("bind_addr", &self.bind_addr)
            .field("log_format", &self.log_format)
            .field("bootstrap_admin", &self.bootstrap_admin)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut warnings = Vec::new();

        let jwt_secret = var("JWT_SECRET").unwrap_or_else(|| {
            warnings.push("JWT_SECRET not set; using insecure dev default".to_string());
            DEV_JWT_SECRET.to_string()
        });
        let api_key_pepper = var("API_KEY_PEPPER").unwrap_or_else(|| {
            warnings.push("API_KEY_PEPPER not set; using insecure dev default".to_string());
            DEV_API_KEY_PEPPER.to_string()
        });

        let ttl_minutes = match var("JWT_TTL_MINUTES") {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|m| *m > 0)
                .with_context(|| format!("JWT_TTL_MINUTES must be a positive integer, got '{raw}'"))?,
            None => DEFAULT_JWT_TTL_MINUTES,
        };

        let bcrypt_cost = match var("BCRYPT_COST") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|c| (4..=31).contains(c))
                .with_context(|| format!("BCRYPT_COST must be between 4 and 31, got '{raw}'"))?,
            None => DEFAULT_COST,
        };

        let bind_addr = var("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("BIND_ADDR must be a socket address such as 0.0.0.0:8080")?;

        let log_format = match var("LOG_FORMAT") {
            Some(raw) => raw.parse::<LogFormat>()?,
            None => LogFormat::default(),
        };

        let bootstrap_admin = match (var("BOOTSTRAP_ADMIN_EMAIL"), var("BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
            (None, None) => None,
            _ => anyhow::bail!("BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD must be set together"),
        };

        Ok(Self {
            jwt_secret,
            jwt_ttl: Duration::minutes(ttl_minutes),
            api_key_pepper,
            bcrypt_cost,
            database_url: var("DATABASE_URL"),
            bind_addr,
            log_format,
            bootstrap_admin,
            warnings,
        })
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.jwt_secret.clone(), self.api_key_pepper.clone())
            .with_token_ttl(self.jwt_ttl)
            .with_bcrypt_cost(self.bcrypt_cost)
    }
}
