use std::net::SocketAddr;

use anyhow::Context;
use serde::Deserialize;

/// One year. Keeps expiry arithmetic well inside `OffsetDateTime` range.
pub const MAX_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

impl JwtConfig {
    /// Both secrets must be set and distinct; lifetimes must be positive and
    /// at most [`MAX_TTL_MINUTES`].
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.access_secret.is_empty() && !self.refresh_secret.is_empty(),
            "token secrets must not be empty"
        );
        anyhow::ensure!(
            self.access_secret != self.refresh_secret,
            "ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ"
        );
        anyhow::ensure!(
            self.access_ttl_minutes > 0 && self.refresh_ttl_minutes > 0,
            "token lifetimes must be positive"
        );
        anyhow::ensure!(
            self.access_ttl_minutes <= MAX_TTL_MINUTES
                && self.refresh_ttl_minutes <= MAX_TTL_MINUTES,
            "token lifetimes must not exceed {} minutes",
            MAX_TTL_MINUTES
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub jwt: JwtConfig,
    pub media: MediaConfig,
    pub cookie_secure: bool,
    pub upload_max_bytes: usize,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let jwt = JwtConfig {
            access_secret: std::env::var("ACCESS_TOKEN_SECRET")
                .context("ACCESS_TOKEN_SECRET must be set")?,
            refresh_secret: std::env::var("REFRESH_TOKEN_SECRET")
                .context("REFRESH_TOKEN_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "accounts".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "accounts-users".into()),
            access_ttl_minutes: env_or("ACCESS_TOKEN_TTL_MINUTES", 15),
            refresh_ttl_minutes: env_or("REFRESH_TOKEN_TTL_MINUTES", 60 * 24 * 10),
        };
        jwt.validate()?;

        let endpoint = std::env::var("MEDIA_ENDPOINT").context("MEDIA_ENDPOINT must be set")?;
        let bucket = std::env::var("MEDIA_BUCKET").context("MEDIA_BUCKET must be set")?;
        let public_base_url = std::env::var("MEDIA_PUBLIC_URL")
            .unwrap_or_else(|_| format!("{}/{}", endpoint.trim_end_matches('/'), bucket));
        let media = MediaConfig {
            access_key: std::env::var("MEDIA_ACCESS_KEY").context("MEDIA_ACCESS_KEY must be set")?,
            secret_key: std::env::var("MEDIA_SECRET_KEY").context("MEDIA_SECRET_KEY must be set")?,
            region: std::env::var("MEDIA_REGION").unwrap_or_else(|_| "us-east-1".into()),
            endpoint,
            bucket,
            public_base_url,
        };

        let port = match std::env::var("APP_PORT") {
            Ok(v) => v.parse().context("APP_PORT must be a port number")?,
            Err(_) => 8080,
        };

        Ok(Self {
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
            database_url,
            jwt,
            media,
            cookie_secure: env_or("COOKIE_SECURE", true),
            upload_max_bytes: env_or("UPLOAD_MAX_BYTES", 10 * 1024 * 1024),
        })
    }
}
