use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_RETAKE_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Runtime settings read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub retake_debounce: Duration,
    pub retake_timeout: Duration,
    pub max_connections: u32,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL").filter(|value| !value.trim().is_empty());
        let retake_debounce = Duration::from_millis(parse_or(
            "GPA_RETAKE_DEBOUNCE_MS",
            &lookup,
            DEFAULT_DEBOUNCE_MS,
        )?);
        let retake_timeout = Duration::from_millis(parse_or(
            "GPA_RETAKE_TIMEOUT_MS",
            &lookup,
            DEFAULT_RETAKE_TIMEOUT_MS,
        )?);
        let max_connections =
            parse_or("GPA_DB_MAX_CONNECTIONS", &lookup, DEFAULT_MAX_CONNECTIONS)?;

        Ok(Self {
            database_url,
            retake_debounce,
            retake_timeout,
            max_connections,
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}

fn parse_or<T>(
    key: &str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: T,
) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got '{raw}'")),
        _ => Ok(default),
    }
}
