use anyhow::{Context, Result};
use std::{env, str::FromStr, time::Duration};
use url::Url;

/// Runtime configuration, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub port: u16,
    /// Site root; category pages live under `/categorie/<slug>`.
    pub base_url: Url,
    pub allowed_hosts: Vec<String>,
    pub default_pages: usize,
    pub page_delay: Duration,
    pub http_timeout: Duration,
    pub respect_robots: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url = get("BASE_URL").unwrap_or_else(|| "https://sn.coinafrique.com".to_string());
        let base_url = Url::parse(&base_url).context("BASE_URL must be a valid url")?;

        let allowed_hosts = get("ALLOWED_HOSTS")
            .unwrap_or_else(|| "sn.coinafrique.com,coinafrique.com,www.coinafrique.com".to_string())
            .split(',')
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();

        Ok(Self {
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://coinafrica.db".to_string()),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "PORT", 8080)?,
            base_url,
            allowed_hosts,
            default_pages: parse_or(&get, "DEFAULT_PAGES", 5)?,
            page_delay: Duration::from_millis(parse_or(&get, "PAGE_DELAY_MS", 2000)?),
            http_timeout: Duration::from_secs(parse_or(&get, "HTTP_TIMEOUT_SECS", 25)?),
            respect_robots: parse_or(&get, "RESPECT_ROBOTS", true)?,
        })
    }

    pub fn bind(&self) -> (String, u16) {
        (self.bind_addr.clone(), self.port)
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}
