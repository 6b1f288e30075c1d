//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::paging::PagingPolicy;

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Page size when a request names none (default: 10).
    pub default_page_size: u64,

    /// Largest page a request may ask for. `None` means unlimited (default: 100).
    pub max_page_size: Option<u64>,

    /// Catalog TOML file used when the CLI is not given one.
    pub catalog_path: Option<PathBuf>,

    /// PostgreSQL connection URL. Only `quarry run` needs it.
    pub database_url: Option<String>,

    /// Maximum database connections in pool (default: 5).
    pub database_max_connections: u32,

    /// Statement timeout applied to each executed query (default: 10s).
    pub statement_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let default_page_size = lookup("QUARRY_DEFAULT_PAGE_SIZE")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .context("QUARRY_DEFAULT_PAGE_SIZE must be a valid u64")?;

        let max_page_size = parse_max_page_size(
            &lookup("QUARRY_MAX_PAGE_SIZE").unwrap_or_else(|| "100".to_string()),
        )?;

        let catalog_path = lookup("QUARRY_CATALOG").map(PathBuf::from);
        let database_url = lookup("DATABASE_URL");

        let database_max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|| "5".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let statement_timeout = parse_duration(
            &lookup("QUARRY_STATEMENT_TIMEOUT").unwrap_or_else(|| "10s".to_string()),
        )
        .context("QUARRY_STATEMENT_TIMEOUT must be a duration like 500ms, 10s or 2m")?;

        Ok(Self {
            default_page_size,
            max_page_size,
            catalog_path,
            database_url,
            database_max_connections,
            statement_timeout,
        })
    }

    pub fn paging_policy(&self) -> PagingPolicy {
        PagingPolicy {
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
        }
    }
}

/// `unlimited` or any negative number disables the maximum.
fn parse_max_page_size(raw: &str) -> Result<Option<u64>> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("unlimited") {
        return Ok(None);
    }
    let value: i64 = raw
        .parse()
        .context("QUARRY_MAX_PAGE_SIZE must be an integer or 'unlimited'")?;
    Ok(u64::try_from(value).ok())
}

/// Parse `<n>ms`, `<n>s`, `<n>m` or bare seconds.
fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let n: u64 = digits
        .parse()
        .with_context(|| format!("invalid duration '{raw}'"))?;
    Ok(match unit {
        "ms" => Duration::from_millis(n),
        "s" => Duration::from_secs(n),
        "m" => Duration::from_secs(
            n.checked_mul(60)
                .with_context(|| format!("duration '{raw}' is too large"))?,
        ),
        other => bail!("unknown duration unit '{other}'"),
    })
}
