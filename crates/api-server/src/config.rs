use std::path::PathBuf;
use std::time::Duration;

use crate::equity_routes::MAX_LOOKBACK_DAYS;

/// Where the equity endpoint reads prices from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceBackend {
    Polygon { api_key: String },
    Csv { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Origins allowed by CORS; empty means same-origin only
    pub allowed_origins: Vec<String>,
    pub identity_api_key: String,
    pub price_backend: PriceBackend,
    pub default_lookback_days: i64,
    pub fetch_timeout: Duration,
    pub token_cache_ttl: Duration,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |name: &str| lookup(name).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        let identity_api_key = var("IDENTITY_API_KEY")
            .ok_or_else(|| anyhow::anyhow!("IDENTITY_API_KEY must be set"))?;

        let price_backend = match var("PRICE_SOURCE").as_deref().unwrap_or("polygon") {
            "polygon" => PriceBackend::Polygon {
                api_key: var("POLYGON_API_KEY").ok_or_else(|| {
                    anyhow::anyhow!("POLYGON_API_KEY must be set when PRICE_SOURCE=polygon")
                })?,
            },
            "csv" => PriceBackend::Csv {
                path: var("PRICES_CSV")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("prices_daily.csv")),
            },
            other => anyhow::bail!("unknown PRICE_SOURCE '{}' (expected polygon or csv)", other),
        };

        let allowed_origins = var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            port: var("PORT").and_then(|s| s.parse().ok()).unwrap_or(8000),
            allowed_origins,
            identity_api_key,
            price_backend,
            default_lookback_days: var("EQUITY_LOOKBACK_DAYS")
                .and_then(|s| s.parse().ok())
                .filter(|d: &i64| *d > 0 && *d <= MAX_LOOKBACK_DAYS)
                .unwrap_or(730),
            fetch_timeout: Duration::from_secs(
                var("FETCH_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            token_cache_ttl: Duration::from_secs(
                var("TOKEN_CACHE_TTL_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
        })
    }
}
