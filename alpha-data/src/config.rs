use crate::{
    endpoint::{EndpointSet, KlineSource},
    enrich::Jitter,
    error::ConfigError,
    fetch::DEFAULT_REQUEST_TIMEOUT,
    matcher::FuzzyMode,
    metric::{RankingConfig, SortOrder},
};
use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{str::FromStr, time::Duration};
use url::Url;

/// Which allowlist endpoint family defines the tracked universe.
#[derive(
    Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Deserialize, Serialize, Display,
)]
pub enum AllowlistSource {
    #[default]
    #[display("alpha")]
    AlphaTokens,
    #[display("products")]
    Products,
}

impl AllowlistSource {
    pub fn endpoints(&self) -> EndpointSet {
        match self {
            AllowlistSource::AlphaTokens => EndpointSet::alpha_token_list(),
            AllowlistSource::Products => EndpointSet::product_list(),
        }
    }
}

/// Rows a cycle reports on.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
pub enum Universe {
    /// Quote pairs joined against an allowlist.
    #[display("{_0}")]
    Allowlist(AllowlistSource),
    /// Every quote pair in the market snapshot, no allowlist involved.
    #[display("all")]
    AllPairs,
}

impl Default for Universe {
    fn default() -> Self {
        Self::Allowlist(AllowlistSource::default())
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct EnrichmentConfig {
    /// Maximum unmatched entries looked up per cycle. Zero disables enrichment.
    pub cap: usize,
    pub concurrency: usize,
    pub rate_interval: Duration,
    pub rate_burst: u32,
    pub jitter: Jitter,
    /// Consecutive upstream rejections after which failures are reported as rate limited.
    pub rejection_streak: usize,
    pub kline: KlineSource,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            cap: 20,
            concurrency: 4,
            rate_interval: Duration::from_millis(250),
            rate_burst: 2,
            jitter: Jitter::new(Duration::from_millis(100), Duration::from_millis(400)),
            rejection_streak: 3,
            kline: KlineSource::default(),
        }
    }
}

/// Configuration of a [`Monitor`](crate::monitor::Monitor).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Quote asset suffix every tracked pair must end with.
    pub quote_asset: SmolStr,
    pub universe: Universe,
    pub fuzzy_mode: FuzzyMode,
    /// Keep only the first joined row per market symbol.
    pub dedup_by_symbol: bool,
    pub ranking: RankingConfig,
    pub enrichment: EnrichmentConfig,
    pub ticker_ttl: Duration,
    pub allowlist_ttl: Duration,
    pub kline_ttl: Duration,
    /// Deadline of each individual endpoint attempt.
    pub request_timeout: Duration,
    pub ticker_endpoints: EndpointSet,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            quote_asset: SmolStr::new_static("USDT"),
            universe: Universe::default(),
            fuzzy_mode: FuzzyMode::default(),
            dedup_by_symbol: false,
            ranking: RankingConfig::default(),
            enrichment: EnrichmentConfig::default(),
            ticker_ttl: Duration::from_secs(60),
            allowlist_ttl: Duration::from_secs(300),
            kline_ttl: Duration::from_secs(300),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            ticker_endpoints: EndpointSet::ticker_24hr(),
        }
    }
}

impl MonitorConfig {
    /// Defaults overridden by any `MONITOR_*` environment variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` yields for each `MONITOR_*` key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let mut config = Self::default();

        if let Some(quote) = env.text("MONITOR_QUOTE_ASSET") {
            config.quote_asset = SmolStr::new(quote.to_uppercase());
        }
        if let Some(min_volume) = env.parse::<Decimal>("MONITOR_MIN_VOLUME_M")? {
            if min_volume.is_sign_negative() {
                return Err(invalid("MONITOR_MIN_VOLUME_M", min_volume));
            }
            config.ranking.min_volume_millions = min_volume;
        }
        if let Some(order) = env.text("MONITOR_SORT") {
            config.ranking.order = parse_sort_order(&order)?;
        }
        if let Some(universe) = env.text("MONITOR_UNIVERSE") {
            config.universe = parse_universe(&universe)?;
        }
        if let Some(fuzzy) = env.text("MONITOR_FUZZY") {
            config.fuzzy_mode = parse_fuzzy_mode(&fuzzy)?;
        }
        if let Some(dedup) = env.text("MONITOR_DEDUP") {
            config.dedup_by_symbol = parse_bool("MONITOR_DEDUP", &dedup)?;
        }

        if let Some(secs) = env.parse::<u64>("MONITOR_TICKER_TTL_SECS")? {
            config.ticker_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env.parse::<u64>("MONITOR_ALLOWLIST_TTL_SECS")? {
            config.allowlist_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env.parse::<u64>("MONITOR_KLINE_TTL_SECS")? {
            config.kline_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env.parse::<u64>("MONITOR_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(invalid("MONITOR_TIMEOUT_SECS", secs));
            }
            config.request_timeout = Duration::from_secs(secs);
        }

        let enrichment = &mut config.enrichment;
        if let Some(cap) = env.parse::<usize>("MONITOR_ENRICH_CAP")? {
            enrichment.cap = cap;
        }
        if let Some(concurrency) = env.parse::<usize>("MONITOR_ENRICH_CONCURRENCY")? {
            if concurrency == 0 {
                return Err(invalid("MONITOR_ENRICH_CONCURRENCY", concurrency));
            }
            enrichment.concurrency = concurrency;
        }
        if let Some(millis) = env.parse::<u64>("MONITOR_RATE_INTERVAL_MS")? {
            enrichment.rate_interval = Duration::from_millis(millis);
        }
        if let Some(burst) = env.parse::<u32>("MONITOR_RATE_BURST")? {
            if burst == 0 {
                return Err(invalid("MONITOR_RATE_BURST", burst));
            }
            enrichment.rate_burst = burst;
        }
        if let Some(streak) = env.parse::<usize>("MONITOR_REJECTION_STREAK")? {
            enrichment.rejection_streak = streak.max(1);
        }

        let min_ms = env.parse::<u64>("MONITOR_JITTER_MIN_MS")?;
        let max_ms = env.parse::<u64>("MONITOR_JITTER_MAX_MS")?;
        if min_ms.is_some() || max_ms.is_some() {
            let min_ms = min_ms.unwrap_or(enrichment.jitter.min.as_millis() as u64);
            let max_ms = max_ms.unwrap_or(enrichment.jitter.max.as_millis() as u64);
            if min_ms > max_ms {
                return Err(ConfigError::InvalidJitter { min_ms, max_ms });
            }
            enrichment.jitter =
                Jitter::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms));
        }

        if let Some(urls) = env.text("MONITOR_TICKER_URLS") {
            config.ticker_endpoints = EndpointSet::get_all("ticker_24hr", parse_urls(&urls)?);
        }

        Ok(config)
    }

    pub fn with_quote_asset(mut self, quote_asset: impl Into<SmolStr>) -> Self {
        self.quote_asset = quote_asset.into();
        self
    }

    pub fn with_universe(mut self, universe: Universe) -> Self {
        self.universe = universe;
        self
    }

    pub fn with_fuzzy_mode(mut self, fuzzy_mode: FuzzyMode) -> Self {
        self.fuzzy_mode = fuzzy_mode;
        self
    }

    pub fn with_dedup_by_symbol(mut self, dedup_by_symbol: bool) -> Self {
        self.dedup_by_symbol = dedup_by_symbol;
        self
    }

    pub fn with_ranking(mut self, ranking: RankingConfig) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn with_enrichment(mut self, enrichment: EnrichmentConfig) -> Self {
        self.enrichment = enrichment;
        self
    }

    pub fn with_ticker_ttl(mut self, ttl: Duration) -> Self {
        self.ticker_ttl = ttl;
        self
    }

    pub fn with_allowlist_ttl(mut self, ttl: Duration) -> Self {
        self.allowlist_ttl = ttl;
        self
    }

    pub fn with_kline_ttl(mut self, ttl: Duration) -> Self {
        self.kline_ttl = ttl;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_ticker_endpoints(mut self, endpoints: EndpointSet) -> Self {
        self.ticker_endpoints = endpoints;
        self
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed, non-empty value of `key`.
    fn text(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        self.text(key)
            .map(|value| value.parse::<T>().map_err(|_| invalid(key, value)))
            .transpose()
    }
}

fn invalid(key: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    }
}

fn parse_sort_order(value: &str) -> Result<SortOrder, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "asc" | "ascending" | "stable" => Ok(SortOrder::VolatilityAscending),
        "desc" | "descending" | "volatile" => Ok(SortOrder::VolatilityDescending),
        "volume" => Ok(SortOrder::VolumeDescending),
        _ => Err(invalid("MONITOR_SORT", value)),
    }
}

fn parse_universe(value: &str) -> Result<Universe, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "alpha" => Ok(Universe::Allowlist(AllowlistSource::AlphaTokens)),
        "products" => Ok(Universe::Allowlist(AllowlistSource::Products)),
        "all" => Ok(Universe::AllPairs),
        _ => Err(invalid("MONITOR_UNIVERSE", value)),
    }
}

fn parse_fuzzy_mode(value: &str) -> Result<FuzzyMode, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "fallback" => Ok(FuzzyMode::Fallback),
        "supplement" => Ok(FuzzyMode::Supplement),
        "off" | "disabled" | "none" => Ok(FuzzyMode::Disabled),
        _ => Err(invalid("MONITOR_FUZZY", value)),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn parse_urls(value: &str) -> Result<Vec<String>, ConfigError> {
    let urls = value
        .split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(|url| match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(url.to_string()),
            Ok(parsed) => Err(ConfigError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme {}", parsed.scheme()),
            }),
            Err(error) => Err(ConfigError::InvalidUrl {
                url: url.to_string(),
                reason: error.to_string(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if urls.is_empty() {
        return Err(invalid("MONITOR_TICKER_URLS", value));
    }

    Ok(urls)
}
