use crate::{
    cache::{CacheKey, TtlCache},
    config::{AllowlistSource, MonitorConfig, Universe},
    enrich::{EnrichmentFailure, EnrichmentPipeline},
    endpoint::EndpointSet,
    error::{PipelineError, SourceError},
    fetch::{FailoverFetcher, FetchResult, HttpTransport, Payload, ReqwestTransport, default_headers},
    matcher::match_symbols,
    metric::{compute, dedup_by_symbol, rank},
    model::{AllowlistEntry, JoinedRecord, MarketRecord, MatchKind, RankedRecord},
    normalise::{Normalised, normalise_alpha_list, normalise_product_list, normalise_ticker},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use smol_str::SmolStr;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const FETCH_OPERATION: &str = "fetch";

/// Allowlist entry left without a market row after matching and enrichment.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct UnmatchedEntry {
    pub entry: AllowlistEntry,
    /// False if the entry fell beyond the per-cycle enrichment cap.
    pub enrichment_attempted: bool,
}

/// Aggregate counts of one cycle.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize)]
pub struct CycleStats {
    pub market_rows: usize,
    pub ticker_rows_dropped: usize,
    pub outside_quote_asset: usize,
    pub allowlist_entries: usize,
    pub allowlist_rows_dropped: usize,
    pub matched: usize,
    pub enriched: usize,
    pub duplicates_removed: usize,
    pub without_positive_low: usize,
    pub below_volume: usize,
    pub elapsed_ms: u64,
}

/// Result of a successful [`Monitor::run_cycle`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorReport {
    pub generated_at: DateTime<Utc>,
    pub records: Vec<RankedRecord>,
    pub unmatched: Vec<UnmatchedEntry>,
    pub enrichment_failures: Vec<EnrichmentFailure>,
    /// Set when the allowlist could not be loaded. The cycle still completes with no joined rows.
    pub allowlist_error: Option<SourceError>,
    pub stats: CycleStats,
}

/// Owns the fetch cache and runs full fetch, join, enrich and rank cycles.
#[derive(Debug)]
pub struct Monitor {
    config: MonitorConfig,
    fetcher: FailoverFetcher,
    cache: TtlCache<CacheKey, FetchResult>,
    enrichment: EnrichmentPipeline,
}

impl Monitor {
    /// Monitor talking to the real upstreams over `reqwest`.
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_transport(config, Arc::new(ReqwestTransport::default()))
    }

    pub fn with_transport(config: MonitorConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let fetcher = FailoverFetcher::new(transport, default_headers(), config.request_timeout);
        let enrichment = EnrichmentPipeline::new(
            fetcher.clone(),
            config.enrichment.clone(),
            config.quote_asset.clone(),
            config.kline_ttl,
        );

        Self {
            config,
            fetcher,
            cache: TtlCache::new(),
            enrichment,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Run one cycle.
    ///
    /// Only the market snapshot is essential: failing to fetch or decode it is the sole fatal
    /// outcome. Allowlist and enrichment failures degrade into the returned report.
    pub async fn run_cycle(&self) -> Result<MonitorReport, PipelineError> {
        let started = Instant::now();
        let purged = self.cache.purge_expired() + self.enrichment.purge_expired();
        if purged > 0 {
            debug!(purged, "purged expired cache entries");
        }

        let (ticker, allowlist) = tokio::join!(self.ticker(), self.allowlist());

        let ticker = ticker.inspect_err(|error| warn!(%error, "market snapshot unavailable"))?;
        let quote_asset = self.config.quote_asset.as_str();

        let mut stats = CycleStats {
            ticker_rows_dropped: ticker.dropped(),
            ..CycleStats::default()
        };

        let (market, outside): (Vec<MarketRecord>, Vec<MarketRecord>) = ticker
            .records
            .into_iter()
            .partition(|record| record.symbol.ends_with(quote_asset));
        stats.market_rows = market.len();
        stats.outside_quote_asset = outside.len();

        let mut allowlist_error = None;
        let (mut joined, unmatched) = match allowlist {
            None => (all_pairs(market, quote_asset), Vec::new()),
            Some(Ok(allowlist)) => {
                stats.allowlist_entries = allowlist.records.len();
                stats.allowlist_rows_dropped = allowlist.dropped();
                let outcome = match_symbols(
                    &allowlist.records,
                    &market,
                    quote_asset,
                    self.config.fuzzy_mode,
                );
                (outcome.joined, outcome.unmatched)
            }
            Some(Err(error)) => {
                warn!(%error, "allowlist unavailable, continuing without joined rows");
                allowlist_error = Some(error);
                (Vec::new(), Vec::new())
            }
        };
        stats.matched = joined.len();

        let cap = self.config.enrichment.cap;
        let enrichment = self.enrichment.enrich(&unmatched, cap).await;
        stats.enriched = enrichment.enriched.len();

        let unmatched = unmatched
            .into_iter()
            .enumerate()
            .filter(|(_, entry)| {
                !enrichment
                    .enriched
                    .iter()
                    .any(|record| record.entry == *entry)
            })
            .map(|(index, entry)| UnmatchedEntry {
                entry,
                enrichment_attempted: index < cap,
            })
            .collect::<Vec<_>>();

        joined.extend(enrichment.enriched);

        if self.config.dedup_by_symbol {
            let before = joined.len();
            joined = dedup_by_symbol(joined);
            stats.duplicates_removed = before - joined.len();
        }

        let total = joined.len();
        let computed = compute(joined);
        stats.without_positive_low = total - computed.len();

        let ranked = rank(computed, &self.config.ranking);
        stats.below_volume = ranked.below_volume;
        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            universe = %self.config.universe,
            records = ranked.records.len(),
            unmatched = unmatched.len(),
            enrichment_failures = enrichment.failures.len(),
            allowlist_ok = allowlist_error.is_none(),
            elapsed_ms = stats.elapsed_ms,
            "cycle complete"
        );

        Ok(MonitorReport {
            generated_at: Utc::now(),
            records: ranked.records,
            unmatched,
            enrichment_failures: enrichment.failures,
            allowlist_error,
            stats,
        })
    }

    async fn ticker(&self) -> Result<Normalised<MarketRecord>, SourceError> {
        let payload = self
            .cached_fetch(&self.config.ticker_endpoints, self.config.ticker_ttl)
            .await?;
        Ok(normalise_ticker(&payload.body)?)
    }

    /// `None` if the universe involves no allowlist.
    async fn allowlist(&self) -> Option<Result<Normalised<AllowlistEntry>, SourceError>> {
        match self.config.universe {
            Universe::Allowlist(source) => Some(self.fetch_allowlist(source).await),
            Universe::AllPairs => None,
        }
    }

    async fn fetch_allowlist(
        &self,
        source: AllowlistSource,
    ) -> Result<Normalised<AllowlistEntry>, SourceError> {
        let payload = self
            .cached_fetch(&source.endpoints(), self.config.allowlist_ttl)
            .await?;

        let normalised = match source {
            AllowlistSource::AlphaTokens => normalise_alpha_list(&payload.body)?,
            AllowlistSource::Products => normalise_product_list(&payload.body)?,
        };
        Ok(normalised)
    }

    async fn cached_fetch(
        &self,
        endpoints: &EndpointSet,
        ttl: Duration,
    ) -> Result<Payload, SourceError> {
        let key = CacheKey::new(SmolStr::new_static(FETCH_OPERATION), endpoints.name.clone());
        Ok(self
            .cache
            .get_or_fetch(key, ttl, || self.fetcher.fetch(endpoints))
            .await?)
    }
}

/// Every quote pair as an exact row of an implicit allowlist.
fn all_pairs(market: Vec<MarketRecord>, quote_asset: &str) -> Vec<JoinedRecord> {
    market
        .into_iter()
        .map(|market| {
            let base = market
                .symbol
                .strip_suffix(quote_asset)
                .unwrap_or(market.symbol.as_str());
            JoinedRecord {
                entry: AllowlistEntry::new(base),
                market,
                match_kind: MatchKind::Exact,
            }
        })
        .collect()
}
