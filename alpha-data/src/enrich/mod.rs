//! Per-symbol candlestick lookups for allowlist entries the market snapshot does not cover.
//!
//! Lookups are capped per cycle, gated by a shared [`RateLimiter`], run on a bounded
//! concurrency pool and routed through a [`TtlCache`] so a cached symbol costs no request.
//! Failures are classified once, when fetched, and cached with that classification.
//! A failing symbol is recorded as an [`EnrichmentFailure`] and never aborts the batch.

use crate::{
    cache::{CacheKey, TtlCache},
    config::EnrichmentConfig,
    error::EnrichError,
    fetch::{FailoverFetcher, FetchResult, Payload},
    model::{AllowlistEntry, JoinedRecord, MatchKind},
    normalise::{Normalised, normalise_klines},
};
use futures::{StreamExt, stream};
use serde::Serialize;
use smol_str::SmolStr;
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tracing::{debug, warn};

/// Token bucket with jitter on the tokio clock.
pub mod limiter;

pub use limiter::{Jitter, RateLimiter};

const KLINE_OPERATION: &str = "klines";

/// Kline fetch outcome as cached, failures already classified.
type KlineResult = Result<Payload, EnrichError>;

/// A symbol whose lookup failed, and why.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct EnrichmentFailure {
    pub symbol: SmolStr,
    pub cause: EnrichError,
}

/// Output of [`EnrichmentPipeline::enrich`]. Both lists follow input order.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct EnrichmentOutcome {
    pub enriched: Vec<JoinedRecord>,
    pub failures: Vec<EnrichmentFailure>,
}

#[derive(Debug)]
pub struct EnrichmentPipeline {
    fetcher: FailoverFetcher,
    cache: TtlCache<CacheKey, KlineResult>,
    limiter: RateLimiter,
    config: EnrichmentConfig,
    quote_asset: SmolStr,
    kline_ttl: Duration,
    rejection_streak: AtomicUsize,
}

impl EnrichmentPipeline {
    pub fn new(
        fetcher: FailoverFetcher,
        config: EnrichmentConfig,
        quote_asset: SmolStr,
        kline_ttl: Duration,
    ) -> Self {
        Self {
            fetcher,
            cache: TtlCache::new(),
            limiter: RateLimiter::new(config.rate_interval, config.rate_burst, config.jitter),
            config,
            quote_asset,
            kline_ttl,
            rejection_streak: AtomicUsize::new(0),
        }
    }

    /// Look up at most `cap` of `entries`, one kline request each.
    pub async fn enrich(&self, entries: &[AllowlistEntry], cap: usize) -> EnrichmentOutcome {
        if entries.len() > cap {
            debug!(
                requested = entries.len(),
                cap, "enrichment capped, skipping remaining entries"
            );
        }

        let results = stream::iter(entries.iter().take(cap))
            .map(|entry| async move { (entry, self.enrich_one(entry).await) })
            .buffered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut outcome = EnrichmentOutcome::default();
        for (entry, result) in results {
            match result {
                Ok(record) => outcome.enriched.push(record),
                Err(cause) => {
                    let symbol = entry.kline_symbol(&self.quote_asset);
                    warn!(%symbol, %cause, "enrichment failed");
                    outcome.failures.push(EnrichmentFailure { symbol, cause });
                }
            }
        }

        outcome
    }

    /// Drop expired kline results, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    async fn enrich_one(&self, entry: &AllowlistEntry) -> Result<JoinedRecord, EnrichError> {
        let symbol = entry.kline_symbol(&self.quote_asset);
        let endpoints = self.config.kline.endpoints(&symbol);

        let payload = self
            .cache
            .get_or_fetch(
                CacheKey::new(SmolStr::new_static(KLINE_OPERATION), symbol.clone()),
                self.kline_ttl,
                || async {
                    self.limiter.acquire().await;
                    self.classify(self.fetcher.fetch(&endpoints).await)
                },
            )
            .await?;

        let Normalised { records, rejected } = normalise_klines(&payload.body)?;
        let candle = match records.into_iter().last() {
            Some(candle) => candle,
            None => {
                return Err(rejected
                    .into_iter()
                    .next()
                    .map_or(EnrichError::NoCandles, EnrichError::Record));
            }
        };

        Ok(JoinedRecord {
            entry: entry.clone(),
            market: candle.into_market_record(entry.pair_symbol(&self.quote_asset))?,
            match_kind: MatchKind::Enriched,
        })
    }

    /// Track the upstream rejection streak and infer [`EnrichError::RateLimited`] from it.
    fn classify(&self, result: FetchResult) -> KlineResult {
        let error = match result {
            Ok(payload) => {
                self.rejection_streak.store(0, Ordering::SeqCst);
                return Ok(payload);
            }
            Err(error) => error,
        };

        let rejected = error.is_rejection();
        let streak = if rejected {
            self.rejection_streak.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.rejection_streak.store(0, Ordering::SeqCst);
            0
        };

        if error.is_throttle() || (rejected && streak >= self.config.rejection_streak) {
            Err(EnrichError::RateLimited(streak.max(1)))
        } else {
            Err(EnrichError::Fetch(error))
        }
    }
}
