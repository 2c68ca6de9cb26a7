use crate::model::{DerivedMetrics, JoinedRecord, MarketRecord, MatchKind, RankedRecord};
use derive_more::Display;
use itertools::Itertools;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

const ONE_MILLION: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Output ordering of [`rank`].
#[derive(
    Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Deserialize, Serialize, Display,
)]
pub enum SortOrder {
    /// Most stable first.
    #[default]
    #[display("asc")]
    VolatilityAscending,
    #[display("desc")]
    VolatilityDescending,
    #[display("volume")]
    VolumeDescending,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct RankingConfig {
    /// Rows trading less than this many million units of the quote asset are dropped.
    pub min_volume_millions: Decimal,
    pub order: SortOrder,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            min_volume_millions: Decimal::TEN,
            order: SortOrder::default(),
        }
    }
}

/// Output of [`rank`].
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Ranked {
    pub records: Vec<RankedRecord>,
    /// Rows removed by the minimum volume filter.
    pub below_volume: usize,
}

/// Derive [`DerivedMetrics`] for a single market row.
///
/// `None` if `low_price <= 0` or the range does not fit a [`Decimal`].
pub fn metrics(market: &MarketRecord) -> Option<DerivedMetrics> {
    if market.low_price <= Decimal::ZERO {
        return None;
    }

    let volatility_pct = market
        .high_price
        .checked_sub(market.low_price)?
        .checked_div(market.low_price)?
        .checked_mul(Decimal::ONE_HUNDRED)?;

    Some(DerivedMetrics {
        volatility_pct,
        volume_millions: market.quote_volume.checked_div(ONE_MILLION)?,
    })
}

/// Attach metrics to every record with a positive low price, dropping the rest.
pub fn compute(records: Vec<JoinedRecord>) -> Vec<RankedRecord> {
    records
        .into_iter()
        .filter_map(|record| {
            metrics(&record.market).map(|metrics| RankedRecord { record, metrics })
        })
        .collect()
}

/// Apply the minimum volume filter, then sort deterministically.
///
/// Ties on the sort key are broken by market symbol, then by base symbol.
pub fn rank(records: Vec<RankedRecord>, config: &RankingConfig) -> Ranked {
    let total = records.len();

    let mut records = records
        .into_iter()
        .filter(|record| record.metrics.volume_millions >= config.min_volume_millions)
        .collect::<Vec<_>>();

    let below_volume = total - records.len();

    records.sort_by(|a, b| {
        sort_key(a, b, config.order)
            .then_with(|| a.symbol().cmp(b.symbol()))
            .then_with(|| a.record.entry.base_symbol.cmp(&b.record.entry.base_symbol))
    });

    Ranked {
        records,
        below_volume,
    }
}

fn sort_key(a: &RankedRecord, b: &RankedRecord, order: SortOrder) -> Ordering {
    match order {
        SortOrder::VolatilityAscending => a.metrics.volatility_pct.cmp(&b.metrics.volatility_pct),
        SortOrder::VolatilityDescending => b.metrics.volatility_pct.cmp(&a.metrics.volatility_pct),
        SortOrder::VolumeDescending => b.metrics.volume_millions.cmp(&a.metrics.volume_millions),
    }
}

/// Keep one row per market symbol, preferring [`MatchKind::Exact`] over
/// [`MatchKind::Fuzzy`] over [`MatchKind::Enriched`], then the earliest row.
///
/// Output is grouped by [`MatchKind`], input order is kept within each group.
pub fn dedup_by_symbol(mut records: Vec<JoinedRecord>) -> Vec<JoinedRecord> {
    records.sort_by_key(|record| record.match_kind);
    records
        .into_iter()
        .unique_by(|record| record.market.symbol.clone())
        .collect()
}
