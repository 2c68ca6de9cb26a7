use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeSet;

/// Canonical 24h ticker row. Produced only by the [`normalise`](crate::normalise) module.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct MarketRecord {
    pub symbol: SmolStr,
    pub last_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub quote_volume: Decimal,
    pub price_change_percent: Option<Decimal>,
}

/// Allowlisted asset, eg/ an "Alpha" tier token.
///
/// `base_symbol` is upper-cased and is the join key against [`MarketRecord::symbol`] once
/// suffixed with the quote asset.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct AllowlistEntry {
    pub base_symbol: SmolStr,
    pub display_name: SmolStr,
    pub tags: BTreeSet<SmolStr>,
    /// Internal market id (eg/ "ALPHA_175") used in place of `base_symbol` for kline queries.
    pub venue_id: Option<SmolStr>,
}

impl AllowlistEntry {
    pub fn new(base_symbol: impl AsRef<str>) -> Self {
        let base_symbol = SmolStr::new(base_symbol.as_ref().trim().to_uppercase());
        Self {
            display_name: base_symbol.clone(),
            base_symbol,
            tags: BTreeSet::new(),
            venue_id: None,
        }
    }

    /// Exact join key, eg/ "BTC" + "USDT".
    pub fn pair_symbol(&self, quote_asset: &str) -> SmolStr {
        SmolStr::new(format!("{}{quote_asset}", self.base_symbol))
    }

    /// Symbol of the per-symbol candlestick query.
    pub fn kline_symbol(&self, quote_asset: &str) -> SmolStr {
        match &self.venue_id {
            Some(venue_id) => SmolStr::new(format!("{venue_id}{quote_asset}")),
            None => self.pair_symbol(quote_asset),
        }
    }
}

/// How a [`JoinedRecord`] was produced.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum MatchKind {
    #[display("exact")]
    Exact,
    #[display("fuzzy")]
    Fuzzy,
    #[display("enriched")]
    Enriched,
}

/// [`MarketRecord`] joined with the [`AllowlistEntry`] it was matched for.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct JoinedRecord {
    pub entry: AllowlistEntry,
    pub market: MarketRecord,
    pub match_kind: MatchKind,
}

/// Metrics derived from a [`MarketRecord`] with a positive low price.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct DerivedMetrics {
    /// `(high - low) / low * 100` over the ticker window.
    pub volatility_pct: Decimal,
    /// `quote_volume / 1e6`.
    pub volume_millions: Decimal,
}

/// Output row of the pipeline.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct RankedRecord {
    pub record: JoinedRecord,
    pub metrics: DerivedMetrics,
}

impl RankedRecord {
    pub fn symbol(&self) -> &SmolStr {
        &self.record.market.symbol
    }
}
