use crate::model::{AllowlistEntry, JoinedRecord, MarketRecord, MatchKind};
use derive_more::Display;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// How substring matches relate to an exact `base + quote` match.
#[derive(
    Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Deserialize, Serialize, Display,
)]
pub enum FuzzyMode {
    /// Fuzzy matching only runs when no exact match exists. An entry never contributes both kinds.
    #[default]
    #[display("fallback")]
    Fallback,
    /// Fuzzy matches are emitted alongside the exact match.
    #[display("supplement")]
    Supplement,
    /// Exact matches only.
    #[display("off")]
    Disabled,
}

/// Output of [`match_symbols`].
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct MatchOutcome {
    pub joined: Vec<JoinedRecord>,
    /// Entries with neither an exact nor a fuzzy counterpart, in allowlist order.
    pub unmatched: Vec<AllowlistEntry>,
}

/// Join `allowlist` against the `market` snapshot.
///
/// An exact `base_symbol + quote_asset` hit emits exactly one [`MatchKind::Exact`] row. Otherwise
/// every market symbol containing `base_symbol` emits one [`MatchKind::Fuzzy`] row, all of them
/// retained. Output follows allowlist order, then market order.
pub fn match_symbols(
    allowlist: &[AllowlistEntry],
    market: &[MarketRecord],
    quote_asset: &str,
    fuzzy_mode: FuzzyMode,
) -> MatchOutcome {
    let index = market
        .iter()
        .map(|record| (record.symbol.clone(), record))
        .collect::<FnvHashMap<SmolStr, &MarketRecord>>();

    let mut outcome = MatchOutcome::default();

    for entry in allowlist {
        let exact_symbol = entry.pair_symbol(quote_asset);
        let exact = index.get(&exact_symbol).copied();

        if let Some(record) = exact {
            outcome.joined.push(joined(entry, record, MatchKind::Exact));
        }

        let run_fuzzy = match fuzzy_mode {
            FuzzyMode::Fallback => exact.is_none(),
            FuzzyMode::Supplement => true,
            FuzzyMode::Disabled => false,
        };

        let mut fuzzy_hits = 0;
        if run_fuzzy && !entry.base_symbol.is_empty() {
            for record in market.iter().filter(|record| {
                record.symbol != exact_symbol && record.symbol.contains(entry.base_symbol.as_str())
            }) {
                outcome.joined.push(joined(entry, record, MatchKind::Fuzzy));
                fuzzy_hits += 1;
            }
        }

        if exact.is_none() && fuzzy_hits == 0 {
            outcome.unmatched.push(entry.clone());
        }
    }

    outcome
}

fn joined(entry: &AllowlistEntry, market: &MarketRecord, match_kind: MatchKind) -> JoinedRecord {
    JoinedRecord {
        entry: entry.clone(),
        market: market.clone(),
        match_kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn market_record(symbol: &str) -> MarketRecord {
        MarketRecord {
            symbol: SmolStr::new(symbol),
            last_price: Decimal::ONE,
            high_price: Decimal::TWO,
            low_price: Decimal::ONE,
            quote_volume: Decimal::ONE_THOUSAND,
            price_change_percent: None,
        }
    }

    fn summary(outcome: &MatchOutcome) -> Vec<(&str, &str, MatchKind)> {
        outcome
            .joined
            .iter()
            .map(|record| {
                (
                    record.entry.base_symbol.as_str(),
                    record.market.symbol.as_str(),
                    record.match_kind,
                )
            })
            .collect()
    }

    #[test]
    fn test_match_symbols() {
        struct TestCase {
            allowlist: Vec<&'static str>,
            market: Vec<&'static str>,
            fuzzy_mode: FuzzyMode,
            expected_joined: Vec<(&'static str, &'static str, MatchKind)>,
            expected_unmatched: Vec<&'static str>,
        }

        let tests = vec![
            TestCase {
                // TC0: exact match suppresses fuzzy duplicates
                allowlist: vec!["BTC"],
                market: vec!["WBTCUSDT", "BTCUSDT", "BTCDOMUSDT"],
                fuzzy_mode: FuzzyMode::Fallback,
                expected_joined: vec![("BTC", "BTCUSDT", MatchKind::Exact)],
                expected_unmatched: vec![],
            },
            TestCase {
                // TC1: fuzzy fallback retains every hit
                allowlist: vec!["KOGE"],
                market: vec!["KOGEUSDC", "ETHUSDT", "KOGEBNB"],
                fuzzy_mode: FuzzyMode::Fallback,
                expected_joined: vec![
                    ("KOGE", "KOGEUSDC", MatchKind::Fuzzy),
                    ("KOGE", "KOGEBNB", MatchKind::Fuzzy),
                ],
                expected_unmatched: vec![],
            },
            TestCase {
                // TC2: no exact or fuzzy hit is reported as unmatched
                allowlist: vec!["BTC", "NOPE"],
                market: vec!["BTCUSDT", "ETHUSDT"],
                fuzzy_mode: FuzzyMode::Fallback,
                expected_joined: vec![("BTC", "BTCUSDT", MatchKind::Exact)],
                expected_unmatched: vec!["NOPE"],
            },
            TestCase {
                // TC3: supplement emits exact first, then other fuzzy hits
                allowlist: vec!["BTC"],
                market: vec!["WBTCUSDT", "BTCUSDT"],
                fuzzy_mode: FuzzyMode::Supplement,
                expected_joined: vec![
                    ("BTC", "BTCUSDT", MatchKind::Exact),
                    ("BTC", "WBTCUSDT", MatchKind::Fuzzy),
                ],
                expected_unmatched: vec![],
            },
            TestCase {
                // TC4: disabled fuzzy leaves substring-only entries unmatched
                allowlist: vec!["KOGE"],
                market: vec!["KOGEUSDC"],
                fuzzy_mode: FuzzyMode::Disabled,
                expected_joined: vec![],
                expected_unmatched: vec!["KOGE"],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let allowlist = test
                .allowlist
                .iter()
                .map(AllowlistEntry::new)
                .collect::<Vec<_>>();
            let market = test.market.iter().map(|symbol| market_record(symbol)).collect::<Vec<_>>();

            let actual = match_symbols(&allowlist, &market, "USDT", test.fuzzy_mode);

            assert_eq!(summary(&actual), test.expected_joined, "TC{} failed", index);
            assert_eq!(
                actual
                    .unmatched
                    .iter()
                    .map(|entry| entry.base_symbol.as_str())
                    .collect::<Vec<_>>(),
                test.expected_unmatched,
                "TC{} failed",
                index
            );
        }
    }

    #[test]
    fn test_exact_match_yields_exactly_one_row_per_entry() {
        let allowlist = vec![AllowlistEntry::new("ETH"), AllowlistEntry::new("SOL")];
        let market = ["ETHUSDT", "ETHFIUSDT", "SOLUSDT", "SOLVUSDT", "ETHBTC"]
            .iter()
            .map(|symbol| market_record(symbol))
            .collect::<Vec<_>>();

        let actual = match_symbols(&allowlist, &market, "USDT", FuzzyMode::Fallback);

        for entry in &allowlist {
            let rows = actual
                .joined
                .iter()
                .filter(|record| record.entry == *entry)
                .collect::<Vec<_>>();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].match_kind, MatchKind::Exact);
            assert_eq!(rows[0].market.symbol, entry.pair_symbol("USDT"));
        }
    }
}
