use super::{
    Normalised,
    alias::{CLOSE, HIGH_PRICE, LOW_PRICE, OPEN, OPEN_TIME, QUOTE_VOLUME, VOLUME, parse_decimal},
    normalise_rows, record_array,
};
use crate::{
    error::{NormaliseError, RecordError},
    model::MarketRecord,
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;

/// One OHLCV candle from the internal candlestick query.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct Candle {
    pub open_time: Option<DateTime<Utc>>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub quote_volume: Option<Decimal>,
}

impl Candle {
    /// Canonical ticker row for `symbol` built from this candle's window.
    ///
    /// Quote volume falls back to `volume * close` when the upstream omits it. A fallback that
    /// does not fit a [`Decimal`] rejects the candle; an unrepresentable price change is `None`.
    pub fn into_market_record(self, symbol: SmolStr) -> Result<MarketRecord, RecordError> {
        let quote_volume = match self.quote_volume {
            Some(quote_volume) => quote_volume,
            None => self
                .volume
                .checked_mul(self.close)
                .ok_or_else(|| RecordError::NotNumeric {
                    field: QUOTE_VOLUME.name,
                    value: format!("{} * {}", self.volume, self.close),
                })?,
        };

        let price_change_percent = (self.open > Decimal::ZERO)
            .then(|| {
                self.close
                    .checked_sub(self.open)?
                    .checked_div(self.open)?
                    .checked_mul(Decimal::ONE_HUNDRED)
            })
            .flatten();

        Ok(MarketRecord {
            symbol,
            last_price: self.close,
            high_price: self.high,
            low_price: self.low,
            quote_volume,
            price_change_percent,
        })
    }
}

/// Normalise a candlestick payload `{success, data: [[openTime, open, high, low, close, volume,
/// closeTime, quoteVolume, ..], ..]}`. Rows may also arrive as objects keyed by field name.
pub fn normalise_klines(raw: &[u8]) -> Result<Normalised<Candle>, NormaliseError> {
    Ok(normalise_rows("klines", record_array(raw)?, candle))
}

fn candle(row: &Value) -> Result<Candle, RecordError> {
    match row {
        Value::Array(columns) => candle_from_columns(columns),
        Value::Object(object) => Ok(Candle {
            open_time: OPEN_TIME
                .resolve(object)
                .and_then(|value| open_time(value).ok()),
            open: OPEN.required_decimal(object)?,
            high: HIGH_PRICE.required_decimal(object)?,
            low: LOW_PRICE.required_decimal(object)?,
            close: CLOSE.required_decimal(object)?,
            volume: VOLUME.required_decimal(object)?,
            quote_volume: QUOTE_VOLUME.optional_decimal(object)?,
        }),
        _ => Err(RecordError::NotObject),
    }
}

fn candle_from_columns(columns: &[Value]) -> Result<Candle, RecordError> {
    let column = |index: usize, field: &'static str| {
        columns
            .get(index)
            .filter(|value| !value.is_null())
            .ok_or(RecordError::MissingField(field))
            .and_then(|value| parse_decimal(field, value))
    };

    Ok(Candle {
        open_time: columns.first().and_then(|value| open_time(value).ok()),
        open: column(1, OPEN.name)?,
        high: column(2, HIGH_PRICE.name)?,
        low: column(3, LOW_PRICE.name)?,
        close: column(4, CLOSE.name)?,
        volume: column(5, VOLUME.name)?,
        quote_volume: match columns.get(7) {
            Some(value) if !value.is_null() => Some(parse_decimal(QUOTE_VOLUME.name, value)?),
            _ => None,
        },
    })
}

fn open_time(value: &Value) -> Result<DateTime<Utc>, RecordError> {
    let millis = parse_decimal(OPEN_TIME.name, value)?;
    millis
        .to_i64()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or(RecordError::NotNumeric {
            field: OPEN_TIME.name,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalise_klines() {
        struct TestCase {
            input: &'static str,
            expected: Result<Vec<Candle>, NormaliseError>,
        }

        let tests = vec![
            TestCase {
                // TC0: array rows with string columns and quote volume
                input: r#"{"code":"000000","success":true,"data":[
                    ["1717200000000","47.10","49.50","46.00","48.00","1000","1717286399999","48000"]
                ]}"#,
                expected: Ok(vec![Candle {
                    open_time: DateTime::from_timestamp_millis(1717200000000),
                    open: dec!(47.10),
                    high: dec!(49.50),
                    low: dec!(46.00),
                    close: dec!(48.00),
                    volume: dec!(1000),
                    quote_volume: Some(dec!(48000)),
                }]),
            },
            TestCase {
                // TC1: short numeric rows without quote volume
                input: r#"{"success":true,"data":[[1717200000000, 1, 2, 0.5, 1.5, 10]]}"#,
                expected: Ok(vec![Candle {
                    open_time: DateTime::from_timestamp_millis(1717200000000),
                    open: dec!(1),
                    high: dec!(2),
                    low: dec!(0.5),
                    close: dec!(1.5),
                    volume: dec!(10),
                    quote_volume: None,
                }]),
            },
            TestCase {
                // TC2: object rows
                input: r#"{"success":true,"data":[{"t":1717200000000,"o":"1","h":"2","l":"1","c":"2","v":"3"}]}"#,
                expected: Ok(vec![Candle {
                    open_time: DateTime::from_timestamp_millis(1717200000000),
                    open: dec!(1),
                    high: dec!(2),
                    low: dec!(1),
                    close: dec!(2),
                    volume: dec!(3),
                    quote_volume: None,
                }]),
            },
            TestCase {
                // TC3: rejected envelope
                input: r#"{"code":"000002","message":"symbol not found","success":false}"#,
                expected: Err(NormaliseError::UpstreamRejection(
                    "000002: symbol not found".to_string(),
                )),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = normalise_klines(test.input.as_bytes()).map(|candles| candles.records);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_truncated_kline_row_is_rejected() {
        let actual =
            normalise_klines(br#"{"success":true,"data":[[1717200000000,"1","2"]]}"#).unwrap();

        assert!(actual.records.is_empty());
        assert_eq!(actual.rejected, vec![RecordError::MissingField("lowPrice")]);
    }

    #[test]
    fn test_candle_into_market_record() {
        let candle = Candle {
            open_time: None,
            open: dec!(40),
            high: dec!(55),
            low: dec!(38),
            close: dec!(50),
            volume: dec!(200),
            quote_volume: None,
        };

        let actual = candle
            .into_market_record(SmolStr::new("ALPHA_175USDT"))
            .unwrap();

        assert_eq!(actual.symbol, "ALPHA_175USDT");
        assert_eq!(actual.last_price, dec!(50));
        assert_eq!(actual.quote_volume, dec!(10000));
        assert_eq!(actual.price_change_percent, Some(dec!(25)));
    }

    #[test]
    fn test_candle_into_market_record_overflow() {
        struct TestCase {
            input: Candle,
            expected: Result<(Decimal, Option<Decimal>), RecordError>,
        }

        let candle = |open: Decimal, volume: Decimal, quote_volume: Option<Decimal>| Candle {
            open_time: None,
            open,
            high: dec!(2),
            low: dec!(1),
            close: dec!(1000),
            volume,
            quote_volume,
        };

        let tests = vec![
            TestCase {
                // TC0: fallback quote volume overflows
                input: candle(dec!(1), Decimal::MAX, None),
                expected: Err(RecordError::NotNumeric {
                    field: "quoteVolume",
                    value: format!("{} * 1000", Decimal::MAX),
                }),
            },
            TestCase {
                // TC1: price change against a tiny open overflows
                input: candle(dec!(0.0000000000000000000000000001), dec!(1), Some(dec!(5))),
                expected: Ok((dec!(5), None)),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test
                .input
                .into_market_record(SmolStr::new("HUGEUSDT"))
                .map(|record| (record.quote_volume, record.price_change_percent));
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
