use crate::error::RecordError;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use smol_str::SmolStr;
use std::{collections::BTreeSet, str::FromStr};

/// A semantic field and the prioritised upstream key names it may arrive under.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

pub const TICKER_SYMBOL: Field = Field {
    name: "symbol",
    aliases: &["symbol", "s"],
};

pub const LAST_PRICE: Field = Field {
    name: "lastPrice",
    aliases: &["lastPrice", "c", "price", "close"],
};

pub const HIGH_PRICE: Field = Field {
    name: "highPrice",
    aliases: &["highPrice", "h", "high"],
};

pub const LOW_PRICE: Field = Field {
    name: "lowPrice",
    aliases: &["lowPrice", "l", "low"],
};

pub const QUOTE_VOLUME: Field = Field {
    name: "quoteVolume",
    aliases: &["quoteVolume", "q", "qv", "quoteAssetVolume"],
};

pub const PRICE_CHANGE_PERCENT: Field = Field {
    name: "priceChangePercent",
    aliases: &["priceChangePercent", "P"],
};

pub const BASE_SYMBOL: Field = Field {
    name: "baseSymbol",
    aliases: &["symbol", "baseAsset", "tokenSymbol", "b", "base"],
};

pub const DISPLAY_NAME: Field = Field {
    name: "displayName",
    aliases: &["name", "tokenName", "an", "assetName", "displayName"],
};

pub const TAGS: Field = Field {
    name: "tags",
    aliases: &["tags", "tagInfos", "tag"],
};

pub const VENUE_ID: Field = Field {
    name: "venueId",
    aliases: &["alphaId", "tokenId"],
};

pub const OPEN_TIME: Field = Field {
    name: "openTime",
    aliases: &["openTime", "t"],
};

pub const OPEN: Field = Field {
    name: "open",
    aliases: &["open", "o"],
};

pub const CLOSE: Field = Field {
    name: "close",
    aliases: &["close", "c"],
};

pub const VOLUME: Field = Field {
    name: "volume",
    aliases: &["volume", "v"],
};

impl Field {
    /// First alias present with a non-null, non-blank value.
    pub fn resolve<'a>(&self, object: &'a Map<String, Value>) -> Option<&'a Value> {
        self.aliases
            .iter()
            .filter_map(|alias| object.get(*alias))
            .find(|value| match value {
                Value::Null => false,
                Value::String(text) => !text.trim().is_empty(),
                _ => true,
            })
    }

    pub fn required_str(&self, object: &Map<String, Value>) -> Result<SmolStr, RecordError> {
        self.optional_str(object)
            .ok_or(RecordError::MissingField(self.name))
    }

    /// Strings are trimmed, numbers are rendered; anything else counts as absent.
    pub fn optional_str(&self, object: &Map<String, Value>) -> Option<SmolStr> {
        self.aliases
            .iter()
            .filter_map(|alias| match object.get(*alias)? {
                Value::String(text) if !text.trim().is_empty() => Some(SmolStr::new(text.trim())),
                Value::Number(number) => Some(SmolStr::new(number.to_string())),
                _ => None,
            })
            .next()
    }

    pub fn required_decimal(&self, object: &Map<String, Value>) -> Result<Decimal, RecordError> {
        self.optional_decimal(object)?
            .ok_or(RecordError::MissingField(self.name))
    }

    pub fn optional_decimal(
        &self,
        object: &Map<String, Value>,
    ) -> Result<Option<Decimal>, RecordError> {
        self.resolve(object)
            .map(|value| parse_decimal(self.name, value))
            .transpose()
    }

    /// Tags arrive as string arrays, arrays of `{tagName}` objects, or comma separated text.
    pub fn tags(&self, object: &Map<String, Value>) -> BTreeSet<SmolStr> {
        let Some(value) = self.resolve(object) else {
            return BTreeSet::new();
        };

        let tag = |text: &str| {
            let text = text.trim();
            (!text.is_empty()).then(|| SmolStr::new(text))
        };

        match value {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(text) => tag(text),
                    Value::Object(object) => ["tagName", "name", "tag"]
                        .iter()
                        .find_map(|key| object.get(*key).and_then(Value::as_str))
                        .and_then(tag),
                    _ => None,
                })
                .collect(),
            Value::String(text) => text.split(',').filter_map(tag).collect(),
            _ => BTreeSet::new(),
        }
    }
}

/// Parse a JSON string or number into a [`Decimal`], accepting scientific notation.
pub fn parse_decimal(field: &'static str, value: &Value) -> Result<Decimal, RecordError> {
    let not_numeric = || RecordError::NotNumeric {
        field,
        value: value.to_string(),
    };

    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return Err(not_numeric()),
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| not_numeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(object) => object,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_resolve_takes_first_present_alias() {
        struct TestCase {
            input: Value,
            expected: Option<&'static str>,
        }

        let tests = vec![
            TestCase {
                // TC0: primary alias present
                input: json!({"symbol": "BTC", "baseAsset": "ETH"}),
                expected: Some("BTC"),
            },
            TestCase {
                // TC1: primary alias null, second used
                input: json!({"symbol": null, "baseAsset": "ETH"}),
                expected: Some("ETH"),
            },
            TestCase {
                // TC2: blank strings are skipped
                input: json!({"symbol": "  ", "tokenSymbol": "SOL"}),
                expected: Some("SOL"),
            },
            TestCase {
                // TC3: short product-list key
                input: json!({"b": "BNB", "q": "USDT"}),
                expected: Some("BNB"),
            },
            TestCase {
                // TC4: nothing resolvable
                input: json!({"name": "Bitcoin"}),
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = BASE_SYMBOL.optional_str(&object(test.input));
            assert_eq!(actual.as_deref(), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_parse_decimal() {
        struct TestCase {
            input: Value,
            expected: Result<Decimal, RecordError>,
        }

        let tests = vec![
            TestCase {
                // TC0: numeric string
                input: json!("49000.00000000"),
                expected: Ok(dec!(49000)),
            },
            TestCase {
                // TC1: JSON integer
                input: json!(1000000),
                expected: Ok(dec!(1000000)),
            },
            TestCase {
                // TC2: JSON float
                input: json!(0.25),
                expected: Ok(dec!(0.25)),
            },
            TestCase {
                // TC3: scientific notation
                input: json!("1.5e-7"),
                expected: Ok(dec!(0.00000015)),
            },
            TestCase {
                // TC4: non-numeric text
                input: json!("n/a"),
                expected: Err(RecordError::NotNumeric {
                    field: "lowPrice",
                    value: "\"n/a\"".to_string(),
                }),
            },
            TestCase {
                // TC5: wrong JSON type
                input: json!(true),
                expected: Err(RecordError::NotNumeric {
                    field: "lowPrice",
                    value: "true".to_string(),
                }),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = parse_decimal("lowPrice", &test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_tags_shapes() {
        let strings = object(json!({"tags": ["alpha", " meme ", ""]}));
        let objects = object(json!({"tagInfos": [{"tagName": "alpha"}, {"name": "bsc"}]}));
        let text = object(json!({"tag": "alpha,bsc"}));

        assert_eq!(
            TAGS.tags(&strings),
            BTreeSet::from([SmolStr::new("alpha"), SmolStr::new("meme")])
        );
        assert_eq!(
            TAGS.tags(&objects),
            BTreeSet::from([SmolStr::new("alpha"), SmolStr::new("bsc")])
        );
        assert_eq!(TAGS.tags(&text), TAGS.tags(&objects));
        assert!(TAGS.tags(&object(json!({}))).is_empty());
    }
}
