//! Conversion of loosely specified upstream payloads into strict, typed records.
//!
//! Raw [`serde_json::Value`]s never leave this module. Each semantic field is resolved through a
//! prioritised alias table ([`alias`]); a record lacking a required field, or carrying a
//! non-numeric value where a decimal is expected, is dropped and counted in
//! [`Normalised::rejected`] while the rest of the batch survives.

use crate::error::{NormaliseError, RecordError};
use serde_json::{Map, Value};
use tracing::debug;

/// Prioritised field alias tables and decimal parsing.
pub mod alias;

/// Internal allowlist shapes: product list and Alpha token list.
pub mod allowlist;

/// Internal candlestick envelope.
pub mod kline;

/// Public 24h ticker array.
pub mod ticker;

pub use allowlist::{normalise_alpha_list, normalise_product_list};
pub use kline::{Candle, normalise_klines};
pub use ticker::normalise_ticker;

/// Keys under which some internal endpoints nest the record array inside `data`.
const NESTED_ARRAY_KEYS: [&str; 4] = ["list", "rows", "tokens", "items"];

/// Records that survived normalisation, plus why the others were dropped.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Normalised<T> {
    pub records: Vec<T>,
    pub rejected: Vec<RecordError>,
}

impl<T> Normalised<T> {
    pub fn dropped(&self) -> usize {
        self.rejected.len()
    }
}

impl<T> Default for Normalised<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

/// Decode a payload body and unwrap its record array.
pub(crate) fn record_array(raw: &[u8]) -> Result<Vec<Value>, NormaliseError> {
    let value = serde_json::from_slice::<Value>(raw)
        .map_err(|error| NormaliseError::InvalidJson(error.to_string()))?;

    unwrap_envelope(value)
}

/// Accepts a flat array, or a `{success, data}` envelope whose `data` is an array, `null`, or an
/// object nesting the array under one of [`NESTED_ARRAY_KEYS`].
fn unwrap_envelope(value: Value) -> Result<Vec<Value>, NormaliseError> {
    let mut envelope = match value {
        Value::Array(rows) => return Ok(rows),
        Value::Object(envelope) => envelope,
        other => {
            return Err(NormaliseError::SchemaMismatch(format!(
                "expected array or envelope object, got {}",
                kind(&other)
            )));
        }
    };

    if envelope.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(NormaliseError::UpstreamRejection(rejection_message(&envelope)));
    }

    match envelope.remove("data") {
        Some(Value::Array(rows)) => Ok(rows),
        Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(mut nested)) => NESTED_ARRAY_KEYS
            .iter()
            .find_map(|key| match nested.remove(*key) {
                Some(Value::Array(rows)) => Some(rows),
                _ => None,
            })
            .ok_or_else(|| {
                NormaliseError::SchemaMismatch("data object nests no record array".to_string())
            }),
        Some(other) => Err(NormaliseError::SchemaMismatch(format!(
            "data is {}, expected array",
            kind(&other)
        ))),
        None if envelope.contains_key("msg") || envelope.contains_key("message") => Err(
            NormaliseError::UpstreamRejection(rejection_message(&envelope)),
        ),
        None => Err(NormaliseError::SchemaMismatch(
            "envelope has no data field".to_string(),
        )),
    }
}

fn rejection_message(envelope: &Map<String, Value>) -> String {
    let text = |key: &str| {
        envelope.get(key).and_then(|value| match value {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
    };

    match (text("code"), text("message").or_else(|| text("msg"))) {
        (Some(code), Some(message)) => format!("{code}: {message}"),
        (None, Some(message)) => message,
        (Some(code), None) => format!("code {code}"),
        (None, None) => "success flag false".to_string(),
    }
}

/// Apply a per-record parser, collecting survivors and rejections.
pub(crate) fn normalise_rows<T, F>(source: &'static str, rows: Vec<Value>, parse: F) -> Normalised<T>
where
    F: Fn(&Value) -> Result<T, RecordError>,
{
    let mut normalised = Normalised {
        records: Vec::with_capacity(rows.len()),
        rejected: Vec::new(),
    };

    for row in &rows {
        match parse(row) {
            Ok(record) => normalised.records.push(record),
            Err(error) => normalised.rejected.push(error),
        }
    }

    if !normalised.rejected.is_empty() {
        debug!(
            source,
            kept = normalised.records.len(),
            dropped = normalised.dropped(),
            "dropped records during normalisation"
        );
    }

    normalised
}

pub(crate) fn as_object(row: &Value) -> Result<&Map<String, Value>, RecordError> {
    row.as_object().ok_or(RecordError::NotObject)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
