use super::{
    Normalised,
    alias::{HIGH_PRICE, LAST_PRICE, LOW_PRICE, PRICE_CHANGE_PERCENT, QUOTE_VOLUME, TICKER_SYMBOL},
    as_object, normalise_rows, record_array,
};
use crate::{
    error::{NormaliseError, RecordError},
    model::MarketRecord,
};
use serde_json::Value;
use smol_str::SmolStr;

/// Normalise a full-market 24h ticker payload.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/rest-api/market-data-endpoints#24hr-ticker-price-change-statistics>
pub fn normalise_ticker(raw: &[u8]) -> Result<Normalised<MarketRecord>, NormaliseError> {
    Ok(normalise_rows("ticker", record_array(raw)?, market_record))
}

fn market_record(row: &Value) -> Result<MarketRecord, RecordError> {
    let object = as_object(row)?;

    Ok(MarketRecord {
        symbol: SmolStr::new(TICKER_SYMBOL.required_str(object)?.to_uppercase()),
        last_price: LAST_PRICE.required_decimal(object)?,
        high_price: HIGH_PRICE.required_decimal(object)?,
        low_price: LOW_PRICE.required_decimal(object)?,
        quote_volume: QUOTE_VOLUME.required_decimal(object)?,
        price_change_percent: PRICE_CHANGE_PERCENT.optional_decimal(object)?,
    })
}
