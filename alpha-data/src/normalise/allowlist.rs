use super::{
    Normalised,
    alias::{BASE_SYMBOL, DISPLAY_NAME, TAGS, VENUE_ID},
    as_object, normalise_rows, record_array,
};
use crate::{
    error::{NormaliseError, RecordError},
    model::AllowlistEntry,
};
use fnv::FnvHashMap;
use serde_json::Value;
use smol_str::SmolStr;

/// Normalise the internal Alpha token list (`{success, data: [{alphaId, symbol, name, ..}]}`).
pub fn normalise_alpha_list(raw: &[u8]) -> Result<Normalised<AllowlistEntry>, NormaliseError> {
    Ok(normalise_rows("alpha_token_list", record_array(raw)?, allowlist_entry))
}

/// Normalise the internal product list (`{success, data: [{s, b, q, an, tags, ..}]}`).
///
/// The product list carries one row per trading pair, so rows are collapsed per base symbol:
/// the first row supplies the display name and venue id, tags are unioned.
pub fn normalise_product_list(raw: &[u8]) -> Result<Normalised<AllowlistEntry>, NormaliseError> {
    let Normalised { records, rejected } =
        normalise_rows("product_list", record_array(raw)?, allowlist_entry);

    let mut positions = FnvHashMap::<SmolStr, usize>::default();
    let mut collapsed = Vec::<AllowlistEntry>::with_capacity(records.len());

    for entry in records {
        match positions.get(&entry.base_symbol) {
            Some(&position) => collapsed[position].tags.extend(entry.tags),
            None => {
                positions.insert(entry.base_symbol.clone(), collapsed.len());
                collapsed.push(entry);
            }
        }
    }

    Ok(Normalised {
        records: collapsed,
        rejected,
    })
}

fn allowlist_entry(row: &Value) -> Result<AllowlistEntry, RecordError> {
    let object = as_object(row)?;

    let mut entry = AllowlistEntry::new(BASE_SYMBOL.required_str(object)?);
    if let Some(display_name) = DISPLAY_NAME.optional_str(object) {
        entry.display_name = display_name;
    }
    entry.tags = TAGS.tags(object);
    entry.venue_id = VENUE_ID.optional_str(object);

    Ok(entry)
}
