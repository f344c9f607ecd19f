//! Currency normalization into the reporting currency.

use crate::types::PriceTable;
use crate::{Error, Result};

/// Whether `symbol` is already quoted in the reporting currency.
pub fn is_domestic(symbol: &str, domestic_suffixes: &[String]) -> bool {
    domestic_suffixes
        .iter()
        .any(|suffix| symbol.ends_with(suffix.as_str()))
}

/// Convert every foreign column into the reporting currency.
///
/// Each non-domestic price is multiplied by the same-date FX rate (reporting
/// currency per foreign unit). Domestic columns pass through unchanged and the
/// FX column is dropped from the output.
///
/// # Errors
///
/// `Error::FxMissing` if the table has no FX column, `Error::InvalidTable` if a
/// converted row has no FX rate or no price.
pub fn normalize(
    table: &PriceTable,
    fx_symbol: &str,
    domestic_suffixes: &[String],
) -> Result<PriceTable> {
    let fx = table
        .column(fx_symbol)
        .ok_or_else(|| Error::FxMissing(fx_symbol.to_string()))?;

    let mut normalized = table.clone();
    normalized.remove_column(fx_symbol);

    for (symbol, prices) in table.columns() {
        if symbol == fx_symbol || is_domestic(symbol, domestic_suffixes) {
            continue;
        }

        let converted = prices
            .iter()
            .zip(fx)
            .zip(table.dates())
            .map(|((price, rate), date)| match (price, rate) {
                (Some(p), Some(r)) => Ok(Some(p * r)),
                (None, _) => Err(Error::InvalidTable(format!(
                    "{} has no price on {}",
                    symbol, date
                ))),
                (_, None) => Err(Error::InvalidTable(format!(
                    "{} has no rate on {}",
                    fx_symbol, date
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        normalized.insert_column(symbol, converted)?;
    }

    Ok(normalized)
}
