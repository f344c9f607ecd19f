//! Instrument universe resolution and per-group projection.

use crate::types::{PortfolioDefinition, PriceTable};
use std::collections::BTreeSet;

/// Every symbol referenced by `portfolios`, plus the FX symbol.
pub fn resolve_universe<'a, I>(portfolios: I, fx_symbol: &str) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a PortfolioDefinition>,
{
    let mut universe: BTreeSet<String> = portfolios
        .into_iter()
        .flat_map(|p| p.symbols().map(str::to_string))
        .collect();
    universe.insert(fx_symbol.to_string());
    universe
}

/// Symbols of `portfolio` that never have a price in `table`.
pub fn missing_instruments(table: &PriceTable, portfolio: &PortfolioDefinition) -> Vec<String> {
    portfolio
        .symbols()
        .filter(|s| table.first_valid_date(s).is_none())
        .map(str::to_string)
        .collect()
}

/// Restrict a shared raw table to `symbols` and drop every row where any of
/// them is missing.
///
/// The first row of the result is the latest first-available date among the
/// selected instruments.
pub fn project(raw: &PriceTable, symbols: &BTreeSet<String>) -> PriceTable {
    raw.select(symbols.iter().map(String::as_str)).drop_incomplete()
}
