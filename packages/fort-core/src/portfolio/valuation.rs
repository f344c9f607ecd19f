//! Buy-and-hold portfolio valuation.

use crate::types::{Holding, PortfolioDefinition, PriceTable, ValuationPoint, ValuationSeries};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Fixed holdings and the resulting daily values of one portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Valuation {
    pub holdings: Vec<Holding>,
    pub series: ValuationSeries,
}

/// Convert target weights into unit counts bought on the first row.
///
/// `units = initial_capital * weight / price_on_first_row`. The table must
/// already be restricted to rows where every instrument has a price.
///
/// # Errors
///
/// - `Error::MissingInstruments` if any symbol of the portfolio has no column
/// - `Error::NoOverlap` if the table has no rows
/// - `Error::InvalidTable` if an inception price is missing or not positive
pub fn compute_units(
    table: &PriceTable,
    portfolio: &PortfolioDefinition,
    initial_capital: f64,
) -> Result<Vec<Holding>> {
    let missing: Vec<String> = portfolio
        .symbols()
        .filter(|s| !table.has_symbol(s))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingInstruments {
            portfolio: portfolio.name.clone(),
            symbols: missing,
        });
    }

    if table.is_empty() {
        return Err(Error::NoOverlap(portfolio.name.clone()));
    }

    portfolio
        .weights
        .iter()
        .map(|(symbol, &weight)| {
            let inception_price = table
                .column(symbol)
                .and_then(|values| values.first().copied().flatten())
                .filter(|p| *p > 0.0)
                .ok_or_else(|| {
                    Error::InvalidTable(format!(
                        "{} has no positive price on {:?}",
                        symbol,
                        table.first_date()
                    ))
                })?;

            Ok(Holding {
                symbol: symbol.clone(),
                weight,
                units: initial_capital * weight / inception_price,
                inception_price,
            })
        })
        .collect()
}

/// Value a portfolio on every row of `table`.
///
/// Units are fixed at inception; the daily value is the sum of
/// `units * price` across holdings.
pub fn valuate(
    table: &PriceTable,
    portfolio: &PortfolioDefinition,
    initial_capital: f64,
) -> Result<Valuation> {
    let holdings = compute_units(table, portfolio, initial_capital)?;

    let mut values = vec![0.0; table.len()];
    for holding in &holdings {
        let prices = table.dense_column(&holding.symbol).ok_or_else(|| {
            Error::InvalidTable(format!("{} has missing prices", holding.symbol))
        })?;
        for (value, price) in values.iter_mut().zip(prices) {
            *value += holding.value_at(price);
        }
    }

    let points = table
        .dates()
        .iter()
        .zip(values)
        .map(|(&date, value)| ValuationPoint { date, value })
        .collect();

    Ok(Valuation {
        holdings,
        series: ValuationSeries {
            name: portfolio.name.clone(),
            points,
        },
    })
}
