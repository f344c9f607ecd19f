//! Dividend withholding tax drag.
//!
//! Total-return prices already embed reinvested dividends. To simulate a
//! foreign withholding tax on those dividends, each daily return is lowered by
//! a constant `annual_drag / 252` and the series is recompounded from its
//! first price.

use crate::types::PriceTable;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Trading days per year used to spread the annual drag.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Default withholding rate on U.S. dividends for non-residents.
const US_WITHHOLDING_RATE: f64 = 0.30;

/// Estimated annualized drag per symbol.
///
/// Values are already multiplied by the withholding rate, e.g. a 1.5% yield at
/// 30% withholding is stored as 0.0045.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaxDragTable {
    /// Drag for symbols not listed in `drags` (a U.S. equity fund)
    pub default: f64,
    /// Drag per symbol
    pub drags: BTreeMap<String, f64>,
}

impl Default for TaxDragTable {
    fn default() -> Self {
        let yields = [
            ("VOO", 0.015),
            ("VT", 0.020),
            ("VXUS", 0.030),
            ("VEA", 0.030),
            ("VWO", 0.028),
            ("AVUV", 0.018),
            ("AVDV", 0.032),
            ("AVES", 0.030),
            ("AVGE", 0.022),
            ("QMOM", 0.008),
            ("IMOM", 0.010),
            ("BTC-USD", 0.0),
        ];

        Self {
            default: 0.015 * US_WITHHOLDING_RATE,
            drags: yields
                .into_iter()
                .map(|(symbol, dividend_yield)| {
                    (symbol.to_string(), dividend_yield * US_WITHHOLDING_RATE)
                })
                .collect(),
        }
    }
}

impl TaxDragTable {
    /// Annualized drag for `symbol`, falling back to the default.
    pub fn drag_for(&self, symbol: &str) -> f64 {
        self.drags.get(symbol).copied().unwrap_or(self.default)
    }

    /// Reject negative or non-finite drags.
    pub fn validate(&self) -> Result<()> {
        let invalid = std::iter::once(("default", self.default))
            .chain(self.drags.iter().map(|(s, d)| (s.as_str(), *d)))
            .find(|(_, d)| !(d.is_finite() && *d >= 0.0));

        match invalid {
            Some((symbol, drag)) => Err(Error::InvalidConfig(format!(
                "invalid tax drag {} for {}",
                drag, symbol
            ))),
            None => Ok(()),
        }
    }
}

/// Whether `symbol` is exempt from tax drag.
///
/// A symbol is exempt when it contains any of the patterns, e.g. `.TW` for a
/// domestic listing or `BTC` for a cryptocurrency.
pub fn is_exempt(symbol: &str, exempt_patterns: &[String]) -> bool {
    exempt_patterns.iter().any(|p| symbol.contains(p.as_str()))
}

/// Lower every daily return of `prices` by `annual_drag / 252` and recompound.
///
/// The first price is kept as is. With zero drag the output equals the input
/// up to floating-point rounding.
pub fn apply_tax_drag(prices: &[f64], annual_drag: f64) -> Vec<f64> {
    let daily_drag = annual_drag / TRADING_DAYS_PER_YEAR;

    let Some(&start) = prices.first() else {
        return Vec::new();
    };

    let mut adjusted = Vec::with_capacity(prices.len());
    let mut growth = 1.0;
    adjusted.push(start);

    for pair in prices.windows(2) {
        let raw_return = pair[1] / pair[0] - 1.0;
        growth *= 1.0 + raw_return - daily_drag;
        adjusted.push(start * growth);
    }

    adjusted
}

/// Apply tax drag to every taxable column of a projected table.
///
/// The FX column and exempt symbols pass through unchanged. Every adjusted
/// column must be complete and strictly positive.
pub fn adjust_table(
    table: &PriceTable,
    drags: &TaxDragTable,
    exempt_patterns: &[String],
    fx_symbol: &str,
) -> Result<PriceTable> {
    let mut adjusted = table.clone();

    for symbol in table.symbols() {
        if symbol == fx_symbol || is_exempt(symbol, exempt_patterns) {
            tracing::debug!("Tax drag skipped for {}", symbol);
            continue;
        }

        let prices = table.dense_column(symbol).ok_or_else(|| {
            Error::InvalidTable(format!("{} has missing prices; project the table first", symbol))
        })?;

        if let Some(position) = prices.iter().position(|p| *p <= 0.0 || !p.is_finite()) {
            return Err(Error::InvalidTable(format!(
                "{} has non-positive price {} on {:?}",
                symbol,
                prices[position],
                table.dates().get(position)
            )));
        }

        let drag = drags.drag_for(symbol);
        tracing::debug!("Applying {:.4} annual tax drag to {}", drag, symbol);
        let values = apply_tax_drag(&prices, drag).into_iter().map(Some).collect();
        adjusted.insert_column(symbol, values)?;
    }

    Ok(adjusted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn exempt() -> Vec<String> {
        vec![".L".to_string(), ".TW".to_string(), "BTC".to_string()]
    }

    #[test]
    fn test_zero_drag_is_identity() {
        let prices = vec![100.0, 101.5, 99.2, 103.7, 103.7, 98.1];
        let adjusted = apply_tax_drag(&prices, 0.0);

        assert_eq!(adjusted.len(), prices.len());
        for (a, p) in adjusted.iter().zip(&prices) {
            assert_relative_eq!(*a, *p, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_drag_on_flat_series() {
        // Flat prices: every adjusted return is exactly -d/252
        let prices = vec![100.0; 4];
        let drag = 0.0045;
        let adjusted = apply_tax_drag(&prices, drag);

        let daily = 1.0 - drag / 252.0;
        assert_eq!(adjusted[0], 100.0);
        assert_relative_eq!(adjusted[1], 100.0 * daily, max_relative = 1e-12);
        assert_relative_eq!(adjusted[3], 100.0 * daily.powi(3), max_relative = 1e-12);
    }

    #[test]
    fn test_drag_one_year() {
        // 253 rows = 252 returns, roughly one year of drag
        let prices = vec![50.0; 253];
        let adjusted = apply_tax_drag(&prices, 0.0252);

        let expected = 50.0 * (1.0_f64 - 0.0001).powi(252);
        assert_relative_eq!(*adjusted.last().unwrap(), expected, max_relative = 1e-10);
        assert!(*adjusted.last().unwrap() < 50.0 * (1.0 - 0.0248));
    }

    #[test]
    fn test_empty_and_single() {
        assert!(apply_tax_drag(&[], 0.01).is_empty());
        assert_eq!(apply_tax_drag(&[42.0], 0.01), vec![42.0]);
    }

    #[test]
    fn test_drag_lookup_with_default() {
        let table = TaxDragTable::default();
        assert_relative_eq!(table.drag_for("VOO"), 0.0045, max_relative = 1e-12);
        assert_relative_eq!(table.drag_for("AVDV"), 0.0096, max_relative = 1e-12);
        assert_eq!(table.drag_for("BTC-USD"), 0.0);
        assert_relative_eq!(table.drag_for("SCHD"), 0.0045, max_relative = 1e-12);
    }

    #[test]
    fn test_is_exempt() {
        let patterns = exempt();
        assert!(is_exempt("0050.TW", &patterns));
        assert!(is_exempt("VWRA.L", &patterns));
        assert!(is_exempt("BTC-USD", &patterns));
        assert!(!is_exempt("VOO", &patterns));
    }

    #[test]
    fn test_adjust_table_skips_fx_and_exempt() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        let table = PriceTable::from_observations(vec![
            (d(1), "VOO", 100.0),
            (d(2), "VOO", 100.0),
            (d(1), "0050.TW", 150.0),
            (d(2), "0050.TW", 150.0),
            (d(1), "USDTWD=X", 32.0),
            (d(2), "USDTWD=X", 32.0),
        ]);

        let adjusted =
            adjust_table(&table, &TaxDragTable::default(), &exempt(), "USDTWD=X").unwrap();

        assert_eq!(adjusted.column("0050.TW"), table.column("0050.TW"));
        assert_eq!(adjusted.column("USDTWD=X"), table.column("USDTWD=X"));
        let voo = adjusted.dense_column("VOO").unwrap();
        assert_eq!(voo[0], 100.0);
        assert!(voo[1] < 100.0);
    }

    #[test]
    fn test_adjust_table_requires_complete_columns() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        let table = PriceTable::from_observations(vec![
            (d(1), "VOO", 100.0),
            (d(2), "AVUV", 50.0),
        ]);

        let result = adjust_table(&table, &TaxDragTable::default(), &exempt(), "USDTWD=X");
        assert!(matches!(result, Err(Error::InvalidTable(_))));
    }

    #[test]
    fn test_adjust_table_rejects_zero_price() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        let table = PriceTable::from_observations(vec![
            (d(1), "VOO", 100.0),
            (d(2), "VOO", 0.0),
            (d(3), "VOO", 101.0),
        ]);

        let result = adjust_table(&table, &TaxDragTable::default(), &exempt(), "USDTWD=X");
        match result {
            Err(Error::InvalidTable(message)) => assert!(message.contains("VOO")),
            other => panic!("expected InvalidTable, got {:?}", other),
        }

        // Exempt symbols are never divided, so a zero there passes through
        let domestic = PriceTable::from_observations(vec![
            (d(1), "0050.TW", 0.0),
            (d(2), "0050.TW", 150.0),
        ]);
        assert!(adjust_table(&domestic, &TaxDragTable::default(), &exempt(), "USDTWD=X").is_ok());
    }

    #[test]
    fn test_validate_rejects_negative() {
        let mut table = TaxDragTable::default();
        table.drags.insert("VOO".to_string(), -0.01);
        assert!(table.validate().is_err());
    }
}
