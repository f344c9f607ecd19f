//! Core data types for the fORT back-testing engine.

use crate::config::Period;
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Daily closing prices, one column per instrument symbol.
///
/// Dates are strictly ascending and every column carries exactly one entry per
/// date. A `None` entry means the instrument had no price on that row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PriceTableData")]
pub struct PriceTable {
    dates: Vec<NaiveDate>,
    columns: BTreeMap<String, Vec<Option<f64>>>,
}

/// Unvalidated wire shape of a [`PriceTable`].
#[derive(Deserialize)]
struct PriceTableData {
    dates: Vec<NaiveDate>,
    #[serde(default)]
    columns: BTreeMap<String, Vec<Option<f64>>>,
}

impl TryFrom<PriceTableData> for PriceTable {
    type Error = Error;

    fn try_from(data: PriceTableData) -> Result<Self> {
        PriceTable::from_columns(data.dates, data.columns)
    }
}

impl PriceTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from unordered `(date, symbol, price)` observations.
    ///
    /// Dates are sorted and deduplicated; a later observation for the same
    /// date and symbol replaces an earlier one.
    pub fn from_observations<I, S>(observations: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDate, S, f64)>,
        S: Into<String>,
    {
        let mut rows: BTreeMap<NaiveDate, BTreeMap<String, f64>> = BTreeMap::new();
        let mut symbols = BTreeSet::new();

        for (date, symbol, price) in observations {
            let symbol = symbol.into();
            symbols.insert(symbol.clone());
            rows.entry(date).or_default().insert(symbol, price);
        }

        let dates: Vec<NaiveDate> = rows.keys().copied().collect();
        let columns = symbols
            .into_iter()
            .map(|symbol| {
                let values = rows.values().map(|row| row.get(&symbol).copied()).collect();
                (symbol, values)
            })
            .collect();

        Self { dates, columns }
    }

    /// Build a table from a date index and columns, validating the invariants.
    pub fn from_columns(
        dates: Vec<NaiveDate>,
        columns: BTreeMap<String, Vec<Option<f64>>>,
    ) -> Result<Self> {
        if let Some(pair) = dates.windows(2).find(|w| w[0] >= w[1]) {
            return Err(Error::InvalidTable(format!(
                "dates must be strictly ascending ({} followed by {})",
                pair[0], pair[1]
            )));
        }

        for (symbol, values) in &columns {
            if values.len() != dates.len() {
                return Err(Error::InvalidTable(format!(
                    "column {} has {} entries for {} dates",
                    symbol,
                    values.len(),
                    dates.len()
                )));
            }
        }

        Ok(Self { dates, columns })
    }

    /// Parse and validate a table from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Row dates in ascending order.
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Column symbols in sorted order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Whether the table has a column for `symbol`.
    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.columns.contains_key(symbol)
    }

    /// Raw column for `symbol`, including missing entries.
    pub fn column(&self, symbol: &str) -> Option<&[Option<f64>]> {
        self.columns.get(symbol).map(Vec::as_slice)
    }

    /// Column for `symbol` with every entry present, or `None` if the column is
    /// absent or has any gap.
    pub fn dense_column(&self, symbol: &str) -> Option<Vec<f64>> {
        self.columns.get(symbol)?.iter().copied().collect()
    }

    /// Iterate over `(symbol, values)` pairs.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &[Option<f64>])> {
        self.columns.iter().map(|(s, v)| (s.as_str(), v.as_slice()))
    }

    /// Insert or replace a column. The column must have one entry per row.
    pub fn insert_column(&mut self, symbol: impl Into<String>, values: Vec<Option<f64>>) -> Result<()> {
        let symbol = symbol.into();
        if values.len() != self.dates.len() {
            return Err(Error::InvalidTable(format!(
                "column {} has {} entries for {} dates",
                symbol,
                values.len(),
                self.dates.len()
            )));
        }
        self.columns.insert(symbol, values);
        Ok(())
    }

    /// Remove a column, returning its values.
    pub fn remove_column(&mut self, symbol: &str) -> Option<Vec<Option<f64>>> {
        self.columns.remove(symbol)
    }

    /// First row date.
    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    /// Last row date.
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Date range covered by the table.
    pub fn date_range(&self) -> Option<DateRange> {
        Some(DateRange {
            start: self.first_date()?,
            end: self.last_date()?,
        })
    }

    /// First date on which `symbol` has a price.
    pub fn first_valid_date(&self, symbol: &str) -> Option<NaiveDate> {
        let values = self.columns.get(symbol)?;
        values
            .iter()
            .position(Option::is_some)
            .map(|idx| self.dates[idx])
    }

    /// Carry the last known price forward over gaps inside each column.
    ///
    /// Leading gaps (before an instrument's first price) stay missing.
    pub fn forward_fill(&mut self) {
        for values in self.columns.values_mut() {
            let mut last = None;
            for value in values.iter_mut() {
                match value {
                    Some(v) => last = Some(*v),
                    None => *value = last,
                }
            }
        }
    }

    /// Keep only rows on or after `start`.
    pub fn since(&self, start: NaiveDate) -> Self {
        let offset = self.dates.partition_point(|d| *d < start);
        Self {
            dates: self.dates[offset..].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|(s, v)| (s.clone(), v[offset..].to_vec()))
                .collect(),
        }
    }

    /// Project onto the given symbols. Symbols without a column are ignored.
    pub fn select<'a, I>(&self, symbols: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let columns = symbols
            .into_iter()
            .filter_map(|s| self.columns.get_key_value(s))
            .map(|(s, v)| (s.clone(), v.clone()))
            .collect();

        Self {
            dates: self.dates.clone(),
            columns,
        }
    }

    /// Drop every row where any column is missing a price.
    pub fn drop_incomplete(&self) -> Self {
        let keep: Vec<usize> = (0..self.dates.len())
            .filter(|&i| self.columns.values().all(|v| v[i].is_some()))
            .collect();

        Self {
            dates: keep.iter().map(|&i| self.dates[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(s, v)| (s.clone(), keep.iter().map(|&i| v[i]).collect()))
                .collect(),
        }
    }
}

/// Inclusive date range of a computed series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Calendar days between start and end.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// A named buy-and-hold portfolio: symbol to target weight.
///
/// Weights are used as fractions of initial capital exactly as given. They are
/// not required to sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioDefinition {
    /// Human-readable portfolio name
    pub name: String,
    /// Target weight per symbol
    pub weights: BTreeMap<String, f64>,
}

impl PortfolioDefinition {
    /// Create a portfolio from `(symbol, weight)` pairs.
    pub fn new<I, S>(name: impl Into<String>, weights: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            weights: weights.into_iter().map(|(s, w)| (s.into(), w)).collect(),
        }
    }

    /// Symbols held by this portfolio.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }

    /// Sum of all target weights.
    pub fn total_weight(&self) -> f64 {
        self.weights.values().sum()
    }
}

/// Fixed position bought at inception.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    /// Instrument symbol
    pub symbol: String,
    /// Target weight at inception
    pub weight: f64,
    /// Units bought at inception, held for the life of the series
    pub units: f64,
    /// Price paid per unit, in the reporting currency
    pub inception_price: f64,
}

impl Holding {
    /// Market value of this holding at `price`.
    pub fn value_at(&self, price: f64) -> f64 {
        self.units * price
    }
}

/// One mark-to-market observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ValuationPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Daily portfolio values in the reporting currency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValuationSeries {
    /// Owning portfolio name
    pub name: String,
    /// Observations in ascending date order
    pub points: Vec<ValuationPoint>,
}

impl ValuationSeries {
    /// Number of observations.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the series has no observations.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Values without dates.
    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// Date range covered by the series.
    pub fn date_range(&self) -> Option<DateRange> {
        Some(DateRange {
            start: self.points.first()?.date,
            end: self.points.last()?.date,
        })
    }

    /// Last value.
    pub fn final_value(&self) -> Option<f64> {
        self.points.last().map(|p| p.value)
    }
}

/// Performance statistics for one portfolio.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceStats {
    /// Portfolio name
    pub name: String,
    /// First valuation date
    pub start_date: NaiveDate,
    /// Last valuation date
    pub end_date: NaiveDate,
    /// Last valuation in the reporting currency
    pub final_value: f64,
    /// Total return as a fraction (0.10 = 10%)
    pub total_return: f64,
    /// Annualized return over calendar days
    pub annualized_return: f64,
    /// Maximum drawdown as a non-positive fraction
    pub max_drawdown: f64,
    /// Annualized volatility of daily returns
    pub volatility: f64,
    /// Annualized return over volatility, zero risk-free rate
    pub sharpe_ratio: f64,
}

impl AsRef<PerformanceStats> for PerformanceStats {
    fn as_ref(&self) -> &PerformanceStats {
        self
    }
}

/// Full result for one successfully valued portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioResult {
    pub holdings: Vec<Holding>,
    pub stats: PerformanceStats,
    pub series: ValuationSeries,
}

impl AsRef<PerformanceStats> for PortfolioResult {
    fn as_ref(&self) -> &PerformanceStats {
        &self.stats
    }
}

/// Why a portfolio produced no result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Required symbols never appear in the price table
    MissingInstruments { symbols: Vec<String> },
    /// No row has prices for every instrument of the group
    NoOverlap,
    /// Prices exist but cannot be valued (for example a zero inception price)
    InvalidData { message: String },
}

/// A portfolio excluded from the results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedPortfolio {
    pub name: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Results for one portfolio group over its common window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupReport {
    /// Group name
    pub name: String,
    /// Window shared by every portfolio of the group
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    /// Valued portfolios, ranked by total return
    pub results: Vec<PortfolioResult>,
    /// Portfolios that could not be valued
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedPortfolio>,
}

impl GroupReport {
    /// Best portfolio of the group by total return.
    pub fn winner(&self) -> Option<&PerformanceStats> {
        self.results.first().map(|r| &r.stats)
    }
}

/// Output of one complete back-test cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    /// Lookback requested from the data provider
    pub period: Period,
    /// Whether tax drag was applied
    pub apply_tax: bool,
    /// Capital invested in each portfolio
    pub initial_capital: f64,
    /// Reporting currency FX symbol
    pub fx_symbol: String,
    /// One entry per configured group
    pub groups: Vec<GroupReport>,
}

impl BacktestReport {
    /// All computed statistics across groups.
    pub fn stats(&self) -> impl Iterator<Item = &PerformanceStats> {
        self.groups
            .iter()
            .flat_map(|g| g.results.iter().map(|r| &r.stats))
    }

    /// Best portfolio across all groups by total return.
    pub fn winner(&self) -> Option<&PerformanceStats> {
        self.stats().max_by(|a, b| {
            a.total_return
                .partial_cmp(&b.total_return)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

/// API response wrapper for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}
