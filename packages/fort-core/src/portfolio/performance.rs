//! Portfolio performance analytics.

use super::risk::{calculate_max_drawdown, daily_returns, sharpe_ratio, volatility};
use crate::types::{PerformanceStats, ValuationSeries};
use crate::{Error, Result};

/// Calendar days per year used to annualize returns.
const DAYS_PER_YEAR: f64 = 365.25;

/// Total return of a value series as a fraction: `V_n / V_0 - 1`.
pub fn total_return(values: &[f64]) -> f64 {
    match (values.first(), values.last()) {
        (Some(first), Some(last)) if *first != 0.0 => last / first - 1.0,
        _ => 0.0,
    }
}

/// Annualize a total return earned over `elapsed_days` calendar days.
///
/// `(1 + total_return)^(365.25 / elapsed_days) - 1`, or 0 when no time has
/// elapsed.
pub fn annualized_return(total_return: f64, elapsed_days: i64) -> f64 {
    if elapsed_days <= 0 {
        return 0.0;
    }
    (1.0 + total_return).powf(DAYS_PER_YEAR / elapsed_days as f64) - 1.0
}

impl PerformanceStats {
    /// Calculate performance statistics from a valuation series.
    pub fn from_series(series: &ValuationSeries) -> Result<Self> {
        let range = series
            .date_range()
            .ok_or_else(|| Error::NoOverlap(series.name.clone()))?;

        let values = series.values();
        let total_return = total_return(&values);
        let volatility = volatility(&daily_returns(&values));
        let annualized_return = annualized_return(total_return, range.days());

        Ok(Self {
            name: series.name.clone(),
            start_date: range.start,
            end_date: range.end,
            final_value: values.last().copied().unwrap_or_default(),
            total_return,
            annualized_return,
            max_drawdown: calculate_max_drawdown(&values),
            volatility,
            sharpe_ratio: sharpe_ratio(annualized_return, volatility),
        })
    }
}

/// Sort results by total return, best first.
pub fn rank_by_total_return<T: AsRef<PerformanceStats>>(items: &mut [T]) {
    items.sort_by(|a, b| {
        b.as_ref()
            .total_return
            .partial_cmp(&a.as_ref().total_return)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
