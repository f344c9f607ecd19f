//! Portfolio risk metrics calculation.
//!
//! Provides daily returns, annualized volatility, max drawdown, and Sharpe ratio.

use crate::tax::TRADING_DAYS_PER_YEAR;

/// Simple daily returns of a value series.
///
/// `r_i = V_i / V_{i-1} - 1` for every consecutive pair; empty for fewer than
/// two values.
pub fn daily_returns(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Calculate annualized volatility from daily returns.
///
/// Uses the sample standard deviation (N-1 denominator) scaled by `sqrt(252)`.
/// Returns 0 when fewer than two returns are available.
pub fn volatility(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);

    variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Calculate maximum drawdown from a series of values.
///
/// Returns the deepest decline below the running peak as a non-positive
/// fraction (e.g. -0.15 for a 15% drawdown), 0 if the series never falls.
pub fn calculate_max_drawdown(values: &[f64]) -> f64 {
    let Some(&first) = values.first() else {
        return 0.0;
    };

    let mut running_max = first;
    let mut max_drawdown = 0.0_f64;

    for &value in values {
        if value > running_max {
            running_max = value;
        }
        let drawdown = (value - running_max) / running_max;
        if drawdown < max_drawdown {
            max_drawdown = drawdown;
        }
    }

    max_drawdown
}

/// Sharpe ratio with a zero risk-free rate.
///
/// `annualized_return / volatility`, or 0 when volatility is zero.
pub fn sharpe_ratio(annualized_return: f64, volatility: f64) -> f64 {
    if volatility == 0.0 {
        return 0.0;
    }
    annualized_return / volatility
}
