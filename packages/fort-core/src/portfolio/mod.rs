//! Portfolio valuation and performance metrics.
//!
//! Provides buy-and-hold valuation, return statistics, and risk metrics.

mod performance;
mod risk;
mod valuation;

pub use performance::{annualized_return, rank_by_total_return, total_return};
pub use risk::{calculate_max_drawdown, daily_returns, sharpe_ratio, volatility};
pub use valuation::{compute_units, valuate, Valuation};
