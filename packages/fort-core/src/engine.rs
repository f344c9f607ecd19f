//! Back-test pipeline.
//!
//! One cycle fetches the full symbol universe once, then evaluates every
//! portfolio group independently against that shared raw table:
//!
//! 1. Drop portfolios whose instruments never appear in the data
//! 2. Project the raw table onto the group's symbols, dropping incomplete rows
//! 3. Apply tax drag (when enabled)
//! 4. Convert to the reporting currency
//! 5. Value each portfolio and compute its statistics
//!
//! Missing or unusable data for one portfolio or one group is recorded in the
//! report and never aborts the cycle. Only an unusable data fetch or a missing FX series
//! does.

use crate::config::{EngineConfig, PortfolioGroup};
use crate::fx;
use crate::portfolio::{rank_by_total_return, valuate};
use crate::provider::{DataProvider, ProviderError};
use crate::tax;
use crate::types::{
    BacktestReport, GroupReport, PerformanceStats, PortfolioDefinition, PortfolioResult,
    PriceTable, SkipReason, SkippedPortfolio,
};
use crate::universe::{missing_instruments, project, resolve_universe};
use crate::{Error, Result};

/// Run one complete back-test cycle.
///
/// # Errors
///
/// - `Error::NoData` if the provider returns no rows
/// - `Error::Provider` if the provider fails
/// - `Error::FxMissing` if the FX series is absent from the fetched data
pub fn run_backtest<P>(config: &EngineConfig, provider: &P) -> Result<BacktestReport>
where
    P: DataProvider + ?Sized,
{
    config.validate()?;

    let universe = resolve_universe(config.portfolios(), &config.fx_symbol);
    tracing::debug!(
        "Fetching {} symbols over {}",
        universe.len(),
        config.period
    );

    let raw = provider
        .fetch(&universe, config.period)
        .map_err(|e| match e {
            ProviderError::Empty => Error::NoData,
            other => Error::Provider(other),
        })?;

    if raw.is_empty() {
        return Err(Error::NoData);
    }

    if raw.first_valid_date(&config.fx_symbol).is_none() {
        return Err(Error::FxMissing(config.fx_symbol.clone()));
    }

    let mut groups = Vec::with_capacity(config.groups.len());
    for group in &config.groups {
        match evaluate_group(&raw, group, config) {
            Ok(report) => groups.push(report),
            Err(e @ Error::FxMissing(_)) => return Err(e),
            Err(e) => {
                tracing::warn!("Group {} could not be evaluated: {}", group.name, e);
                groups.push(invalid_group(group, &e));
            }
        }
    }

    Ok(BacktestReport {
        period: config.period,
        apply_tax: config.apply_tax,
        initial_capital: config.initial_capital,
        fx_symbol: config.fx_symbol.clone(),
        groups,
    })
}

/// Evaluate one portfolio group against the shared raw table.
///
/// This is a pure function of its inputs: groups never share intermediate
/// tables.
pub fn evaluate_group(
    raw: &PriceTable,
    group: &PortfolioGroup,
    config: &EngineConfig,
) -> Result<GroupReport> {
    let mut skipped = Vec::new();
    let mut valid: Vec<&PortfolioDefinition> = Vec::new();

    for portfolio in &group.portfolios {
        let missing = missing_instruments(raw, portfolio);
        if missing.is_empty() {
            valid.push(portfolio);
        } else {
            tracing::warn!(
                "Skipping {}: no data for {}",
                portfolio.name,
                missing.join(", ")
            );
            skipped.push(SkippedPortfolio {
                name: portfolio.name.clone(),
                reason: SkipReason::MissingInstruments { symbols: missing },
            });
        }
    }

    let mut report = GroupReport {
        name: group.name.clone(),
        date_range: None,
        results: Vec::new(),
        skipped,
    };

    if valid.is_empty() {
        return Ok(report);
    }

    let symbols = resolve_universe(valid.iter().copied(), &config.fx_symbol);
    let mut table = project(raw, &symbols);

    // Group windows end where the fetched data ends, not where the group's
    // own instruments stop trading
    if let Some(period) = group.period {
        if let Some(start) = raw.last_date().and_then(|end| period.window_start(end)) {
            table = table.since(start);
        }
    }

    if table.is_empty() {
        tracing::warn!("No overlapping history for group {}", group.name);
        report
            .skipped
            .extend(valid.iter().map(|portfolio| SkippedPortfolio {
                name: portfolio.name.clone(),
                reason: SkipReason::NoOverlap,
            }));
        return Ok(report);
    }

    let normalized = match prepare_table(table, config) {
        Ok(normalized) => normalized,
        Err(e @ Error::FxMissing(_)) => return Err(e),
        Err(e) => {
            tracing::warn!("Skipping group {}: {}", group.name, e);
            report.skipped.extend(valid.iter().map(|portfolio| SkippedPortfolio {
                name: portfolio.name.clone(),
                reason: SkipReason::InvalidData {
                    message: e.to_string(),
                },
            }));
            return Ok(report);
        }
    };
    report.date_range = normalized.date_range();

    for portfolio in valid {
        match value_portfolio(&normalized, portfolio, config.initial_capital) {
            Ok(result) => report.results.push(result),
            Err(e) => {
                tracing::warn!("Skipping {}: {}", portfolio.name, e);
                report.skipped.push(SkippedPortfolio {
                    name: portfolio.name.clone(),
                    reason: SkipReason::InvalidData {
                        message: e.to_string(),
                    },
                });
            }
        }
    }

    rank_by_total_return(&mut report.results);

    if let (Some(range), Some(winner)) = (report.date_range, report.winner()) {
        tracing::info!(
            "Group {} ({} to {}): {} leads with {:.2}%",
            group.name,
            range.start,
            range.end,
            winner.name,
            winner.total_return * 100.0
        );
    }

    Ok(report)
}

/// Tax-adjust (when enabled) and convert a projected table to the reporting
/// currency.
fn prepare_table(table: PriceTable, config: &EngineConfig) -> Result<PriceTable> {
    let table = if config.apply_tax {
        tax::adjust_table(
            &table,
            &config.tax_drag,
            &config.tax_exempt_patterns,
            &config.fx_symbol,
        )?
    } else {
        table
    };

    fx::normalize(&table, &config.fx_symbol, &config.domestic_suffixes)
}

fn value_portfolio(
    table: &PriceTable,
    portfolio: &PortfolioDefinition,
    initial_capital: f64,
) -> Result<PortfolioResult> {
    let valuation = valuate(table, portfolio, initial_capital)?;
    let stats = PerformanceStats::from_series(&valuation.series)?;

    Ok(PortfolioResult {
        holdings: valuation.holdings,
        stats,
        series: valuation.series,
    })
}

/// Report for a group whose evaluation failed as a whole.
fn invalid_group(group: &PortfolioGroup, error: &Error) -> GroupReport {
    GroupReport {
        name: group.name.clone(),
        date_range: None,
        results: Vec::new(),
        skipped: group
            .portfolios
            .iter()
            .map(|portfolio| SkippedPortfolio {
                name: portfolio.name.clone(),
                reason: SkipReason::InvalidData {
                    message: error.to_string(),
                },
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Period;
    use approx::assert_relative_eq;
    use chrono::{Days, NaiveDate};
    use std::collections::BTreeSet;

    const FX: &str = "USDTWD=X";

    /// Provider serving a fixed table.
    struct StaticProvider(PriceTable);

    impl DataProvider for StaticProvider {
        fn fetch(
            &self,
            symbols: &BTreeSet<String>,
            _period: Period,
        ) -> std::result::Result<PriceTable, ProviderError> {
            if self.0.is_empty() {
                return Err(ProviderError::Empty);
            }
            Ok(self.0.select(symbols.iter().map(String::as_str)))
        }
    }

    /// Provider that cannot be reached.
    struct OfflineProvider;

    impl DataProvider for OfflineProvider {
        fn fetch(
            &self,
            _symbols: &BTreeSet<String>,
            _period: Period,
        ) -> std::result::Result<PriceTable, ProviderError> {
            Err(ProviderError::Unreachable("connection refused".to_string()))
        }
    }

    fn day(n: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, 1)
            .unwrap()
            .checked_add_days(Days::new(n))
            .unwrap()
    }

    fn config(portfolios: Vec<PortfolioDefinition>) -> EngineConfig {
        EngineConfig {
            groups: vec![PortfolioGroup {
                name: "Test".to_string(),
                period: None,
                portfolios,
            }],
            ..Default::default()
        }
    }

    /// VOO [100, 110, 99] with a flat FX rate of 1.0 and a domestic fund.
    fn small_table() -> PriceTable {
        PriceTable::from_observations(vec![
            (day(0), "VOO", 100.0),
            (day(1), "VOO", 110.0),
            (day(2), "VOO", 99.0),
            (day(0), "0050.TW", 120.0),
            (day(1), "0050.TW", 126.0),
            (day(2), "0050.TW", 132.0),
            (day(0), FX, 1.0),
            (day(1), FX, 1.0),
            (day(2), FX, 1.0),
        ])
    }

    #[test]
    fn test_end_to_end_single_instrument() {
        let config = config(vec![PortfolioDefinition::new("VOO", [("VOO", 1.0)])]);
        let report = run_backtest(&config, &StaticProvider(small_table())).unwrap();

        let group = &report.groups[0];
        let result = &group.results[0];
        assert_relative_eq!(result.holdings[0].units, 10_000.0, max_relative = 1e-12);
        assert_eq!(
            result.series.values(),
            vec![1_000_000.0, 1_100_000.0, 990_000.0]
        );
        assert_relative_eq!(result.stats.total_return, -0.01, epsilon = 1e-12);
        assert_relative_eq!(result.stats.max_drawdown, -0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_fx_applied_to_foreign_only() {
        let mut table = small_table();
        table
            .insert_column(FX, vec![Some(30.0), Some(31.0), Some(32.0)])
            .unwrap();
        let config = config(vec![
            PortfolioDefinition::new("VOO", [("VOO", 1.0)]),
            PortfolioDefinition::new("Taiwan", [("0050.TW", 1.0)]),
        ]);

        let report = run_backtest(&config, &StaticProvider(table)).unwrap();
        let results = &report.groups[0].results;

        let voo = results.iter().find(|r| r.stats.name == "VOO").unwrap();
        assert_relative_eq!(
            voo.stats.final_value,
            1_000_000.0 / 3_000.0 * 99.0 * 32.0,
            max_relative = 1e-12
        );

        let taiwan = results.iter().find(|r| r.stats.name == "Taiwan").unwrap();
        assert_relative_eq!(taiwan.stats.total_return, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_results_ranked_and_winner() {
        let config = config(vec![
            PortfolioDefinition::new("VOO", [("VOO", 1.0)]),
            PortfolioDefinition::new("Taiwan", [("0050.TW", 1.0)]),
        ]);

        let report = run_backtest(&config, &StaticProvider(small_table())).unwrap();
        let names: Vec<_> = report.groups[0]
            .results
            .iter()
            .map(|r| r.stats.name.as_str())
            .collect();

        assert_eq!(names, vec!["Taiwan", "VOO"]);
        assert_eq!(report.winner().unwrap().name, "Taiwan");
    }

    #[test]
    fn test_partial_overlap_window() {
        let n = 100;
        let mut observations = Vec::new();
        for i in 1..=n {
            observations.push((day(i), "A".to_string(), 100.0));
            observations.push((day(i), FX.to_string(), 1.0));
            if i >= 50 {
                observations.push((day(i), "B".to_string(), 10.0 + i as f64));
            }
        }
        let raw = PriceTable::from_observations(observations);
        let config = config(vec![
            PortfolioDefinition::new("Both", [("A", 0.5), ("B", 0.5)]),
        ]);

        let report = run_backtest(&config, &StaticProvider(raw)).unwrap();
        let group = &report.groups[0];

        assert_eq!(group.date_range.unwrap().start, day(50));
        assert_eq!(group.results[0].series.len(), (n - 49) as usize);
    }

    #[test]
    fn test_missing_instrument_skips_only_that_portfolio() {
        let config = config(vec![
            PortfolioDefinition::new("VOO", [("VOO", 1.0)]),
            PortfolioDefinition::new("Momentum", [("VOO", 0.5), ("QMOM", 0.5)]),
        ]);

        let report = run_backtest(&config, &StaticProvider(small_table())).unwrap();
        let group = &report.groups[0];

        assert_eq!(group.results.len(), 1);
        assert_eq!(group.results[0].stats.name, "VOO");
        assert_eq!(
            group.skipped,
            vec![SkippedPortfolio {
                name: "Momentum".to_string(),
                reason: SkipReason::MissingInstruments {
                    symbols: vec!["QMOM".to_string()]
                },
            }]
        );
        // The skipped portfolio does not shorten the others' window
        assert_eq!(group.date_range.unwrap().start, day(0));
    }

    #[test]
    fn test_no_overlap_is_distinct_from_zero_return() {
        let raw = PriceTable::from_observations(vec![
            (day(0), "EARLY", 1.0),
            (day(1), "LATE", 1.0),
            (day(0), FX, 1.0),
            (day(1), FX, 1.0),
        ]);
        let config = config(vec![PortfolioDefinition::new(
            "Disjoint",
            [("EARLY", 0.5), ("LATE", 0.5)],
        )]);

        let report = run_backtest(&config, &StaticProvider(raw)).unwrap();
        let group = &report.groups[0];

        assert!(group.results.is_empty());
        assert!(group.date_range.is_none());
        assert_eq!(group.skipped[0].reason, SkipReason::NoOverlap);
    }

    #[test]
    fn test_groups_are_independent() {
        // LATE only lists on day 2; group "Long" must still start on day 0
        let mut table = small_table();
        table
            .insert_column("LATE", vec![None, None, Some(5.0)])
            .unwrap();

        let mut config = config(vec![PortfolioDefinition::new("VOO", [("VOO", 1.0)])]);
        config.groups.push(PortfolioGroup {
            name: "Young".to_string(),
            period: None,
            portfolios: vec![PortfolioDefinition::new("Late", [("LATE", 1.0)])],
        });

        let report = run_backtest(&config, &StaticProvider(table)).unwrap();

        assert_eq!(report.groups[0].date_range.unwrap().start, day(0));
        assert_eq!(report.groups[1].date_range.unwrap().start, day(2));
        assert_eq!(report.groups[1].results[0].series.len(), 1);
    }

    #[test]
    fn test_group_period_trims_window() {
        let mut observations = Vec::new();
        for i in 0..400 {
            observations.push((day(i), "VOO".to_string(), 100.0 + i as f64));
            observations.push((day(i), FX.to_string(), 1.0));
        }
        let raw = PriceTable::from_observations(observations);

        let mut config = config(vec![PortfolioDefinition::new("VOO", [("VOO", 1.0)])]);
        config.groups[0].period = Some(Period::SixMonths);

        let report = run_backtest(&config, &StaticProvider(raw)).unwrap();
        let range = report.groups[0].date_range.unwrap();

        assert_eq!(range.end, day(399));
        assert!(range.days() <= 184);
        assert!(range.days() >= 181);
    }

    #[test]
    fn test_group_period_ends_at_fetched_data() {
        // OLD stops trading on day 100 while the data runs to day 399
        let mut observations = Vec::new();
        for i in 0..400 {
            observations.push((day(i), "VOO".to_string(), 100.0 + i as f64));
            observations.push((day(i), FX.to_string(), 1.0));
            if i <= 100 {
                observations.push((day(i), "OLD".to_string(), 50.0));
            }
        }
        let raw = PriceTable::from_observations(observations);

        let mut config = config(vec![PortfolioDefinition::new(
            "Stale",
            [("VOO", 0.5), ("OLD", 0.5)],
        )]);
        config.groups[0].period = Some(Period::SixMonths);

        let report = run_backtest(&config, &StaticProvider(raw)).unwrap();
        let group = &report.groups[0];

        assert!(group.results.is_empty());
        assert!(group.date_range.is_none());
        assert_eq!(group.skipped[0].reason, SkipReason::NoOverlap);
    }

    #[test]
    fn test_invalid_portfolio_does_not_abort_cycle() {
        let raw = PriceTable::from_observations(vec![
            (day(0), "VOO", 100.0),
            (day(1), "VOO", 110.0),
            (day(0), "BAD", 0.0),
            (day(1), "BAD", 1.0),
            (day(0), FX, 1.0),
            (day(1), FX, 1.0),
        ]);
        let mut config = config(vec![PortfolioDefinition::new("Good", [("VOO", 1.0)])]);
        config.groups.push(PortfolioGroup {
            name: "Broken".to_string(),
            period: None,
            portfolios: vec![PortfolioDefinition::new("Bad", [("BAD", 1.0)])],
        });

        let report = run_backtest(&config, &StaticProvider(raw)).unwrap();

        let good = &report.groups[0];
        assert_relative_eq!(good.results[0].stats.total_return, 0.1, epsilon = 1e-12);

        let broken = &report.groups[1];
        assert!(broken.results.is_empty());
        assert_eq!(broken.skipped[0].name, "Bad");
        assert!(matches!(
            broken.skipped[0].reason,
            SkipReason::InvalidData { .. }
        ));
    }

    #[test]
    fn test_invalid_portfolio_keeps_group_peers() {
        let raw = PriceTable::from_observations(vec![
            (day(0), "VOO", 100.0),
            (day(1), "VOO", 110.0),
            (day(0), "BAD", 0.0),
            (day(1), "BAD", 1.0),
            (day(0), FX, 1.0),
            (day(1), FX, 1.0),
        ]);
        let config = config(vec![
            PortfolioDefinition::new("Good", [("VOO", 1.0)]),
            PortfolioDefinition::new("Bad", [("BAD", 1.0)]),
        ]);

        let report = run_backtest(&config, &StaticProvider(raw)).unwrap();
        let group = &report.groups[0];

        assert_eq!(group.results.len(), 1);
        assert_eq!(group.results[0].stats.name, "Good");
        assert_eq!(group.skipped.len(), 1);
        assert_eq!(group.skipped[0].name, "Bad");
    }

    #[test]
    fn test_zero_price_under_tax_drag_skips_group_only() {
        let raw = PriceTable::from_observations(vec![
            (day(0), "VOO", 100.0),
            (day(1), "VOO", 110.0),
            (day(0), "DIP", 10.0),
            (day(1), "DIP", 0.0),
            (day(2), "DIP", 12.0),
            (day(2), "VOO", 120.0),
            (day(0), FX, 1.0),
            (day(1), FX, 1.0),
            (day(2), FX, 1.0),
        ]);
        let mut config = config(vec![PortfolioDefinition::new("Good", [("VOO", 1.0)])]);
        config.groups.push(PortfolioGroup {
            name: "Dip".to_string(),
            period: None,
            portfolios: vec![PortfolioDefinition::new("Dip", [("DIP", 1.0)])],
        });
        config.apply_tax = true;

        let report = run_backtest(&config, &StaticProvider(raw)).unwrap();

        assert_eq!(report.groups[0].results.len(), 1);
        assert!(report.groups[1].results.is_empty());
        assert!(matches!(
            report.groups[1].skipped[0].reason,
            SkipReason::InvalidData { .. }
        ));
    }

    #[test]
    fn test_unnormalized_weights_used_as_given() {
        let config = config(vec![PortfolioDefinition::new(
            "Levered",
            [("VOO", 1.0), ("0050.TW", 0.5)],
        )]);

        let report = run_backtest(&config, &StaticProvider(small_table())).unwrap();
        let result = &report.groups[0].results[0];

        assert_relative_eq!(result.series.values()[0], 1_500_000.0, max_relative = 1e-12);
        let voo = result.holdings.iter().find(|h| h.symbol == "VOO").unwrap();
        assert_relative_eq!(voo.units, 10_000.0, max_relative = 1e-12);
    }

    #[test]
    fn test_tax_drag_lowers_return() {
        let mut without = config(vec![PortfolioDefinition::new("VOO", [("VOO", 1.0)])]);
        without.apply_tax = false;
        let mut with = without.clone();
        with.apply_tax = true;

        let provider = StaticProvider(small_table());
        let plain = run_backtest(&without, &provider).unwrap();
        let taxed = run_backtest(&with, &provider).unwrap();

        let plain_return = plain.groups[0].results[0].stats.total_return;
        let taxed_return = taxed.groups[0].results[0].stats.total_return;
        assert!(taxed_return < plain_return);
        assert!(taxed.apply_tax);
    }

    #[test]
    fn test_tax_drag_skips_domestic() {
        let mut config = config(vec![PortfolioDefinition::new("Taiwan", [("0050.TW", 1.0)])]);
        config.apply_tax = true;

        let report = run_backtest(&config, &StaticProvider(small_table())).unwrap();
        assert_relative_eq!(
            report.groups[0].results[0].stats.total_return,
            0.1,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_fx_missing_aborts_cycle() {
        let mut table = small_table();
        table.remove_column(FX);
        let config = config(vec![PortfolioDefinition::new("VOO", [("VOO", 1.0)])]);

        let result = run_backtest(&config, &StaticProvider(table));
        assert!(matches!(result, Err(Error::FxMissing(_))));
    }

    #[test]
    fn test_empty_fx_column_aborts_cycle() {
        let mut table = small_table();
        table.insert_column(FX, vec![None, None, None]).unwrap();
        let config = config(vec![PortfolioDefinition::new("VOO", [("VOO", 1.0)])]);

        let result = run_backtest(&config, &StaticProvider(table));
        assert!(matches!(result, Err(Error::FxMissing(_))));
    }

    #[test]
    fn test_no_data() {
        let config = config(vec![PortfolioDefinition::new("VOO", [("VOO", 1.0)])]);

        let result = run_backtest(&config, &StaticProvider(PriceTable::new()));
        assert!(matches!(result, Err(Error::NoData)));
    }

    #[test]
    fn test_provider_failure_is_typed() {
        let config = config(vec![PortfolioDefinition::new("VOO", [("VOO", 1.0)])]);

        let result = run_backtest(&config, &OfflineProvider);
        assert!(matches!(
            result,
            Err(Error::Provider(ProviderError::Unreachable(_)))
        ));
    }

    #[test]
    fn test_rerun_is_deterministic() {
        let config = config(vec![PortfolioDefinition::new("VOO", [("VOO", 1.0)])]);
        let provider = StaticProvider(small_table());

        let first = run_backtest(&config, &provider).unwrap();
        let second = run_backtest(&config, &provider).unwrap();
        assert_eq!(
            first.groups[0].results[0].stats,
            second.groups[0].results[0].stats
        );
    }
}
