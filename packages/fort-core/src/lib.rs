//! fORT Core - Buy-and-hold ETF portfolio back-testing engine.
//!
//! This crate turns raw daily price series into comparable portfolio results:
//!
//! - **Universe resolution**: Which symbols a set of portfolios needs, and the
//!   per-group projection that drops rows with missing prices
//! - **Tax drag**: Synthetic dividend-withholding cost on total-return prices
//! - **Currency normalization**: Everything expressed in one reporting currency
//! - **Valuation**: Fixed unit counts bought once, marked to market daily
//! - **Metrics**: Total return, max drawdown, volatility, Sharpe ratio
//!
//! # Example
//!
//! ```rust,no_run
//! use fort_core::{engine::run_backtest, provider::JsonFileProvider, EngineConfig};
//!
//! let config = EngineConfig::default();
//! let provider = JsonFileProvider::new("prices.json");
//!
//! let report = run_backtest(&config, &provider).unwrap();
//! if let Some(winner) = report.winner() {
//!     println!("Winner: {} ({:.2}%)", winner.name, winner.total_return * 100.0);
//! }
//! ```

pub mod config;
pub mod engine;
pub mod fx;
pub mod portfolio;
pub mod provider;
pub mod report;
pub mod tax;
pub mod types;
pub mod universe;

// Re-export commonly used types
pub use config::{EngineConfig, Period, PortfolioGroup};
pub use types::{
    ApiResponse, BacktestReport, DateRange, GroupReport, Holding, PerformanceStats,
    PortfolioDefinition, PortfolioResult, PriceTable, SkipReason, SkippedPortfolio, ValuationSeries,
};

// Re-export main functionality
pub use engine::{evaluate_group, run_backtest};
pub use fx::normalize;
pub use portfolio::{
    annualized_return, calculate_max_drawdown, daily_returns, rank_by_total_return,
    sharpe_ratio, total_return, valuate, volatility,
};
pub use provider::{DataProvider, JsonFileProvider, ProviderError};
pub use report::{JsonSink, PresentationSink, SummarySink};
pub use tax::{apply_tax_drag, TaxDragTable};
pub use universe::{project, resolve_universe};

/// Error types for fort-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Data provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("No price data available")]
    NoData,

    #[error("FX series not found: {0}")]
    FxMissing(String),

    #[error("Portfolio {portfolio} is missing instruments: {}", .symbols.join(", "))]
    MissingInstruments {
        portfolio: String,
        symbols: Vec<String>,
    },

    #[error("No overlapping history for {0}")]
    NoOverlap(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid price table: {0}")]
    InvalidTable(String),
}

/// Result type for fort-core operations.
pub type Result<T> = std::result::Result<T, Error>;
