//! Engine configuration.
//!
//! Everything a run depends on lives in one immutable [`EngineConfig`] passed
//! into the engine's entry points. Configuration is read from TOML; when no
//! file exists the built-in portfolios are used.

use crate::tax::TaxDragTable;
use crate::types::PortfolioDefinition;
use crate::{Error, Result};
use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Tolerance used when checking whether portfolio weights sum to one.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Lookback window for price history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Period {
    #[serde(rename = "ytd")]
    YearToDate,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
    #[default]
    #[serde(rename = "max")]
    Max,
}

impl Period {
    /// All supported periods, shortest first.
    pub const ALL: [Period; 6] = [
        Period::YearToDate,
        Period::SixMonths,
        Period::OneYear,
        Period::TwoYears,
        Period::FiveYears,
        Period::Max,
    ];

    /// Short identifier (`ytd`, `6mo`, `1y`, `2y`, `5y`, `max`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::YearToDate => "ytd",
            Period::SixMonths => "6mo",
            Period::OneYear => "1y",
            Period::TwoYears => "2y",
            Period::FiveYears => "5y",
            Period::Max => "max",
        }
    }

    /// First date of the window ending at `end`, or `None` for unlimited history.
    pub fn window_start(&self, end: NaiveDate) -> Option<NaiveDate> {
        let months = match self {
            Period::YearToDate => return NaiveDate::from_ymd_opt(end.year(), 1, 1),
            Period::SixMonths => 6,
            Period::OneYear => 12,
            Period::TwoYears => 24,
            Period::FiveYears => 60,
            Period::Max => return None,
        };
        end.checked_sub_months(Months::new(months))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Period::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let valid: Vec<_> = Period::ALL.iter().map(Period::as_str).collect();
                Error::InvalidConfig(format!(
                    "unknown period '{}' (expected one of {})",
                    s,
                    valid.join(", ")
                ))
            })
    }
}

/// Portfolios compared over one common window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioGroup {
    /// Group name
    pub name: String,
    /// Lookback for this group; defaults to the fetch period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
    /// Portfolio definitions
    pub portfolios: Vec<PortfolioDefinition>,
}

/// Complete configuration for a back-test run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Capital invested in each portfolio at inception
    pub initial_capital: f64,
    /// Symbol of the FX series (reporting currency per foreign unit)
    pub fx_symbol: String,
    /// Lookback requested from the data provider
    pub period: Period,
    /// Whether to deduct dividend withholding tax drag
    pub apply_tax: bool,
    /// Symbol suffixes already quoted in the reporting currency
    pub domestic_suffixes: Vec<String>,
    /// Symbol fragments exempt from tax drag
    pub tax_exempt_patterns: Vec<String>,
    /// Annualized drag per symbol
    pub tax_drag: TaxDragTable,
    /// Portfolio groups
    pub groups: Vec<PortfolioGroup>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_capital: 1_000_000.0,
            fx_symbol: "USDTWD=X".to_string(),
            period: Period::Max,
            apply_tax: false,
            domestic_suffixes: vec![".TW".to_string()],
            tax_exempt_patterns: vec![".L".to_string(), ".TW".to_string(), "BTC".to_string()],
            tax_drag: TaxDragTable::default(),
            groups: vec![PortfolioGroup {
                name: "Factor showdown".to_string(),
                period: None,
                portfolios: default_portfolios(),
            }],
        }
    }
}

fn default_portfolios() -> Vec<PortfolioDefinition> {
    vec![
        PortfolioDefinition::new(
            "Ginger Ale",
            [
                ("VOO", 0.30),
                ("AVUV", 0.30),
                ("VEA", 0.10),
                ("AVDV", 0.10),
                ("VWO", 0.10),
                ("AVES", 0.10),
            ],
        ),
        PortfolioDefinition::new(
            "Qingliujun",
            [
                ("VOO", 0.24),
                ("AVUV", 0.12),
                ("QMOM", 0.12),
                ("VXUS", 0.12),
                ("AVDV", 0.06),
                ("IMOM", 0.06),
                ("AVES", 0.08),
                ("0050.TW", 0.20),
            ],
        ),
        PortfolioDefinition::new("S&P 500 (VOO)", [("VOO", 1.0)]),
    ]
}

impl EngineConfig {
    /// Get the default configuration file path.
    ///
    /// Default path: `~/.fort/config.toml`
    /// Can be overridden with `FORT_CONFIG` environment variable.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = env::var("FORT_CONFIG") {
            return PathBuf::from(path);
        }

        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".fort/config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Parse and validate a configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load a configuration file, falling back to the built-in defaults when
    /// the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using built-in portfolios", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(format!("cannot serialize configuration: {}", e)))
    }

    /// Check the configuration for values the engine cannot work with.
    ///
    /// Weights that do not sum to one are accepted as given; they only log a
    /// warning.
    pub fn validate(&self) -> Result<()> {
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return Err(Error::InvalidConfig(
                "initial_capital must be positive".to_string(),
            ));
        }

        if self.fx_symbol.trim().is_empty() {
            return Err(Error::InvalidConfig("fx_symbol must not be empty".to_string()));
        }

        self.tax_drag.validate()?;

        if self.groups.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one portfolio group is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for group in &self.groups {
            if group.portfolios.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "group {} has no portfolios",
                    group.name
                )));
            }

            for portfolio in &group.portfolios {
                if !names.insert(portfolio.name.as_str()) {
                    return Err(Error::InvalidConfig(format!(
                        "duplicate portfolio name: {}",
                        portfolio.name
                    )));
                }
                validate_weights(portfolio, &self.fx_symbol)?;
            }
        }

        Ok(())
    }

    /// All portfolio definitions across groups.
    pub fn portfolios(&self) -> impl Iterator<Item = &PortfolioDefinition> {
        self.groups.iter().flat_map(|g| g.portfolios.iter())
    }

    /// Lookback applied to a group.
    pub fn group_period(&self, group: &PortfolioGroup) -> Period {
        group.period.unwrap_or(self.period)
    }

    /// Replace the groups with a single group built from named weight maps.
    pub fn with_portfolios(mut self, portfolios: BTreeMap<String, BTreeMap<String, f64>>) -> Self {
        self.groups = vec![PortfolioGroup {
            name: "Custom".to_string(),
            period: None,
            portfolios: portfolios
                .into_iter()
                .map(|(name, weights)| PortfolioDefinition { name, weights })
                .collect(),
        }];
        self
    }
}

fn validate_weights(portfolio: &PortfolioDefinition, fx_symbol: &str) -> Result<()> {
    if portfolio.weights.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "portfolio {} has no instruments",
            portfolio.name
        )));
    }

    for (symbol, weight) in &portfolio.weights {
        if symbol == fx_symbol {
            return Err(Error::InvalidConfig(format!(
                "portfolio {} holds the FX symbol {}",
                portfolio.name, symbol
            )));
        }
        if !(weight.is_finite() && *weight >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "portfolio {} has invalid weight {} for {}",
                portfolio.name, weight, symbol
            )));
        }
    }

    let total = portfolio.total_weight();
    if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        tracing::warn!(
            "Weights of {} sum to {:.4}, using them as given",
            portfolio.name,
            total
        );
    }

    Ok(())
}
