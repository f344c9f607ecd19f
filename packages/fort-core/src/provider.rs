//! Market data providers.
//!
//! The engine never fetches data itself. A [`DataProvider`] hands it a raw
//! price table for the requested symbols and lookback, or a typed reason why
//! it could not.

use crate::config::Period;
use crate::types::PriceTable;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Why a provider could not return prices.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider unreachable: {0}")]
    Unreachable(String),

    #[error("Provider returned no data")]
    Empty,

    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

/// Source of daily closing prices.
pub trait DataProvider {
    /// Fetch daily prices for `symbols` over `period`.
    ///
    /// The returned table may lack columns for symbols the provider does not
    /// know; rows are not required to be complete.
    fn fetch(
        &self,
        symbols: &BTreeSet<String>,
        period: Period,
    ) -> std::result::Result<PriceTable, ProviderError>;
}

/// Provider backed by a JSON price table on disk.
///
/// File format: `{"dates": ["2024-01-02", ...], "columns": {"VOO": [431.2, null, ...]}}`.
/// The table is forward-filled and trimmed to the lookback window relative to
/// its last date.
#[derive(Debug, Clone)]
pub struct JsonFileProvider {
    path: PathBuf,
}

impl JsonFileProvider {
    /// Create a provider reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the current path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataProvider for JsonFileProvider {
    fn fetch(
        &self,
        symbols: &BTreeSet<String>,
        period: Period,
    ) -> std::result::Result<PriceTable, ProviderError> {
        let content = fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                ProviderError::Unreachable(format!("{} not found", self.path.display()))
            }
            _ => ProviderError::Unreachable(format!("{}: {}", self.path.display(), e)),
        })?;

        let table = PriceTable::from_json(&content)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let mut table = table.select(symbols.iter().map(String::as_str));
        table.forward_fill();

        let table = match table.last_date().and_then(|end| period.window_start(end)) {
            Some(start) => table.since(start),
            None => table,
        };

        if table.is_empty() {
            return Err(ProviderError::Empty);
        }

        tracing::debug!(
            "Loaded {} rows x {} symbols from {}",
            table.len(),
            table.symbols().count(),
            self.path.display()
        );

        Ok(table)
    }
}
