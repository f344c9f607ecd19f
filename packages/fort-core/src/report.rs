//! Presentation sinks for back-test reports.

use crate::types::{ApiResponse, BacktestReport, SkipReason};
use crate::Result;
use std::io::Write;

/// Consumer of computed back-test results.
pub trait PresentationSink {
    /// Render one report.
    fn present(&mut self, report: &BacktestReport) -> Result<()>;
}

/// Writes the full report, series included, as pretty JSON wrapped in an
/// [`ApiResponse`].
#[derive(Debug)]
pub struct JsonSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Consume the sink, returning the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> PresentationSink for JsonSink<W> {
    fn present(&mut self, report: &BacktestReport) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.writer, &ApiResponse::ok(report))?;
        writeln!(self.writer)?;
        Ok(())
    }
}

/// Writes a plain-text summary: window, winner, and one line per portfolio.
#[derive(Debug)]
pub struct SummarySink<W: Write> {
    writer: W,
}

impl<W: Write> SummarySink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Consume the sink, returning the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> PresentationSink for SummarySink<W> {
    fn present(&mut self, report: &BacktestReport) -> Result<()> {
        let w = &mut self.writer;

        writeln!(
            w,
            "Period: {} | Tax drag: {} | Capital: {:.0} per portfolio",
            report.period,
            if report.apply_tax { "on" } else { "off" },
            report.initial_capital
        )?;

        for group in &report.groups {
            writeln!(w)?;
            match group.date_range {
                Some(range) => writeln!(w, "{} ({} to {})", group.name, range.start, range.end)?,
                None => writeln!(w, "{} (no data)", group.name)?,
            }

            if let Some(winner) = group.winner() {
                writeln!(
                    w,
                    "  Winner: {} | Final value: {:.0}",
                    winner.name, winner.final_value
                )?;
            }

            writeln!(
                w,
                "  {:<24} {:>14} {:>10} {:>10} {:>10} {:>8}",
                "Portfolio", "Final value", "Return %", "Max DD %", "Vol %", "Sharpe"
            )?;
            for result in &group.results {
                let s = &result.stats;
                writeln!(
                    w,
                    "  {:<24} {:>14.0} {:>10.2} {:>10.2} {:>10.2} {:>8.2}",
                    s.name,
                    s.final_value,
                    s.total_return * 100.0,
                    s.max_drawdown * 100.0,
                    s.volatility * 100.0,
                    s.sharpe_ratio
                )?;
            }

            for skipped in &group.skipped {
                let reason = match &skipped.reason {
                    SkipReason::MissingInstruments { symbols } => {
                        format!("no data for {}", symbols.join(", "))
                    }
                    SkipReason::NoOverlap => "no overlapping history".to_string(),
                    SkipReason::InvalidData { message } => format!("invalid data ({})", message),
                };
                writeln!(w, "  Skipped {}: {}", skipped.name, reason)?;
            }
        }

        Ok(())
    }
}
