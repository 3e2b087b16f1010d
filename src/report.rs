//! Run reports: a plain-text table and JSON

use std::io::{self, Write};

use anyhow::Result;
use serde::Serialize;

use loadgen_core::{InferStat, MeasurementSummary, PoolStats};

/// Whole-run totals
#[derive(Debug, Clone, Serialize)]
pub struct Totals {
    /// Successful requests over the run
    pub completed: usize,
    /// Failed requests over the run
    pub failed: usize,
    /// Longest worker lifetime in seconds
    pub duration_secs: f64,
    /// Successful requests per second over the run
    pub requests_per_second: f64,
    /// Transport counters summed over every client context
    pub client: InferStat,
}

impl Totals {
    pub fn new(pool: &PoolStats, client: InferStat) -> Self {
        Self {
            completed: pool.total_completed,
            failed: pool.total_failed,
            duration_secs: pool.total_duration.as_secs_f64(),
            requests_per_second: pool.requests_per_second,
            client,
        }
    }
}

/// Everything measured during one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub model: String,
    pub policy: String,
    pub mode: String,
    pub windows: Vec<MeasurementSummary>,
    pub totals: Totals,
}

impl RunReport {
    /// Print one row per window, then the totals
    pub fn print_table(&self) -> Result<()> {
        let stdout = io::stdout();
        self.write_table(&mut stdout.lock())
    }

    /// Print the report as pretty JSON
    pub fn print_json(&self) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(self)?);
        Ok(())
    }

    fn write_table(&self, out: &mut impl Write) -> Result<()> {
        writeln!(out, "Model:  {}", self.model)?;
        writeln!(out, "Policy: {} ({})", self.policy, self.mode)?;
        writeln!(out)?;
        writeln!(
            out,
            "{:>6} {:>9} {:>7} {:>8} {:>12} {:>10} {:>10} {:>10}",
            "window", "requests", "failed", "delayed", "throughput", "p50 ms", "p90 ms", "p99 ms"
        )?;
        for (index, window) in self.windows.iter().enumerate() {
            writeln!(
                out,
                "{:>6} {:>9} {:>7} {:>8} {:>12.1} {:>10.2} {:>10.2} {:>10.2}",
                index,
                window.request_count,
                window.failed_count,
                window.delayed_count,
                window.throughput,
                window.latency.p50,
                window.latency.p90,
                window.latency.p99,
            )?;
        }

        let totals = &self.totals;
        writeln!(out)?;
        writeln!(
            out,
            "Total: {} completed, {} failed in {:.2}s ({:.1} req/s)",
            totals.completed, totals.failed, totals.duration_secs, totals.requests_per_second
        )?;
        writeln!(
            out,
            "Client: {} issued, {} bytes sent, {} bytes received",
            totals.client.issued, totals.client.bytes_sent, totals.client.bytes_received
        )?;
        Ok(())
    }
}
