//! Command-line interface definitions and argument parsing

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use clap::Parser;
use std::ops::RangeInclusive;

use crate::error::{Error, Result};

/// Customer behavioral analytics: RFM segmentation, K-Means clustering, and
/// cohort retention
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input transaction CSV
    #[arg(short, long, default_value = "data.csv")]
    pub input: String,

    /// Directory for output tables and charts
    #[arg(short, long, default_value = "output")]
    pub output_dir: String,

    /// Number of clusters for the final K-Means fit
    #[arg(short = 'k', long, default_value_t = 4)]
    pub clusters: usize,

    /// Candidate k range for model-selection diagnostics
    /// Example: --k-range "2-10"
    #[arg(long, default_value = "2-10")]
    pub k_range: String,

    /// Reference date for recency, ISO 8601; defaults to the latest
    /// transaction plus one day
    #[arg(long)]
    pub reference_date: Option<String>,

    /// Random seed for K-Means initialization
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Number of K-Means restarts; the lowest-inertia run is kept
    #[arg(long, default_value_t = 10)]
    pub restarts: usize,

    /// Maximum iterations per K-Means fit
    #[arg(long, default_value_t = 300)]
    pub max_iters: u64,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value_t = 1e-4)]
    pub tolerance: f64,

    /// Drop line amounts at or above this value during cleaning
    #[arg(long, default_value_t = 10_000.0)]
    pub max_line_amount: f64,

    /// Skip the log(1+x) transform before standardization
    #[arg(long)]
    pub no_log_transform: bool,

    /// Skip chart generation
    #[arg(long)]
    pub no_plots: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse the k candidate range from the "low-high" argument form.
    pub fn parse_k_range(&self) -> Result<RangeInclusive<usize>> {
        let (low, high) = self
            .k_range
            .split_once('-')
            .ok_or_else(|| Error::Config(format!("k range '{}' is not in low-high form", self.k_range)))?;
        let low: usize = low
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid k range start: {low}")))?;
        let high: usize = high
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid k range end: {high}")))?;
        if low > high {
            return Err(Error::Config(format!("k range {low}-{high} is reversed")));
        }
        Ok(low..=high)
    }

    /// Parse the reference-date override, accepting a date or a date-time.
    pub fn parse_reference_date(&self) -> Result<Option<NaiveDateTime>> {
        let Some(ref raw) = self.reference_date else {
            return Ok(None);
        };
        let raw = raw.trim();
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
            return Ok(Some(ts));
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Ok(Some(date.and_time(NaiveTime::MIN)));
        }
        Err(Error::Config(format!(
            "reference date '{raw}' is not an ISO 8601 date or date-time"
        )))
    }
}
