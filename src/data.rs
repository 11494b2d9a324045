//! Transaction loading and cleaning using Polars
//!
//! This is the DataSource boundary: it turns a raw retail CSV into the
//! cleaned transaction table the engines consume. Cleaning drops rows with
//! missing customer ids, cancelled invoices, non-positive quantities or
//! prices, and line amounts at or above a configurable outlier cutoff.

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::{info, warn};
use polars::prelude::*;
use serde::Serialize;
use std::collections::HashSet;

/// Line amounts at or above this value are treated as outliers and dropped.
/// The cutoff is a cleaning policy of this boundary, never consulted by the
/// engines themselves.
pub const DEFAULT_MAX_LINE_AMOUNT: f64 = 10_000.0;

/// One cleaned transaction line. Timestamps are timezone-naive.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub customer_id: String,
    pub invoice_id: String,
    pub timestamp: NaiveDateTime,
    /// Line amount, quantity times unit price. Always positive after cleaning.
    pub amount: f64,
}

/// Headline statistics of the cleaned dataset.
#[derive(Debug, Clone)]
pub struct DatasetSummary {
    pub transactions: usize,
    pub customers: usize,
    pub invoices: usize,
    pub first_date: NaiveDateTime,
    pub last_date: NaiveDateTime,
    pub total_revenue: f64,
}

/// Load a retail CSV and apply the standard cleaning pipeline
///
/// # Arguments
/// * `file_path` - Path to the CSV file with `InvoiceNo`, `InvoiceDate`,
///   `Quantity`, `UnitPrice`, `CustomerID` columns
/// * `max_line_amount` - Outlier cutoff for `Quantity * UnitPrice`
///
/// # Returns
/// * Cleaned transactions, in file order
pub fn load_transactions(file_path: &str, max_line_amount: f64) -> anyhow::Result<Vec<Transaction>> {
    let df = CsvReader::from_path(file_path)
        .with_context(|| format!("opening {file_path}"))?
        .has_header(true)
        .finish()
        .with_context(|| format!("reading {file_path}"))?;

    let initial_rows = df.height();

    let df = df
        .lazy()
        .filter(
            col("CustomerID")
                .is_not_null()
                .and(col("Quantity").gt(lit(0)))
                .and(col("UnitPrice").gt(lit(0.0))),
        )
        .with_column(
            (col("Quantity").cast(DataType::Float64) * col("UnitPrice")).alias("TotalAmount"),
        )
        .filter(col("TotalAmount").lt(lit(max_line_amount)))
        .collect()
        .context("cleaning transaction table")?;

    info!(
        "cleaning kept {} of {} rows (outlier cutoff {})",
        df.height(),
        initial_rows,
        max_line_amount
    );

    let transactions = materialize_rows(&df)?;
    if transactions.is_empty() {
        anyhow::bail!("no valid transactions after cleaning");
    }

    Ok(transactions)
}

/// Convert the cleaned DataFrame into typed transaction records.
///
/// Cancelled invoices (`InvoiceNo` starting with `C`) and rows whose
/// timestamp cannot be parsed are dropped here.
fn materialize_rows(df: &DataFrame) -> anyhow::Result<Vec<Transaction>> {
    let customer = df.column("CustomerID")?.cast(&DataType::String)?;
    let customer = customer.str()?;
    let invoice = df.column("InvoiceNo")?.cast(&DataType::String)?;
    let invoice = invoice.str()?;
    let date = df.column("InvoiceDate")?.cast(&DataType::String)?;
    let date = date.str()?;
    let amount = df.column("TotalAmount")?.f64()?;

    let mut transactions = Vec::with_capacity(df.height());
    let mut cancelled = 0usize;
    let mut unparsable = 0usize;

    for i in 0..df.height() {
        let (Some(customer_id), Some(invoice_id), Some(raw_date), Some(line_amount)) =
            (customer.get(i), invoice.get(i), date.get(i), amount.get(i))
        else {
            continue;
        };

        if invoice_id.starts_with('C') {
            cancelled += 1;
            continue;
        }

        let Some(timestamp) = parse_timestamp(raw_date) else {
            unparsable += 1;
            continue;
        };

        transactions.push(Transaction {
            customer_id: customer_id.to_owned(),
            invoice_id: invoice_id.to_owned(),
            timestamp,
            amount: line_amount,
        });
    }

    if cancelled > 0 {
        info!("dropped {cancelled} cancelled-order rows");
    }
    if unparsable > 0 {
        warn!("dropped {unparsable} rows with unparsable timestamps");
    }

    Ok(transactions)
}

/// Parse an invoice timestamp in any of the formats seen in retail exports.
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim().trim_end_matches('Z');
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%m/%d/%Y %H:%M",
        "%d/%m/%Y %H:%M",
    ];
    for format in FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

/// Summarize the cleaned dataset for pipeline reporting.
pub fn summarize_dataset(transactions: &[Transaction]) -> Option<DatasetSummary> {
    let first = transactions.iter().map(|t| t.timestamp).min()?;
    let last = transactions.iter().map(|t| t.timestamp).max()?;
    let customers: HashSet<&str> = transactions.iter().map(|t| t.customer_id.as_str()).collect();
    let invoices: HashSet<&str> = transactions.iter().map(|t| t.invoice_id.as_str()).collect();

    Some(DatasetSummary {
        transactions: transactions.len(),
        customers: customers.len(),
        invoices: invoices.len(),
        first_date: first,
        last_date: last,
        total_revenue: transactions.iter().map(|t| t.amount).sum(),
    })
}
