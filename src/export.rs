//! CSV export of the analysis tables
//!
//! These files are the data contract with downstream reporting tools, so
//! column names are fixed.

use anyhow::Context;
use csv::Writer;
use log::info;
use std::path::Path;

use crate::cluster::KSelectionRow;
use crate::cohort::CohortMatrix;
use crate::rfm::{RfmRecord, SummaryRow};

/// Write the scored RFM table, one row per customer.
pub fn write_rfm_records(path: &Path, records: &[RfmRecord]) -> anyhow::Result<()> {
    let mut writer = Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!("wrote {} RFM rows to {}", records.len(), path.display());
    Ok(())
}

/// Write a segment or cluster summary table.
///
/// `key_header` names the first column: "Segment" or "Cluster".
pub fn write_summary(path: &Path, key_header: &str, rows: &[SummaryRow]) -> anyhow::Result<()> {
    let mut writer = Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record([
        key_header,
        "Count",
        "Avg_Recency",
        "Avg_Frequency",
        "Avg_Monetary",
        "Total_Revenue",
        "Percentage",
        "Revenue_Share",
    ])?;
    for row in rows {
        writer.write_record(&[
            row.key.clone(),
            row.count.to_string(),
            row.avg_recency.to_string(),
            row.avg_frequency.to_string(),
            row.avg_monetary.to_string(),
            row.total_revenue.to_string(),
            row.percentage.to_string(),
            row.revenue_share.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the k-selection diagnostic table.
pub fn write_k_selection(path: &Path, rows: &[KSelectionRow]) -> anyhow::Result<()> {
    let mut writer = Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the cohort retention matrix: one row per cohort month, one column
/// per period index. Absent cells stay empty rather than zero.
pub fn write_cohort_matrix(path: &Path, matrix: &CohortMatrix) -> anyhow::Result<()> {
    let mut writer = Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;

    let max_period = matrix.max_period();
    let mut header = vec!["Cohort".to_owned()];
    header.extend((0..=max_period).map(|p| p.to_string()));
    writer.write_record(&header)?;

    for (cohort, _) in matrix.cohorts() {
        let mut record = vec![cohort.to_string()];
        for period in 0..=max_period {
            record.push(match matrix.retention(cohort, period) {
                Some(fraction) => format!("{fraction:.4}"),
                None => String::new(),
            });
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
