//! RFM metric computation, quintile scoring, and rule-based segmentation
//!
//! Scores are batch-relative: quintile edges are computed from the empirical
//! distribution of the current batch, so the same customer can score
//! differently depending on the rest of the cohort present. The edges used
//! for a scoring run are returned alongside the records so a batch can be
//! reproduced and inspected in isolation.

use chrono::{Duration, NaiveDateTime};
use log::info;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::data::Transaction;
use crate::error::{Error, Result};

/// Per-customer behavioral metrics before scoring.
#[derive(Debug, Clone)]
pub struct RfmMetrics {
    pub customer_id: String,
    /// Whole days between the reference date and the latest purchase.
    pub recency_days: i64,
    /// Count of distinct invoices.
    pub frequency: u64,
    /// Total spend across all lines.
    pub monetary: f64,
    /// Mean spend per line, informational only.
    pub avg_order_value: f64,
}

/// Behavioral segment assigned by the scoring rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Segment {
    #[serde(rename = "Champions")]
    Champions,
    #[serde(rename = "Loyal Customers")]
    LoyalCustomers,
    #[serde(rename = "New Customers")]
    NewCustomers,
    #[serde(rename = "Potential Loyalists")]
    PotentialLoyalists,
    #[serde(rename = "At Risk")]
    AtRisk,
    #[serde(rename = "Cannot Lose Them")]
    CannotLoseThem,
    #[serde(rename = "Lost Customers")]
    LostCustomers,
    #[serde(rename = "Others")]
    Others,
}

impl Segment {
    pub const ALL: [Segment; 8] = [
        Segment::Champions,
        Segment::LoyalCustomers,
        Segment::NewCustomers,
        Segment::PotentialLoyalists,
        Segment::AtRisk,
        Segment::CannotLoseThem,
        Segment::LostCustomers,
        Segment::Others,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Segment::Champions => "Champions",
            Segment::LoyalCustomers => "Loyal Customers",
            Segment::NewCustomers => "New Customers",
            Segment::PotentialLoyalists => "Potential Loyalists",
            Segment::AtRisk => "At Risk",
            Segment::CannotLoseThem => "Cannot Lose Them",
            Segment::LostCustomers => "Lost Customers",
            Segment::Others => "Others",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One scored customer row, the shape of the exported RFM table.
#[derive(Debug, Clone, Serialize)]
pub struct RfmRecord {
    #[serde(rename = "CustomerID")]
    pub customer_id: String,
    #[serde(rename = "Recency")]
    pub recency_days: i64,
    #[serde(rename = "Frequency")]
    pub frequency: u64,
    #[serde(rename = "Monetary")]
    pub monetary: f64,
    #[serde(rename = "AvgOrderValue")]
    pub avg_order_value: f64,
    #[serde(rename = "R_Score")]
    pub r_score: u8,
    #[serde(rename = "F_Score")]
    pub f_score: u8,
    #[serde(rename = "M_Score")]
    pub m_score: u8,
    /// Concatenation of the three scores in R,F,M order. A composite key,
    /// not a numeric quantity.
    #[serde(rename = "RFM_Score")]
    pub rfm_score: String,
    #[serde(rename = "Segment")]
    pub segment: Segment,
    #[serde(rename = "Cluster")]
    pub cluster: Option<usize>,
}

/// Quintile bin edges: the 0th, 20th, 40th, 60th, 80th, and 100th
/// percentiles of the batch distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuintileEdges(pub [f64; 6]);

impl QuintileEdges {
    /// 1-based bin for a value, 1 = lowest fifth. Bins are right-closed, so
    /// a value tied with an internal edge falls in the lower bin.
    pub fn bin(&self, value: f64) -> u8 {
        for i in 1..=4 {
            if value <= self.0[i] {
                return i as u8;
            }
        }
        5
    }
}

/// The bin edges used by one scoring run.
#[derive(Debug, Clone, Serialize)]
pub struct RfmBinEdges {
    pub recency: QuintileEdges,
    /// Edges over the stable rank of frequency, not raw frequency.
    pub frequency_rank: QuintileEdges,
    pub monetary: QuintileEdges,
}

/// Scored records plus the edges that produced them.
#[derive(Debug, Clone)]
pub struct ScoredRfm {
    pub records: Vec<RfmRecord>,
    pub edges: RfmBinEdges,
}

/// Compute Recency, Frequency, Monetary metrics per customer
///
/// # Arguments
/// * `transactions` - The cleaned transaction table
/// * `reference_date` - Anchor for recency; defaults to the latest
///   transaction plus one day
pub fn calculate_rfm(
    transactions: &[Transaction],
    reference_date: Option<NaiveDateTime>,
) -> Result<Vec<RfmMetrics>> {
    let latest = transactions
        .iter()
        .map(|t| t.timestamp)
        .max()
        .ok_or_else(|| Error::Input("transaction set is empty".into()))?;

    let reference = reference_date.unwrap_or(latest + Duration::days(1));
    if reference < latest {
        return Err(Error::Input(format!(
            "reference date {reference} precedes latest transaction {latest}"
        )));
    }

    struct Group<'a> {
        last: NaiveDateTime,
        invoices: HashSet<&'a str>,
        monetary: f64,
        lines: u64,
    }

    let mut groups: HashMap<&str, Group> = HashMap::new();
    for t in transactions {
        let group = groups.entry(t.customer_id.as_str()).or_insert_with(|| Group {
            last: t.timestamp,
            invoices: HashSet::new(),
            monetary: 0.0,
            lines: 0,
        });
        group.last = group.last.max(t.timestamp);
        group.invoices.insert(t.invoice_id.as_str());
        group.monetary += t.amount;
        group.lines += 1;
    }

    let mut metrics: Vec<RfmMetrics> = groups
        .into_iter()
        .map(|(customer_id, group)| RfmMetrics {
            customer_id: customer_id.to_owned(),
            recency_days: (reference - group.last).num_days(),
            frequency: group.invoices.len() as u64,
            monetary: group.monetary,
            avg_order_value: group.monetary / group.lines as f64,
        })
        // Upstream cleaning should already rule these out.
        .filter(|m| m.monetary > 0.0 && m.frequency > 0)
        .collect();

    if metrics.is_empty() {
        return Err(Error::Input(
            "no customers with positive spend after aggregation".into(),
        ));
    }

    // Deterministic record order; frequency rank tie-breaks depend on it.
    metrics.sort_by(|a, b| a.customer_id.cmp(&b.customer_id));

    info!("calculated RFM for {} customers (reference date {reference})", metrics.len());
    Ok(metrics)
}

/// Quintile bin edges over a batch distribution.
///
/// Edges are linear-interpolation quantiles. Scoring fails when two adjacent
/// edges collapse, which happens when the distribution has too few distinct
/// values spread too unevenly to form five non-degenerate bins.
pub fn compute_quintiles(dimension: &'static str, values: &[f64]) -> Result<QuintileEdges> {
    if values.is_empty() {
        return Err(Error::Scoring {
            dimension,
            reason: "no values to bin".into(),
        });
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut edges = [0.0f64; 6];
    for (i, q) in [0.0, 0.2, 0.4, 0.6, 0.8, 1.0].into_iter().enumerate() {
        edges[i] = quantile(&sorted, q);
    }

    for pair in edges.windows(2) {
        if pair[0] >= pair[1] {
            return Err(Error::Scoring {
                dimension,
                reason: format!(
                    "duplicate bin edge {:.4}; too few distinct values for quintile scoring",
                    pair[0]
                ),
            });
        }
    }

    Ok(QuintileEdges(edges))
}

/// Linear-interpolation quantile of a sorted slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = q * (n - 1) as f64;
    let lower = pos.floor() as usize;
    let frac = pos - lower as f64;
    if lower + 1 >= n {
        sorted[n - 1]
    } else {
        sorted[lower] + frac * (sorted[lower + 1] - sorted[lower])
    }
}

/// Stable 1-based rank, ties broken by input order.
fn rank_first(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then(a.cmp(&b)));

    let mut ranks = vec![0.0; values.len()];
    for (rank, &i) in order.iter().enumerate() {
        ranks[i] = (rank + 1) as f64;
    }
    ranks
}

/// Apply 1-5 quintile scoring to RFM metrics
///
/// Recency is reverse-scored so that smaller recency earns the higher score.
/// Frequency is converted to a stable rank before binning because raw
/// frequency is highly discrete and duplicate values would collapse bin
/// edges. Monetary is binned on the raw distribution.
pub fn score_rfm(metrics: &[RfmMetrics]) -> Result<ScoredRfm> {
    if metrics.is_empty() {
        return Err(Error::Input("no RFM records to score".into()));
    }

    let recency: Vec<f64> = metrics.iter().map(|m| m.recency_days as f64).collect();
    let monetary: Vec<f64> = metrics.iter().map(|m| m.monetary).collect();
    let frequency: Vec<f64> = metrics.iter().map(|m| m.frequency as f64).collect();
    let frequency_ranks = rank_first(&frequency);

    let edges = RfmBinEdges {
        recency: compute_quintiles("recency", &recency)?,
        frequency_rank: compute_quintiles("frequency", &frequency_ranks)?,
        monetary: compute_quintiles("monetary", &monetary)?,
    };

    let records = metrics
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let r_score = 6 - edges.recency.bin(recency[i]);
            let f_score = edges.frequency_rank.bin(frequency_ranks[i]);
            let m_score = edges.monetary.bin(monetary[i]);
            RfmRecord {
                customer_id: m.customer_id.clone(),
                recency_days: m.recency_days,
                frequency: m.frequency,
                monetary: m.monetary,
                avg_order_value: m.avg_order_value,
                r_score,
                f_score,
                m_score,
                rfm_score: format!("{r_score}{f_score}{m_score}"),
                segment: Segment::Others,
                cluster: None,
            }
        })
        .collect();

    Ok(ScoredRfm { records, edges })
}

type SegmentRule = fn(u8, u8, u8) -> bool;

/// Ordered decision list; the first matching rule wins. Rules are not
/// mutually exclusive, so the order determines the outcome for records
/// matching more than one predicate.
const SEGMENT_RULES: [(SegmentRule, Segment); 7] = [
    (|r, f, m| r >= 4 && f >= 4 && m >= 4, Segment::Champions),
    (|r, f, m| r >= 3 && f >= 3 && m >= 3, Segment::LoyalCustomers),
    (|r, f, _| r >= 4 && f <= 2, Segment::NewCustomers),
    (|r, f, m| r >= 3 && f <= 2 && m >= 3, Segment::PotentialLoyalists),
    (|r, f, _| r <= 2 && f >= 3, Segment::AtRisk),
    (|r, f, m| r <= 2 && f <= 2 && m >= 3, Segment::CannotLoseThem),
    (|r, f, m| r <= 2 && f <= 2 && m <= 2, Segment::LostCustomers),
];

/// Segment for a score triple. A pure function of the scores.
pub fn segment_for(r: u8, f: u8, m: u8) -> Segment {
    SEGMENT_RULES
        .iter()
        .find(|(rule, _)| rule(r, f, m))
        .map(|&(_, segment)| segment)
        .unwrap_or(Segment::Others)
}

/// Assign a behavioral segment to every scored record.
pub fn segment_customers(mut records: Vec<RfmRecord>) -> Vec<RfmRecord> {
    for record in &mut records {
        record.segment = segment_for(record.r_score, record.f_score, record.m_score);
    }
    records
}

/// One row of a segment or cluster summary table.
#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub key: String,
    pub count: usize,
    pub avg_recency: f64,
    pub avg_frequency: f64,
    pub avg_monetary: f64,
    pub total_revenue: f64,
    /// Share of customer count, in percent.
    pub percentage: f64,
    /// Share of total monetary, in percent.
    pub revenue_share: f64,
}

/// Summary statistics per segment, sorted descending by total revenue.
pub fn get_segment_summary(records: &[RfmRecord]) -> Vec<SummaryRow> {
    summarize(records.iter().map(|r| (r.segment.label().to_owned(), r)))
}

pub(crate) fn summarize<'a, I>(keyed: I) -> Vec<SummaryRow>
where
    I: Iterator<Item = (String, &'a RfmRecord)>,
{
    struct Acc {
        count: usize,
        recency: f64,
        frequency: f64,
        monetary: f64,
    }

    let mut groups: HashMap<String, Acc> = HashMap::new();
    let mut total_count = 0usize;
    let mut grand_revenue = 0.0f64;

    for (key, record) in keyed {
        let acc = groups.entry(key).or_insert(Acc {
            count: 0,
            recency: 0.0,
            frequency: 0.0,
            monetary: 0.0,
        });
        acc.count += 1;
        acc.recency += record.recency_days as f64;
        acc.frequency += record.frequency as f64;
        acc.monetary += record.monetary;
        total_count += 1;
        grand_revenue += record.monetary;
    }

    let mut rows: Vec<SummaryRow> = groups
        .into_iter()
        .map(|(key, acc)| {
            let n = acc.count as f64;
            SummaryRow {
                key,
                count: acc.count,
                avg_recency: round2(acc.recency / n),
                avg_frequency: round2(acc.frequency / n),
                avg_monetary: round2(acc.monetary / n),
                total_revenue: round2(acc.monetary),
                percentage: round1(acc.count as f64 / total_count as f64 * 100.0),
                revenue_share: round1(acc.monetary / grand_revenue * 100.0),
            }
        })
        .collect();

    rows.sort_by(|a, b| b.total_revenue.total_cmp(&a.total_revenue));
    rows
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    fn tx(customer: &str, invoice: &str, timestamp: NaiveDateTime, amount: f64) -> Transaction {
        Transaction {
            customer_id: customer.to_owned(),
            invoice_id: invoice.to_owned(),
            timestamp,
            amount,
        }
    }

    fn metrics(customer: &str, recency: i64, frequency: u64, monetary: f64) -> RfmMetrics {
        RfmMetrics {
            customer_id: customer.to_owned(),
            recency_days: recency,
            frequency,
            monetary,
            avg_order_value: monetary / frequency as f64,
        }
    }

    #[test]
    fn test_calculate_rfm_metrics() {
        let transactions = vec![
            tx("a", "i1", ts(2011, 1, 1), 10.0),
            tx("a", "i1", ts(2011, 1, 1), 20.0),
            tx("a", "i2", ts(2011, 2, 1), 30.0),
            tx("b", "i3", ts(2011, 1, 15), 5.0),
        ];

        let metrics = calculate_rfm(&transactions, None).unwrap();
        assert_eq!(metrics.len(), 2);

        // Sorted by customer id.
        let a = &metrics[0];
        assert_eq!(a.customer_id, "a");
        assert_eq!(a.recency_days, 1); // reference = latest + 1 day
        assert_eq!(a.frequency, 2); // distinct invoices, not lines
        assert_eq!(a.monetary, 60.0);
        assert!((a.avg_order_value - 20.0).abs() < 1e-9);

        let b = &metrics[1];
        assert_eq!(b.recency_days, 18);
        assert_eq!(b.frequency, 1);
    }

    #[test]
    fn test_calculate_rfm_empty_input() {
        let result = calculate_rfm(&[], None);
        assert!(matches!(result, Err(Error::Input(_))));
    }

    #[test]
    fn test_calculate_rfm_stale_reference_date() {
        let transactions = vec![tx("a", "i1", ts(2011, 6, 1), 10.0)];
        let result = calculate_rfm(&transactions, Some(ts(2011, 1, 1)));
        assert!(matches!(result, Err(Error::Input(_))));
    }

    #[test]
    fn test_compute_quintiles_even_spread() {
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        let edges = compute_quintiles("test", &values).unwrap();

        assert_eq!(edges.0[0], 1.0);
        assert_eq!(edges.0[5], 10.0);
        // Each fifth of 1..=10 holds exactly two values.
        let bins: Vec<u8> = values.iter().map(|&v| edges.bin(v)).collect();
        assert_eq!(bins, vec![1, 1, 2, 2, 3, 3, 4, 4, 5, 5]);
    }

    #[test]
    fn test_compute_quintiles_duplicate_edges() {
        // Over half the mass on a single value collapses the lower edges.
        let values = vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let result = compute_quintiles("recency", &values);
        assert!(matches!(result, Err(Error::Scoring { dimension: "recency", .. })));
    }

    #[test]
    fn test_rank_first_breaks_ties_by_order() {
        let ranks = rank_first(&[2.0, 1.0, 2.0, 1.0]);
        assert_eq!(ranks, vec![3.0, 1.0, 4.0, 2.0]);
    }

    #[test]
    fn test_score_rfm_discrete_frequency() {
        // Raw frequency has only two distinct values; ranking keeps the
        // bins non-degenerate.
        let batch: Vec<RfmMetrics> = (0..10)
            .map(|i| metrics(&format!("c{i}"), 10 + i * 7, if i < 5 { 1 } else { 2 }, 100.0 + i as f64 * 55.0))
            .collect();

        let scored = score_rfm(&batch).unwrap();
        for record in &scored.records {
            assert!((1..=5).contains(&record.r_score));
            assert!((1..=5).contains(&record.f_score));
            assert!((1..=5).contains(&record.m_score));
            assert_eq!(
                record.rfm_score,
                format!("{}{}{}", record.r_score, record.f_score, record.m_score)
            );
        }
    }

    #[test]
    fn test_recency_scoring_is_reversed() {
        let batch: Vec<RfmMetrics> = (0..10)
            .map(|i| metrics(&format!("c{i}"), 1 + i * 20, (1 + i) as u64, 100.0 + i as f64 * 100.0))
            .collect();

        let scored = score_rfm(&batch).unwrap();
        // Most recent customer gets the top recency score, least recent the bottom.
        assert_eq!(scored.records[0].r_score, 5);
        assert_eq!(scored.records[9].r_score, 1);
        // Frequency and monetary score in the natural direction.
        assert_eq!(scored.records[0].f_score, 1);
        assert_eq!(scored.records[9].f_score, 5);
        assert_eq!(scored.records[9].m_score, 5);
    }

    #[test]
    fn test_scenario_three_customers() {
        let batch = vec![
            metrics("a", 1, 10, 5000.0),
            metrics("b", 200, 1, 50.0),
            metrics("c", 5, 8, 4000.0),
        ];

        let records = segment_customers(score_rfm(&batch).unwrap().records);

        let a = &records[0];
        assert_eq!((a.r_score, a.f_score, a.m_score), (5, 5, 5));
        assert_eq!(a.segment, Segment::Champions);

        let b = &records[1];
        assert_eq!((b.r_score, b.f_score, b.m_score), (1, 1, 1));
        assert_eq!(b.segment, Segment::LostCustomers);

        // Near the top on all three dimensions.
        let c = &records[2];
        assert!(c.r_score >= 3 && c.f_score >= 3 && c.m_score >= 3);
        assert_eq!(c.segment, Segment::LoyalCustomers);
    }

    #[test]
    fn test_segment_rule_order_is_load_bearing() {
        // (4,4,4) matches both the Champions and Loyal Customers predicates;
        // the earlier rule must win.
        assert_eq!(segment_for(4, 4, 4), Segment::Champions);
        assert_eq!(segment_for(3, 3, 3), Segment::LoyalCustomers);
        // (4,2,3) matches New Customers before Potential Loyalists.
        assert_eq!(segment_for(4, 2, 3), Segment::NewCustomers);
        assert_eq!(segment_for(3, 2, 3), Segment::PotentialLoyalists);
        assert_eq!(segment_for(2, 3, 1), Segment::AtRisk);
        assert_eq!(segment_for(2, 2, 3), Segment::CannotLoseThem);
        assert_eq!(segment_for(2, 2, 2), Segment::LostCustomers);
        assert_eq!(segment_for(3, 3, 2), Segment::Others);
    }

    #[test]
    fn test_segmentation_is_pure_over_scores() {
        // Every score triple maps to exactly one of the eight labels, and
        // identical triples always agree.
        for r in 1..=5u8 {
            for f in 1..=5u8 {
                for m in 1..=5u8 {
                    let first = segment_for(r, f, m);
                    assert_eq!(first, segment_for(r, f, m));
                    assert!(Segment::ALL.contains(&first));
                }
            }
        }
    }

    #[test]
    fn test_segment_summary_shares_sum_to_100() {
        let batch: Vec<RfmMetrics> = (0..20)
            .map(|i| metrics(&format!("c{i:02}"), 1 + i * 11, 1 + i as u64, 50.0 + i as f64 * 130.0))
            .collect();
        let records = segment_customers(score_rfm(&batch).unwrap().records);
        let summary = get_segment_summary(&records);

        let count_total: usize = summary.iter().map(|row| row.count).sum();
        assert_eq!(count_total, 20);

        let pct: f64 = summary.iter().map(|row| row.percentage).sum();
        assert!((pct - 100.0).abs() < 0.5, "percentages sum to {pct}");
        let share: f64 = summary.iter().map(|row| row.revenue_share).sum();
        assert!((share - 100.0).abs() < 0.5, "revenue shares sum to {share}");

        // Sorted descending by total revenue.
        for pair in summary.windows(2) {
            assert!(pair[0].total_revenue >= pair[1].total_revenue);
        }
    }
}
