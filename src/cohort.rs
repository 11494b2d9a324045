//! Month-over-month cohort retention
//!
//! A customer's cohort is the calendar month of their first purchase. Each
//! transaction lands in a period, the whole-month offset from its cohort
//! month. Retention divides the distinct customers active in a period by
//! the cohort's period-0 size. Cells with no activity are absent, which is
//! distinct from zero retained.

use chrono::{Datelike, NaiveDateTime};
use log::info;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::data::Transaction;
use crate::error::{Error, Result};

/// A calendar month, day-of-month ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CohortMonth {
    pub year: i32,
    pub month: u32,
}

impl CohortMonth {
    pub fn from_timestamp(ts: NaiveDateTime) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
        }
    }

    fn ordinal(self) -> i64 {
        self.year as i64 * 12 + self.month as i64 - 1
    }

    /// Whole-month difference, positive when `self` is later.
    pub fn months_since(self, earlier: CohortMonth) -> i64 {
        self.ordinal() - earlier.ordinal()
    }
}

impl fmt::Display for CohortMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Sparse retention matrix: cohort month by period index.
#[derive(Debug, Clone)]
pub struct CohortMatrix {
    cells: BTreeMap<CohortMonth, BTreeMap<usize, f64>>,
    sizes: BTreeMap<CohortMonth, usize>,
}

impl CohortMatrix {
    /// Retention fraction for a cell, `None` where the cohort had no
    /// activity in that period.
    pub fn retention(&self, cohort: CohortMonth, period: usize) -> Option<f64> {
        self.cells.get(&cohort)?.get(&period).copied()
    }

    /// Cohort months in chronological order with their initial sizes.
    pub fn cohorts(&self) -> impl Iterator<Item = (CohortMonth, usize)> + '_ {
        self.sizes.iter().map(|(&month, &size)| (month, size))
    }

    /// Present cells of one cohort row in period order.
    pub fn row(&self, cohort: CohortMonth) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.cells
            .get(&cohort)
            .into_iter()
            .flat_map(|row| row.iter().map(|(&period, &fraction)| (period, fraction)))
    }

    /// Largest period index present in any cohort.
    pub fn max_period(&self) -> usize {
        self.cells
            .values()
            .flat_map(|row| row.keys().copied())
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Build the cohort retention matrix
///
/// # Arguments
/// * `transactions` - The cleaned transaction table
///
/// # Returns
/// * Sparse matrix of retention fractions; every cohort's period 0 is 1.0
///   by construction
pub fn create_cohort_matrix(transactions: &[Transaction]) -> Result<CohortMatrix> {
    if transactions.is_empty() {
        return Err(Error::Input(
            "transaction set is empty, no cohorts to build".into(),
        ));
    }

    // First purchase month per customer defines the cohort.
    let mut first_month: HashMap<&str, CohortMonth> = HashMap::new();
    for t in transactions {
        let month = CohortMonth::from_timestamp(t.timestamp);
        first_month
            .entry(t.customer_id.as_str())
            .and_modify(|current| {
                if month < *current {
                    *current = month;
                }
            })
            .or_insert(month);
    }

    // Distinct customers active per (cohort, period).
    let mut active: BTreeMap<CohortMonth, BTreeMap<usize, HashSet<&str>>> = BTreeMap::new();
    for t in transactions {
        let cohort = first_month[t.customer_id.as_str()];
        let period = CohortMonth::from_timestamp(t.timestamp).months_since(cohort);
        debug_assert!(period >= 0, "transaction precedes its own cohort");
        active
            .entry(cohort)
            .or_default()
            .entry(period as usize)
            .or_default()
            .insert(t.customer_id.as_str());
    }

    let mut cells = BTreeMap::new();
    let mut sizes = BTreeMap::new();
    for (cohort, periods) in active {
        // Period 0 exists by construction: the first purchase defines the
        // cohort month, so every cohort member is active in period 0.
        let size = periods.get(&0).map(|customers| customers.len()).unwrap_or(0);
        if size == 0 {
            return Err(Error::Input(format!(
                "cohort {cohort} has no period-0 activity"
            )));
        }

        let row: BTreeMap<usize, f64> = periods
            .iter()
            .map(|(&period, customers)| (period, customers.len() as f64 / size as f64))
            .collect();
        sizes.insert(cohort, size);
        cells.insert(cohort, row);
    }

    info!("built cohort matrix with {} cohorts", sizes.len());
    Ok(CohortMatrix { cells, sizes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(10, 0, 0).unwrap()
    }

    fn tx(customer: &str, invoice: &str, timestamp: NaiveDateTime) -> Transaction {
        Transaction {
            customer_id: customer.to_owned(),
            invoice_id: invoice.to_owned(),
            timestamp,
            amount: 10.0,
        }
    }

    #[test]
    fn test_month_arithmetic_across_year_boundary() {
        let nov = CohortMonth { year: 2010, month: 11 };
        let jan = CohortMonth { year: 2011, month: 1 };
        assert_eq!(jan.months_since(nov), 2);
        assert_eq!(nov.months_since(nov), 0);
    }

    #[test]
    fn test_single_customer_with_gap() {
        // Two invoices in month 0, one in month 2, nothing in month 1.
        let transactions = vec![
            tx("a", "i1", ts(2011, 1, 5)),
            tx("a", "i2", ts(2011, 1, 20)),
            tx("a", "i3", ts(2011, 3, 10)),
        ];
        let matrix = create_cohort_matrix(&transactions).unwrap();

        let cohort = CohortMonth { year: 2011, month: 1 };
        assert_eq!(matrix.retention(cohort, 0), Some(1.0));
        assert_eq!(matrix.retention(cohort, 1), None); // no data, not 0%
        assert_eq!(matrix.retention(cohort, 2), Some(1.0));
        assert_eq!(matrix.max_period(), 2);
    }

    #[test]
    fn test_retention_fractions() {
        // Cohort of two; only one returns the next month.
        let transactions = vec![
            tx("a", "i1", ts(2011, 1, 5)),
            tx("b", "i2", ts(2011, 1, 8)),
            tx("a", "i3", ts(2011, 2, 5)),
        ];
        let matrix = create_cohort_matrix(&transactions).unwrap();

        let cohort = CohortMonth { year: 2011, month: 1 };
        assert_eq!(matrix.retention(cohort, 0), Some(1.0));
        assert_eq!(matrix.retention(cohort, 1), Some(0.5));
        assert_eq!(matrix.cohorts().collect::<Vec<_>>(), vec![(cohort, 2)]);
    }

    #[test]
    fn test_customers_split_into_cohorts_by_first_purchase() {
        let transactions = vec![
            tx("a", "i1", ts(2010, 12, 1)),
            tx("b", "i2", ts(2011, 1, 1)),
            // Customer a returns in b's cohort month; still counted in a's
            // own cohort at period 1.
            tx("a", "i3", ts(2011, 1, 15)),
        ];
        let matrix = create_cohort_matrix(&transactions).unwrap();

        let dec = CohortMonth { year: 2010, month: 12 };
        let jan = CohortMonth { year: 2011, month: 1 };
        assert_eq!(matrix.retention(dec, 0), Some(1.0));
        assert_eq!(matrix.retention(dec, 1), Some(1.0));
        assert_eq!(matrix.retention(jan, 0), Some(1.0));
        assert_eq!(matrix.retention(jan, 1), None);
    }

    #[test]
    fn test_all_fractions_in_unit_interval() {
        let mut transactions = Vec::new();
        for c in 0..6 {
            transactions.push(tx(&format!("c{c}"), &format!("i{c}"), ts(2011, 1, 1 + c)));
            if c % 2 == 0 {
                transactions.push(tx(&format!("c{c}"), &format!("r{c}"), ts(2011, 2 + c / 2, 3)));
            }
        }
        let matrix = create_cohort_matrix(&transactions).unwrap();

        for (cohort, _) in matrix.cohorts() {
            assert_eq!(matrix.retention(cohort, 0), Some(1.0));
            for (_, fraction) in matrix.row(cohort) {
                assert!((0.0..=1.0).contains(&fraction));
            }
        }
    }

    #[test]
    fn test_single_cohort_single_period_is_valid() {
        let transactions = vec![tx("a", "i1", ts(2011, 5, 5))];
        let matrix = create_cohort_matrix(&transactions).unwrap();

        let cohort = CohortMonth { year: 2011, month: 5 };
        assert_eq!(matrix.retention(cohort, 0), Some(1.0));
        assert_eq!(matrix.max_period(), 0);
    }

    #[test]
    fn test_empty_input_is_rejected() {
        assert!(matches!(create_cohort_matrix(&[]), Err(Error::Input(_))));
    }
}
