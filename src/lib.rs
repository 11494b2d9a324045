//! InsightForge: customer behavioral analytics from retail transactions
//!
//! This library turns a cleaned transaction table into customer-level
//! intelligence: RFM scores with rule-based segments, K-Means behavioral
//! clusters with model-selection diagnostics, and month-over-month cohort
//! retention.

pub mod cli;
pub mod cluster;
pub mod cohort;
pub mod data;
pub mod error;
pub mod export;
pub mod rfm;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use cluster::{
    assign_clusters, find_optimal_k, fit, get_cluster_summary, prepare_features, ClusterModel,
    FeatureMatrix, KMeansConfig, KSelectionRow, StandardScaler,
};
pub use cohort::{create_cohort_matrix, CohortMatrix, CohortMonth};
pub use data::{load_transactions, summarize_dataset, Transaction, DEFAULT_MAX_LINE_AMOUNT};
pub use error::{Error, Result};
pub use rfm::{
    calculate_rfm, compute_quintiles, get_segment_summary, score_rfm, segment_customers,
    segment_for, QuintileEdges, RfmBinEdges, RfmMetrics, RfmRecord, ScoredRfm, Segment,
    SummaryRow,
};
