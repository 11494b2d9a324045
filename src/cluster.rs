//! K-Means clustering of customers in RFM feature space
//!
//! Features are optionally log-compressed, then standardized with statistics
//! retained so fitted centroids can be mapped back to original units. The
//! fit itself is an explicit best-of-N loop over seeded restarts keeping the
//! lowest-inertia solution, which makes runs bit-reproducible for a fixed
//! seed.

use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use log::{debug, info, warn};
use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use serde::Serialize;
use std::collections::HashSet;
use std::ops::RangeInclusive;

use crate::error::{Error, Result};
use crate::rfm::{summarize, RfmRecord, SummaryRow};

/// Feature standardization with retained statistics.
///
/// Centers each column to zero mean and unit variance. The fitted mean and
/// scale are kept so centroids can be inverse-transformed later.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(data: &Array2<f64>) -> Self {
        let mean = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(data.ncols()));
        let mut scale = data.std_axis(Axis(0), 0.0);
        // A constant column scales by 1 so it passes through unchanged.
        scale.mapv_inplace(|s| if s == 0.0 { 1.0 } else { s });
        Self { mean, scale }
    }

    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        (data - &self.mean) / &self.scale
    }

    pub fn inverse_transform(&self, data: &Array2<f64>) -> Array2<f64> {
        data * &self.scale + &self.mean
    }
}

/// Standardized RFM feature space for one batch of customers.
#[derive(Debug)]
pub struct FeatureMatrix {
    /// Standardized (and optionally log-compressed) features, one row per
    /// customer, columns recency/frequency/monetary.
    pub features: Array2<f64>,
    /// Customer ids corresponding to each row.
    pub customer_ids: Vec<String>,
    pub scaler: StandardScaler,
    pub log_transform: bool,
}

/// K-Means configuration: restart count and seed are explicit so runs are
/// reproducible.
#[derive(Debug, Clone)]
pub struct KMeansConfig {
    pub n_restarts: usize,
    pub max_iterations: u64,
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            n_restarts: 10,
            max_iterations: 300,
            tolerance: 1e-4,
            seed: 42,
        }
    }
}

/// A fitted partition of the batch into `n_clusters` groups.
#[derive(Debug)]
pub struct ClusterModel {
    pub n_clusters: usize,
    /// Cluster id per feature row, in [0, n_clusters).
    pub labels: Array1<usize>,
    /// Centroids in the standardized fitting space.
    pub centroids_scaled: Array2<f64>,
    /// Centroids mapped back to original RFM units.
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squared distances in the fitting space.
    pub inertia: f64,
}

impl ClusterModel {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }
}

/// One row of the k-selection diagnostic table.
#[derive(Debug, Clone, Serialize)]
pub struct KSelectionRow {
    pub k: usize,
    pub inertia: f64,
    pub silhouette: f64,
}

/// Build the feature matrix for clustering
///
/// # Arguments
/// * `records` - Scored RFM records, one per customer
/// * `log_transform` - Apply `log(1+x)` first to compress the right skew of
///   frequency and monetary
pub fn prepare_features(records: &[RfmRecord], log_transform: bool) -> Result<FeatureMatrix> {
    if records.is_empty() {
        return Err(Error::Input("no records to prepare features from".into()));
    }

    let mut raw = Vec::with_capacity(records.len() * 3);
    for record in records {
        raw.extend_from_slice(&[
            record.recency_days as f64,
            record.frequency as f64,
            record.monetary,
        ]);
    }
    let mut features = Array2::from_shape_vec((records.len(), 3), raw)
        .map_err(|e| Error::Input(format!("feature matrix shape: {e}")))?;

    if log_transform {
        features.mapv_inplace(f64::ln_1p);
    }

    let scaler = StandardScaler::fit(&features);
    let features = scaler.transform(&features);

    Ok(FeatureMatrix {
        features,
        customer_ids: records.iter().map(|r| r.customer_id.clone()).collect(),
        scaler,
        log_transform,
    })
}

/// Inertia and mean silhouette for each candidate k
///
/// A diagnostic report only; it does not select k. Candidates below two or
/// above the number of distinct points are skipped, since silhouette is
/// undefined for degenerate partitions. Rows come back in ascending k order.
pub fn find_optimal_k(
    features: &FeatureMatrix,
    k_range: RangeInclusive<usize>,
    config: &KMeansConfig,
) -> Result<Vec<KSelectionRow>> {
    let distinct = distinct_rows(&features.features);
    let mut rows = Vec::new();

    for k in k_range {
        if k < 2 {
            warn!("skipping k={k}: silhouette is undefined below two clusters");
            continue;
        }
        if k > distinct {
            warn!("skipping k={k}: only {distinct} distinct points");
            continue;
        }

        let fitted = best_of_n(&features.features, k, config)?;
        let silhouette = silhouette_score(&features.features, &fitted.labels, k);
        debug!("k={k}: inertia={:.4} silhouette={silhouette:.4}", fitted.inertia);
        rows.push(KSelectionRow {
            k,
            inertia: fitted.inertia,
            silhouette,
        });
    }

    Ok(rows)
}

/// Fit the final K-Means partition
///
/// # Arguments
/// * `features` - Prepared feature matrix
/// * `n_clusters` - Number of clusters, chosen by the caller
/// * `config` - Restart count, iteration cap, tolerance, and seed
///
/// # Returns
/// * `ClusterModel` with labels and centroids in both the fitting space and
///   original RFM units
pub fn fit(
    features: &FeatureMatrix,
    n_clusters: usize,
    config: &KMeansConfig,
) -> Result<ClusterModel> {
    if n_clusters < 1 {
        return Err(Error::Config("n_clusters must be at least 1".into()));
    }
    if config.n_restarts < 1 {
        return Err(Error::Config("n_restarts must be at least 1".into()));
    }
    let distinct = distinct_rows(&features.features);
    if n_clusters > distinct {
        return Err(Error::Config(format!(
            "n_clusters {n_clusters} exceeds the {distinct} distinct customers in the batch"
        )));
    }

    let fitted = best_of_n(&features.features, n_clusters, config)?;
    info!(
        "fitted k-means with k={n_clusters}, inertia {:.4} over {} restarts",
        fitted.inertia, config.n_restarts
    );

    // Map centroids back to original units: undo standardization, then undo
    // the log compression.
    let mut centroids = features.scaler.inverse_transform(&fitted.centroids);
    if features.log_transform {
        centroids.mapv_inplace(f64::exp_m1);
    }

    Ok(ClusterModel {
        n_clusters,
        labels: fitted.labels,
        centroids_scaled: fitted.centroids,
        centroids,
        inertia: fitted.inertia,
    })
}

/// Copy the model's cluster ids onto the records, returning the joined table.
pub fn assign_clusters(mut records: Vec<RfmRecord>, model: &ClusterModel) -> Result<Vec<RfmRecord>> {
    if records.len() != model.labels.len() {
        return Err(Error::Input(format!(
            "model was fitted on {} rows but {} records were supplied",
            model.labels.len(),
            records.len()
        )));
    }
    for (record, &label) in records.iter_mut().zip(model.labels.iter()) {
        record.cluster = Some(label);
    }
    Ok(records)
}

/// Summary statistics per cluster, sorted descending by total revenue.
pub fn get_cluster_summary(records: &[RfmRecord]) -> Result<Vec<SummaryRow>> {
    let mut keyed = Vec::with_capacity(records.len());
    for record in records {
        let cluster = record.cluster.ok_or_else(|| {
            Error::Input(format!(
                "record {} has no cluster id; fit and assign clusters first",
                record.customer_id
            ))
        })?;
        keyed.push((cluster.to_string(), record));
    }
    Ok(summarize(keyed.into_iter()))
}

struct FittedRun {
    labels: Array1<usize>,
    centroids: Array2<f64>,
    inertia: f64,
}

/// Explicit best-of-N restart loop: N independent seeded fits, arg-min over
/// inertia. Ties keep the earliest run so the selection is deterministic.
fn best_of_n(features: &Array2<f64>, k: usize, config: &KMeansConfig) -> Result<FittedRun> {
    let n_samples = features.nrows();
    let targets: Array1<usize> = Array1::zeros(n_samples);
    let dataset = Dataset::new(features.clone(), targets);

    let mut best: Option<FittedRun> = None;
    for run in 0..config.n_restarts {
        let rng = Xoshiro256Plus::seed_from_u64(config.seed.wrapping_add(run as u64));
        let model = KMeans::params_with(k, rng, L2Dist)
            .max_n_iterations(config.max_iterations)
            .tolerance(config.tolerance)
            .n_runs(1)
            .fit(&dataset)
            .map_err(|e| Error::Config(format!("k-means fit failed for k={k}: {e}")))?;

        let labels = model.predict(&dataset);
        let centroids = model.centroids().clone();
        let inertia = compute_inertia(features, &labels, &centroids);

        if best.as_ref().map_or(true, |b| inertia < b.inertia) {
            best = Some(FittedRun {
                labels,
                centroids,
                inertia,
            });
        }
    }

    best.ok_or_else(|| Error::Config("no k-means restart produced a model".into()))
}

/// Within-cluster sum of squared distances.
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    let mut inertia = 0.0;
    for (i, &cluster) in labels.iter().enumerate() {
        if cluster < centroids.nrows() {
            let point = features.row(i);
            let centroid = centroids.row(cluster);
            inertia += point
                .iter()
                .zip(centroid.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>();
        }
    }
    inertia
}

/// Mean silhouette coefficient over all points, computed in the same
/// standardized space used for fitting. Singleton-cluster points contribute
/// zero.
pub fn silhouette_score(features: &Array2<f64>, labels: &Array1<usize>, k: usize) -> f64 {
    let n_samples = features.nrows();
    if n_samples < 2 || k < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    for i in 0..n_samples {
        let point = features.row(i);
        let own_label = labels[i];

        let mut same_cluster = Vec::new();
        let mut other_clusters: Vec<Vec<f64>> = vec![Vec::new(); k];

        for j in 0..n_samples {
            if i == j {
                continue;
            }
            let distance = point
                .iter()
                .zip(features.row(j).iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
                .sqrt();
            let label = labels[j];
            if label == own_label {
                same_cluster.push(distance);
            } else if label < k {
                other_clusters[label].push(distance);
            }
        }

        if same_cluster.is_empty() {
            // Singleton cluster.
            continue;
        }

        let a = same_cluster.iter().sum::<f64>() / same_cluster.len() as f64;
        let b = other_clusters
            .iter()
            .filter(|distances| !distances.is_empty())
            .map(|distances| distances.iter().sum::<f64>() / distances.len() as f64)
            .fold(f64::INFINITY, f64::min);

        if b.is_infinite() || (a == 0.0 && b == 0.0) {
            continue;
        }
        total += (b - a) / a.max(b);
    }

    total / n_samples as f64
}

/// Number of distinct feature rows, compared bit-exactly.
fn distinct_rows(features: &Array2<f64>) -> usize {
    let mut seen = HashSet::new();
    for row in features.outer_iter() {
        let key: Vec<u64> = row.iter().map(|v| v.to_bits()).collect();
        seen.insert(key);
    }
    seen.len()
}
