//! Chart rendering with Plotters
//!
//! Renders the cluster scatter, the k-selection diagnostics, and the cohort
//! retention heatmap as PNG files. Purely a presentation boundary; nothing
//! here feeds back into the engines.

use log::info;
use plotters::prelude::*;

use crate::cluster::{ClusterModel, FeatureMatrix, KSelectionRow};
use crate::cohort::CohortMatrix;

/// Color palette for different clusters
const CLUSTER_COLORS: [RGBColor; 8] = [
    RED,
    BLUE,
    GREEN,
    MAGENTA,
    CYAN,
    RGBColor(255, 140, 0),
    RGBColor(128, 0, 128),
    RGBColor(139, 90, 43),
];

fn cluster_color(cluster: usize) -> &'static RGBColor {
    CLUSTER_COLORS.get(cluster).unwrap_or(&BLACK)
}

/// Scatter plot of the fitted clusters in standardized feature space
///
/// # Arguments
/// * `features` - Feature matrix the model was fitted on
/// * `model` - Fitted model with cluster assignments
/// * `output_path` - Path for the PNG
pub fn create_cluster_scatter(
    features: &FeatureMatrix,
    model: &ClusterModel,
    output_path: &str,
) -> anyhow::Result<()> {
    let frequency: Vec<f64> = features.features.column(1).to_vec();
    let monetary: Vec<f64> = features.features.column(2).to_vec();

    let freq_min = frequency.iter().fold(f64::INFINITY, |a, &b| a.min(b)) - 0.5;
    let freq_max = frequency.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b)) + 0.5;
    let mon_min = monetary.iter().fold(f64::INFINITY, |a, &b| a.min(b)) - 0.5;
    let mon_max = monetary.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b)) + 0.5;

    let root = BitMapBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            "Customer Clusters: Frequency vs Monetary",
            ("sans-serif", 30),
        )
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(freq_min..freq_max, mon_min..mon_max)?;

    chart
        .configure_mesh()
        .x_desc("Frequency (standardized)")
        .y_desc("Monetary (standardized)")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (i, (&freq, &mon)) in frequency.iter().zip(monetary.iter()).enumerate() {
        let color = cluster_color(model.labels[i]);
        chart.draw_series(std::iter::once(Circle::new((freq, mon), 4, color.filled())))?;
    }

    // Centroids as larger squares, in the same standardized space.
    for (cluster_id, centroid) in model.centroids_scaled.outer_iter().enumerate() {
        let (freq, mon) = (centroid[1], centroid[2]);
        let color = cluster_color(cluster_id);
        chart
            .draw_series(std::iter::once(Rectangle::new(
                [(freq - 0.1, mon - 0.1), (freq + 0.1, mon + 0.1)],
                color.filled(),
            )))?
            .label(format!("Cluster {cluster_id}"))
            .legend(move |(x, y)| Rectangle::new([(x, y), (x + 10, y + 10)], color.filled()));
    }

    chart.configure_series_labels().draw()?;
    root.present()?;
    info!("cluster scatter saved to {output_path}");

    Ok(())
}

/// Elbow and silhouette curves from the k-selection table.
pub fn create_k_selection_chart(rows: &[KSelectionRow], output_path: &str) -> anyhow::Result<()> {
    if rows.is_empty() {
        anyhow::bail!("k-selection table is empty, nothing to plot");
    }

    let k_min = rows[0].k as f64 - 0.5;
    let k_max = rows[rows.len() - 1].k as f64 + 0.5;
    let inertia_max = rows.iter().map(|r| r.inertia).fold(0.0, f64::max);

    let root = BitMapBackend::new(output_path, (1000, 500)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((1, 2));

    let mut elbow = ChartBuilder::on(&panels[0])
        .caption("Elbow Method", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(k_min..k_max, 0f64..inertia_max * 1.1)?;
    elbow
        .configure_mesh()
        .x_desc("k")
        .y_desc("Inertia")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;
    elbow.draw_series(LineSeries::new(
        rows.iter().map(|r| (r.k as f64, r.inertia)),
        &BLUE,
    ))?;
    elbow.draw_series(
        rows.iter()
            .map(|r| Circle::new((r.k as f64, r.inertia), 4, BLUE.filled())),
    )?;

    let mut silhouette = ChartBuilder::on(&panels[1])
        .caption("Silhouette Score", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(k_min..k_max, -1f64..1f64)?;
    silhouette
        .configure_mesh()
        .x_desc("k")
        .y_desc("Mean silhouette")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;
    silhouette.draw_series(LineSeries::new(
        rows.iter().map(|r| (r.k as f64, r.silhouette)),
        &RED,
    ))?;
    silhouette.draw_series(
        rows.iter()
            .map(|r| Circle::new((r.k as f64, r.silhouette), 4, RED.filled())),
    )?;

    root.present()?;
    info!("k-selection chart saved to {output_path}");

    Ok(())
}

/// Cohort retention heatmap: one row per cohort month, one column per
/// period. Absent cells stay white.
pub fn create_cohort_heatmap(matrix: &CohortMatrix, output_path: &str) -> anyhow::Result<()> {
    if matrix.is_empty() {
        anyhow::bail!("cohort matrix is empty, nothing to plot");
    }

    let cohorts: Vec<_> = matrix.cohorts().collect();
    let n_rows = cohorts.len();
    let n_cols = matrix.max_period() + 1;

    let width = (160 + 70 * n_cols as u32).clamp(640, 2400);
    let height = (140 + 40 * n_rows as u32).clamp(400, 1600);
    let root = BitMapBackend::new(output_path, (width, height)).into_drawing_area();
    root.fill(&WHITE)?;

    let labels: Vec<String> = cohorts.iter().map(|(month, _)| month.to_string()).collect();

    let mut chart = ChartBuilder::on(&root)
        .caption("Cohort Retention Rates", ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(45)
        .y_label_area_size(80)
        .build_cartesian_2d(0f64..n_cols as f64, 0f64..n_rows as f64)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_desc("Periods Since First Purchase")
        .y_desc("Cohort Month")
        .x_labels(n_cols)
        .y_labels(n_rows)
        .x_label_formatter(&|x| format!("{}", *x as usize))
        .y_label_formatter(&|y| {
            labels.get(*y as usize).cloned().unwrap_or_default()
        })
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (row_idx, &(cohort, _)) in cohorts.iter().enumerate() {
        for (period, fraction) in matrix.row(cohort) {
            let x = period as f64;
            let y = row_idx as f64;
            chart.draw_series(std::iter::once(Rectangle::new(
                [(x, y), (x + 1.0, y + 1.0)],
                retention_color(fraction).filled(),
            )))?;
            chart.draw_series(std::iter::once(Text::new(
                format!("{:.0}%", fraction * 100.0),
                (x + 0.3, y + 0.55),
                ("sans-serif", 13),
            )))?;
        }
    }

    root.present()?;
    info!("cohort heatmap saved to {output_path}");

    Ok(())
}

/// White through orange to red as retention climbs.
fn retention_color(fraction: f64) -> RGBColor {
    let clamped = fraction.clamp(0.0, 1.0);
    RGBColor(
        250,
        (235.0 - 160.0 * clamped) as u8,
        (225.0 - 200.0 * clamped) as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{fit, prepare_features, KMeansConfig};
    use crate::cohort::create_cohort_matrix;
    use crate::data::Transaction;
    use crate::rfm::{RfmRecord, Segment};
    use chrono::NaiveDate;
    use std::path::Path;
    use tempfile::tempdir;

    fn record(customer: &str, recency: i64, frequency: u64, monetary: f64) -> RfmRecord {
        RfmRecord {
            customer_id: customer.to_owned(),
            recency_days: recency,
            frequency,
            monetary,
            avg_order_value: monetary / frequency as f64,
            r_score: 3,
            f_score: 3,
            m_score: 3,
            rfm_score: "333".to_owned(),
            segment: Segment::Others,
            cluster: None,
        }
    }

    fn fitted_model() -> (crate::cluster::FeatureMatrix, crate::cluster::ClusterModel) {
        let records = vec![
            record("a", 2, 20, 5000.0),
            record("b", 4, 18, 4600.0),
            record("c", 90, 4, 800.0),
            record("d", 100, 5, 900.0),
            record("e", 300, 1, 60.0),
            record("f", 320, 1, 50.0),
        ];
        let features = prepare_features(&records, true).unwrap();
        let model = fit(&features, 3, &KMeansConfig::default()).unwrap();
        (features, model)
    }

    #[test]
    fn test_create_cluster_scatter() {
        let (features, model) = fitted_model();
        let dir = tempdir().unwrap();
        let path = dir.path().join("clusters.png");
        let path = path.to_str().unwrap();

        create_cluster_scatter(&features, &model, path).unwrap();
        assert!(Path::new(path).exists());
    }

    #[test]
    fn test_create_k_selection_chart() {
        let rows = vec![
            KSelectionRow { k: 2, inertia: 14.0, silhouette: 0.55 },
            KSelectionRow { k: 3, inertia: 8.0, silhouette: 0.61 },
            KSelectionRow { k: 4, inertia: 6.5, silhouette: 0.47 },
        ];
        let dir = tempdir().unwrap();
        let path = dir.path().join("k_selection.png");
        let path = path.to_str().unwrap();

        create_k_selection_chart(&rows, path).unwrap();
        assert!(Path::new(path).exists());
    }

    #[test]
    fn test_create_cohort_heatmap() {
        let ts = |m: u32, d: u32| {
            NaiveDate::from_ymd_opt(2011, m, d).unwrap().and_hms_opt(9, 0, 0).unwrap()
        };
        let transactions = vec![
            Transaction { customer_id: "a".into(), invoice_id: "i1".into(), timestamp: ts(1, 3), amount: 10.0 },
            Transaction { customer_id: "b".into(), invoice_id: "i2".into(), timestamp: ts(1, 9), amount: 12.0 },
            Transaction { customer_id: "a".into(), invoice_id: "i3".into(), timestamp: ts(2, 7), amount: 9.0 },
            Transaction { customer_id: "c".into(), invoice_id: "i4".into(), timestamp: ts(2, 11), amount: 20.0 },
        ];
        let matrix = create_cohort_matrix(&transactions).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("cohorts.png");
        let path = path.to_str().unwrap();

        create_cohort_heatmap(&matrix, path).unwrap();
        assert!(Path::new(path).exists());
    }
}
