//! InsightForge: customer behavioral analytics pipeline
//!
//! This is the main entrypoint that orchestrates data loading, RFM
//! segmentation, clustering, cohort analysis, exports, and charts. The RFM
//! and cohort engines consume the transaction table independently, so a
//! failure in one does not abort the other.

use anyhow::Result;
use clap::Parser;
use insightforge::{cluster, cohort, data, export, rfm, viz, Args, KMeansConfig};
use log::error;
use std::path::Path;
use std::time::Instant;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.verbose {
        println!("InsightForge - Customer Behavioral Analytics");
        println!("============================================\n");
    }

    run_pipeline(&args)
}

fn run_pipeline(args: &Args) -> Result<()> {
    let start_time = Instant::now();
    std::fs::create_dir_all(&args.output_dir)?;
    let out_dir = Path::new(&args.output_dir);

    // Step 1: Load and clean data
    if args.verbose {
        println!("Step 1: Loading and cleaning transactions");
        println!("  Input file: {}", args.input);
    }
    let transactions = data::load_transactions(&args.input, args.max_line_amount)?;
    println!("✓ Loaded {} transactions", transactions.len());
    if let Some(summary) = data::summarize_dataset(&transactions) {
        println!(
            "  {} customers, {} invoices, {} to {}, total revenue {:.2}",
            summary.customers,
            summary.invoices,
            summary.first_date.date(),
            summary.last_date.date(),
            summary.total_revenue
        );
    }

    // Steps 2-3 and step 4 are independent consumers of the transaction
    // table; run both even if one fails.
    let rfm_outcome = run_rfm_and_clustering(args, &transactions, out_dir);
    if let Err(e) = &rfm_outcome {
        error!("RFM/clustering failed: {e:#}");
        println!("✗ RFM/clustering failed: {e:#}");
    }

    let cohort_outcome = run_cohort_analysis(args, &transactions, out_dir);
    if let Err(e) = &cohort_outcome {
        error!("cohort analysis failed: {e:#}");
        println!("✗ Cohort analysis failed: {e:#}");
    }

    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    println!("Outputs written to: {}", args.output_dir);

    if rfm_outcome.is_err() || cohort_outcome.is_err() {
        anyhow::bail!("one or more analysis components failed");
    }
    Ok(())
}

/// RFM scoring, segmentation, and clustering over the same customer table.
fn run_rfm_and_clustering(
    args: &Args,
    transactions: &[data::Transaction],
    out_dir: &Path,
) -> Result<()> {
    println!("\n=== RFM Analysis & Segmentation ===");

    let reference_date = args.parse_reference_date()?;
    let metrics = rfm::calculate_rfm(transactions, reference_date)?;
    let scored = rfm::score_rfm(&metrics)?;
    let records = rfm::segment_customers(scored.records);
    println!("✓ Scored {} customers", records.len());

    let segment_summary = rfm::get_segment_summary(&records);
    print_summary_table("Segment", &segment_summary);
    export::write_rfm_records(&out_dir.join("rfm_analysis.csv"), &records)?;
    export::write_summary(&out_dir.join("segment_summary.csv"), "Segment", &segment_summary)?;

    println!("\n=== Customer Clustering (K-Means) ===");
    let config = KMeansConfig {
        n_restarts: args.restarts,
        max_iterations: args.max_iters,
        tolerance: args.tolerance,
        seed: args.seed,
    };

    let features = cluster::prepare_features(&records, !args.no_log_transform)?;
    let k_rows = cluster::find_optimal_k(&features, args.parse_k_range()?, &config)?;
    if args.verbose {
        println!("  k    inertia    silhouette");
        for row in &k_rows {
            println!("  {:<4} {:<10.4} {:.4}", row.k, row.inertia, row.silhouette);
        }
    }
    export::write_k_selection(&out_dir.join("k_selection.csv"), &k_rows)?;

    let model = cluster::fit(&features, args.clusters, &config)?;
    let records = cluster::assign_clusters(records, &model)?;
    println!("✓ Fitted {} clusters (inertia {:.2})", model.n_clusters, model.inertia);

    println!("\nCluster centroids (original units):");
    println!("  Cluster | Recency | Frequency | Monetary");
    println!("  --------|---------|-----------|----------");
    for (i, centroid) in model.centroids.outer_iter().enumerate() {
        println!(
            "  {:7} | {:7.1} | {:9.1} | {:8.1}",
            i, centroid[0], centroid[1], centroid[2]
        );
    }

    let cluster_summary = cluster::get_cluster_summary(&records)?;
    print_summary_table("Cluster", &cluster_summary);
    export::write_rfm_records(&out_dir.join("customer_clusters.csv"), &records)?;
    export::write_summary(&out_dir.join("cluster_summary.csv"), "Cluster", &cluster_summary)?;

    if !args.no_plots {
        let scatter = out_dir.join("cluster_scatter.png");
        viz::create_cluster_scatter(&features, &model, scatter.to_string_lossy().as_ref())?;
        if !k_rows.is_empty() {
            let chart = out_dir.join("k_selection.png");
            viz::create_k_selection_chart(&k_rows, chart.to_string_lossy().as_ref())?;
        }
    }

    Ok(())
}

/// Cohort retention, independent of RFM scoring.
fn run_cohort_analysis(args: &Args, transactions: &[data::Transaction], out_dir: &Path) -> Result<()> {
    println!("\n=== Cohort Retention Analysis ===");

    let matrix = cohort::create_cohort_matrix(transactions)?;
    let n_cohorts = matrix.cohorts().count();
    println!("✓ Built {} cohorts over {} periods", n_cohorts, matrix.max_period() + 1);

    export::write_cohort_matrix(&out_dir.join("cohort_retention.csv"), &matrix)?;

    if !args.no_plots {
        let heatmap = out_dir.join("cohort_retention.png");
        viz::create_cohort_heatmap(&matrix, heatmap.to_string_lossy().as_ref())?;
    }

    Ok(())
}

fn print_summary_table(key_header: &str, rows: &[rfm::SummaryRow]) {
    println!("\n  {:<20} {:>6} {:>11} {:>9} {:>12} {:>6} {:>9}",
        key_header, "Count", "AvgRecency", "AvgFreq", "TotalRev", "Pct", "RevShare");
    for row in rows {
        println!(
            "  {:<20} {:>6} {:>11.2} {:>9.2} {:>12.2} {:>5.1}% {:>8.1}%",
            row.key,
            row.count,
            row.avg_recency,
            row.avg_frequency,
            row.total_revenue,
            row.percentage,
            row.revenue_share
        );
    }
}
