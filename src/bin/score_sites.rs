#!/usr/bin/env rust
//! Heritage Site Risk Scoring
//!
//! Runs one scoring pass over every site in the unesco_risk schema:
//! 1. Load and validate risk.toml (weights, radii, estimator parameters)
//! 2. Load sites and hazard observations (optionally inside [region])
//! 3. Attribute observations to their nearest site and join by radius
//! 4. Compute sub-scores, composite, isolation-forest flags and levels
//! 5. Upsert unesco_risk.risk_scores and urban feature densities
//!
//! Usage:
//!   cargo run --bin score_sites
//!
//! Options:
//!   --config PATH     Configuration file (default: risk.toml)
//!   --dry-run         Compute everything, write nothing
//!   --verbose         Per-item debug logging
//!   --json-logs       Log as JSON lines
//!   --buffers PATH    Write 5/10/25/50 km site rings as GeoJSON
//!   --report PATH     Write the full run report as JSON
//!
//! Environment:
//!   DATABASE_URL - PostgreSQL connection string

use heritage_risk::config::{DEFAULT_CONFIG_PATH, RiskConfig};
use heritage_risk::logging::{LogOptions, init_logging};
use heritage_risk::pipeline::{RiskPipeline, RunOptions};
use heritage_risk::repository::RiskRepository;
use heritage_risk::repository::postgres::PgRepository;
use std::env;
use std::fs;

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let config_path = arg_value(&args, "--config").unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let buffers_path = arg_value(&args, "--buffers");
    let report_path = arg_value(&args, "--report");
    let dry_run = args.iter().any(|a| a == "--dry-run");

    init_logging(LogOptions {
        verbose: args.iter().any(|a| a == "--verbose"),
        json: args.iter().any(|a| a == "--json-logs"),
    });

    println!("🏛️  Heritage Site Risk Scoring");
    println!("==============================\n");

    println!("⚙️  Loading configuration from {}...", config_path);
    let config = if config_path == DEFAULT_CONFIG_PATH {
        RiskConfig::load_default()?
    } else {
        RiskConfig::load(&config_path)?
    };
    let pipeline = RiskPipeline::new(config)?;
    let cfg = pipeline.config();
    println!("✓ Configuration valid:");
    println!(
        "  - Weights: urban {:.2}, climate {:.2}, seismic {:.2}, fire {:.2}, flood {:.2}, coastal {:.2}",
        cfg.weights.urban_density,
        cfg.weights.climate_anomaly,
        cfg.weights.seismic,
        cfg.weights.fire,
        cfg.weights.flood,
        cfg.weights.coastal
    );
    println!(
        "  - Isolation forest: {} trees, contamination {:.2}, seed {}",
        cfg.anomaly.n_estimators, cfg.anomaly.contamination, cfg.anomaly.seed
    );
    match cfg.region.bbox() {
        Some(b) => println!(
            "  - Region: {:.1}..{:.1}°E, {:.1}..{:.1}°N\n",
            b.min_lon, b.max_lon, b.min_lat, b.max_lat
        ),
        None => println!("  - Region: unrestricted\n"),
    }

    println!("📊 Connecting to database...");
    let mut repo = PgRepository::connect().unwrap_or_else(|e| {
        eprintln!("\n{}\n", e);
        std::process::exit(1);
    });
    println!("✓ Connected\n");

    if let Some(path) = &buffers_path {
        println!("🗺️  Writing reporting rings to {}...", path);
        let sites = repo.load_sites(cfg.region.bbox().as_ref())?;
        let collection = pipeline.reporting_buffers(&sites);
        fs::write(path, serde_json::to_string_pretty(&collection)?)?;
        println!("✓ Rings written for {} sites\n", sites.len());
    }

    let mut options = RunOptions::now();
    if dry_run {
        println!("ℹ️  Dry run: nothing will be written\n");
        options = options.dry_run();
    }

    println!("🔍 Scoring sites...");
    let report = pipeline.run(&mut repo, &options)?;
    println!("✓ Scored {} sites\n", report.profiles.len());

    if let Some(path) = &report_path {
        fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!("✓ Report written to {}\n", path);
    }

    println!("{}", "=".repeat(50));
    println!("Summary:");
    for (level, count) in &report.level_counts {
        println!("  {:<9} {}", level.as_str(), count);
    }
    println!("  Anomalies: {}", report.anomaly_count);
    if report.unprojectable_sites > 0 {
        println!("  ⚠ Sites outside the projection: {}", report.unprojectable_sites);
    }
    for (category, skipped) in &report.skipped_observations {
        if *skipped > 0 {
            println!("  ⚠ {} observations skipped (bad geometry): {}", category, skipped);
        }
    }
    if !report.dry_run {
        println!("  Profiles written: {}", report.persisted_profiles);
        println!("  Attributions written: {}", report.persisted_attributions);
        println!("  Feature densities written: {}", report.persisted_densities);
    }
    println!("{}", "=".repeat(50));

    let top = report.top_anomalies(10);
    if !top.is_empty() {
        println!("\nMost anomalous sites:");
        for p in top {
            println!(
                "  site {:>5}  score {:+.4}  composite {:.3}  {}",
                p.site_id, p.anomaly_score, p.composite, p.level
            );
        }
    }

    Ok(())
}
