use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rail_ranking_service::models::parse_log_values;
use rail_ranking_service::{
    default_catalog, CategoryDescriptor, InventoryItem, RailConfig, RailPipeline,
};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Captured state to evaluate offline
#[derive(Debug, Deserialize)]
struct Snapshot {
    /// Evaluation time; defaults to the current time
    #[serde(default)]
    now: Option<DateTime<Utc>>,
    #[serde(default)]
    interactions: Vec<serde_json::Value>,
    #[serde(default)]
    catalog: Option<Vec<CategoryDescriptor>>,
    #[serde(default)]
    inventory: HashMap<String, Vec<InventoryItem>>,
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: rail-ranking-service <snapshot.json>");
    };

    let config = RailConfig::from_env().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load rail config from environment, using defaults");
        RailConfig::default()
    });

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read snapshot {}", path))?;
    let snapshot: Snapshot =
        serde_json::from_str(&raw).with_context(|| format!("Failed to decode snapshot {}", path))?;

    let now = snapshot.now.unwrap_or_else(Utc::now);
    let catalog = snapshot.catalog.unwrap_or_else(default_catalog);
    let log = parse_log_values(snapshot.interactions);

    info!(
        path = %path,
        interactions = log.len(),
        skipped = log.skipped,
        categories = catalog.len(),
        "Evaluating snapshot"
    );

    let pipeline = RailPipeline::new(&config, catalog);
    let rail_set = pipeline.compute(&log, &snapshot.inventory, now);

    let output =
        serde_json::to_string_pretty(&rail_set).context("Failed to encode rail set")?;
    println!("{}", output);

    Ok(())
}
