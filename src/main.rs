//! Jakarta Environmental Map
//!
//! CLI commands:
//! - gui: Native map viewer
//! - serve: Start HTTP server
//! - list: List layers, or the records of one layer
//! - fetch: Download datasets for local fallback hosting
//! - stats: Region summary

mod classify;
mod config;
mod error;
mod fetch;
mod geometry;
mod gui;
mod layer;
mod logging;
mod map;
mod page;
mod panel;
mod region;
mod render;
mod selection;
mod server;
mod stats;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Config, LayerConfig, Secrets};
use crate::fetch::{DatasetFetcher, FetchPolicy};
use crate::page::MapPage;
use crate::region::Region;

#[derive(Parser)]
#[command(name = "jakarta_envmap")]
#[command(about = "Environmental and public-health map layers for Jakarta")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to layers.yaml config
    #[arg(short, long, default_value = "layers.yaml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch native map viewer
    Gui,

    /// Start HTTP server
    Serve {
        /// Port to listen on (defaults to PORT from .env)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List layers, or the records of one layer
    List {
        /// Load this layer and list its records
        #[arg(short, long)]
        layer: Option<String>,

        /// Case-insensitive filter on name, address and type
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Download datasets into DATA_DIR for local fallback
    Fetch {
        /// Download a specific layer by ID
        #[arg(long)]
        layer: Option<String>,

        /// Download all layers
        #[arg(long)]
        all: bool,
    },

    /// Summary of one region across all layers
    Stats {
        /// "East Jakarta", "Jakarta Timur", "timur", ...
        region: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let secrets = Secrets::load();

    // Initialize logging first
    logging::init_logging(&secrets.log_dir)?;
    tracing::info!("Jakarta Environmental Map starting up");

    let cli = Cli::parse();
    tracing::debug!("CLI args parsed: config={:?}", cli.config);

    let config = if cli.config.exists() {
        tracing::info!("Loading config from {:?}", cli.config);
        Config::load(&cli.config).with_context(|| format!("Failed to load {:?}", cli.config))?
    } else {
        tracing::warn!("Config file not found: {:?}, using built-in Jakarta layers", cli.config);
        Config::jakarta_default()
    };
    tracing::info!("Config loaded: {} layers", config.layers.len());

    let fetcher = Arc::new(DatasetFetcher::new(FetchPolicy::from(&config.fetch))?);

    match cli.command {
        Commands::Gui => {
            tracing::info!("Launching native map viewer");
            gui::run_viewer(config, fetcher)?;
        }

        Commands::Serve { port } => {
            let state = server::AppState::new(config, fetcher);
            server::serve(state, &secrets.data_dir, port.unwrap_or(secrets.port)).await?;
        }

        Commands::List { layer, query } => match layer {
            Some(id) => list_records(&config, &fetcher, &id, query.as_deref().unwrap_or("")).await?,
            None => list_layers(&config),
        },

        Commands::Fetch { layer, all } => {
            let data_dir = PathBuf::from(&secrets.data_dir);

            if all {
                fetch_all(&config, &fetcher, &data_dir).await?;
            } else if let Some(id) = layer {
                let layer = config
                    .get_layer(&id)
                    .ok_or_else(|| anyhow::anyhow!("Layer not found: {}", id))?;
                fetch_layer(&fetcher, layer, &data_dir).await?;
            } else {
                println!("Specify --layer or --all");
            }
        }

        Commands::Stats { region } => {
            show_stats(&config, &fetcher, &region).await?;
        }
    }

    Ok(())
}

/// List configured layers
fn list_layers(config: &Config) {
    println!("Available layers ({}):", config.layers.len());
    println!();
    for layer in &config.layers {
        println!("  - {} [{}] ({})", layer.title, layer.id, layer.kind.label());
        println!("      {}", layer.url);
        if let Some(fallback) = &layer.fallback_url {
            println!("      fallback: {}", fallback);
        }
    }
}

/// Load one layer and print its panel list
async fn list_records(config: &Config, fetcher: &DatasetFetcher, id: &str, query: &str) -> anyhow::Result<()> {
    let mut page = MapPage::new(config);
    let state = page.activate(id, fetcher).await?;
    if let Some(err) = &state.error {
        anyhow::bail!("Layer '{}' failed: {}", id, err);
    }

    let pipeline = page.pipeline(id)?;
    let entries = panel::entries(pipeline.config(), pipeline.state(), pipeline.renderer().style(), query);
    let state = pipeline.state();
    println!(
        "{} ({} of {} records{})",
        pipeline.config().title,
        entries.len(),
        state.records.len(),
        if state.from_fallback { ", local fallback" } else { "" }
    );
    if let Some(fetched_at) = state.fetched_at {
        println!("Fetched {} from {}", fetched_at.format("%Y-%m-%d %H:%M:%S UTC"), state.source.as_deref().unwrap_or("?"));
    }
    if state.skipped > 0 {
        println!("Skipped {} invalid features", state.skipped);
    }
    println!();
    for entry in entries {
        println!("  {:<40} {:>22}  {}", entry.name, entry.metric_label, entry.category);
    }
    Ok(())
}

/// Download every layer's dataset
async fn fetch_all(config: &Config, fetcher: &DatasetFetcher, data_dir: &Path) -> anyhow::Result<()> {
    println!("Downloading {} layers to {:?}...", config.layers.len(), data_dir);
    println!();

    let mut failed = 0;
    for layer in &config.layers {
        if let Err(e) = fetch_layer(fetcher, layer, data_dir).await {
            println!("  [FAIL] {}: {}", layer.title, e);
            failed += 1;
        }
    }

    println!();
    println!("Download complete! ({} failed)", failed);
    Ok(())
}

/// Download a single layer's primary source into the data directory
async fn fetch_layer(fetcher: &DatasetFetcher, layer: &LayerConfig, data_dir: &Path) -> anyhow::Result<()> {
    let file_name = layer
        .fallback_url
        .as_deref()
        .and_then(|f| Path::new(f).file_name())
        .map(|f| f.to_os_string())
        .unwrap_or_else(|| format!("{}.json", layer.id).into());

    let dest = fetcher.download(&layer.url, &data_dir.join(file_name)).await?;
    println!("  [OK] {} -> {:?}", layer.title, dest);
    Ok(())
}

/// Load every layer and print what each says about a region
async fn show_stats(config: &Config, fetcher: &DatasetFetcher, name: &str) -> anyhow::Result<()> {
    let region = Region::from_name(name).ok_or_else(|| anyhow::anyhow!("Unknown region: {}", name))?;

    let mut page = MapPage::new(config);
    for layer in &config.layers {
        let state = page.activate(&layer.id, fetcher).await?;
        if let Some(err) = &state.error {
            println!("  [SKIP] {}: {}", layer.title, err);
        }
    }

    let summary = page.region_summary(region);
    let stats = &summary.stats;
    println!("{} ({})", region.english(), summary.kota);
    println!("  Risk score:          {}/100", stats.risk_score);
    println!("  AQI:                 {}", stats.aqi_value);
    println!("  Monitoring stations: {}", stats.monitoring_stations);
    println!("  Population exposed:  {}", stats.population_exposed);
    println!("  Alert level:         {:?}", stats.alert_level);
    println!("  Trend:               {:?}", stats.trend);
    println!();

    for layer in &summary.layers {
        let kind = page.pipeline(&layer.layer)?.config().kind;
        println!("## {}", layer.layer);
        if layer.records.is_empty() {
            println!("  (no records)");
        }
        for record in &layer.records {
            println!("  {} - {}", record.name, panel::format_metric(kind, record.metric));
        }
    }
    Ok(())
}
