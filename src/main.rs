// ABOUTME: CLI entry point for property-registry
// ABOUTME: Parses commands and routes to registry, processor and query handlers

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use property_registry::config::Settings;
use property_registry::fingerprint::generate_id_with_source;
use property_registry::processor::{self, IncrementalProcessor};
use property_registry::{QueryEngine, RegistryStore};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "property-registry")]
#[command(about = "Track new and changed real-estate listings across scrape runs", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    /// Path to a config.toml (defaults to the per-user config file if present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Registry file to use instead of the configured one
    #[arg(long, global = true, value_name = "PATH", env = "PROPERTY_REGISTRY_PATH")]
    registry: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a batch of scraped listings and emit new/updated artifacts
    Process {
        /// JSON list of records, {"properties": [...]}, or a single record
        input: PathBuf,
        /// Directory for new_properties_*.json and updated_properties_*.json
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// List listings with a logged update in the last N days
    Recent {
        /// Window in days (defaults to the configured window)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Show the registry entry for one identity
    Show {
        id: String,
    },
    /// Print registry statistics
    Stats,
    /// Print the identity of every record in an input file without registering it
    Fingerprint {
        input: PathBuf,
    },
}

#[derive(Serialize)]
struct FingerprintRow {
    index: usize,
    id: String,
    source: &'static str,
    url: Option<serde_json::Value>,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", rendered);
    Ok(())
}

fn open_store(settings: &Settings) -> anyhow::Result<RegistryStore> {
    RegistryStore::load(&settings.registry_path).with_context(|| {
        format!(
            "Failed to open registry {}",
            settings.registry_path.display()
        )
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    // Logs go to stderr; stdout carries only JSON results.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let output_override = match &cli.command {
        Commands::Process { output_dir, .. } => output_dir.clone(),
        _ => None,
    };
    let settings = Settings::resolve(cli.config.as_deref(), cli.registry, output_override)?;
    tracing::debug!("Resolved settings: {:?}", settings);

    match cli.command {
        Commands::Process { input, .. } => {
            let mut store = open_store(&settings)?;
            let outcome =
                IncrementalProcessor::new(&mut store, &settings.output_dir).process(&input);
            print_json(&outcome)?;
            if !outcome.is_success() {
                bail!("Incremental update from {} failed", input.display());
            }
            Ok(())
        }
        Commands::Recent { days } => {
            let store = open_store(&settings)?;
            let days = days.unwrap_or(settings.default_window_days);
            let recent = QueryEngine::new(store.registry()).recently_changed(days);
            print_json(&recent)
        }
        Commands::Show { id } => {
            let store = open_store(&settings)?;
            let Some(entry) = QueryEngine::new(store.registry()).lookup(&id) else {
                bail!("No property with id {} in the registry", id);
            };
            print_json(entry)
        }
        Commands::Stats => {
            let store = open_store(&settings)?;
            print_json(&QueryEngine::new(store.registry()).stats())
        }
        Commands::Fingerprint { input } => {
            let records = processor::read_input(&input)?;
            let rows: Vec<FingerprintRow> = records
                .iter()
                .enumerate()
                .map(|(index, record)| {
                    let (id, source) = generate_id_with_source(record);
                    FingerprintRow {
                        index,
                        id,
                        source: source.as_str(),
                        url: record.url.clone(),
                    }
                })
                .collect();
            print_json(&rows)
        }
    }
}
