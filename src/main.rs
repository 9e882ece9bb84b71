//! Pod Composer
//!
//! Command line front end for the composition engine. Loads a pod inventory
//! into a fresh resource graph, then validates or composes node templates
//! against it using the in-memory device adapter, printing the results as
//! JSON.

use clap::{Parser, Subcommand};
use futures::future::join_all;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pod_composer::{
    ComposedNodeTemplate, ComposedNodeView, Composer, EngineConfig, EngineMetricsSnapshot,
    GraphStore, InMemoryDevices, ManagerDirectoryRef, PodInventory, PoolSummary, Result,
    StaticDirectory, TemplateValidator,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Pod Composer - allocate and assemble composed nodes from pooled hardware
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (YAML)
    #[arg(long, env = "POD_COMPOSER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Allocate (and by default assemble) one node per template
    Compose {
        /// Pod inventory (YAML or JSON)
        #[arg(long, env = "POD_INVENTORY")]
        inventory: PathBuf,

        /// Node template files, composed concurrently
        #[arg(long = "template", required = true)]
        templates: Vec<PathBuf>,

        /// Stop after allocation
        #[arg(long)]
        skip_assembly: bool,
    },

    /// Check templates against the pool without claiming anything
    Validate {
        #[arg(long, env = "POD_INVENTORY")]
        inventory: PathBuf,

        #[arg(long = "template", required = true)]
        templates: Vec<PathBuf>,
    },

    /// Print pool usage for an inventory
    Pool {
        #[arg(long, env = "POD_INVENTORY")]
        inventory: PathBuf,
    },
}

// =============================================================================
// Output
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TemplateOutcome {
    template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    node: Option<ComposedNodeView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ComposeReport {
    outcomes: Vec<TemplateOutcome>,
    pool: PoolSummary,
    metrics: EngineMetricsSnapshot,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("Starting Pod Composer v{}", pod_composer::VERSION);

    let config = match &args.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };

    match args.command {
        Command::Compose {
            inventory,
            templates,
            skip_assembly,
        } => {
            let composer = load_composer(config, &inventory)?;
            let report = compose_all(&composer, &templates, skip_assembly).await?;
            print_json(&report)
        }
        Command::Validate {
            inventory,
            templates,
        } => {
            let graph = load_graph(&config, &inventory)?;
            let validator = TemplateValidator::new(graph);
            let mut outcomes = Vec::with_capacity(templates.len());
            for path in &templates {
                let template = ComposedNodeTemplate::from_path(path)?;
                let error = validator.validate(&template).err().map(|e| e.to_string());
                outcomes.push(TemplateOutcome {
                    template: path.display().to_string(),
                    node: None,
                    error,
                });
            }
            print_json(&outcomes)
        }
        Command::Pool { inventory } => {
            let composer = load_composer(config, &inventory)?;
            print_json(&composer.pool_summary())
        }
    }
}

fn load_graph(config: &EngineConfig, inventory: &Path) -> Result<Arc<GraphStore>> {
    let graph = GraphStore::with_event_capacity(config.event_channel_capacity);
    let loaded = PodInventory::from_path(inventory)?.load_into(&graph)?;
    info!("Loaded {} entities from {}", loaded, inventory.display());
    Ok(graph)
}

fn load_composer(config: EngineConfig, inventory: &Path) -> Result<Arc<Composer>> {
    let graph = load_graph(&config, inventory)?;
    let devices = InMemoryDevices::new("in-memory");
    let directory: ManagerDirectoryRef = Arc::new(StaticDirectory::with_fallback(devices));
    Composer::new(config, graph, directory)
}

async fn compose_all(
    composer: &Arc<Composer>,
    paths: &[PathBuf],
    skip_assembly: bool,
) -> Result<ComposeReport> {
    let mut templates = Vec::with_capacity(paths.len());
    for path in paths {
        templates.push((path.display().to_string(), ComposedNodeTemplate::from_path(path)?));
    }

    let runs = templates.into_iter().map(|(label, template)| {
        let composer = composer.clone();
        async move {
            let result = if skip_assembly {
                composer.create_node(&template)
            } else {
                composer.compose(&template).await
            };
            match result.and_then(|node| composer.node(node)) {
                Ok(view) => TemplateOutcome {
                    template: label,
                    node: Some(view),
                    error: None,
                },
                Err(e) => {
                    error!("Template {} failed: {}", label, e);
                    TemplateOutcome {
                        template: label,
                        node: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        }
    });

    let outcomes = join_all(runs).await;
    Ok(ComposeReport {
        outcomes,
        pool: composer.pool_summary(),
        metrics: composer.metrics(),
    })
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so stdout stays parseable JSON
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
