//! evoscope CLI: inspect experiments from the terminal

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use evoscope::model::ChangeEvent;
use evoscope::reader::{ProgramQuery, SortDirection, SortKey};
use evoscope::{ChangeEngine, Config, ExperimentManager, FormatRegistry};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "evoscope", about = "Inspect evolutionary program-synthesis runs")]
#[command(version)]
struct Cli {
    /// Directory to scan for experiments
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// YAML configuration file
    #[arg(long, global = true, env = "EVOSCOPE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered experiments
    Scan {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the metrics summary of one experiment
    Summary {
        /// Experiment id (see `scan`)
        id: String,
    },

    /// List programs of one experiment
    Programs {
        /// Experiment id
        id: String,
        /// Sort key: generation, score, timestamp, complexity, island, children_count
        #[arg(long, default_value = "score")]
        sort: String,
        /// Sort ascending instead of descending
        #[arg(long)]
        asc: bool,
        /// Page number, starting at 1
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Page size (clamped to the configured maximum)
        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Print the best path of one experiment's lineage
    Lineage {
        /// Experiment id
        id: String,
        /// Restrict to the subtree under this program
        #[arg(long)]
        from: Option<String>,
    },

    /// Stream change events as JSON lines until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let registry = Arc::new(FormatRegistry::with_builtin_formats());

    match cli.command {
        Commands::Scan { json } => {
            let manager = ExperimentManager::new(registry, config);
            manager.scan();
            let experiments = manager.list_experiments();
            if json {
                println!("{}", serde_json::to_string_pretty(&experiments)?);
            } else {
                for e in experiments {
                    println!(
                        "{:<48} {:<14} {:<10} {:>6} programs  best {:.4}",
                        e.id,
                        e.framework.as_str(),
                        format!("{:?}", e.status).to_lowercase(),
                        e.total_programs,
                        e.best_score
                    );
                }
            }
        }
        Commands::Summary { id } => {
            let manager = scanned(registry, config);
            let reader = manager.reader(&id).with_context(|| format!("unknown experiment {id}"))?;
            println!("{}", serde_json::to_string_pretty(&reader.metrics_summary()?)?);
        }
        Commands::Programs {
            id,
            sort,
            asc,
            page,
            page_size,
        } => {
            let pagination = config.pagination(page, page_size);
            let manager = scanned(registry, config);
            let reader = manager.reader(&id).with_context(|| format!("unknown experiment {id}"))?;
            let direction = if asc {
                SortDirection::Ascending
            } else {
                SortDirection::Descending
            };
            let query = ProgramQuery::default()
                .sort_by(SortKey::from_name(&sort))
                .direction(direction)
                .page(pagination.page, pagination.page_size);
            let result = reader.list_programs(&query)?;
            println!("{} programs match", result.total);
            for p in result.items {
                println!(
                    "{:<40} gen {:>4} island {:>4} score {:.4} children {}",
                    p.id,
                    p.generation,
                    p.island_id.map_or_else(|| "-".to_string(), |i| i.to_string()),
                    p.score,
                    p.children_count
                );
            }
        }
        Commands::Lineage { id, from } => {
            let manager = scanned(registry, config);
            let reader = manager.reader(&id).with_context(|| format!("unknown experiment {id}"))?;
            let tree = reader.lineage(from.as_deref())?;
            println!("{} nodes, {} roots", tree.nodes.len(), tree.root_ids.len());
            for (depth, node_id) in tree.best_path.iter().enumerate() {
                if let Some(node) = tree.nodes.get(node_id) {
                    println!("{}{} (gen {}, score {:.4})", "  ".repeat(depth), node.id, node.generation, node.score);
                }
            }
        }
        Commands::Watch => watch(registry, config).await?,
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => Config::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    let mut config = config.with_env_overrides()?;
    if let Some(root) = &cli.root {
        config.scan_root.clone_from(root);
    }
    Ok(config)
}

fn scanned(registry: Arc<FormatRegistry>, config: Config) -> ExperimentManager {
    let manager = ExperimentManager::new(registry, config);
    manager.scan();
    manager
}

async fn watch(registry: Arc<FormatRegistry>, config: Config) -> Result<()> {
    let engine = ChangeEngine::from_config(&config);
    engine.on_change(|event: &ChangeEvent| {
        println!("{}", serde_json::to_string(event)?);
        Ok(())
    });

    let manager = Arc::new(ExperimentManager::new(registry, config).with_change_engine(engine.clone()));
    let added = manager.scan();
    engine.start()?;
    let rescan = manager.spawn_rescan()?;
    info!(experiments = added.len(), "Watching; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    rescan.stop().await;
    engine.stop().await;
    Ok(())
}
