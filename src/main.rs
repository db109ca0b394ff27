use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use weir_core::config::AppConfig;
use weir_core::lifecycle::{self, ActionOutcome, NodeAction};
use weir_core::node::{Node, NodeStatus};
use weir_exec::{JobOutcome, JobRunner};
use weir_store::LocalStore;

#[derive(Parser)]
#[command(name = "weir", version, about = "Node job execution engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weir.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a node document and persist produced artifacts
    Run {
        /// Node document (JSON)
        node: PathBuf,
        /// Write the updated document here instead of in place
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Render the command script without executing anything
    Preview {
        /// Node document (JSON)
        node: PathBuf,
    },
    /// Report structural validation errors
    Validate {
        /// Node document (JSON)
        node: PathBuf,
    },
    /// Apply a lifecycle action (SAVE, APPROVE, CREATE_RUN, DEPRECATE, ...)
    Action {
        /// Node document (JSON)
        node: PathBuf,
        /// Action name, e.g. APPROVE
        action: String,
        /// Where to write a created run document (CREATE_RUN only)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print a starter node document for the command executor kind
    New,
    /// Show effective configuration
    Config,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn load_node(path: &Path) -> anyhow::Result<Node> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn save_node(node: &Node, path: &Path) -> anyhow::Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(node)?)?;
    Ok(())
}

fn parse_action(name: &str) -> anyhow::Result<NodeAction> {
    let canonical = name.trim().to_uppercase();
    serde_json::from_value(serde_json::Value::String(canonical))
        .map_err(|_| anyhow::anyhow!("unknown action `{}`", name))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Run { node: path, out } => {
            let mut node = load_node(&path)?;
            let store = Arc::new(LocalStore::open(config.storage.root())?);
            let runner = JobRunner::new(store, &config)?;

            // Ctrl-C reaches the job's whole process group.
            let handle = runner.terminate_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, terminating job process group");
                    handle.terminate();
                }
            });

            let outcome = runner.run(&mut node).await?;
            node.node_status = match outcome {
                JobOutcome::Success => NodeStatus::Success,
                JobOutcome::Failed => NodeStatus::Failed,
            };
            save_node(&node, out.as_deref().unwrap_or(&path))?;
            println!("{}", node.node_status);
            if outcome == JobOutcome::Failed {
                std::process::exit(1);
            }
        }

        Commands::Preview { node: path } => {
            let node = load_node(&path)?;
            let store = Arc::new(LocalStore::open(config.storage.root())?);
            let runner = JobRunner::new(store, &config)?;
            print!("{}", runner.preview(&node).await?);
        }

        Commands::Validate { node: path } => {
            let node = load_node(&path)?;
            let errors = lifecycle::validate(&node);
            if errors.is_empty() {
                println!("OK");
            } else {
                for error in &errors {
                    println!("{}", error);
                }
                std::process::exit(1);
            }
        }

        Commands::Action {
            node: path,
            action,
            out,
        } => {
            let action = parse_action(&action)?;
            if action == NodeAction::PreviewCmd {
                anyhow::bail!("use `weir preview` for PREVIEW_CMD");
            }

            let mut node = load_node(&path)?;
            match lifecycle::apply_action(&mut node, action)? {
                ActionOutcome::Validated(errors) => {
                    if errors.is_empty() {
                        println!("OK");
                    } else {
                        for error in &errors {
                            println!("{}", error);
                        }
                        std::process::exit(1);
                    }
                }
                ActionOutcome::ValidationFailed(errors) => {
                    eprintln!("validation failed:");
                    for error in &errors {
                        eprintln!("  {}", error);
                    }
                    std::process::exit(1);
                }
                ActionOutcome::RunCreated(run) => {
                    let dest = out.unwrap_or_else(|| path.with_extension("run.json"));
                    save_node(&run, &dest)?;
                    println!("created run {} at {}", run.id, dest.display());
                }
                outcome => {
                    save_node(&node, &path)?;
                    println!("{} applied ({:?})", action, outcome);
                }
            }
        }

        Commands::New => {
            println!(
                "{}",
                serde_json::to_string_pretty(&Node::default_command_node())?
            );
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "weir", &mut std::io::stdout());
        }
    }

    Ok(())
}
