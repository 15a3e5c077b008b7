mod agents;
mod config;

use clap::{Parser, Subcommand};
use config::TaskweaveConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskweave_orchestrator::{Decomposer, Orchestrator, TaskDescription};
use taskweave_registry::AgentRegistry;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "taskweave", about = "Taskweave: DAG task orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "taskweave.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decompose and execute a task description (JSON)
    Run {
        /// Path to the task description
        task: PathBuf,
        /// Pretty-print the execution result
        #[arg(long)]
        pretty: bool,
    },
    /// Show generations and removed edges without executing
    Plan {
        /// Path to the task description
        task: PathBuf,
    },
    /// List configured agents
    Agents,
}

async fn read_task(path: &Path) -> anyhow::Result<TaskDescription> {
    let source = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read task file '{}': {}", path.display(), e))?;
    Ok(TaskDescription::from_json_str(&source)?)
}

fn print_json(value: &impl serde::Serialize, pretty: bool) -> anyhow::Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{out}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = TaskweaveConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Run { task, pretty } => {
            let description = read_task(&task).await?;

            let registry = Arc::new(AgentRegistry::new());
            agents::register_demo_agents(&registry, &config.agents)?;
            let orchestrator = Arc::new(Orchestrator::new(registry, config.orchestrator)?);

            let execution_id = Uuid::new_v4();
            let canceller = orchestrator.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!(execution = %execution_id, "Interrupted, cancelling");
                    canceller.cancel(execution_id);
                }
            });

            let result = orchestrator
                .run_task_with_id(execution_id, &description)
                .await?;
            print_json(&result, pretty)?;

            info!(
                execution = %execution_id,
                status = %result.status,
                success_rate = result.metrics.success_rate,
                "Done"
            );
            if !result.is_completed() {
                std::process::exit(1);
            }
        }
        Commands::Plan { task } => {
            let description = read_task(&task).await?;
            let plan = Decomposer::new(0).plan(&description)?;
            print_json(&plan, true)?;
        }
        Commands::Agents => {
            if config.agents.is_empty() {
                println!("No agents configured.");
                println!("Declare agents in {} under [[agents]]", cli.config.display());
            } else {
                let registry = AgentRegistry::new();
                agents::register_demo_agents(&registry, &config.agents)?;
                println!("Configured agents:");
                for desc in registry.list_descriptors() {
                    let state = if registry.is_available(&desc.id) {
                        "available"
                    } else {
                        "disabled"
                    };
                    println!(
                        "  {} (affinity {}, {}): {}",
                        desc.id,
                        desc.affinity,
                        state,
                        desc.capabilities.join(", ")
                    );
                    if !desc.description.is_empty() {
                        println!("    {}", desc.description);
                    }
                }
                println!("\nTotal: {} agent(s)", registry.agent_count());
            }
        }
    }

    Ok(())
}
