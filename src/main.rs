use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use weft_agent::{Orchestrator, PendingQuestion, RunOutcome, ScriptedAgent};
use weft_core::config::AppConfig;
use weft_core::event::next_event;
use weft_core::graph::TaskGraph;
use weft_core::task::NodeId;
use weft_core::types::RunContext;

#[derive(Parser)]
#[command(name = "weft", version, about = "Task-graph engine for multi-agent orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml")]
    config: PathBuf,

    /// Run to operate on; reuse it to resume after answering questions
    #[arg(short, long, env = "WEFT_RUN_ID", default_value = "default")]
    run_id: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task with an agent, resuming a matching unfinished run
    Run {
        /// Agent that owns the root task
        #[arg(short, long)]
        agent: String,
        /// Who started the task
        #[arg(long)]
        initiator: Option<String>,
        /// The task text
        #[arg(trailing_var_arg = true, required = true)]
        task: Vec<String>,
    },
    /// List questions waiting for a human answer
    Pending,
    /// Answer a pending question
    Answer {
        /// Human node id (as shown by `pending`)
        node: NodeId,
        /// The answer text
        #[arg(trailing_var_arg = true, required = true)]
        text: Vec<String>,
    },
    /// Print every node in the run
    Show,
    /// Cancel a node and everything beneath it
    Cancel {
        node: NodeId,
    },
    /// List stored runs
    Runs,
    /// Delete a stored run
    Forget {
        /// Run to delete
        run: String,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "weft", &mut std::io::stdout());
        return Ok(());
    }

    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        AppConfig::default()
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if !cli.config.exists() {
        warn!(path = %cli.config.display(), "config file not found, using defaults");
    }

    let store = weft_store::open_store(&config.store)?;
    let agent = Arc::new(ScriptedAgent::new(config.script.clone()));
    let orchestrator = Orchestrator::from_config(&config, agent, store.clone())?;
    let ctx = RunContext::with_id(&cli.run_id);

    match cli.command {
        Commands::Run {
            agent,
            initiator,
            task,
        } => {
            let task = task.join(" ");
            info!(run_id = %ctx, agent = %agent, "starting run");

            let mut rx = orchestrator.event_bus().subscribe();
            let logger = tokio::spawn(async move {
                while let Some(event) = next_event(&mut rx).await {
                    debug!(?event, "engine event");
                    if event.ends_run() {
                        break;
                    }
                }
            });

            match orchestrator
                .run(&ctx, &task, &agent, initiator.as_deref())
                .await
            {
                Ok(outcome) => {
                    logger.await.ok();
                    print_outcome(&outcome);
                }
                Err(e) => {
                    logger.abort();
                    return Err(e.into());
                }
            }
        }
        Commands::Pending => {
            let pending = orchestrator.pending_questions(&ctx).await?;
            if pending.is_empty() {
                println!("No questions waiting in run '{}'.", ctx);
            }
            for question in &pending {
                print_question(question);
            }
        }
        Commands::Answer { node, text } => {
            orchestrator.complete_task(&ctx, node, text.join(" ")).await?;
            println!("Answered #{}. Re-run the task to continue.", node);
        }
        Commands::Show => {
            let graph = orchestrator.load_graph(&ctx).await?;
            print_graph(&graph);
        }
        Commands::Cancel { node } => {
            let cancelled = orchestrator.cancel(&ctx, node).await?;
            let ids: Vec<String> = cancelled.iter().map(|id| format!("#{}", id)).collect();
            println!("Cancelled {}", ids.join(", "));
        }
        Commands::Runs => {
            for run_id in store.list_runs().await? {
                println!("{}", run_id);
            }
        }
        Commands::Forget { run } => {
            if orchestrator.forget(&RunContext::with_id(&run)).await? {
                println!("Forgot run '{}'.", run);
            } else {
                println!("No stored run '{}'.", run);
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    if outcome.is_suspended() {
        println!(
            "Run '{}' suspended at root #{}; waiting on {} question(s):",
            outcome.run_id,
            outcome.root_id,
            outcome.pending.len()
        );
        for question in &outcome.pending {
            print_question(question);
        }
        return;
    }

    let label = if outcome.is_failure() { "failed" } else { "completed" };
    println!("Run '{}' {} at root #{}.", outcome.run_id, label, outcome.root_id);
    if let Some(ref result) = outcome.result {
        let text = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
        println!("{}", text);
    }
}

fn print_question(question: &PendingQuestion) {
    match question.asked_by {
        Some(parent) => println!("  #{} (asked by #{}): {}", question.node_id, parent, question.text()),
        None => println!("  #{}: {}", question.node_id, question.text()),
    }
    println!("    answer with: weft answer {} <text>", question.node_id);
}

fn print_graph(graph: &TaskGraph) {
    if graph.is_empty() {
        println!("(empty)");
        return;
    }
    println!(
        "{:<5} {:<20} {:<10} {:<7} {:<8} payload",
        "id", "agent", "status", "parent", "blocked"
    );
    for node in graph.nodes() {
        let parent = node.parent_id.map(|p| format!("#{}", p)).unwrap_or_default();
        let blocked = node.blocked_on.map(|b| format!("#{}", b)).unwrap_or_default();
        println!(
            "#{:<4} {:<20} {:<10} {:<7} {:<8} {}",
            node.id.0,
            truncate(&node.agent_id, 20),
            node.status.as_str(),
            parent,
            blocked,
            truncate(&node.payload_text(), 60)
        );
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
