//! CLI binary for driving Hookline runs locally or serving the HTTP API.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use hookline_agent::HttpAgent;
use hookline_engine::{RetryPolicy, RunCoordinator, RunEvent, StageOverride};
use hookline_store::ArtifactStore;
use hookline_types::{
    ArtifactId, AwarenessLevel, BranchId, BranchSettings, BrandId, Stage, StagePayload, UnitKey,
    UnitPath,
};

#[derive(Parser)]
#[command(name = "hookline", version, about = "Gated content-generation pipeline runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Storage root directory
    #[arg(long, global = true, default_value = ".hookline")]
    root: PathBuf,

    /// Brand slug to operate on
    #[arg(long, global = true, default_value = "default")]
    brand: String,

    /// Generation agent base URL
    #[arg(long, global = true, default_value = "http://127.0.0.1:8700")]
    agent_url: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and SSE event stream
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1:8780")]
        addr: std::net::SocketAddr,
    },

    /// Set the brand foundation from a JSON payload file
    Foundation {
        /// Path to a foundation payload JSON file
        file: PathBuf,
    },

    /// Manage branches
    Branch {
        #[command(subcommand)]
        command: BranchCommands,
    },

    /// Start a run on a branch (executes research, pauses at its gate)
    Run {
        branch: uuid::Uuid,
    },

    /// Continue a paused branch past its gate
    Continue {
        branch: uuid::Uuid,
        /// Replace the next stage's agent instructions for this segment
        #[arg(long)]
        instructions: Option<String>,
    },

    /// Record a hook selection while paused at the hooks gate
    Select {
        branch: uuid::Uuid,
        /// Awareness level of the unit (e.g. problem_aware)
        awareness: String,
        emotion: String,
        ordinal: u8,
        arm: u8,
        hook: u8,
        #[arg(long)]
        rationale: Option<String>,
    },

    /// Regenerate one artifact while paused
    Rerun {
        branch: uuid::Uuid,
        /// Stage of the artifact (e.g. drafting)
        stage: String,
        /// Unit path as JSON (e.g. '{"scope":"arm","unit":{...},"arm":1}');
        /// omit for branch-level artifacts
        #[arg(long)]
        path: Option<String>,
        /// Replace the agent instructions for this regeneration
        #[arg(long)]
        instructions: Option<String>,
    },

    /// Switch the working context to a branch (read-only)
    Switch {
        branch: uuid::Uuid,
    },

    /// Show a branch's gate state and stale artifacts
    Status {
        branch: uuid::Uuid,
    },
}

#[derive(Subcommand)]
enum BranchCommands {
    /// Create a branch
    Create {
        label: String,
        #[arg(long)]
        unit_count: Option<usize>,
        #[arg(long)]
        arms_per_unit: Option<u8>,
        #[arg(long)]
        hook_options: Option<u8>,
        #[arg(long)]
        max_parallel: Option<usize>,
    },
    /// List branches
    List,
    /// Delete a branch and everything under it
    Delete { branch: uuid::Uuid },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = ArtifactStore::new(&cli.root, BrandId::new(&cli.brand));
    let agent = {
        let mut agent = HttpAgent::new(&cli.agent_url).with_timeout(Duration::from_secs(180));
        if let Ok(key) = std::env::var("HOOKLINE_AGENT_KEY") {
            agent = agent.with_api_key(key);
        }
        Arc::new(agent)
    };
    let coordinator = Arc::new(RunCoordinator::new(store, agent, RetryPolicy::default()));

    match cli.command {
        Commands::Serve { addr } => {
            hookline_server::serve(addr, coordinator).await?;
        }
        Commands::Foundation { file } => {
            let raw = std::fs::read_to_string(&file)?;
            let payload: StagePayload = serde_json::from_str(&raw)?;
            coordinator.edit_foundation(payload).await?;
            println!("foundation updated for brand '{}'", cli.brand);
        }
        Commands::Branch { command } => match command {
            BranchCommands::Create {
                label,
                unit_count,
                arms_per_unit,
                hook_options,
                max_parallel,
            } => {
                let mut settings = BranchSettings::default();
                if let Some(n) = unit_count {
                    settings.unit_count = n;
                }
                if let Some(n) = arms_per_unit {
                    settings.arms_per_unit = n;
                }
                if let Some(n) = hook_options {
                    settings.hook_options = n;
                }
                if let Some(n) = max_parallel {
                    settings.max_parallel = n;
                }
                let branch = coordinator.create_branch(label, settings).await?;
                println!("created branch {} ({})", branch.id, branch.label);
            }
            BranchCommands::List => {
                for branch in coordinator.branches().list().await? {
                    println!(
                        "{}  {:<24} {:?}  created {}",
                        branch.id,
                        branch.label,
                        branch.status,
                        branch.created_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
            BranchCommands::Delete { branch } => {
                coordinator.delete_branch(BranchId(branch)).await?;
                println!("deleted branch {branch}");
            }
        },
        Commands::Run { branch } => {
            let state = coordinator.start_run(BranchId(branch)).await?;
            print_gate(&state);
        }
        Commands::Continue { branch, instructions } => {
            let overrides = StageOverride {
                instructions,
                agent: None,
            };
            let state = coordinator
                .continue_gate_with(BranchId(branch), overrides)
                .await?;
            print_gate(&state);
        }
        Commands::Select {
            branch,
            awareness,
            emotion,
            ordinal,
            arm,
            hook,
            rationale,
        } => {
            let awareness = parse_enum::<AwarenessLevel>(&awareness)?;
            let unit = UnitKey::new(awareness, emotion, ordinal);
            let id = coordinator
                .record_selection(BranchId(branch), unit, arm, hook, rationale)
                .await?;
            println!("recorded selection {id}");
        }
        Commands::Rerun {
            branch,
            stage,
            path,
            instructions,
        } => {
            let stage = parse_enum::<Stage>(&stage)?;
            let path = match path.as_deref() {
                None => UnitPath::Branch,
                Some(raw) => serde_json::from_str(raw)?,
            };
            let overrides = StageOverride {
                instructions,
                agent: None,
            };
            let report = coordinator
                .rerun_unit_with(BranchId(branch), ArtifactId::new(stage, path), overrides)
                .await?;
            println!(
                "rerun finished: {} completed, {} failed, ${:.4}",
                report.completed.len(),
                report.failed.len(),
                report.cost_usd
            );
        }
        Commands::Switch { branch } => {
            let (meta, sync) = coordinator.switch_branch(BranchId(branch)).await?;
            println!("switched to {} ({})", meta.id, meta.label);
            if let RunEvent::StateSync { gate, .. } = sync {
                print_gate(&gate);
            }
        }
        Commands::Status { branch } => {
            match coordinator.state_sync(BranchId(branch)).await? {
                RunEvent::StateSync {
                    gate,
                    completed,
                    stale,
                    total_cost_usd,
                    ..
                } => {
                    println!("phase:     {:?}", gate.phase);
                    println!("artifacts: {} completed", completed.len());
                    if let Some(stage) = gate.completed_stage {
                        println!("completed: {stage}");
                    }
                    if let Some(stage) = gate.next_stage {
                        println!("next:      {stage}");
                    }
                    if gate.selection_required {
                        println!("gate requires a hook selection before continuing");
                    }
                    println!("cost:      ${total_cost_usd:.4}");
                    if stale.is_empty() {
                        println!("stale:     none");
                    } else {
                        println!("stale:");
                        for id in stale {
                            println!("  {id}");
                        }
                    }
                }
                _ => unreachable!("state_sync returns a StateSync event"),
            }
        }
    }

    Ok(())
}

fn parse_enum<T: serde::de::DeserializeOwned>(raw: &str) -> anyhow::Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| anyhow::anyhow!("unrecognized value '{raw}'"))
}

fn print_gate(state: &hookline_types::GateState) {
    match (state.phase, state.completed_stage, state.next_stage) {
        (hookline_types::GatePhase::Paused, Some(done), Some(next)) => {
            if state.selection_required {
                println!("{done} complete; select hooks, then continue into {next}");
            } else {
                println!("{done} complete; paused before {next}");
            }
        }
        (hookline_types::GatePhase::Done, _, _) => println!("run complete"),
        (hookline_types::GatePhase::Aborted, _, _) => println!("run aborted"),
        (hookline_types::GatePhase::Failed, _, _) => println!("run failed"),
        _ => println!("{:?}", state.phase),
    }
}
