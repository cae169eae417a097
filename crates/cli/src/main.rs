use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hollowbrook_config::EngineConfig;
use hollowbrook_engine::{ObserverApi, VillageEngine};
use hollowbrook_llm::{Compactor, Interpreter, KeywordInterpreter, LlmProvider, ScriptedProvider};

#[derive(Debug, Parser)]
#[command(name = "hollowbrook", version, about = "An event-sourced village of LLM agents")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "hollowbrook.toml")]
    config: String,

    /// Override the village data directory.
    #[arg(long)]
    village_root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a fresh village with the default locations and residents.
    Init,
    /// Run the simulation loop.
    Run {
        /// Number of ticks to run (unlimited when omitted).
        #[arg(long)]
        ticks: Option<u64>,
    },
    /// Print the current village state.
    Status,
    /// Print recent events from the log, newest last.
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn build_engine(config: EngineConfig) -> Result<VillageEngine> {
    // The scripted provider stands in where no model transport is wired up;
    // it keeps sessions, tools, and compaction flowing end to end.
    let provider = Arc::new(ScriptedProvider::new());
    VillageEngine::new(
        config.village.root.clone(),
        config,
        Arc::clone(&provider) as Arc<dyn LlmProvider>,
        provider as Arc<dyn Compactor>,
        Arc::new(KeywordInterpreter) as Arc<dyn Interpreter>,
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = EngineConfig::load_from(&cli.config)?;
    if let Some(root) = &cli.village_root {
        config.village.root = root.clone();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone())),
        )
        .init();

    match cli.command {
        Commands::Init => {
            let mut engine = build_engine(config)?;
            if engine.recover()? {
                bail!("village already exists at {}", engine.village_root().display());
            }
            engine.initialize_default()?;
            info!(root = %engine.village_root().display(), "village created");
            Ok(())
        }

        Commands::Run { ticks } => {
            let mut engine = build_engine(config)?;
            if !engine.recover()? {
                engine.initialize_default()?;
            }
            engine.on_event(|event| {
                info!(kind = event.kind_name(), tick = event.tick, "event");
            });
            engine.run(ticks).await?;
            engine.shutdown().await
        }

        Commands::Status => {
            let mut engine = build_engine(config)?;
            if !engine.recover()? {
                bail!("no village found - run `hollowbrook init` first");
            }
            let snapshot = ObserverApi::new(&mut engine).get_village_snapshot()?;
            println!(
                "tick {} | day {} | {} {} | weather {}",
                snapshot.tick,
                snapshot.time.day_number,
                snapshot.time.clock_time,
                snapshot.time.time_of_day,
                snapshot.weather
            );
            for agent in &snapshot.agents {
                println!(
                    "  {:<10} {:<12} mood={:<12} energy={:<3} {}{}{}",
                    agent.name,
                    agent.location,
                    agent.mood,
                    agent.energy,
                    if agent.is_sleeping { "asleep " } else { "" },
                    if agent.in_conversation { "talking " } else { "" },
                    if agent.has_pending_invite { "invited" } else { "" },
                );
            }
            for conv in &snapshot.conversations {
                println!(
                    "  conversation {} at {} ({}): {} turns, {}",
                    conv.id,
                    conv.location,
                    conv.privacy,
                    conv.turn_count,
                    conv.participants.join(", ")
                );
            }
            Ok(())
        }

        Commands::Events { limit } => {
            let mut engine = build_engine(config)?;
            if !engine.recover()? {
                bail!("no village found - run `hollowbrook init` first");
            }
            for event in engine.recent_events(limit, None, 0)? {
                println!("{}", serde_json::to_string(&event)?);
            }
            Ok(())
        }
    }
}
