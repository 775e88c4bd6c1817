//! CLI adapter (thin): argument parsing, config loading, and an optional
//! terminal pretty-printer. None of this is part of the core — it wires
//! the core's pieces together for interactive and demo use, with a
//! `Cli`/`Commands` shape reduced to the handful of flags the core
//! actually needs.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

use nightingale::config::Config;
use nightingale::domain::{Decision, IncidentEvent};
use nightingale::llm::LlmClient;
use nightingale::llm::cache::ResponseCache;
use nightingale::Orchestrator;

#[derive(Parser)]
#[command(name = "nightingale", version, about = "Autonomous CI incident-resolution pipeline")]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    replay: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a single incident described by a JSON event file.
    Run {
        #[arg(long)]
        event: PathBuf,
    },
    /// Serve the webhook HTTP surface.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    nightingale::assert_weights_sum_to_one();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.replay {
        config.replay_mode = true;
    }

    let api_key = config.require_credential()?;
    let llm_client = LlmClient::new(
        api_key,
        ResponseCache::default_dir(),
        config.gemini_rate_limit,
        config.replay_mode,
    );
    let orchestrator = std::sync::Arc::new(Orchestrator::new(llm_client, config));

    match cli.command {
        Commands::Run { event } => {
            let text = std::fs::read_to_string(&event)?;
            let event: IncidentEvent = serde_json::from_str(&text)?;
            let report = orchestrator.process_incident(event).await;

            let status = match report.decision {
                Decision::Resolve => "RESOLVE".green().bold(),
                Decision::Escalate => "ESCALATE".yellow().bold(),
            };
            println!("{status} (confidence {:.2})", report.score);
            println!("{}", report.rendered_text);
        }
        Commands::Serve { port } => {
            let state = nightingale::webhook::WebhookState {
                orchestrator: orchestrator.clone(),
            };
            let router = nightingale::webhook::build_router(state);
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
            println!("{}", format!("listening on :{port}").cyan());
            axum::serve(listener, router).await?;
        }
    }

    Ok(())
}
