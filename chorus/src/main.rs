use std::collections::HashSet;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chorus::config::Config;
use chorus::fanout::{EnabledSet, FanOutController, RunId, RunView};
use chorus::provider::{build_providers, StreamOptions};
use chorus::relay::{create_router, RelayState};

#[derive(Parser)]
#[command(name = "chorus")]
#[command(about = "Ask one prompt, watch several LLM backends answer it side by side")]
struct Args {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the Anthropic relay server
    Serve,
    /// Send a prompt to every enabled provider and print their answers
    Ask {
        prompt: String,
        /// Run only these providers, ignoring the configured toggles
        #[arg(long = "only", value_name = "NAME")]
        only: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chorus=info,tower_http=debug".into()),
        )
        .with(args.json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    let config = Config::from_env();

    match args.command {
        Command::Serve => serve(config).await,
        Command::Ask { prompt, only } => ask(config, prompt, only).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    if config.relay.anthropic_api_key.is_none() {
        tracing::warn!(
            "ANTHROPIC_API_KEY is not set. Relay requests will fail until it is configured."
        );
    }

    let state = RelayState::new(config.relay.clone(), reqwest::Client::new())?;
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Chorus relay starting on http://{}", addr);
    tracing::info!("  Relay:        http://{}/api/anthropic", addr);
    tracing::info!("  Health check: http://{}/api/health", addr);

    let cancel_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel_token.clone()));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel_token.cancelled_owned())
        .await?;

    Ok(())
}

async fn ask(config: Config, prompt: String, only: Vec<String>) -> anyhow::Result<()> {
    let providers = build_providers(&config, reqwest::Client::new())?;
    if providers.is_empty() {
        anyhow::bail!("No providers are configured");
    }
    let controller = FanOutController::new(providers).with_options(StreamOptions::from(&config));

    let enabled = if only.is_empty() {
        controller.enabled()
    } else {
        only.into_iter().collect::<EnabledSet>()
    };
    tracing::info!(
        "Asking {} provider(s): {}",
        enabled.len(),
        enabled.iter().collect::<Vec<_>>().join(", ")
    );

    let cancel_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel_token.clone()));
    let progress = tokio::spawn(report_progress(controller.subscribe()));

    // Dropping the run future cancels every in-flight request.
    let outcome = tokio::select! {
        outcome = controller.generate(&prompt, &enabled) => outcome,
        _ = cancel_token.cancelled() => {
            tracing::warn!("Interrupted, abandoning in-flight requests");
            progress.abort();
            return Ok(());
        }
    };
    progress.abort();

    for (name, state) in &outcome.results {
        println!("=== {name} ===");
        println!("{}", state.text());
        println!();
    }

    let failed: Vec<&str> = outcome.failures().collect();
    if !failed.is_empty() {
        tracing::warn!("{} provider(s) failed: {}", failed.len(), failed.join(", "));
    }

    Ok(())
}

/// Log each provider once, when it settles in the current run.
async fn report_progress(mut view: tokio::sync::watch::Receiver<RunView>) {
    let mut run = RunId::NONE;
    let mut settled: HashSet<String> = HashSet::new();

    while view.changed().await.is_ok() {
        let snapshot = view.borrow_and_update().clone();
        if snapshot.run_id != run {
            run = snapshot.run_id;
            settled.clear();
        }
        for slot in &snapshot.providers {
            if slot.run_id == run && slot.state.is_complete() && settled.insert(slot.name.clone()) {
                if slot.state.is_failed() {
                    tracing::warn!("{}", slot.state.text());
                } else {
                    tracing::info!(
                        "{} finished ({} chars)",
                        slot.name,
                        slot.state.text().chars().count()
                    );
                }
            }
        }
    }
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, cancelling...");
    cancel_token.cancel();
}
