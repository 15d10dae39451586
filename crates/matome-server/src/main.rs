//! matome-server binary
//!
//! Console front end for the coalescing coordinator.
//!
//! ## Usage
//!
//! ```bash
//! matome-server [--config <file.ron>]
//! ```
//!
//! Each stdin line is `key: text`. Send several lines for the same key while
//! a reply is pending and they are answered together.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use matome_server::constants::{BLOCK_COMMAND, CONFIG_ENV, FORGET_COMMAND, SERVICE_NAME};
use matome_server::{ConsoleTransport, EventHandler, Outcome, config_path, load_config, parse_line};

fn print_usage() {
    eprintln!(
        r#"matome-server - message coalescing demo on the console

USAGE:
    matome-server [OPTIONS]

OPTIONS:
    --config <FILE>    RON config file (default: ${env}, else built-in defaults)
    --help, -h         Show this help

INPUT:
    <key>: <text>      Message for conversation <key>
    <key>: {forget}     Clear the conversation's history
    <key>: {block}      Simulate the recipient blocking the bot

LOGGING:
    RUST_LOG=debug shows activity pulses and session internals
"#,
        env = CONFIG_ENV,
        forget = FORGET_COMMAND,
        block = BLOCK_COMMAND,
    );
}

#[cfg(feature = "telemetry")]
fn init_tracing() -> Option<matome_telemetry::OtelGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    if !matome_telemetry::otel_enabled() {
        registry.init();
        return None;
    }

    match matome_telemetry::otel_layer(SERVICE_NAME) {
        Ok((otel_layer, guard)) => {
            registry.with(otel_layer).init();
            Some(guard)
        }
        Err(e) => {
            registry.init();
            tracing::warn!(error = %e, "OTel export requested but unavailable");
            None
        }
    }
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing() -> Option<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!(service = SERVICE_NAME, "built without telemetry");
    None
}

#[tokio::main]
async fn main() -> ExitCode {
    let _otel_guard = init_tracing();

    let args: Vec<String> = env::args().collect();
    let mut config_flag: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            "--config" => {
                let Some(path) = args.get(i + 1) else {
                    eprintln!("--config requires a value");
                    return ExitCode::FAILURE;
                };
                config_flag = Some(PathBuf::from(path));
                i += 2;
            }
            other => {
                eprintln!("Unknown option: {}", other);
                print_usage();
                return ExitCode::FAILURE;
            }
        }
    }

    match run(config_path(config_flag, env::var(CONFIG_ENV).ok())).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config.as_deref()).with_context(|| match &config {
        Some(path) => format!("failed to load config from {}", path.display()),
        None => "failed to build default config".to_string(),
    })?;
    tracing::info!(
        policy = %config.coalesce.interrupt_policy,
        model = %config.llm.model,
        "starting matome console"
    );

    let transport = Arc::new(ConsoleTransport::stdout());
    let handler = Arc::new(
        EventHandler::new(&config, transport).context("failed to set up the model provider")?,
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let Some(event) = parse_line(&line) else {
            if !line.trim().is_empty() {
                tracing::warn!(line = %line, "expected `key: text`, ignoring");
            }
            continue;
        };

        let handler = Arc::clone(&handler);
        tasks.spawn(async move { handler.handle(event).await });

        while let Some(done) = tasks.try_join_next() {
            log_outcome(done);
        }
    }

    tracing::info!(in_flight = tasks.len(), "stdin closed, waiting for sessions");
    while let Some(done) = tasks.join_next().await {
        log_outcome(done);
    }

    let stats = handler.driver().coordinator().registry().stats();
    tracing::info!(
        conversations = stats.conversations,
        pending = stats.pending_fragments,
        "shutting down"
    );
    Ok(())
}

fn log_outcome(done: Result<Outcome, tokio::task::JoinError>) {
    match done {
        Ok(Outcome::Answered(report)) => tracing::debug!(
            session = %report.session,
            attempts = report.attempts,
            fragments = report.settled_fragments,
            undelivered = report.undelivered,
            "answered"
        ),
        Ok(outcome) => tracing::trace!(?outcome, "event handled"),
        Err(e) => tracing::error!(error = %e, "event task panicked"),
    }
}
