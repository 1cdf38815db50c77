use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use live_session::timeline::parse_snapshot;
use live_session::transport::ConnectTarget;
use live_session::{MuxConfig, SessionKind, SessionRegistry, TimelineItem, WebSocketConnector};

mod view;

#[derive(Parser)]
#[command(name = "probe")]
#[command(about = "Attach a live session and print what its display bridge produces")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file layered under LIVE_SESSION_* environment variables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a session and stream it to stdout until Ctrl-C
    Watch(WatchArgs),

    /// Print the endpoint a session would connect to
    Endpoint(EndpointArgs),
}

#[derive(Parser)]
struct WatchArgs {
    /// shell, chat, job-log or telemetry
    kind: SessionKind,

    /// Subject id (terminal tab, job, device)
    subject: String,

    /// Bearer token passed at connect time
    #[arg(long)]
    token: Option<String>,

    /// URL of the history snapshot to seed the view with
    #[arg(long)]
    snapshot_url: Option<String>,
}

#[derive(Parser)]
struct EndpointArgs {
    kind: SessionKind,
    subject: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "probe=debug,live_session=debug,info"
    } else {
        "probe=info,live_session=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = MuxConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Watch(args) => watch(config, args).await,
        Commands::Endpoint(args) => {
            let connector = WebSocketConnector::new(config.url_template);
            let target = ConnectTarget {
                kind: args.kind,
                subject_id: args.subject,
                auth_token: None,
            };
            println!("{}", connector.endpoint_for(&target));
            Ok(())
        }
    }
}

async fn watch(config: MuxConfig, args: WatchArgs) -> Result<()> {
    if args.subject.is_empty() {
        bail!("subject id must not be empty");
    }

    let connector = Arc::new(WebSocketConnector::new(config.url_template.clone()));
    let mut registry = SessionRegistry::new(connector, config.session.clone());
    if let Some(token) = args.token {
        registry = registry.with_auth_token(token);
    }

    info!(kind = %args.kind, subject = %args.subject, "watching session");
    let session = registry.acquire(&args.subject, args.kind);

    // Streamed frames wait in the session backlog until the view subscribes
    let history = match &args.snapshot_url {
        Some(url) => fetch_snapshot(url).await?,
        None => Vec::new(),
    };

    let result = match args.kind {
        SessionKind::Shell => view::run_terminal(&session, &config.bridges).await,
        SessionKind::Chat => view::run_chat(&session, history).await,
        SessionKind::JobLog | SessionKind::Telemetry => {
            view::run_log_tail(&session, &config.bridges, history).await
        }
    };

    let stats = session.stats();
    registry.clear();
    info!(
        stats = %serde_json::to_string(&stats).unwrap_or_default(),
        "session finished"
    );
    result
}

/// One-shot history fetch. A failed fetch is not fatal: the view starts
/// from an empty history.
async fn fetch_snapshot(url: &str) -> Result<Vec<TimelineItem>> {
    let resp = match reqwest::get(url).await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(url, error = %e, "snapshot fetch failed, starting without history");
            return Ok(Vec::new());
        }
    };
    if !resp.status().is_success() {
        warn!(url, status = %resp.status(), "snapshot fetch failed, starting without history");
        return Ok(Vec::new());
    }
    let body = resp.bytes().await.context("Failed to read snapshot body")?;
    let items = parse_snapshot(&body).context("Snapshot response is not a timeline")?;
    info!(items = items.len(), "history loaded");
    Ok(items)
}
