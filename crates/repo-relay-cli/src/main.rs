mod bootstrap_helpers;
mod cli_args;
mod webhook_server;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use repo_relay_engine::{
    CleanupJob, JsonlEventLog, RelayDispatcher, RelayEventLog, ThreadLinkStore,
};
use repo_relay_github::{GithubApiClient, GithubApiClientConfig, GithubCapabilities};
use tokio::net::TcpListener;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;
use crate::webhook_server::{build_webhook_router, WebhookServerState, WEBHOOK_ENDPOINT};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let token = cli
        .github_token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .context("GITHUB_TOKEN (or --github-token) is required")?;
    let client = GithubApiClient::new(GithubApiClientConfig {
        api_base: cli.github_api_base.clone(),
        token: token.to_string(),
        request_timeout_ms: cli.request_timeout_ms,
    })?;
    let github: Arc<dyn GithubCapabilities> = Arc::new(client);

    let mut events = RelayEventLog::new(cli.max_relay_history);
    if let Some(path) = cli.event_log.clone() {
        events = events.with_journal(JsonlEventLog::open(path)?);
    }
    let events = Arc::new(events);
    let links = Arc::new(ThreadLinkStore::from_path(&cli.thread_links_file));
    let dispatcher = RelayDispatcher::new(cli.engine_config(), github, links.clone(), events);
    if dispatcher.config().shared_token().is_none() {
        tracing::warn!("REPO_RELAY_TOKEN is not set; commands from bot senders will be denied");
    }

    let cleanup = CleanupJob::new(cli.cleanup_job_config(), links, dispatcher.history()).spawn();
    let state = Arc::new(WebhookServerState::new(dispatcher, cli.webhook_secret()));

    let listener = TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("failed to bind webhook server to {}", cli.bind))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound webhook server address")?;
    tracing::info!(
        addr = %local_addr,
        endpoint = WEBHOOK_ENDPOINT,
        links = %cli.thread_links_file.display(),
        "repo relay webhook server listening"
    );

    let serve_result = axum::serve(listener, build_webhook_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    cleanup.shutdown().await?;
    serve_result.context("webhook server exited unexpectedly")?;
    tracing::info!("repo relay webhook server stopped");
    Ok(())
}
