use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use repo_relay_engine::config::{
    DEFAULT_AUTHORIZED_OWNER, DEFAULT_HISTORY_MAX_AGE_DAYS, DEFAULT_LINK_MAX_AGE_DAYS,
    DEFAULT_MAX_RELAY_HISTORY, DEFAULT_VISIBILITY_TIMEOUT_MS,
};
use repo_relay_engine::thread_links::DEFAULT_THREAD_LINKS_FILE;
use repo_relay_engine::{CleanupJobConfig, RelayEngineConfig, RouteRule};

const MILLIS_PER_HOUR: u64 = 60 * 60 * 1_000;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "repo-relay",
    about = "Relays commands between GitHub issue threads",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "REPO_RELAY_AUTHORIZED_OWNER",
        default_value = DEFAULT_AUTHORIZED_OWNER,
        help = "Only identity allowed to run commands without a token"
    )]
    pub(crate) authorized_owner: String,

    #[arg(
        long = "relay-token",
        env = "REPO_RELAY_TOKEN",
        hide_env_values = true,
        help = "Shared secret automated senders must pass as token:<value>; unset disables bot commands"
    )]
    pub(crate) relay_token: Option<String>,

    #[arg(
        long,
        env = "MAX_RELAY_HISTORY",
        default_value_t = DEFAULT_MAX_RELAY_HISTORY,
        value_parser = parse_positive_usize,
        help = "Relay history and event log ceiling"
    )]
    pub(crate) max_relay_history: usize,

    #[arg(
        long,
        env = "THREAD_LINKS_FILE",
        default_value = DEFAULT_THREAD_LINKS_FILE,
        help = "JSON file holding origin-to-target thread links"
    )]
    pub(crate) thread_links_file: PathBuf,

    #[arg(
        long,
        env = "REPO_RELAY_EVENT_LOG",
        help = "Optional JSONL file mirroring the relay event log"
    )]
    pub(crate) event_log: Option<PathBuf>,

    #[arg(
        long,
        env = "REPO_RELAY_CLEANUP_INTERVAL_HOURS",
        default_value_t = 24,
        value_parser = parse_positive_u64,
        help = "Hours between scheduled link and history cleanups"
    )]
    pub(crate) cleanup_interval_hours: u64,

    #[arg(
        long,
        env = "REPO_RELAY_LINK_MAX_AGE_DAYS",
        default_value_t = DEFAULT_LINK_MAX_AGE_DAYS,
        value_parser = parse_positive_u64,
        help = "Thread links older than this many days are removed by cleanup"
    )]
    pub(crate) link_max_age_days: u64,

    #[arg(
        long,
        env = "REPO_RELAY_HISTORY_MAX_AGE_DAYS",
        default_value_t = DEFAULT_HISTORY_MAX_AGE_DAYS,
        value_parser = parse_positive_u64,
        help = "Relay history entries older than this many days are removed by cleanup"
    )]
    pub(crate) history_max_age_days: u64,

    #[arg(
        long,
        env = "REPO_RELAY_VISIBILITY_TIMEOUT_MS",
        default_value_t = DEFAULT_VISIBILITY_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Timeout for the repository visibility lookup; expiry denies the command"
    )]
    pub(crate) visibility_timeout_ms: u64,

    #[arg(
        long,
        env = "REPO_RELAY_ENABLED",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Process commands from inbound deliveries"
    )]
    pub(crate) enabled: bool,

    #[arg(
        long = "targets",
        env = "REPO_RELAY_TARGETS",
        value_delimiter = ',',
        help = "Fallback owner/repo targets for relay-type commands when no route matches"
    )]
    pub(crate) targets: Vec<String>,

    #[arg(
        long = "route",
        env = "REPO_RELAY_ROUTES",
        value_delimiter = ',',
        value_parser = RouteRule::parse,
        help = "Routing rule label:<name>=owner/repo or keyword:<text>=owner/repo"
    )]
    pub(crate) routes: Vec<RouteRule>,

    #[arg(
        long,
        env = "REPO_RELAY_BOT_LOGIN",
        help = "Login the app posts as; its own deliveries are ignored"
    )]
    pub(crate) bot_login: Option<String>,

    #[arg(
        long,
        env = "GITHUB_TOKEN",
        hide_env_values = true,
        help = "GitHub token used for repository lookups, issues and comments"
    )]
    pub(crate) github_token: Option<String>,

    #[arg(
        long,
        env = "REPO_RELAY_GITHUB_API_BASE",
        default_value = "https://api.github.com",
        help = "Base URL for the GitHub REST API"
    )]
    pub(crate) github_api_base: String,

    #[arg(
        long,
        env = "REPO_RELAY_WEBHOOK_SECRET",
        hide_env_values = true,
        help = "Secret for x-hub-signature-256 verification; unset skips verification"
    )]
    pub(crate) webhook_secret: Option<String>,

    #[arg(
        long,
        env = "REPO_RELAY_BIND",
        default_value = "127.0.0.1:3000",
        help = "Address the webhook receiver listens on"
    )]
    pub(crate) bind: String,

    #[arg(
        long,
        env = "REPO_RELAY_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Timeout for each GitHub API request"
    )]
    pub(crate) request_timeout_ms: u64,
}

impl Cli {
    pub(crate) fn engine_config(&self) -> RelayEngineConfig {
        RelayEngineConfig {
            authorized_owner: self.authorized_owner.trim().to_string(),
            shared_token: self.relay_token.clone(),
            max_relay_history: self.max_relay_history,
            link_max_age_days: self.link_max_age_days,
            history_max_age_days: self.history_max_age_days,
            visibility_timeout: Duration::from_millis(self.visibility_timeout_ms),
            enabled: self.enabled,
            default_targets: self
                .targets
                .iter()
                .map(|target| target.trim().to_string())
                .filter(|target| !target.is_empty())
                .collect(),
            routes: self.routes.clone(),
            bot_login: self.bot_login.clone(),
        }
    }

    pub(crate) fn cleanup_job_config(&self) -> CleanupJobConfig {
        CleanupJobConfig {
            interval: Duration::from_millis(
                self.cleanup_interval_hours.saturating_mul(MILLIS_PER_HOUR),
            ),
            link_max_age_days: self.link_max_age_days,
            history_max_age_days: self.history_max_age_days,
        }
    }

    pub(crate) fn webhook_secret(&self) -> Option<String> {
        self.webhook_secret
            .as_deref()
            .map(str::trim)
            .filter(|secret| !secret.is_empty())
            .map(str::to_string)
    }
}
