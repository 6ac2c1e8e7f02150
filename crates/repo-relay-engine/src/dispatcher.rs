//! Inbound event pipeline: classify, parse, validate, authorize, dispatch.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use repo_relay_core::current_unix_timestamp_ms;
use repo_relay_github::{GithubCapabilities, GithubWebhookEventKind, GithubWebhookPayload};
use serde_json::json;

use crate::authorization::{AuthorizationResult, CommandAuthorizer};
use crate::cleanup_job::{run_cleanup, CleanupReport};
use crate::command_parser::parse_command_from_payload;
use crate::command_validation::{validate_command, CommandValidationError};
use crate::config::RelayEngineConfig;
use crate::error_reporter::ErrorReporter;
use crate::event_log::{RelayEventKind, RelayEventLog};
use crate::relay_command::{recognized_commands, RelayCommand, RelayCommandKind};
use crate::relay_engine::{
    RelayContext, RelayEngine, RelayFailure, RelayPreconditionError, RelayResult,
};
use crate::reply_relay::{ReplyRelay, ReplyRelayOutcome};
use crate::spam_prevention::{is_relayed_message, RelayHistoryEntry, RelayHistoryGuard};
use crate::thread_links::{ThreadLinkMetadata, ThreadLinkStore};

pub const DEFAULT_RELAY_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Ignored {
        reason_code: &'static str,
    },
    Rejected {
        command_type: String,
        error: CommandValidationError,
    },
    Denied(AuthorizationResult),
    /// Relay-type command; `relays` is empty when every target was skipped.
    Relayed {
        command_type: String,
        relays: Vec<RelayResult>,
    },
    Responded {
        command_type: String,
    },
    Failed {
        command_type: String,
        error: String,
    },
}

impl DispatchOutcome {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Ignored { reason_code } => *reason_code,
            Self::Rejected { error, .. } => error.reason_code(),
            Self::Denied(result) => result.reason_code(),
            Self::Relayed { relays, .. } if relays.is_empty() => "relay_skipped",
            Self::Relayed { .. } => "relayed",
            Self::Responded { .. } => "command_handled",
            Self::Failed { .. } => "command_failed",
        }
    }
}

/// Routes webhook deliveries through the relay pipeline.
pub struct RelayDispatcher {
    config: RelayEngineConfig,
    github: Arc<dyn GithubCapabilities>,
    authorizer: CommandAuthorizer,
    engine: RelayEngine,
    history: Arc<RelayHistoryGuard>,
    links: Arc<ThreadLinkStore>,
    events: Arc<RelayEventLog>,
    errors: Arc<ErrorReporter>,
    replies: ReplyRelay,
}

impl RelayDispatcher {
    pub fn new(
        config: RelayEngineConfig,
        github: Arc<dyn GithubCapabilities>,
        links: Arc<ThreadLinkStore>,
        events: Arc<RelayEventLog>,
    ) -> Self {
        let history = Arc::new(RelayHistoryGuard::new(config.max_relay_history));
        let errors = Arc::new(ErrorReporter::new(github.clone(), events.clone()));
        let engine = RelayEngine::new(
            github.clone(),
            history.clone(),
            events.clone(),
            errors.clone(),
        );
        Self {
            authorizer: CommandAuthorizer::new(&config, github.clone()),
            replies: ReplyRelay::new(config.clone(), github.clone()),
            config,
            github,
            engine,
            history,
            links,
            events,
            errors,
        }
    }

    pub fn config(&self) -> &RelayEngineConfig {
        &self.config
    }

    pub fn history(&self) -> Arc<RelayHistoryGuard> {
        self.history.clone()
    }

    pub fn links(&self) -> Arc<ThreadLinkStore> {
        self.links.clone()
    }

    pub fn events(&self) -> Arc<RelayEventLog> {
        self.events.clone()
    }

    /// Most recent relays first.
    pub fn relay_history(&self, limit: usize) -> Result<Vec<RelayHistoryEntry>> {
        self.history.recent(limit)
    }

    pub fn cleanup_relay_history(&self, max_age_days: u64) -> Result<usize> {
        self.history
            .cleanup_older_than(max_age_days, current_unix_timestamp_ms())
    }

    pub async fn handle_event(
        &self,
        event_name: &str,
        payload: &GithubWebhookPayload,
    ) -> DispatchOutcome {
        let kind = GithubWebhookEventKind::classify(event_name, payload.action.as_deref());
        if kind == GithubWebhookEventKind::Unsupported {
            return DispatchOutcome::Ignored {
                reason_code: "unsupported_event",
            };
        }
        if let Some(sender) = payload.sender.as_ref() {
            // Comment commands run as the issue author, so app comments only
            // replay the issue's command; the bot's own replies land here.
            let app_comment =
                kind == GithubWebhookEventKind::IssueCommentCreated && sender.is_app_bot();
            if app_comment || self.config.is_self_login(&sender.login) {
                tracing::debug!(sender = %sender.login, "ignoring delivery from app bot");
                return DispatchOutcome::Ignored {
                    reason_code: "bot_sender",
                };
            }
        }
        if !self.config.enabled {
            return DispatchOutcome::Ignored {
                reason_code: "relay_disabled",
            };
        }
        let Some(context) = RelayContext::from_payload(payload) else {
            return DispatchOutcome::Ignored {
                reason_code: "missing_repository",
            };
        };
        let Some(command) = parse_command_from_payload(payload) else {
            return DispatchOutcome::Ignored {
                reason_code: "no_command",
            };
        };
        if is_relayed_message(&context.message_body) {
            tracing::debug!(
                origin = %context.origin_full_name,
                command = %command.command_type,
                "ignoring command carried by a relayed message"
            );
            return DispatchOutcome::Ignored {
                reason_code: "relayed_message",
            };
        }

        if let Err(error) = validate_command(&command) {
            return self.reject(&context, command, error).await;
        }

        let authorization = self
            .authorizer
            .authorize(&context.origin.owner, &context.origin.name, &command)
            .await;
        if !authorization.authorized {
            return self.deny(&context, &command, authorization).await;
        }
        tracing::info!(
            origin = %context.origin_full_name,
            command = %command.command_type,
            sender = %command.sender,
            reason = authorization.reason_code(),
            "command authorized"
        );

        match self.dispatch(&context, &command).await {
            Ok(outcome) => outcome,
            Err(error) => {
                if error.downcast_ref::<RelayFailure>().is_none() {
                    self.errors
                        .report(
                            Some(&context.origin),
                            context.origin_issue,
                            &error,
                            &command.command_type,
                            json!({
                                "command": command.command_type,
                                "sender": command.sender,
                            }),
                        )
                        .await;
                }
                DispatchOutcome::Failed {
                    command_type: command.command_type.clone(),
                    error: format!("{error:#}"),
                }
            }
        }
    }

    /// Sends comments on mirrored issues back to their origin thread.
    pub async fn handle_reply(
        &self,
        event_name: &str,
        payload: &GithubWebhookPayload,
    ) -> ReplyRelayOutcome {
        let kind = GithubWebhookEventKind::classify(event_name, payload.action.as_deref());
        if kind != GithubWebhookEventKind::IssueCommentCreated {
            return ReplyRelayOutcome::Skipped {
                reason: "unsupported_event",
            };
        }
        self.replies.relay_reply(payload).await
    }

    async fn reject(
        &self,
        context: &RelayContext,
        command: RelayCommand,
        error: CommandValidationError,
    ) -> DispatchOutcome {
        tracing::warn!(
            origin = %context.origin_full_name,
            command = %command.command_type,
            reason = error.reason_code(),
            "command failed validation"
        );
        self.respond_best_effort(context, &format!("❌ **Invalid Command**\n\n{error}"))
            .await;
        self.record_event(
            RelayEventKind::Warning,
            format!("Invalid {} command from {}", command.command_type, command.sender),
            json!({
                "repo": context.origin_full_name,
                "issue": context.origin_issue,
                "reason": error.reason_code(),
                "error": error.to_string(),
            }),
        )
        .await;
        DispatchOutcome::Rejected {
            command_type: command.command_type,
            error,
        }
    }

    async fn deny(
        &self,
        context: &RelayContext,
        command: &RelayCommand,
        authorization: AuthorizationResult,
    ) -> DispatchOutcome {
        tracing::warn!(
            origin = %context.origin_full_name,
            command = %command.command_type,
            sender = %command.sender,
            reason = authorization.reason_code(),
            "command authorization denied"
        );
        if let Some(message) = authorization.message.as_deref() {
            self.respond_best_effort(context, message).await;
        }
        self.record_event(
            RelayEventKind::Error,
            format!("Unauthorized command attempt by {}", command.sender),
            json!({
                "repo": context.origin_full_name,
                "issue": context.origin_issue,
                "command": command.command_type,
                "reason": authorization.reason_code(),
            }),
        )
        .await;
        DispatchOutcome::Denied(authorization)
    }

    async fn dispatch(
        &self,
        context: &RelayContext,
        command: &RelayCommand,
    ) -> Result<DispatchOutcome> {
        match command.kind() {
            RelayCommandKind::Link => self.handle_link(context, command).await,
            RelayCommandKind::Unlink => self.handle_unlink(context, command).await,
            RelayCommandKind::Status => self.handle_status(context, command).await,
            RelayCommandKind::Help => self.handle_help(context, command).await,
            RelayCommandKind::List => self.handle_list(context, command).await,
            RelayCommandKind::Cleanup => self.handle_cleanup(context, command).await,
            RelayCommandKind::DeployStrategy
            | RelayCommandKind::ReportStatus
            | RelayCommandKind::Other(_) => self.handle_relay(context, command).await,
        }
    }

    async fn handle_link(
        &self,
        context: &RelayContext,
        command: &RelayCommand,
    ) -> Result<DispatchOutcome> {
        let target = command
            .target
            .as_deref()
            .ok_or(RelayPreconditionError::MissingTarget)?;
        let mut relays = Vec::new();
        if let Some(result) = self.relay_and_link(context, command, target).await? {
            self.respond(
                context,
                &format!(
                    "🔗 **Thread Linked**\n\n`{}#{}` is now linked to `{}#{}`.",
                    result.origin, result.origin_issue, result.target, result.target_issue
                ),
            )
            .await?;
            relays.push(result);
        }
        Ok(DispatchOutcome::Relayed {
            command_type: command.command_type.clone(),
            relays,
        })
    }

    async fn handle_relay(
        &self,
        context: &RelayContext,
        command: &RelayCommand,
    ) -> Result<DispatchOutcome> {
        let mut targets = command.target.iter().cloned().collect::<Vec<_>>();
        for target in self
            .config
            .routed_targets(&context.labels, &context.message_body)
        {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
        if targets.is_empty() {
            tracing::warn!(
                origin = %context.origin_full_name,
                command = %command.command_type,
                "no relay targets configured"
            );
            return Ok(DispatchOutcome::Ignored {
                reason_code: "no_relay_targets",
            });
        }

        let mut relays = Vec::new();
        for target in &targets {
            if let Some(result) = self.relay_and_link(context, command, target).await? {
                relays.push(result);
            }
        }
        Ok(DispatchOutcome::Relayed {
            command_type: command.command_type.clone(),
            relays,
        })
    }

    async fn relay_and_link(
        &self,
        context: &RelayContext,
        command: &RelayCommand,
        target: &str,
    ) -> Result<Option<RelayResult>> {
        let Some(result) = self.engine.relay_message(context, command, target).await? else {
            return Ok(None);
        };
        self.links
            .link_thread(
                &result.origin,
                result.origin_issue,
                &result.target,
                result.target_issue,
                ThreadLinkMetadata {
                    command_type: Some(command.command_type.clone()),
                    sender: Some(command.sender.clone()),
                    signature: Some(result.signature.clone()),
                },
            )
            .await?;
        Ok(Some(result))
    }

    async fn handle_unlink(
        &self,
        context: &RelayContext,
        command: &RelayCommand,
    ) -> Result<DispatchOutcome> {
        let origin_issue = required_origin_issue(context)?;
        let origin = format!("{}#{origin_issue}", context.origin_full_name);
        let removed = self
            .links
            .unlink_thread(&context.origin_full_name, origin_issue)
            .await?;
        let reply = if removed {
            format!("🔓 **Thread Unlinked**\n\n`{origin}` is no longer linked.")
        } else {
            format!("ℹ️ **No Link Found**\n\n`{origin}` was not linked to any thread.")
        };
        self.respond(context, &reply).await?;
        Ok(self.responded(command))
    }

    async fn handle_status(
        &self,
        context: &RelayContext,
        command: &RelayCommand,
    ) -> Result<DispatchOutcome> {
        let origin_issue = required_origin_issue(context)?;
        let origin = format!("{}#{origin_issue}", context.origin_full_name);
        let link = self
            .links
            .get_linked_thread(&context.origin_full_name, origin_issue)
            .await?;
        let reply = match link {
            Some(link) => format!(
                "📊 **Relay Status**\n\n`{origin}` is linked to `{}` (since {}).",
                link.target,
                format_unix_ms(link.timestamp)
            ),
            None => format!("📊 **Relay Status**\n\n`{origin}` is not linked to any thread."),
        };
        self.respond(context, &reply).await?;
        Ok(self.responded(command))
    }

    async fn handle_help(
        &self,
        context: &RelayContext,
        command: &RelayCommand,
    ) -> Result<DispatchOutcome> {
        self.respond(context, &render_help()).await?;
        Ok(self.responded(command))
    }

    async fn handle_list(
        &self,
        context: &RelayContext,
        command: &RelayCommand,
    ) -> Result<DispatchOutcome> {
        let mut links = self.links.get_all_thread_links().await?;
        links.sort_by(|left, right| right.link.timestamp.cmp(&left.link.timestamp));
        let reply = if links.is_empty() {
            "📋 **Thread Links**\n\nNo thread links recorded.".to_string()
        } else {
            let lines = links
                .iter()
                .map(|entry| format!("- `{}` → `{}`", entry.key, entry.link.target))
                .collect::<Vec<_>>()
                .join("\n");
            format!("📋 **Thread Links** ({})\n\n{lines}", links.len())
        };
        self.respond(context, &reply).await?;
        Ok(self.responded(command))
    }

    async fn handle_cleanup(
        &self,
        context: &RelayContext,
        command: &RelayCommand,
    ) -> Result<DispatchOutcome> {
        let CleanupReport {
            links_removed,
            history_removed,
        } = run_cleanup(
            &self.links,
            &self.history,
            self.config.link_max_age_days,
            self.config.history_max_age_days,
            current_unix_timestamp_ms(),
        )
        .await?;
        self.respond(
            context,
            &format!(
                "🧹 **Cleanup Complete**\n\nRemoved {links_removed} thread links and {history_removed} relay history entries."
            ),
        )
        .await?;
        self.record_event(
            RelayEventKind::Info,
            format!("Cleanup removed {links_removed} links and {history_removed} history entries"),
            json!({"repo": context.origin_full_name}),
        )
        .await;
        Ok(self.responded(command))
    }

    fn responded(&self, command: &RelayCommand) -> DispatchOutcome {
        DispatchOutcome::Responded {
            command_type: command.command_type.clone(),
        }
    }

    async fn respond(&self, context: &RelayContext, body: &str) -> Result<()> {
        let origin_issue = required_origin_issue(context)?;
        self.github
            .create_comment(
                &context.origin.owner,
                &context.origin.name,
                origin_issue,
                body,
            )
            .await
    }

    async fn respond_best_effort(&self, context: &RelayContext, body: &str) {
        if let Err(error) = self.respond(context, body).await {
            tracing::warn!(
                origin = %context.origin_full_name,
                error = %error,
                "failed to post reply to origin issue"
            );
        }
    }

    async fn record_event(
        &self,
        kind: RelayEventKind,
        message: String,
        details: serde_json::Value,
    ) {
        if let Err(error) = self.events.log_event(kind, message, details).await {
            tracing::warn!(error = %error, "failed to record relay event");
        }
    }
}

fn required_origin_issue(context: &RelayContext) -> Result<u64> {
    context
        .origin_issue
        .ok_or_else(|| RelayPreconditionError::MissingOriginIssue.into())
}

fn format_unix_ms(timestamp_unix_ms: u64) -> String {
    i64::try_from(timestamp_unix_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|value| value.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| timestamp_unix_ms.to_string())
}

fn render_help() -> String {
    format!(
        "📖 **RepoRelay Help**\n\n\
Commands can be written as `!type key:value ...`, `/type key:value ...`, a `command: type` block with one `key: value` per line, or `command type target owner/repo`.\n\n\
- `!link target:owner/repo` relay this thread and link it to the new issue\n\
- `!unlink` remove the link for this thread\n\
- `!status` show the link for this thread\n\
- `!list` list every thread link\n\
- `!cleanup` remove stale thread links and relay history\n\
- `!deploy_strategy target:owner/repo strategy:<name>` relay a deployment strategy\n\
- `!report_status target:owner/repo` relay a status report\n\
- `!help` show this message\n\n\
Recognized commands: {}\n\n\
Automated senders must include `token:<shared token>`.",
        recognized_commands().join(", ")
    )
}
