use std::sync::Arc;

use anyhow::Result;
use repo_relay_core::current_unix_timestamp_ms;
use repo_relay_github::{GithubCapabilities, GithubWebhookPayload, RepoRef};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::error_reporter::ErrorReporter;
use crate::event_log::{RelayEventKind, RelayEventLog};
use crate::relay_command::RelayCommand;
use crate::spam_prevention::{
    generate_relay_signature, is_relayed_message, RelayHistoryEntry, RelayHistoryGuard,
    RELAY_FORWARD_HEADING, RELAY_HTML_MARKER, RELAY_ORIGIN_MARKER,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayPreconditionError {
    #[error("relay target repository is missing")]
    MissingTarget,
    #[error("Invalid target repository format: {target}. Expected owner/repo")]
    InvalidTargetFormat { target: String },
    #[error("relay origin issue number is missing")]
    MissingOriginIssue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Context attached to relay failures that were already reported.
pub struct RelayFailure {
    pub origin: String,
    pub target: String,
}

impl std::fmt::Display for RelayFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to relay {} to {}", self.origin, self.target)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Origin thread of one inbound event.
pub struct RelayContext {
    pub origin: RepoRef,
    pub origin_full_name: String,
    pub origin_issue: Option<u64>,
    /// Raw body as received; an absent body relays as empty text.
    pub message_body: String,
    /// Label names on the origin issue.
    pub labels: Vec<String>,
}

impl RelayContext {
    pub fn from_payload(payload: &GithubWebhookPayload) -> Option<Self> {
        let repository = payload.repository.as_ref()?;
        Some(Self {
            origin: RepoRef {
                owner: repository.owner.login.clone(),
                name: repository.name.clone(),
            },
            origin_full_name: repository.full_name.clone(),
            origin_issue: payload.issue_number(),
            message_body: payload.message_body().unwrap_or_default().to_string(),
            labels: payload.issue_labels(),
        })
    }

    pub fn origin_key(&self) -> Option<String> {
        self.origin_issue
            .map(|issue| format!("{}#{issue}", self.origin_full_name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayResult {
    pub origin: String,
    pub origin_issue: u64,
    pub target: String,
    pub target_issue: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    pub signature: String,
    pub sender: String,
    pub timestamp_unix_ms: u64,
}

/// Mirrors one command into one target repository.
pub struct RelayEngine {
    github: Arc<dyn GithubCapabilities>,
    history: Arc<RelayHistoryGuard>,
    events: Arc<RelayEventLog>,
    errors: Arc<ErrorReporter>,
}

impl RelayEngine {
    pub fn new(
        github: Arc<dyn GithubCapabilities>,
        history: Arc<RelayHistoryGuard>,
        events: Arc<RelayEventLog>,
        errors: Arc<ErrorReporter>,
    ) -> Self {
        Self {
            github,
            history,
            events,
            errors,
        }
    }

    /// Returns `Ok(None)` when the body is already a relay or the exact relay
    /// was performed before; both are normal outcomes.
    ///
    /// Precondition failures return before any side effect. Capability
    /// failures are reported through the shared [`ErrorReporter`] and returned.
    pub async fn relay_message(
        &self,
        context: &RelayContext,
        command: &RelayCommand,
        target_repo: &str,
    ) -> Result<Option<RelayResult>> {
        if target_repo.trim().is_empty() {
            return Err(RelayPreconditionError::MissingTarget.into());
        }
        let target = RepoRef::parse(target_repo).map_err(|_| {
            RelayPreconditionError::InvalidTargetFormat {
                target: target_repo.to_string(),
            }
        })?;
        let origin_issue = context
            .origin_issue
            .ok_or(RelayPreconditionError::MissingOriginIssue)?;

        let target_slug = target.as_slug();
        let signature = generate_relay_signature(
            &context.origin_full_name,
            origin_issue,
            &context.message_body,
            &target_slug,
        );

        if is_relayed_message(&context.message_body) {
            tracing::info!(
                origin = %context.origin_full_name,
                target = %target_slug,
                "skipping relay of relayed message to prevent loop"
            );
            return Ok(None);
        }
        if self.history.contains(&signature)? {
            tracing::info!(
                origin = %context.origin_full_name,
                target = %target_slug,
                signature = %signature,
                "skipping duplicate relay"
            );
            return Ok(None);
        }

        match self
            .perform_relay(context, command, &target, origin_issue, &signature)
            .await
        {
            Ok(result) => Ok(Some(result)),
            Err(error) => {
                self.errors
                    .report(
                        Some(&context.origin),
                        Some(origin_issue),
                        &error,
                        "relayMessage",
                        json!({
                            "command": command.command_type,
                            "targetRepo": target_slug,
                            "originRepo": context.origin_full_name,
                            "originIssue": origin_issue,
                        }),
                    )
                    .await;
                Err(error.context(RelayFailure {
                    origin: format!("{}#{origin_issue}", context.origin_full_name),
                    target: target_slug,
                }))
            }
        }
    }

    async fn perform_relay(
        &self,
        context: &RelayContext,
        command: &RelayCommand,
        target: &RepoRef,
        origin_issue: u64,
        signature: &str,
    ) -> Result<RelayResult> {
        let title = format!("[Relay] {} from {}", command.command_type, context.origin.name);
        let body = render_relay_body(context, command, origin_issue, signature);
        let target_slug = target.as_slug();

        tracing::info!(
            origin = %format!("{}#{origin_issue}", context.origin_full_name),
            target = %target_slug,
            "relaying message"
        );
        let created = self
            .github
            .create_issue(&target.owner, &target.name, &title, &body)
            .await?;

        let timestamp_unix_ms = current_unix_timestamp_ms();
        self.history.record(RelayHistoryEntry {
            origin_repo: context.origin_full_name.clone(),
            origin_issue,
            target_repo: target_slug.clone(),
            target_issue: created.number,
            timestamp_unix_ms,
            sender: command.sender.clone(),
            signature: signature.to_string(),
            processed_at_unix_ms: timestamp_unix_ms,
        })?;

        let result = RelayResult {
            origin: context.origin_full_name.clone(),
            origin_issue,
            target: target_slug,
            target_issue: created.number,
            target_url: created.html_url,
            signature: signature.to_string(),
            sender: command.sender.clone(),
            timestamp_unix_ms,
        };
        self.events
            .log_event(
                RelayEventKind::Success,
                format!(
                    "Message relayed from {}#{} to {}#{}",
                    result.origin, result.origin_issue, result.target, result.target_issue
                ),
                serde_json::to_value(&result)?,
            )
            .await?;
        Ok(result)
    }
}

fn render_relay_body(
    context: &RelayContext,
    command: &RelayCommand,
    origin_issue: u64,
    signature: &str,
) -> String {
    let origin = &context.origin_full_name;
    let params =
        serde_json::to_string_pretty(&command.params).unwrap_or_else(|_| "{}".to_string());

    format!(
        "{RELAY_FORWARD_HEADING} `{origin}#{origin_issue}`**\n\n\
**Command:** {command_type}  \n\
**Sender:** @{sender}  \n\
**Parameters:** {params}\n\n\
---\n\n\
**Original Message:**\n\n\
{message}\n\n\
---\n\n\
🔗 [View original thread](https://github.com/{origin}/issues/{origin_issue})\n\n\
{RELAY_HTML_MARKER} signature:{signature} -->\n\
{RELAY_ORIGIN_MARKER} `{origin}#{origin_issue}`\n",
        command_type = command.command_type,
        sender = command.sender,
        message = context.message_body,
    )
}
