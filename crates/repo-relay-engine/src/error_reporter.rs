use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use repo_relay_github::{GithubCapabilities, RepoRef};
use serde_json::{json, Value};

use crate::event_log::{RelayEventKind, RelayEventLog};

pub const ERROR_NOTIFICATION_MARKER: &str = "<!-- error-notification-by-reporelay -->";

/// Centralized failure reporting shared by every handler.
///
/// Reporting never fails; each channel is best effort.
pub struct ErrorReporter {
    github: Arc<dyn GithubCapabilities>,
    events: Arc<RelayEventLog>,
}

impl ErrorReporter {
    pub fn new(github: Arc<dyn GithubCapabilities>, events: Arc<RelayEventLog>) -> Self {
        Self { github, events }
    }

    pub async fn report(
        &self,
        repo: Option<&RepoRef>,
        issue_number: Option<u64>,
        error: &anyhow::Error,
        operation: &str,
        details: Value,
    ) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let repo_slug = repo
            .map(RepoRef::as_slug)
            .unwrap_or_else(|| "unknown".to_string());
        let issue_label = issue_number
            .map(|number| number.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        tracing::error!(
            operation,
            repo = %repo_slug,
            issue = %issue_label,
            error = %format!("{error:#}"),
            "relay operation failed"
        );

        if let Some(notifier) = self.events.notifier() {
            let summary = format!(
                "**Repository:** {repo_slug}\n**Issue:** #{issue_label}\n**Operation:** {operation}\n**Error:** {error}\n**Details:** {}\n**Timestamp:** {timestamp}",
                serde_json::to_string_pretty(&details).unwrap_or_else(|_| "{}".to_string())
            );
            if let Err(notify_error) = notifier.notify(RelayEventKind::Error, &summary).await {
                tracing::warn!(error = %notify_error, "failed to send error notification");
            }
        }

        if let (Some(repo), Some(issue_number)) = (repo, issue_number) {
            let body = render_error_comment(operation, error, &timestamp);
            if let Err(post_error) = self
                .github
                .create_comment(&repo.owner, &repo.name, issue_number, &body)
                .await
            {
                tracing::warn!(
                    repo = %repo_slug,
                    issue = issue_number,
                    error = %post_error,
                    "failed to post error to issue"
                );
            }
        }

        let recorded = self
            .events
            .log_event(
                RelayEventKind::Error,
                format!("Error in {operation}"),
                json!({
                    "timestamp": timestamp,
                    "repo": repo_slug,
                    "issue": issue_label,
                    "operation": operation,
                    "error": error.to_string(),
                    "details": details,
                }),
            )
            .await;
        if let Err(log_error) = recorded {
            tracing::warn!(error = %log_error, "failed to record error event");
        }
    }
}

fn render_error_comment(operation: &str, error: &anyhow::Error, timestamp: &str) -> String {
    format!(
        "🚨 **RepoRelay Error**\n\n**Operation:** {operation}  \n**Error:** {error}  \n**Time:** {timestamp}\n\nPlease check the logs for more details. If this error persists, contact the repository maintainer.\n\n{ERROR_NOTIFICATION_MARKER}\n"
    )
}
