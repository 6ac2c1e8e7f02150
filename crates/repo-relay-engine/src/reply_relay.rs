//! Carries comments on mirrored issues back to their origin thread.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use repo_relay_github::{GithubCapabilities, GithubWebhookPayload, RepoRef};

use crate::config::RelayEngineConfig;
use crate::spam_prevention::{is_relayed_message, RELAY_REPLY_HEADING};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyRelayOutcome {
    Skipped { reason: &'static str },
    Relayed { origin_repo: String, origin_issue: u64 },
    Failed { error: String },
}

impl ReplyRelayOutcome {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Skipped { reason } => *reason,
            Self::Relayed { .. } => "reply_relayed",
            Self::Failed { .. } => "reply_failed",
        }
    }
}

fn origin_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"Originally relayed from `([\w.-]+/[\w.-]+)#(\d+)`").ok())
        .as_ref()
}

/// Origin coordinates from the back-reference line of a mirrored issue body.
pub fn parse_relay_origin(issue_body: &str) -> Option<(RepoRef, u64)> {
    let captures = origin_pattern()?.captures(issue_body)?;
    let repo = RepoRef::parse(captures.get(1)?.as_str()).ok()?;
    let issue_number = captures.get(2)?.as_str().parse::<u64>().ok()?;
    Some((repo, issue_number))
}

pub fn format_reply_message(repo_full_name: &str, sender: &str, comment_body: &str) -> String {
    format!(
        "{RELAY_REPLY_HEADING} `{repo_full_name}`**\n\n> _@{sender} said:_\n>\n> {comment_body}\n\n<!-- relayed-by-reporelay -->\n"
    )
}

pub struct ReplyRelay {
    github: Arc<dyn GithubCapabilities>,
    config: RelayEngineConfig,
}

impl ReplyRelay {
    pub fn new(config: RelayEngineConfig, github: Arc<dyn GithubCapabilities>) -> Self {
        Self { github, config }
    }

    /// Never fails; delivery errors come back as [`ReplyRelayOutcome::Failed`].
    pub async fn relay_reply(&self, payload: &GithubWebhookPayload) -> ReplyRelayOutcome {
        let Some(comment) = payload.comment.as_ref() else {
            return ReplyRelayOutcome::Skipped { reason: "no_comment" };
        };
        let Some(repository) = payload.repository.as_ref() else {
            return ReplyRelayOutcome::Skipped {
                reason: "no_repository",
            };
        };
        let comment_body = comment.body.as_deref().unwrap_or_default();
        let author = comment.user.as_ref();
        let sender = author.map(|user| user.login.as_str()).unwrap_or_default();

        if sender.is_empty() {
            return ReplyRelayOutcome::Skipped { reason: "no_sender" };
        }
        if sender == repository.owner.login
            || self.config.is_self_login(sender)
            || author.is_some_and(|user| user.is_app_bot())
        {
            return ReplyRelayOutcome::Skipped {
                reason: "own_comment",
            };
        }
        if is_relayed_message(comment_body) {
            return ReplyRelayOutcome::Skipped {
                reason: "relayed_comment",
            };
        }

        let issue_body = payload
            .issue
            .as_ref()
            .and_then(|issue| issue.body.as_deref())
            .unwrap_or_default();
        let Some((origin, origin_issue)) = parse_relay_origin(issue_body) else {
            return ReplyRelayOutcome::Skipped {
                reason: "not_relayed_issue",
            };
        };

        let reply = format_reply_message(&repository.full_name, sender, comment_body);
        let origin_repo = origin.as_slug();
        match self
            .github
            .create_comment(&origin.owner, &origin.name, origin_issue, &reply)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    from = %repository.full_name,
                    origin = %format!("{origin_repo}#{origin_issue}"),
                    "relayed reply"
                );
                ReplyRelayOutcome::Relayed {
                    origin_repo,
                    origin_issue,
                }
            }
            Err(error) => {
                tracing::error!(
                    from = %repository.full_name,
                    origin = %origin_repo,
                    error = %error,
                    "failed to relay reply"
                );
                ReplyRelayOutcome::Failed {
                    error: error.to_string(),
                }
            }
        }
    }
}
