use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GithubUser {
    pub login: String,
    #[serde(default, rename = "type")]
    pub account_type: Option<String>,
}

impl GithubUser {
    /// True for GitHub App identities, which GitHub reports with account type `Bot`.
    pub fn is_app_bot(&self) -> bool {
        self.account_type.as_deref() == Some("Bot")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
/// Repository block of a webhook delivery.
pub struct GithubRepository {
    pub name: String,
    pub full_name: String,
    pub owner: GithubUser,
    #[serde(default)]
    pub private: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GithubLabel {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GithubIssue {
    pub number: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub user: Option<GithubUser>,
    #[serde(default)]
    pub labels: Vec<GithubLabel>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GithubIssueComment {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub user: Option<GithubUser>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
/// The subset of an `issues` / `issue_comment` delivery the relay reads.
pub struct GithubWebhookPayload {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub issue: Option<GithubIssue>,
    #[serde(default)]
    pub comment: Option<GithubIssueComment>,
    #[serde(default)]
    pub repository: Option<GithubRepository>,
    #[serde(default)]
    pub sender: Option<GithubUser>,
}

impl GithubWebhookPayload {
    /// Message body, preferring the issue body over the comment body.
    pub fn message_body(&self) -> Option<&str> {
        let issue_body = self.issue.as_ref().and_then(|issue| issue.body.as_deref());
        let comment_body = self
            .comment
            .as_ref()
            .and_then(|comment| comment.body.as_deref());
        non_empty(issue_body).or_else(|| non_empty(comment_body))
    }

    /// Sender login: issue author, then comment author, then event sender.
    pub fn resolved_sender(&self) -> Option<&str> {
        let issue_author = self
            .issue
            .as_ref()
            .and_then(|issue| issue.user.as_ref())
            .map(|user| user.login.as_str());
        let comment_author = self
            .comment
            .as_ref()
            .and_then(|comment| comment.user.as_ref())
            .map(|user| user.login.as_str());
        let sender = self.sender.as_ref().map(|user| user.login.as_str());
        non_empty(issue_author)
            .or_else(|| non_empty(comment_author))
            .or_else(|| non_empty(sender))
    }

    pub fn issue_number(&self) -> Option<u64> {
        self.issue.as_ref().map(|issue| issue.number)
    }

    pub fn issue_labels(&self) -> Vec<String> {
        self.issue
            .as_ref()
            .map(|issue| issue.labels.iter().map(|label| label.name.clone()).collect())
            .unwrap_or_default()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Enumerates the webhook deliveries the relay reacts to.
pub enum GithubWebhookEventKind {
    IssueOpened,
    IssueCommentCreated,
    Unsupported,
}

impl GithubWebhookEventKind {
    /// Classifies a delivery from its `x-github-event` header and payload action.
    pub fn classify(event_name: &str, action: Option<&str>) -> Self {
        match (event_name.trim(), action.map(str::trim)) {
            ("issues", Some("opened")) => Self::IssueOpened,
            ("issue_comment", Some("created")) => Self::IssueCommentCreated,
            _ => Self::Unsupported,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IssueOpened => "issues.opened",
            Self::IssueCommentCreated => "issue_comment.created",
            Self::Unsupported => "unsupported",
        }
    }
}
