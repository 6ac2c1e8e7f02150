use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use repo_relay_github::{
    CreatedIssue, GithubCapabilities, GithubIssue, GithubRepository, GithubUser,
    GithubWebhookPayload, RepositoryVisibility,
};
use tokio::sync::Barrier;

use crate::relay_command::RelayCommand;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedIssue {
    pub repo: String,
    pub number: u64,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedComment {
    pub repo: String,
    pub issue_number: u64,
    pub body: String,
}

/// In-memory GitHub double that records every write.
pub(crate) struct FakeGithub {
    visibility: Mutex<HashMap<String, bool>>,
    visibility_delay: Mutex<Option<Duration>>,
    create_barrier: Mutex<Option<Arc<Barrier>>>,
    fail_create_issue: AtomicBool,
    fail_create_comment: AtomicBool,
    next_issue_number: AtomicU64,
    issues: Mutex<Vec<RecordedIssue>>,
    comments: Mutex<Vec<RecordedComment>>,
}

impl FakeGithub {
    pub fn new() -> Self {
        Self {
            visibility: Mutex::new(HashMap::new()),
            visibility_delay: Mutex::new(None),
            create_barrier: Mutex::new(None),
            fail_create_issue: AtomicBool::new(false),
            fail_create_comment: AtomicBool::new(false),
            next_issue_number: AtomicU64::new(100),
            issues: Mutex::new(Vec::new()),
            comments: Mutex::new(Vec::new()),
        }
    }

    pub fn with_private_repo(self, slug: &str) -> Self {
        self.set_visibility(slug, true);
        self
    }

    pub fn with_public_repo(self, slug: &str) -> Self {
        self.set_visibility(slug, false);
        self
    }

    pub fn with_visibility_delay(self, delay: Duration) -> Self {
        *self.visibility_delay.lock().expect("delay lock") = Some(delay);
        self
    }

    pub fn with_create_barrier(self, barrier: Arc<Barrier>) -> Self {
        *self.create_barrier.lock().expect("barrier lock") = Some(barrier);
        self
    }

    pub fn set_visibility(&self, slug: &str, private: bool) {
        self.visibility
            .lock()
            .expect("visibility lock")
            .insert(slug.to_string(), private);
    }

    pub fn fail_issue_creation(&self) {
        self.fail_create_issue.store(true, Ordering::SeqCst);
    }

    pub fn fail_comment_creation(&self) {
        self.fail_create_comment.store(true, Ordering::SeqCst);
    }

    pub fn issues(&self) -> Vec<RecordedIssue> {
        self.issues.lock().expect("issues lock").clone()
    }

    pub fn comments(&self) -> Vec<RecordedComment> {
        self.comments.lock().expect("comments lock").clone()
    }
}

#[async_trait]
impl GithubCapabilities for FakeGithub {
    async fn get_repository_visibility(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<RepositoryVisibility> {
        let delay = *self.visibility_delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let slug = format!("{owner}/{repo}");
        let private = self
            .visibility
            .lock()
            .expect("visibility lock")
            .get(&slug)
            .copied()
            .ok_or_else(|| anyhow!("repository {slug} not found"))?;
        Ok(RepositoryVisibility { private })
    }

    async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedIssue> {
        let barrier = self.create_barrier.lock().expect("barrier lock").clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        if self.fail_create_issue.load(Ordering::SeqCst) {
            bail!("github api create issue failed with status 502: bad gateway");
        }
        let number = self.next_issue_number.fetch_add(1, Ordering::SeqCst);
        self.issues.lock().expect("issues lock").push(RecordedIssue {
            repo: format!("{owner}/{repo}"),
            number,
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(CreatedIssue {
            number,
            html_url: Some(format!("https://github.com/{owner}/{repo}/issues/{number}")),
        })
    }

    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<()> {
        if self.fail_create_comment.load(Ordering::SeqCst) {
            bail!("github api create comment failed with status 500: boom");
        }
        self.comments
            .lock()
            .expect("comments lock")
            .push(RecordedComment {
                repo: format!("{owner}/{repo}"),
                issue_number,
                body: body.to_string(),
            });
        Ok(())
    }
}

pub(crate) fn user(login: &str) -> GithubUser {
    GithubUser {
        login: login.to_string(),
        account_type: None,
    }
}

pub(crate) fn repository(owner: &str, name: &str) -> GithubRepository {
    GithubRepository {
        name: name.to_string(),
        full_name: format!("{owner}/{name}"),
        owner: user(owner),
        private: Some(true),
    }
}

/// `issues.opened` payload with the given author and body.
pub(crate) fn issue_opened_payload(
    owner: &str,
    name: &str,
    issue_number: u64,
    author: &str,
    body: &str,
) -> GithubWebhookPayload {
    GithubWebhookPayload {
        action: Some("opened".to_string()),
        issue: Some(GithubIssue {
            number: issue_number,
            title: Some("relay request".to_string()),
            body: Some(body.to_string()),
            user: Some(user(author)),
            labels: Vec::new(),
        }),
        comment: None,
        repository: Some(repository(owner, name)),
        sender: Some(user(author)),
    }
}

pub(crate) fn command(
    command_type: &str,
    sender: &str,
    target: Option<&str>,
    params: &[(&str, &str)],
) -> RelayCommand {
    RelayCommand {
        command_type: command_type.to_string(),
        sender: sender.to_string(),
        timestamp_unix_ms: 1_700_000_000_000,
        target: target.map(str::to_string),
        params: params
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
    }
}
