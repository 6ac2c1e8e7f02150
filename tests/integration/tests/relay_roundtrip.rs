use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use repo_relay_engine::{
    CleanupJob, CleanupJobConfig, DispatchOutcome, EventLogFilter, JsonlEventLog,
    RelayDispatcher, RelayEngineConfig, RelayEventKind, RelayEventLog, ThreadLinkStore,
};
use repo_relay_github::{
    CreatedIssue, GithubCapabilities, GithubWebhookPayload, RepositoryVisibility,
};
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone)]
struct Posted {
    repo: String,
    issue: u64,
    body: String,
}

/// GitHub double with a fixed set of private repositories.
struct ScriptedGithub {
    private_repos: HashSet<String>,
    next_issue: AtomicU64,
    issues: AsyncMutex<Vec<Posted>>,
    comments: AsyncMutex<Vec<Posted>>,
}

impl ScriptedGithub {
    fn new(private_repos: &[&str]) -> Self {
        Self {
            private_repos: private_repos.iter().map(|repo| repo.to_string()).collect(),
            next_issue: AtomicU64::new(500),
            issues: AsyncMutex::new(Vec::new()),
            comments: AsyncMutex::new(Vec::new()),
        }
    }

    async fn issues(&self) -> Vec<Posted> {
        self.issues.lock().await.clone()
    }

    async fn comments(&self) -> Vec<Posted> {
        self.comments.lock().await.clone()
    }
}

#[async_trait]
impl GithubCapabilities for ScriptedGithub {
    async fn get_repository_visibility(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<RepositoryVisibility> {
        let slug = format!("{owner}/{repo}");
        if slug.ends_with("/missing") {
            return Err(anyhow!("github api get repository failed with status 404"));
        }
        Ok(RepositoryVisibility {
            private: self.private_repos.contains(&slug),
        })
    }

    async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        _title: &str,
        body: &str,
    ) -> Result<CreatedIssue> {
        let number = self.next_issue.fetch_add(1, Ordering::SeqCst);
        self.issues.lock().await.push(Posted {
            repo: format!("{owner}/{repo}"),
            issue: number,
            body: body.to_string(),
        });
        Ok(CreatedIssue {
            number,
            html_url: None,
        })
    }

    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<()> {
        self.comments.lock().await.push(Posted {
            repo: format!("{owner}/{repo}"),
            issue: issue_number,
            body: body.to_string(),
        });
        Ok(())
    }
}

fn issue_opened(repo: &str, issue: u64, author: &str, body: &str) -> GithubWebhookPayload {
    let (owner, name) = repo.split_once('/').expect("owner/repo");
    serde_json::from_value(json!({
        "action": "opened",
        "issue": {"number": issue, "title": "t", "body": body, "user": {"login": author}},
        "repository": {"name": name, "full_name": repo, "owner": {"login": owner}},
        "sender": {"login": author, "type": "User"}
    }))
    .expect("decode payload")
}

fn comment_created(
    repo: &str,
    issue: u64,
    issue_body: &str,
    author: &str,
    comment: &str,
) -> GithubWebhookPayload {
    let (owner, name) = repo.split_once('/').expect("owner/repo");
    serde_json::from_value(json!({
        "action": "created",
        "issue": {"number": issue, "title": "t", "body": issue_body, "user": {"login": "repo-relay[bot]"}},
        "comment": {"id": 1, "body": comment, "user": {"login": author, "type": "User"}},
        "repository": {"name": name, "full_name": repo, "owner": {"login": owner}},
        "sender": {"login": author, "type": "User"}
    }))
    .expect("decode payload")
}

struct Workspace {
    _temp: tempfile::TempDir,
    links_path: std::path::PathBuf,
    events_path: std::path::PathBuf,
    github: Arc<ScriptedGithub>,
    dispatcher: RelayDispatcher,
}

fn workspace(config: RelayEngineConfig) -> Workspace {
    let temp = tempfile::tempdir().expect("tempdir");
    let links_path = temp.path().join("threadLinks.json");
    let events_path = temp.path().join("events/relay.jsonl");
    let github = Arc::new(ScriptedGithub::new(&["joeeddy/ops", "joeeddy/api"]));
    let events = RelayEventLog::new(config.max_relay_history)
        .with_journal(JsonlEventLog::open(events_path.clone()).expect("open journal"));
    let dispatcher = RelayDispatcher::new(
        config,
        github.clone(),
        Arc::new(ThreadLinkStore::from_path(&links_path)),
        Arc::new(events),
    );
    Workspace {
        _temp: temp,
        links_path,
        events_path,
        github,
        dispatcher,
    }
}

fn token_config() -> RelayEngineConfig {
    RelayEngineConfig {
        shared_token: Some("s3cret".to_string()),
        bot_login: Some("repo-relay[bot]".to_string()),
        ..RelayEngineConfig::default()
    }
}

#[tokio::test]
async fn integration_link_then_reply_round_trips_between_threads() {
    let workspace = workspace(token_config());

    let outcome = workspace
        .dispatcher
        .handle_event(
            "issues",
            &issue_opened("joeeddy/ops", 3, "joeeddy", "!link target:joeeddy/api"),
        )
        .await;
    let DispatchOutcome::Relayed { relays, .. } = outcome else {
        panic!("expected relay, got {outcome:?}");
    };
    assert_eq!(relays.len(), 1);
    let mirrored = workspace.github.issues().await;
    assert_eq!(mirrored.len(), 1);
    assert_eq!(mirrored[0].repo, "joeeddy/api");

    let persisted = std::fs::read_to_string(&workspace.links_path).expect("links file");
    let persisted: serde_json::Value = serde_json::from_str(&persisted).expect("links json");
    assert_eq!(
        persisted["joeeddy/ops#3"]["target"],
        format!("joeeddy/api#{}", mirrored[0].issue)
    );

    let reply = comment_created(
        "joeeddy/api",
        mirrored[0].issue,
        &mirrored[0].body,
        "alice",
        "deployed to staging",
    );
    // The mirrored issue body still carries the link command; it is never
    // re-authorized or answered on the mirrored thread.
    let dispatch = workspace.dispatcher.handle_event("issue_comment", &reply).await;
    assert_eq!(dispatch.reason_code(), "relayed_message");
    let relayed = workspace.dispatcher.handle_reply("issue_comment", &reply).await;
    assert_eq!(relayed.reason_code(), "reply_relayed");

    let comments = workspace.github.comments().await;
    assert!(comments.iter().all(|comment| comment.repo != "joeeddy/api"));
    let back = comments
        .iter()
        .find(|comment| comment.body.contains("💬 **Reply from `joeeddy/api`**"))
        .expect("reply relayed to origin");
    assert_eq!(back.repo, "joeeddy/ops");
    assert_eq!(back.issue, 3);
    assert!(back.body.contains("deployed to staging"));

    let journal = std::fs::read_to_string(&workspace.events_path).expect("event journal");
    assert!(journal.lines().any(|line| line.contains("\"success\"")));
}

#[tokio::test]
async fn integration_mirrored_issue_never_relays_back() {
    let workspace = workspace(token_config());
    workspace
        .dispatcher
        .handle_event(
            "issues",
            &issue_opened("joeeddy/ops", 3, "joeeddy", "!link target:joeeddy/api"),
        )
        .await;
    let mirrored = workspace.github.issues().await;

    // The mirrored body still carries the original command text.
    let echoed = issue_opened(
        "joeeddy/api",
        mirrored[0].issue,
        "joeeddy",
        &mirrored[0].body,
    );
    let outcome = workspace.dispatcher.handle_event("issues", &echoed).await;

    assert_eq!(outcome.reason_code(), "relayed_message");
    assert_eq!(workspace.github.issues().await.len(), 1);
}

#[tokio::test]
async fn integration_bot_sender_token_gate() {
    let workspace = workspace(token_config());

    let denied = workspace
        .dispatcher
        .handle_event(
            "issues",
            &issue_opened(
                "joeeddy/ops",
                8,
                "deploy-bot",
                "!deploy_strategy target:joeeddy/api strategy:canary token:wrong",
            ),
        )
        .await;
    assert_eq!(denied.reason_code(), "invalid_token");

    let allowed = workspace
        .dispatcher
        .handle_event(
            "issues",
            &issue_opened(
                "joeeddy/ops",
                9,
                "deploy-bot",
                "!deploy_strategy target:joeeddy/api strategy:canary token:s3cret",
            ),
        )
        .await;
    assert_eq!(allowed.reason_code(), "relayed");
    let mirrored = workspace.github.issues().await;
    assert_eq!(mirrored.len(), 1);
    assert!(mirrored[0].body.contains("**Sender:** @deploy-bot"));

    let unconfigured = workspace_without_token().await;
    assert_eq!(unconfigured, "token_not_configured");
}

async fn workspace_without_token() -> &'static str {
    let workspace = workspace(RelayEngineConfig::default());
    let outcome = workspace
        .dispatcher
        .handle_event(
            "issues",
            &issue_opened("joeeddy/ops", 1, "renovate-runner", "!status token:s3cret"),
        )
        .await;
    outcome.reason_code()
}

#[tokio::test]
async fn integration_repository_gate_denies_public_foreign_and_unknown_repos() {
    let workspace = workspace(token_config());
    for repo in ["joeeddy/site", "mallory/ops", "joeeddy/missing"] {
        let outcome = workspace
            .dispatcher
            .handle_event("issues", &issue_opened(repo, 1, "joeeddy", "!status"))
            .await;
        assert_eq!(outcome.reason_code(), "unauthorized_repo", "{repo}");
    }
    let errors = workspace
        .dispatcher
        .events()
        .events(&EventLogFilter {
            kind: Some(RelayEventKind::Error),
            ..EventLogFilter::default()
        })
        .expect("events");
    assert_eq!(errors.len(), 3);
}

#[tokio::test]
async fn integration_links_survive_restart_and_cleanup_job() {
    let config = token_config();
    let workspace = workspace(config.clone());
    workspace
        .dispatcher
        .handle_event(
            "issues",
            &issue_opened("joeeddy/ops", 5, "joeeddy", "command link target joeeddy/api"),
        )
        .await;

    let restarted = Arc::new(ThreadLinkStore::from_path(&workspace.links_path));
    let link = restarted
        .get_linked_thread("joeeddy/ops", 5)
        .await
        .expect("read link")
        .expect("link persisted");
    assert!(link.target.starts_with("joeeddy/api#"));

    let job = CleanupJob::new(
        CleanupJobConfig {
            interval: Duration::from_secs(3_600),
            link_max_age_days: 30,
            history_max_age_days: 7,
        },
        restarted.clone(),
        workspace.dispatcher.history(),
    );
    let far_future = link.timestamp + 31 * 24 * 60 * 60 * 1_000;
    let report = job.run_once(far_future).await.expect("cleanup");
    assert_eq!(report.links_removed, 1);
    assert_eq!(report.history_removed, 1);
    assert!(restarted
        .get_all_thread_links()
        .await
        .expect("links")
        .is_empty());
}
