use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::capabilities::{CreatedIssue, GithubCapabilities, RepositoryVisibility};
use crate::transport_helpers::truncate_for_error;

#[derive(Debug, Clone)]
pub struct GithubApiClientConfig {
    pub api_base: String,
    pub token: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct GithubRepositoryResponse {
    private: bool,
}

#[derive(Clone)]
/// REST client backing [`GithubCapabilities`] with one attempt per call.
pub struct GithubApiClient {
    http: reqwest::Client,
    api_base: String,
}

impl GithubApiClient {
    pub fn new(config: GithubApiClientConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("repo-relay"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );
        let auth_header = format!("Bearer {}", config.token.trim());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth_header)
                .context("invalid github authorization header")?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create github api client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn request_json<T>(&self, operation: &str, request: reqwest::RequestBuilder) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = request
            .send()
            .await
            .with_context(|| format!("github api {operation} request failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "github api {operation} failed with status {}: {}",
                status.as_u16(),
                truncate_for_error(&body, 800)
            );
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode github {operation}"))
    }
}

#[async_trait]
impl GithubCapabilities for GithubApiClient {
    async fn get_repository_visibility(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<RepositoryVisibility> {
        let request = self
            .http
            .get(format!("{}/repos/{owner}/{repo}", self.api_base));
        let repository: GithubRepositoryResponse =
            self.request_json("get repository", request).await?;
        Ok(RepositoryVisibility {
            private: repository.private,
        })
    }

    async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedIssue> {
        let payload = json!({ "title": title, "body": body });
        let request = self
            .http
            .post(format!("{}/repos/{owner}/{repo}/issues", self.api_base))
            .json(&payload);
        self.request_json("create issue", request).await
    }

    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<()> {
        let payload = json!({ "body": body });
        let request = self
            .http
            .post(format!(
                "{}/repos/{owner}/{repo}/issues/{issue_number}/comments",
                self.api_base
            ))
            .json(&payload);
        let _: serde_json::Value = self.request_json("create issue comment", request).await?;
        Ok(())
    }
}
