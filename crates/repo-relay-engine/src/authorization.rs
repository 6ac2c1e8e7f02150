use std::sync::Arc;
use std::time::Duration;

use repo_relay_github::GithubCapabilities;
use serde::Serialize;

use crate::config::RelayEngineConfig;
use crate::relay_command::RelayCommand;
use crate::spam_prevention::is_bot_sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationReason {
    AuthorizedUser,
    AuthorizedBot,
    UnauthorizedRepo,
    UnauthorizedUser,
    TokenNotConfigured,
    InvalidToken,
}

impl AuthorizationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthorizedUser => "authorized_user",
            Self::AuthorizedBot => "authorized_bot",
            Self::UnauthorizedRepo => "unauthorized_repo",
            Self::UnauthorizedUser => "unauthorized_user",
            Self::TokenNotConfigured => "token_not_configured",
            Self::InvalidToken => "invalid_token",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Outcome of one authorization decision.
///
/// `message` is set only on denial; `is_bot` and `has_valid_token` only on grant.
pub struct AuthorizationResult {
    pub authorized: bool,
    pub reason: AuthorizationReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_bot: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_valid_token: Option<bool>,
}

impl AuthorizationResult {
    fn allow(reason: AuthorizationReason, is_bot: bool, has_valid_token: bool) -> Self {
        Self {
            authorized: true,
            reason,
            message: None,
            is_bot: Some(is_bot),
            has_valid_token: Some(has_valid_token),
        }
    }

    fn deny(reason: AuthorizationReason, message: String) -> Self {
        Self {
            authorized: false,
            reason,
            message: Some(message),
            is_bot: None,
            has_valid_token: None,
        }
    }

    pub fn reason_code(&self) -> &'static str {
        self.reason.as_str()
    }
}

/// Decides whether a sender may run a command from a given repository.
pub struct CommandAuthorizer {
    authorized_owner: String,
    shared_token: Option<String>,
    visibility_timeout: Duration,
    github: Arc<dyn GithubCapabilities>,
}

impl CommandAuthorizer {
    pub fn new(config: &RelayEngineConfig, github: Arc<dyn GithubCapabilities>) -> Self {
        Self {
            authorized_owner: config.authorized_owner.clone(),
            shared_token: config.shared_token().map(str::to_string),
            visibility_timeout: config.visibility_timeout,
            github,
        }
    }

    pub fn authorized_owner(&self) -> &str {
        &self.authorized_owner
    }

    /// True only for a private repository owned by the authorized owner.
    ///
    /// Lookup errors and timeouts count as ineligible.
    pub async fn is_authorized_private_repo(&self, owner: &str, repo: &str) -> bool {
        if owner != self.authorized_owner {
            return false;
        }
        let lookup = self.github.get_repository_visibility(owner, repo);
        match tokio::time::timeout(self.visibility_timeout, lookup).await {
            Ok(Ok(visibility)) => visibility.private,
            Ok(Err(error)) => {
                tracing::warn!(
                    repo = %format!("{owner}/{repo}"),
                    error = %error,
                    "repository visibility lookup failed"
                );
                false
            }
            Err(_) => {
                tracing::warn!(
                    repo = %format!("{owner}/{repo}"),
                    timeout_ms = self.visibility_timeout.as_millis() as u64,
                    "repository visibility lookup timed out"
                );
                false
            }
        }
    }

    pub async fn authorize(
        &self,
        repo_owner: &str,
        repo_name: &str,
        command: &RelayCommand,
    ) -> AuthorizationResult {
        let sender = command.sender.as_str();
        let is_bot = is_bot_sender(sender);
        let has_valid_token = match (command.param("token"), self.shared_token.as_deref()) {
            (Some(provided), Some(expected)) => provided == expected,
            _ => false,
        };

        if !self.is_authorized_private_repo(repo_owner, repo_name).await {
            return AuthorizationResult::deny(
                AuthorizationReason::UnauthorizedRepo,
                format!(
                    "❌ **Unauthorized Repository**\n\nCommands are only allowed from private repositories owned by {}.",
                    self.authorized_owner
                ),
            );
        }

        if sender == self.authorized_owner {
            return AuthorizationResult::allow(
                AuthorizationReason::AuthorizedUser,
                is_bot,
                has_valid_token,
            );
        }

        if !is_bot {
            return AuthorizationResult::deny(
                AuthorizationReason::UnauthorizedUser,
                format!(
                    "❌ **Unauthorized User**\n\nOnly user '{}' or authorized bots with valid tokens can use this bot.",
                    self.authorized_owner
                ),
            );
        }

        if self.shared_token.is_none() {
            return AuthorizationResult::deny(
                AuthorizationReason::TokenNotConfigured,
                "❌ **Configuration Error**\n\nREPO_RELAY_TOKEN not configured on server."
                    .to_string(),
            );
        }

        if !has_valid_token {
            return AuthorizationResult::deny(
                AuthorizationReason::InvalidToken,
                "❌ **Invalid Token**\n\nBot/automated commands require a valid token parameter."
                    .to_string(),
            );
        }

        AuthorizationResult::allow(AuthorizationReason::AuthorizedBot, true, true)
    }
}
