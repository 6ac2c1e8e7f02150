use std::time::Duration;

use repo_relay_github::RepoRef;

pub const DEFAULT_AUTHORIZED_OWNER: &str = "joeeddy";
pub const DEFAULT_MAX_RELAY_HISTORY: usize = 1_000;
pub const DEFAULT_LINK_MAX_AGE_DAYS: u64 = 30;
pub const DEFAULT_HISTORY_MAX_AGE_DAYS: u64 = 7;
pub const DEFAULT_VISIBILITY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatch {
    /// Exact issue label name.
    Label(String),
    /// Substring of the message body.
    Keyword(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Routes relay-type commands to an extra target when an issue matches.
pub struct RouteRule {
    pub matcher: RouteMatch,
    pub target: String,
}

impl RouteRule {
    /// Parses `label:<name>=owner/repo` or `keyword:<text>=owner/repo`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (selector, target) = raw
            .split_once('=')
            .ok_or_else(|| format!("route '{raw}' must look like label:<name>=owner/repo"))?;
        let target = target.trim();
        if RepoRef::parse(target).is_err() {
            return Err(format!("route '{raw}' target must be owner/repo"));
        }
        let matcher = match selector.trim().split_once(':') {
            Some(("label", name)) if !name.trim().is_empty() => {
                RouteMatch::Label(name.trim().to_string())
            }
            Some(("keyword", text)) if !text.trim().is_empty() => {
                RouteMatch::Keyword(text.trim().to_string())
            }
            _ => return Err(format!("route '{raw}' must start with label: or keyword:")),
        };
        Ok(Self {
            matcher,
            target: target.to_string(),
        })
    }

    pub fn matches(&self, labels: &[String], body: &str) -> bool {
        match &self.matcher {
            RouteMatch::Label(name) => labels.iter().any(|label| label == name),
            RouteMatch::Keyword(text) => body.contains(text.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Process-wide settings consumed by the relay dispatcher and its collaborators.
pub struct RelayEngineConfig {
    /// The single identity allowed to run commands without a token.
    pub authorized_owner: String,
    /// Shared secret bot senders must pass as `token:`; `None` disables bot access.
    pub shared_token: Option<String>,
    /// Ceiling for both the relay history and the in-memory event log.
    pub max_relay_history: usize,
    pub link_max_age_days: u64,
    pub history_max_age_days: u64,
    pub visibility_timeout: Duration,
    pub enabled: bool,
    /// Label and keyword routes, checked in order.
    pub routes: Vec<RouteRule>,
    /// Fan-out targets for relay-type commands when no route matches.
    pub default_targets: Vec<String>,
    /// Login the bot posts as; its own deliveries are ignored.
    pub bot_login: Option<String>,
}

impl Default for RelayEngineConfig {
    fn default() -> Self {
        Self {
            authorized_owner: DEFAULT_AUTHORIZED_OWNER.to_string(),
            shared_token: None,
            max_relay_history: DEFAULT_MAX_RELAY_HISTORY,
            link_max_age_days: DEFAULT_LINK_MAX_AGE_DAYS,
            history_max_age_days: DEFAULT_HISTORY_MAX_AGE_DAYS,
            visibility_timeout: Duration::from_millis(DEFAULT_VISIBILITY_TIMEOUT_MS),
            enabled: true,
            routes: Vec::new(),
            default_targets: Vec::new(),
            bot_login: None,
        }
    }
}

impl RelayEngineConfig {
    /// The configured shared token, treating blank values as unset.
    ///
    /// Non-blank tokens are returned untouched and compared exactly.
    pub fn shared_token(&self) -> Option<&str> {
        self.shared_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
    }

    /// Extra relay targets for an issue: every matching route, or the
    /// default targets when no route matches.
    pub fn routed_targets(&self, labels: &[String], body: &str) -> Vec<String> {
        let mut targets = Vec::new();
        for rule in self.routes.iter().filter(|rule| rule.matches(labels, body)) {
            if !targets.contains(&rule.target) {
                targets.push(rule.target.clone());
            }
        }
        if targets.is_empty() {
            targets = self.default_targets.clone();
        }
        targets
    }

    pub fn is_self_login(&self, login: &str) -> bool {
        self.bot_login
            .as_deref()
            .map(str::trim)
            .filter(|bot| !bot.is_empty())
            .is_some_and(|bot| bot.eq_ignore_ascii_case(login.trim()))
    }
}
