use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Command types that are accepted without a target repository.
pub const TARGET_EXEMPT_COMMANDS: [&str; 5] = ["status", "help", "list", "cleanup", "unlink"];

pub const CORE_COMMANDS: [&str; 8] = [
    "link",
    "unlink",
    "status",
    "help",
    "list",
    "cleanup",
    "deploy_strategy",
    "report_status",
];

/// Research collaboration types; they take the relay path.
pub const EXTENSION_COMMANDS: [&str; 7] = [
    "share_experiment",
    "cite_paper",
    "search_papers",
    "peer_review",
    "share_model",
    "share_dataset",
    "research_proposal",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A command extracted from one issue or comment body.
pub struct RelayCommand {
    pub command_type: String,
    pub sender: String,
    pub timestamp_unix_ms: u64,
    pub target: Option<String>,
    pub params: BTreeMap<String, String>,
}

impl RelayCommand {
    pub fn kind(&self) -> RelayCommandKind {
        RelayCommandKind::from_type(&self.command_type)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Closed dispatch over command types; `Other` is the relay fallback arm.
pub enum RelayCommandKind {
    Link,
    Unlink,
    Status,
    Help,
    List,
    Cleanup,
    DeployStrategy,
    ReportStatus,
    Other(String),
}

impl RelayCommandKind {
    pub fn from_type(command_type: &str) -> Self {
        match command_type {
            "link" => Self::Link,
            "unlink" => Self::Unlink,
            "status" => Self::Status,
            "help" => Self::Help,
            "list" => Self::List,
            "cleanup" => Self::Cleanup,
            "deploy_strategy" => Self::DeployStrategy,
            "report_status" => Self::ReportStatus,
            other => Self::Other(other.to_string()),
        }
    }
}

pub fn is_target_exempt(command_type: &str) -> bool {
    TARGET_EXEMPT_COMMANDS.contains(&command_type)
}

pub fn is_recognized_command(command_type: &str) -> bool {
    CORE_COMMANDS.contains(&command_type) || EXTENSION_COMMANDS.contains(&command_type)
}

pub fn recognized_commands() -> Vec<&'static str> {
    CORE_COMMANDS
        .iter()
        .chain(EXTENSION_COMMANDS.iter())
        .copied()
        .collect()
}
