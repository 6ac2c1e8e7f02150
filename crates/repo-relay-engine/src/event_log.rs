//! Bounded, newest-first event log that feeds the dashboard and notifier.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayEventKind {
    Info,
    Success,
    Warning,
    Error,
}

impl RelayEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Self::Info => "📣",
            Self::Success => "✅",
            Self::Warning => "⚠️",
            Self::Error => "🚨",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEvent {
    pub id: u64,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: RelayEventKind,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl RelayEvent {
    fn matches_repo(&self, repo: &str) -> bool {
        let in_details = self
            .details
            .get("repo")
            .and_then(Value::as_str)
            .is_some_and(|value| value.contains(repo));
        in_details || self.message.contains(repo)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLogFilter {
    pub kind: Option<RelayEventKind>,
    /// Substring matched against `details.repo` or the message text.
    pub repo: Option<String>,
    pub limit: Option<usize>,
}

#[async_trait]
/// External notification channel (chat webhook or similar).
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, kind: RelayEventKind, message: &str) -> Result<()>;
}

/// Append-only JSONL mirror of the event log.
pub struct JsonlEventLog {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JsonlEventLog {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, value: &impl Serialize) -> Result<()> {
        let line = serde_json::to_string(value).context("failed to encode log event")?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("event log file mutex is poisoned"))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct EventBuffer {
    events: VecDeque<RelayEvent>,
    next_id: u64,
}

pub struct RelayEventLog {
    max_events: usize,
    buffer: Mutex<EventBuffer>,
    journal: Option<JsonlEventLog>,
    notifier: Option<Arc<dyn NotificationSink>>,
}

impl RelayEventLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events: max_events.max(1),
            buffer: Mutex::new(EventBuffer::default()),
            journal: None,
            notifier: None,
        }
    }

    pub fn with_journal(mut self, journal: JsonlEventLog) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn notifier(&self) -> Option<&Arc<dyn NotificationSink>> {
        self.notifier.as_ref()
    }

    /// Records an event at the front of the log.
    ///
    /// Journal and notifier failures are logged and never fail the caller.
    pub async fn log_event(
        &self,
        kind: RelayEventKind,
        message: impl Into<String>,
        details: Value,
    ) -> Result<RelayEvent> {
        let event = {
            let mut buffer = self
                .buffer
                .lock()
                .map_err(|_| anyhow!("event log mutex is poisoned"))?;
            buffer.next_id = buffer.next_id.saturating_add(1);
            let event = RelayEvent {
                id: buffer.next_id,
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                kind,
                message: message.into(),
                details,
            };
            buffer.events.push_front(event.clone());
            buffer.events.truncate(self.max_events);
            event
        };

        tracing::info!(kind = kind.as_str(), message = %event.message, "relay event");

        if let Some(journal) = &self.journal {
            if let Err(error) = journal.append(&event) {
                tracing::warn!(
                    path = %journal.path().display(),
                    error = %error,
                    "failed to mirror relay event"
                );
            }
        }

        if kind == RelayEventKind::Success {
            if let Some(notifier) = &self.notifier {
                if let Err(error) = notifier.notify(kind, &event.message).await {
                    tracing::warn!(error = %error, "failed to send success notification");
                }
            }
        }

        Ok(event)
    }

    /// Events newest first, narrowed by `filter`.
    pub fn events(&self, filter: &EventLogFilter) -> Result<Vec<RelayEvent>> {
        let buffer = self
            .buffer
            .lock()
            .map_err(|_| anyhow!("event log mutex is poisoned"))?;
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(buffer
            .events
            .iter()
            .filter(|event| filter.kind.is_none_or(|kind| event.kind == kind))
            .filter(|event| {
                filter
                    .repo
                    .as_deref()
                    .is_none_or(|repo| event.matches_repo(repo))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self
            .buffer
            .lock()
            .map_err(|_| anyhow!("event log mutex is poisoned"))?
            .events
            .len())
    }
}
