//! Durable origin-to-target thread links.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use repo_relay_core::{
    age_cutoff_unix_ms, current_unix_timestamp_ms, is_older_than_cutoff, write_text_atomic,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub const DEFAULT_THREAD_LINKS_FILE: &str = "threadLinks.json";

pub type ThreadLinkMap = BTreeMap<String, ThreadLinkData>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadLinkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadLinkData {
    /// `owner/repo#issue` of the mirrored thread.
    pub target: String,
    /// Creation time in unix milliseconds.
    pub timestamp: u64,
    #[serde(flatten)]
    pub metadata: ThreadLinkMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadLinkEntry {
    pub key: String,
    #[serde(flatten)]
    pub link: ThreadLinkData,
}

pub fn thread_key(repo: &str, issue_number: u64) -> String {
    format!("{repo}#{issue_number}")
}

/// Read-all / write-all storage behind the link store.
pub trait ThreadLinkPersistence: Send + Sync {
    /// `Ok(None)` means nothing has been stored yet.
    fn read_all(&self) -> Result<Option<ThreadLinkMap>>;
    fn write_all(&self, links: &ThreadLinkMap) -> Result<()>;
}

/// Pretty-printed JSON object keyed by origin thread.
#[derive(Debug, Clone)]
pub struct JsonFileThreadLinkPersistence {
    path: PathBuf,
}

impl JsonFileThreadLinkPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ThreadLinkPersistence for JsonFileThreadLinkPersistence {
    fn read_all(&self) -> Result<Option<ThreadLinkMap>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        let links = serde_json::from_str::<ThreadLinkMap>(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Some(links))
    }

    fn write_all(&self, links: &ThreadLinkMap) -> Result<()> {
        let mut payload =
            serde_json::to_string_pretty(links).context("failed to serialize thread links")?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

/// Link cache hydrated once per process and written through on every mutation.
///
/// A single async lock serializes loads, mutations and their writes, so
/// foreground commands and the cleanup job never interleave file rewrites.
pub struct ThreadLinkStore {
    persistence: Arc<dyn ThreadLinkPersistence>,
    links: Mutex<Option<ThreadLinkMap>>,
}

impl ThreadLinkStore {
    pub fn new(persistence: Arc<dyn ThreadLinkPersistence>) -> Self {
        Self {
            persistence,
            links: Mutex::new(None),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(JsonFileThreadLinkPersistence::new(path)))
    }

    fn loaded<'a>(&self, slot: &'a mut Option<ThreadLinkMap>) -> Result<&'a mut ThreadLinkMap> {
        if slot.is_none() {
            let links = self.persistence.read_all()?.unwrap_or_default();
            tracing::info!(count = links.len(), "loaded thread links");
            *slot = Some(links);
        }
        slot.as_mut()
            .ok_or_else(|| anyhow!("thread link cache failed to load"))
    }

    pub async fn link_thread(
        &self,
        origin_repo: &str,
        origin_issue: u64,
        target_repo: &str,
        target_issue: u64,
        metadata: ThreadLinkMetadata,
    ) -> Result<ThreadLinkData> {
        self.link_thread_at(
            origin_repo,
            origin_issue,
            target_repo,
            target_issue,
            metadata,
            current_unix_timestamp_ms(),
        )
        .await
    }

    /// Creates or replaces the link for the origin thread.
    pub async fn link_thread_at(
        &self,
        origin_repo: &str,
        origin_issue: u64,
        target_repo: &str,
        target_issue: u64,
        metadata: ThreadLinkMetadata,
        now_unix_ms: u64,
    ) -> Result<ThreadLinkData> {
        let key = thread_key(origin_repo, origin_issue);
        let data = ThreadLinkData {
            target: thread_key(target_repo, target_issue),
            timestamp: now_unix_ms,
            metadata,
        };

        let mut guard = self.links.lock().await;
        let links = self.loaded(&mut guard)?;
        let mut next = links.clone();
        next.insert(key.clone(), data.clone());
        self.persistence.write_all(&next)?;
        *links = next;

        tracing::info!(origin = %key, target = %data.target, "linked thread");
        Ok(data)
    }

    pub async fn get_linked_thread(
        &self,
        origin_repo: &str,
        origin_issue: u64,
    ) -> Result<Option<ThreadLinkData>> {
        let mut guard = self.links.lock().await;
        let links = self.loaded(&mut guard)?;
        Ok(links.get(&thread_key(origin_repo, origin_issue)).cloned())
    }

    /// Returns whether a link existed; storage is rewritten only when one did.
    pub async fn unlink_thread(&self, origin_repo: &str, origin_issue: u64) -> Result<bool> {
        let key = thread_key(origin_repo, origin_issue);
        let mut guard = self.links.lock().await;
        let links = self.loaded(&mut guard)?;
        if !links.contains_key(&key) {
            return Ok(false);
        }
        let mut next = links.clone();
        next.remove(&key);
        self.persistence.write_all(&next)?;
        *links = next;

        tracing::info!(origin = %key, "unlinked thread");
        Ok(true)
    }

    pub async fn cleanup_old_links(&self, max_age_days: u64) -> Result<usize> {
        self.cleanup_old_links_at(max_age_days, current_unix_timestamp_ms())
            .await
    }

    /// Drops links created strictly before `now - max_age_days`.
    pub async fn cleanup_old_links_at(&self, max_age_days: u64, now_unix_ms: u64) -> Result<usize> {
        let cutoff = age_cutoff_unix_ms(now_unix_ms, max_age_days);
        let mut guard = self.links.lock().await;
        let links = self.loaded(&mut guard)?;
        let mut next = links.clone();
        next.retain(|_, link| !is_older_than_cutoff(link.timestamp, cutoff));
        let removed = links.len() - next.len();
        if removed > 0 {
            self.persistence.write_all(&next)?;
            *links = next;
            tracing::info!(removed, "cleaned up old thread links");
        }
        Ok(removed)
    }

    /// Every link in key order.
    pub async fn get_all_thread_links(&self) -> Result<Vec<ThreadLinkEntry>> {
        let mut guard = self.links.lock().await;
        let links = self.loaded(&mut guard)?;
        Ok(links
            .iter()
            .map(|(key, link)| ThreadLinkEntry {
                key: key.clone(),
                link: link.clone(),
            })
            .collect())
    }
}
