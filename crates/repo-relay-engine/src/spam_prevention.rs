//! Loop and duplicate protection for relays, plus the bot-sender heuristic.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use repo_relay_core::{age_cutoff_unix_ms, is_older_than_cutoff};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex characters kept from the SHA-256 digest (128 bits).
pub const RELAY_SIGNATURE_HEX_LEN: usize = 32;

pub const RELAY_HTML_MARKER: &str = "<!-- relayed-by-reporelay";
pub const RELAY_ORIGIN_MARKER: &str = "Originally relayed from";
pub const RELAY_FORWARD_HEADING: &str = "📡 **Relayed from";
pub const RELAY_REPLY_HEADING: &str = "💬 **Reply from";

const RELAY_MARKERS: [&str; 4] = [
    RELAY_HTML_MARKER,
    RELAY_ORIGIN_MARKER,
    RELAY_FORWARD_HEADING,
    RELAY_REPLY_HEADING,
];

/// Deterministic digest of one prospective relay, used as the dedup key.
pub fn generate_relay_signature(
    origin_repo: &str,
    origin_issue: u64,
    message: &str,
    target_repo: &str,
) -> String {
    let content = format!("{origin_repo}#{origin_issue}:{target_repo}:{message}");
    let digest = format!("{:x}", Sha256::digest(content.as_bytes()));
    digest[..RELAY_SIGNATURE_HEX_LEN].to_string()
}

/// True when the body already carries output of the relay formatter anywhere.
pub fn is_relayed_message(message_body: &str) -> bool {
    RELAY_MARKERS
        .iter()
        .any(|marker| message_body.contains(marker))
}

pub fn is_bot_sender(sender: &str) -> bool {
    let sender = sender.trim().to_ascii_lowercase();
    sender.ends_with("bot")
        || sender.ends_with("[bot]")
        || sender.starts_with("github-actions")
        || sender.starts_with("dependabot")
        || sender.starts_with("renovate")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayHistoryEntry {
    pub origin_repo: String,
    pub origin_issue: u64,
    pub target_repo: String,
    pub target_issue: u64,
    pub timestamp_unix_ms: u64,
    pub sender: String,
    pub signature: String,
    pub processed_at_unix_ms: u64,
}

#[derive(Debug)]
struct StoredHistoryEntry {
    entry: RelayHistoryEntry,
    sequence: u64,
}

#[derive(Debug, Default)]
struct RelayHistoryState {
    entries: HashMap<String, StoredHistoryEntry>,
    next_sequence: u64,
}

/// Bounded set of processed relay signatures.
///
/// `contains` and `record` lock independently, so two identical relays racing
/// through the check may both proceed; the second `record` simply replaces
/// the first entry under the same signature.
#[derive(Debug)]
pub struct RelayHistoryGuard {
    max_entries: usize,
    state: Mutex<RelayHistoryState>,
}

impl RelayHistoryGuard {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            state: Mutex::new(RelayHistoryState::default()),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Entries dropped per sweep once the ceiling is exceeded.
    pub fn eviction_batch(&self) -> usize {
        (self.max_entries / 10).max(1)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RelayHistoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("relay history mutex is poisoned"))
    }

    pub fn contains(&self, signature: &str) -> Result<bool> {
        Ok(self.lock()?.entries.contains_key(signature))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Inserts an entry keyed by its signature and returns how many old entries were evicted.
    pub fn record(&self, entry: RelayHistoryEntry) -> Result<usize> {
        let mut state = self.lock()?;
        let sequence = state.next_sequence;
        state.next_sequence = state.next_sequence.saturating_add(1);
        let signature = entry.signature.clone();
        state
            .entries
            .insert(signature.clone(), StoredHistoryEntry { entry, sequence });

        let mut evicted = 0;
        if state.entries.len() > self.max_entries {
            let mut ordered = state
                .entries
                .iter()
                .map(|(key, stored)| {
                    (
                        stored.entry.processed_at_unix_ms,
                        stored.sequence,
                        key.clone(),
                    )
                })
                .collect::<Vec<_>>();
            ordered.sort();
            let batch = self.eviction_batch().min(ordered.len().saturating_sub(1));
            for (_, _, key) in ordered.into_iter().take(batch) {
                state.entries.remove(&key);
                evicted += 1;
            }
        }
        tracing::info!(
            signature = %signature,
            total = state.entries.len(),
            evicted,
            "added relay to history"
        );
        Ok(evicted)
    }

    /// Most recently processed entries first.
    pub fn recent(&self, limit: usize) -> Result<Vec<RelayHistoryEntry>> {
        let state = self.lock()?;
        let mut ordered = state.entries.values().collect::<Vec<_>>();
        ordered.sort_by(|left, right| {
            right
                .entry
                .processed_at_unix_ms
                .cmp(&left.entry.processed_at_unix_ms)
                .then(right.sequence.cmp(&left.sequence))
        });
        Ok(ordered
            .into_iter()
            .take(limit)
            .map(|stored| stored.entry.clone())
            .collect())
    }

    /// Removes entries processed strictly before `now - max_age_days`.
    pub fn cleanup_older_than(&self, max_age_days: u64, now_unix_ms: u64) -> Result<usize> {
        let cutoff = age_cutoff_unix_ms(now_unix_ms, max_age_days);
        let mut state = self.lock()?;
        let before = state.entries.len();
        state
            .entries
            .retain(|_, stored| !is_older_than_cutoff(stored.entry.processed_at_unix_ms, cutoff));
        let removed = before - state.entries.len();
        if removed > 0 {
            tracing::info!(removed, "cleaned up old relay history entries");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use repo_relay_core::MILLIS_PER_DAY;

    use super::{
        generate_relay_signature, is_bot_sender, is_relayed_message, RelayHistoryEntry,
        RelayHistoryGuard, RELAY_SIGNATURE_HEX_LEN,
    };

    fn entry(signature: &str, processed_at_unix_ms: u64) -> RelayHistoryEntry {
        RelayHistoryEntry {
            origin_repo: "acme/widgets".to_string(),
            origin_issue: 7,
            target_repo: "acme/target".to_string(),
            target_issue: 1,
            timestamp_unix_ms: processed_at_unix_ms,
            sender: "alice".to_string(),
            signature: signature.to_string(),
            processed_at_unix_ms,
        }
    }

    #[test]
    fn unit_signature_is_deterministic_fixed_length_hex() {
        let first =
            generate_relay_signature("acme/widgets", 7, "!link acme/target", "acme/target");
        let second =
            generate_relay_signature("acme/widgets", 7, "!link acme/target", "acme/target");
        assert_eq!(first, second);
        assert_eq!(first.len(), RELAY_SIGNATURE_HEX_LEN);
        assert!(first.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn functional_signature_differs_for_each_tuple_component() {
        let base = generate_relay_signature("acme/widgets", 7, "body", "acme/target");
        let variants = [
            generate_relay_signature("acme/other", 7, "body", "acme/target"),
            generate_relay_signature("acme/widgets", 8, "body", "acme/target"),
            generate_relay_signature("acme/widgets", 7, "body!", "acme/target"),
            generate_relay_signature("acme/widgets", 7, "body", "acme/elsewhere"),
        ];
        for variant in variants {
            assert_ne!(base, variant);
        }
    }

    #[test]
    fn unit_is_relayed_message_detects_every_marker() {
        assert!(is_relayed_message("x <!-- relayed-by-reporelay signature:abc -->"));
        assert!(is_relayed_message("Originally relayed from `a/b#1`"));
        assert!(is_relayed_message("📡 **Relayed from `a/b#1`**"));
        assert!(is_relayed_message("prefix 💬 **Reply from `a/b`**"));
        assert!(!is_relayed_message("!link target:acme/widgets"));
        assert!(!is_relayed_message(""));
    }

    #[test]
    fn unit_is_bot_sender_matches_patterns_case_insensitively() {
        for sender in [
            "deploy-bot",
            "CIBOT",
            "dependabot[bot]",
            "github-actions[bot]",
            "GitHub-Actions",
            "Dependabot-preview",
            "renovate-runner",
        ] {
            assert!(is_bot_sender(sender), "{sender}");
        }
        for sender in ["alice", "joeeddy", "botanist", "robot-fan"] {
            assert!(!is_bot_sender(sender), "{sender}");
        }
    }

    #[test]
    fn functional_record_and_contains_track_signatures() {
        let guard = RelayHistoryGuard::new(10);
        assert!(!guard.contains("sig-a").expect("contains"));
        guard.record(entry("sig-a", 1)).expect("record");
        assert!(guard.contains("sig-a").expect("contains"));
        guard.record(entry("sig-a", 2)).expect("record again");
        assert_eq!(guard.len().expect("len"), 1);
    }

    #[test]
    fn integration_record_past_ceiling_evicts_oldest_tenth_and_keeps_newest() {
        let guard = RelayHistoryGuard::new(20);
        for index in 0..20_u64 {
            guard
                .record(entry(&format!("sig-{index}"), 1_000 + index))
                .expect("record");
        }
        assert_eq!(guard.len().expect("len"), 20);

        let evicted = guard.record(entry("sig-newest", 5_000)).expect("record");
        assert_eq!(evicted, 2);
        assert_eq!(guard.len().expect("len"), 19);
        assert!(!guard.contains("sig-0").expect("contains"));
        assert!(!guard.contains("sig-1").expect("contains"));
        assert!(guard.contains("sig-2").expect("contains"));
        assert!(guard.contains("sig-newest").expect("contains"));
    }

    #[test]
    fn regression_small_ceiling_still_evicts_and_never_drops_latest() {
        let guard = RelayHistoryGuard::new(1);
        guard.record(entry("sig-old", 10)).expect("record");
        let evicted = guard.record(entry("sig-new", 10)).expect("record");
        assert_eq!(evicted, 1);
        assert!(guard.contains("sig-new").expect("contains"));
        assert!(!guard.contains("sig-old").expect("contains"));
    }

    #[test]
    fn functional_recent_returns_newest_first() {
        let guard = RelayHistoryGuard::new(10);
        guard.record(entry("sig-a", 100)).expect("record");
        guard.record(entry("sig-b", 300)).expect("record");
        guard.record(entry("sig-c", 200)).expect("record");
        let recent = guard.recent(2).expect("recent");
        let signatures = recent
            .iter()
            .map(|entry| entry.signature.as_str())
            .collect::<Vec<_>>();
        assert_eq!(signatures, vec!["sig-b", "sig-c"]);
    }

    #[test]
    fn regression_cleanup_older_than_uses_strict_cutoff() {
        let now = 100 * MILLIS_PER_DAY;
        let cutoff = now - 7 * MILLIS_PER_DAY;
        let guard = RelayHistoryGuard::new(10);
        guard.record(entry("at-cutoff", cutoff)).expect("record");
        guard.record(entry("younger", cutoff + 1)).expect("record");
        guard.record(entry("older", cutoff - 1)).expect("record");

        let removed = guard.cleanup_older_than(7, now).expect("cleanup");
        assert_eq!(removed, 1);
        assert!(guard.contains("at-cutoff").expect("contains"));
        assert!(guard.contains("younger").expect("contains"));
        assert!(!guard.contains("older").expect("contains"));
    }
}
