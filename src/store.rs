//! Conversation store — per-user funnel state with durable persistence.
//!
//! One [`ConversationState`] record per user id. Records are created on
//! first contact, reset when idle past the configured threshold, and
//! persisted as a flat key→record JSON map after every mutation so state
//! survives restarts. Permanently closed records are exempt from idle reset
//! and only reopened by an explicit restart signal.
//!
//! All read-modify-write goes through [`ConversationStore::with_user`],
//! which serializes updates so concurrent messages for the same user cannot
//! clobber each other's `message_count`/fingerprint.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;

/// Per-user funnel state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    /// Conversation-epoch start.
    pub started_at: DateTime<Utc>,
    /// Last write; drives the idle-reset check.
    pub updated_at: DateTime<Utc>,
    /// Normalized text of the last message that received a reply.
    pub last_message_fingerprint: String,
    /// Replies sent this epoch.
    pub message_count: u32,
    /// True once the call-to-action has been delivered.
    pub link_sent: bool,
    /// Terminal: the user declined after the CTA. Implies `link_sent`.
    pub permanently_closed: bool,
}

impl ConversationState {
    /// Fresh record for a new (or reset) conversation.
    pub fn fresh() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            updated_at: now,
            last_message_fingerprint: String::new(),
            message_count: 0,
            link_sent: false,
            permanently_closed: false,
        }
    }

    /// Mark the CTA refusal terminal state. Keeps the
    /// `permanently_closed ⇒ link_sent` invariant.
    pub fn close_permanently(&mut self) {
        self.link_sent = true;
        self.permanently_closed = true;
    }

    /// Whether this record has been idle past `timeout`.
    pub fn is_idle(&self, timeout: Duration) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.updated_at);
        elapsed.num_milliseconds() >= timeout.as_millis() as i64
    }
}

/// Normalize message text into a deduplication fingerprint.
pub fn fingerprint(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Backend-agnostic persistence seam for the flat key→record map.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Load all records. A missing store is an empty map, not an error.
    async fn load(&self) -> Result<HashMap<String, ConversationState>, StoreError>;

    /// Persist the full map.
    async fn persist(
        &self,
        records: &HashMap<String, ConversationState>,
    ) -> Result<(), StoreError>;
}

/// JSON-file backend: the whole map as one document.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StateBackend for JsonFileBackend {
    async fn load(&self) -> Result<HashMap<String, ConversationState>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn persist(
        &self,
        records: &HashMap<String, ConversationState>,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(records)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

/// Conversation store owning the user→record map.
///
/// Backend persistence failures are logged and swallowed: in-memory state
/// stays authoritative and the worst case is losing the latest record on a
/// crash.
pub struct ConversationStore {
    records: tokio::sync::Mutex<HashMap<String, ConversationState>>,
    backend: Option<Arc<dyn StateBackend>>,
    idle_timeout: Duration,
}

impl ConversationStore {
    /// In-memory store (for tests and dry runs).
    pub fn in_memory(idle_timeout: Duration) -> Self {
        Self {
            records: tokio::sync::Mutex::new(HashMap::new()),
            backend: None,
            idle_timeout,
        }
    }

    /// Load a store from a backend, reviving persisted records.
    pub async fn load(
        backend: Arc<dyn StateBackend>,
        idle_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let records = backend.load().await?;
        debug!(count = records.len(), "Loaded conversation records");
        Ok(Self {
            records: tokio::sync::Mutex::new(records),
            backend: Some(backend),
            idle_timeout,
        })
    }

    /// Atomically read-modify-write one user's record.
    ///
    /// The record is created if absent, idle-reset if stale (permanently
    /// closed records exempt), passed to `f`, stamped, then the whole map
    /// is persisted. The map lock is held across the persist so writes land
    /// in mutation order.
    pub async fn with_user<F, R>(&self, user_id: &str, f: F) -> R
    where
        F: FnOnce(&mut ConversationState) -> R,
    {
        let mut records = self.records.lock().await;
        let record = records
            .entry(user_id.to_string())
            .or_insert_with(ConversationState::fresh);

        if !record.permanently_closed && record.is_idle(self.idle_timeout) && record.message_count > 0
        {
            debug!(user_id, "Idle conversation reset");
            *record = ConversationState::fresh();
        }

        let result = f(record);
        record.updated_at = Utc::now();

        self.persist_locked(&records).await;
        result
    }

    /// Read a user's record (idle reset applied), without creating one.
    pub async fn get(&self, user_id: &str) -> Option<ConversationState> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(user_id)?;
        if !record.permanently_closed && record.is_idle(self.idle_timeout) && record.message_count > 0
        {
            *record = ConversationState::fresh();
        }
        Some(record.clone())
    }

    /// Delete a user's record (explicit end of conversation).
    pub async fn remove(&self, user_id: &str) {
        let mut records = self.records.lock().await;
        if records.remove(user_id).is_some() {
            debug!(user_id, "Conversation record removed");
            self.persist_locked(&records).await;
        }
    }

    /// Explicit restart: replace the record with a fresh one, even if
    /// permanently closed. Used for allow-listed test identities.
    pub async fn reset(&self, user_id: &str) {
        let mut records = self.records.lock().await;
        records.insert(user_id.to_string(), ConversationState::fresh());
        debug!(user_id, "Conversation record reset");
        self.persist_locked(&records).await;
    }

    async fn persist_locked(&self, records: &HashMap<String, ConversationState>) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.persist(records).await {
                // Non-fatal: in-memory state is still updated.
                warn!(error = %e, "Failed to persist conversation state");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_normalizes_whitespace_and_case() {
        assert_eq!(fingerprint("  Hey   There "), "hey there");
        assert_eq!(fingerprint("hey there"), fingerprint("HEY  THERE"));
    }

    #[test]
    fn fresh_record_invariants() {
        let state = ConversationState::fresh();
        assert_eq!(state.message_count, 0);
        assert!(!state.link_sent);
        assert!(!state.permanently_closed);
    }

    #[test]
    fn permanent_closure_implies_link_sent() {
        let mut state = ConversationState::fresh();
        state.close_permanently();
        assert!(state.link_sent);
        assert!(state.permanently_closed);
    }

    #[tokio::test]
    async fn with_user_creates_and_mutates() {
        let store = ConversationStore::in_memory(Duration::from_secs(600));
        store
            .with_user("u1", |state| {
                state.message_count += 1;
                state.last_message_fingerprint = fingerprint("hey");
            })
            .await;

        let state = store.get("u1").await.unwrap();
        assert_eq!(state.message_count, 1);
        assert_eq!(state.last_message_fingerprint, "hey");
    }

    #[tokio::test]
    async fn idle_record_resets_on_read() {
        let store = ConversationStore::in_memory(Duration::from_millis(0));
        store
            .with_user("u1", |state| {
                state.message_count = 5;
                state.link_sent = true;
            })
            .await;

        // Zero idle timeout: the next read sees a stale record.
        let state = store.get("u1").await.unwrap();
        assert_eq!(state.message_count, 0);
        assert!(!state.link_sent);
    }

    #[tokio::test]
    async fn permanently_closed_exempt_from_idle_reset() {
        let store = ConversationStore::in_memory(Duration::from_millis(0));
        store
            .with_user("u1", |state| {
                state.message_count = 3;
                state.close_permanently();
            })
            .await;

        let state = store.get("u1").await.unwrap();
        assert!(state.permanently_closed);
        assert_eq!(state.message_count, 3);
    }

    #[tokio::test]
    async fn explicit_reset_reopens_closed_record() {
        let store = ConversationStore::in_memory(Duration::from_secs(600));
        store.with_user("u1", |s| s.close_permanently()).await;
        store.reset("u1").await;

        let state = store.get("u1").await.unwrap();
        assert!(!state.permanently_closed);
        assert_eq!(state.message_count, 0);
    }

    #[tokio::test]
    async fn remove_deletes_record() {
        let store = ConversationStore::in_memory(Duration::from_secs(600));
        store.with_user("u1", |s| s.message_count = 1).await;
        store.remove("u1").await;
        assert!(store.get("u1").await.is_none());
    }

    #[tokio::test]
    async fn json_backend_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let backend = Arc::new(JsonFileBackend::new(&path));

        let store = ConversationStore::load(backend.clone(), Duration::from_secs(600))
            .await
            .unwrap();
        store
            .with_user("u1", |state| {
                state.message_count = 2;
                state.link_sent = true;
            })
            .await;

        // Reload from disk into a second store.
        let reloaded = ConversationStore::load(backend, Duration::from_secs(600))
            .await
            .unwrap();
        let state = reloaded.get("u1").await.unwrap();
        assert_eq!(state.message_count, 2);
        assert!(state.link_sent);
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(JsonFileBackend::new(dir.path().join("absent.json")));
        let store = ConversationStore::load(backend, Duration::from_secs(600))
            .await
            .unwrap();
        assert!(store.get("anyone").await.is_none());
    }
}
