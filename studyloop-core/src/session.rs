//! Per-session working data
//!
//! Extraction output (chunks and summary) is parked here under the
//! session id so a later command in the same session can use it. Nothing
//! in this module is persisted.
//!
//! Entries for different sessions are independent. Two concurrent writers
//! to the *same* session id are not ordered against each other; callers
//! must keep a single writer per session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Data produced by extraction for one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub chunks: Vec<String>,
    pub summary: Option<String>,
}

impl SessionData {
    pub fn new(chunks: Vec<String>, summary: Option<String>) -> Self {
        Self { chunks, summary }
    }

    pub fn total_chars(&self) -> usize {
        self.chunks.iter().map(|c| c.chars().count()).sum()
    }
}

#[derive(Debug)]
struct Entry {
    data: Arc<SessionData>,
    stored_at: Instant,
}

/// In-memory map from session id to [`SessionData`]
#[derive(Debug, Default)]
pub struct SessionContext {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Option<Duration>,
}

impl SessionContext {
    /// Context whose entries live until removed
    pub fn new() -> Self {
        Self::default()
    }

    /// Context whose entries expire `ttl` after they were stored
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.duration_since(entry.stored_at) >= ttl)
    }

    /// Store data for a session, returning what it replaced
    pub async fn insert(&self, session_id: &str, data: SessionData) -> Option<Arc<SessionData>> {
        let entry = Entry {
            data: Arc::new(data),
            stored_at: Instant::now(),
        };
        self.entries
            .write()
            .await
            .insert(session_id.to_string(), entry)
            .map(|old| old.data)
    }

    /// Data for a session; expired entries read as missing and are dropped
    pub async fn get(&self, session_id: &str) -> Option<Arc<SessionData>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(session_id) {
                None => return None,
                Some(entry) if !self.is_expired(entry, now) => return Some(Arc::clone(&entry.data)),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries
            .get(session_id)
            .is_some_and(|entry| self.is_expired(entry, now))
        {
            entries.remove(session_id);
            debug!(session_id, "Session context expired");
        }
        None
    }

    pub async fn remove(&self, session_id: &str) -> Option<Arc<SessionData>> {
        self.entries
            .write()
            .await
            .remove(session_id)
            .map(|entry| entry.data)
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.get(session_id).await.is_some()
    }

    /// Drop every expired entry, returning how many were removed
    pub async fn evict_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        before - entries.len()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(chunks: &[&str]) -> SessionData {
        SessionData::new(chunks.iter().map(|c| c.to_string()).collect(), None)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let ctx = SessionContext::new();
        assert!(ctx.insert("s1", data(&["a", "b"])).await.is_none());

        let stored = ctx.get("s1").await.unwrap();
        assert_eq!(stored.chunks, vec!["a", "b"]);
        assert!(ctx.get("s2").await.is_none());
    }

    #[tokio::test]
    async fn test_insert_replaces_previous() {
        let ctx = SessionContext::new();
        ctx.insert("s1", data(&["old"])).await;
        let replaced = ctx.insert("s1", data(&["new"])).await.unwrap();

        assert_eq!(replaced.chunks, vec!["old"]);
        assert_eq!(ctx.get("s1").await.unwrap().chunks, vec!["new"]);
        assert_eq!(ctx.len().await, 1);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let ctx = Arc::new(SessionContext::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let ctx = Arc::clone(&ctx);
            handles.push(tokio::spawn(async move {
                let id = format!("s{i}");
                ctx.insert(&id, data(&[&id])).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(ctx.len().await, 8);
        for i in 0..8 {
            let id = format!("s{i}");
            assert_eq!(ctx.get(&id).await.unwrap().chunks, vec![id.clone()]);
        }
    }

    #[tokio::test]
    async fn test_remove() {
        let ctx = SessionContext::new();
        ctx.insert("s1", data(&["a"])).await;
        assert!(ctx.remove("s1").await.is_some());
        assert!(ctx.remove("s1").await.is_none());
        assert!(ctx.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let ctx = SessionContext::with_ttl(Duration::from_secs(60));
        ctx.insert("s1", data(&["a"])).await;

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(ctx.contains("s1").await);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(ctx.get("s1").await.is_none());
        assert_eq!(ctx.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired() {
        let ctx = SessionContext::with_ttl(Duration::from_secs(10));
        ctx.insert("old", data(&["a"])).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        ctx.insert("fresh", data(&["b"])).await;

        assert_eq!(ctx.evict_expired().await, 1);
        assert_eq!(ctx.session_ids().await, vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn test_no_ttl_never_evicts() {
        let ctx = SessionContext::new();
        ctx.insert("s1", data(&["a"])).await;
        assert_eq!(ctx.evict_expired().await, 0);
        assert_eq!(ctx.len().await, 1);
    }

    #[test]
    fn test_total_chars() {
        assert_eq!(data(&["héllo", "ab"]).total_chars(), 7);
    }
}
