// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory session record store.
//!
//! The index lock is held only for lookups and insert/remove. Each entry
//! carries its own record lock and a per-session operation lock, so work on
//! different sessions never contends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, MutexGuard, RwLock};

use super::types::{SessionId, SessionRecord, SessionSignal};

const SIGNAL_CAPACITY: usize = 256;

/// One stored session.
pub struct SessionEntry {
    /// Creation order, used for stable listing and layout order.
    pub order: u64,
    record: Mutex<SessionRecord>,
    op_lock: Mutex<()>,
    closing: AtomicBool,
    signals: broadcast::Sender<SessionSignal>,
}

impl SessionEntry {
    fn new(order: u64, record: SessionRecord) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            order,
            record: Mutex::new(record),
            op_lock: Mutex::new(()),
            closing: AtomicBool::new(false),
            signals,
        }
    }

    /// Lock the mutable record.
    pub async fn record(&self) -> MutexGuard<'_, SessionRecord> {
        self.record.lock().await
    }

    /// Serialize an operation (input, close) against others on this session.
    pub async fn lock_ops(&self) -> MutexGuard<'_, ()> {
        self.op_lock.lock().await
    }

    /// Send a signal to subscribers. No subscribers is fine.
    pub fn signal(&self, signal: SessionSignal) {
        let _ = self.signals.send(signal);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.signals.subscribe()
    }

    /// Flag the session as closing. Returns false if it already was.
    pub fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    /// Clear the closing flag after a close that could not finish.
    pub fn abort_close(&self) {
        self.closing.store(false, Ordering::SeqCst);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

/// Table of all live sessions.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
    next_order: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record, returning its shared entry.
    pub async fn insert(&self, record: SessionRecord) -> Arc<SessionEntry> {
        let id = record.id.clone();
        let order = self.next_order.fetch_add(1, Ordering::SeqCst);
        let entry = Arc::new(SessionEntry::new(order, record));
        self.sessions.write().await.insert(id, Arc::clone(&entry));
        entry
    }

    pub async fn get(&self, id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.sessions.write().await.remove(id)
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// All entries in creation order.
    pub async fn entries(&self) -> Vec<Arc<SessionEntry>> {
        let mut entries: Vec<_> = self.sessions.read().await.values().cloned().collect();
        entries.sort_by_key(|entry| entry.order);
        entries
    }

    /// All ids in creation order.
    pub async fn ids(&self) -> Vec<SessionId> {
        let mut ids = Vec::new();
        for entry in self.entries().await {
            ids.push(entry.record().await.id.clone());
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectType;
    use std::path::PathBuf;

    fn record(id: &str) -> SessionRecord {
        SessionRecord::new(
            SessionId::from(id),
            id.to_string(),
            PathBuf::from("/tmp"),
            None,
            ProjectType::Unknown,
            10,
        )
    }

    #[tokio::test]
    async fn test_entries_keep_creation_order() {
        let store = SessionStore::new();
        for id in ["c", "a", "b"] {
            store.insert(record(id)).await;
        }
        let ids: Vec<String> = store.ids().await.iter().map(|i| i.to_string()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = SessionStore::new();
        store.insert(record("a")).await;
        assert!(store.remove(&SessionId::from("a")).await.is_some());
        assert!(store.remove(&SessionId::from("a")).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_signals_reach_subscribers() {
        let store = SessionStore::new();
        let entry = store.insert(record("a")).await;
        let mut rx = entry.subscribe();
        entry.signal(SessionSignal::Closed);
        assert_eq!(rx.recv().await.unwrap(), SessionSignal::Closed);
    }

    #[tokio::test]
    async fn test_begin_close_only_once() {
        let store = SessionStore::new();
        let entry = store.insert(record("a")).await;
        assert!(entry.begin_close());
        assert!(!entry.begin_close());
        assert!(entry.is_closing());

        entry.abort_close();
        assert!(entry.begin_close());
    }
}
