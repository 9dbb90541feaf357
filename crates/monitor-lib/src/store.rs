//! Concurrent per-pod restart record store
//!
//! All records live behind a single reader/writer lock. Mutations run their
//! computation while holding the write lock, so no event can observe a
//! half-applied update and cleanup sweeps serialize against upserts.

use crate::models::PodRecord;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Store of restart records keyed by pod UID
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Arc<RwLock<HashMap<String, PodRecord>>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of the record for a pod
    pub async fn get(&self, pod_uid: &str) -> Option<PodRecord> {
        self.records.read().await.get(pod_uid).cloned()
    }

    /// Compute and store a new record from the existing one, atomically
    ///
    /// `compute` runs under the write lock and must not block.
    pub async fn upsert<F>(&self, pod_uid: &str, compute: F) -> PodRecord
    where
        F: FnOnce(Option<&PodRecord>) -> PodRecord,
    {
        let mut records = self.records.write().await;
        let record = compute(records.get(pod_uid));
        records.insert(pod_uid.to_string(), record.clone());
        record
    }

    /// Reset the window of an existing record after remediation
    ///
    /// Returns false when the record no longer exists (e.g. swept meanwhile).
    pub async fn reset(&self, pod_uid: &str, now: DateTime<Utc>, real_restart_count: i32) -> bool {
        let mut records = self.records.write().await;
        match records.get_mut(pod_uid) {
            Some(record) => {
                record.mark_remediated(now, real_restart_count);
                true
            }
            None => {
                debug!(pod_uid = %pod_uid, "Record vanished before reset");
                false
            }
        }
    }

    /// Remove a record
    pub async fn delete(&self, pod_uid: &str) -> Option<PodRecord> {
        self.records.write().await.remove(pod_uid)
    }

    /// Remove every record matching `predicate` under a single write lock
    pub async fn sweep<P>(&self, mut predicate: P) -> Vec<(String, PodRecord)>
    where
        P: FnMut(&PodRecord) -> bool,
    {
        let mut records = self.records.write().await;
        let expired: Vec<String> = records
            .iter()
            .filter(|(_, record)| predicate(record))
            .map(|(uid, _)| uid.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|uid| records.remove(&uid).map(|record| (uid, record)))
            .collect()
    }

    /// Number of tracked records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordState, RestartObservation};
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn observation(uid: &str, count: i32) -> RestartObservation {
        RestartObservation {
            pod_uid: uid.to_string(),
            pod_name: format!("pod-{}", uid),
            namespace: "default".to_string(),
            real_restart_count: count,
        }
    }

    fn epoch() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let store = RecordStore::new();
        assert!(store.get("a").await.is_none());

        let created = store
            .upsert("a", |existing| {
                assert!(existing.is_none());
                PodRecord::open(&observation("a", 1), epoch())
            })
            .await;

        assert_eq!(store.get("a").await, Some(created));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_sees_existing_record() {
        let store = RecordStore::new();
        store
            .upsert("a", |_| PodRecord::open(&observation("a", 1), epoch()))
            .await;

        let updated = store
            .upsert("a", |existing| {
                let mut record = existing.cloned().unwrap();
                record.restart_count += 1;
                record
            })
            .await;

        assert_eq!(updated.restart_count, 2);
        assert_eq!(store.get("a").await.unwrap().restart_count, 2);
    }

    #[tokio::test]
    async fn test_reset_missing_record() {
        let store = RecordStore::new();
        assert!(!store.reset("missing", epoch(), 3).await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_reset_marks_remediated() {
        let store = RecordStore::new();
        store
            .upsert("a", |_| PodRecord::open(&observation("a", 1), epoch()))
            .await;

        let later = epoch() + ChronoDuration::seconds(90);
        assert!(store.reset("a", later, 4).await);

        let record = store.get("a").await.unwrap();
        assert_eq!(record.restart_count, 0);
        assert_eq!(record.real_restart_count, 4);
        assert_eq!(record.first_detected, later);
        assert_eq!(record.state, RecordState::Remediated);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = RecordStore::new();
        store
            .upsert("a", |_| PodRecord::open(&observation("a", 1), epoch()))
            .await;

        assert!(store.delete("a").await.is_some());
        assert!(store.delete("a").await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_matching() {
        let store = RecordStore::new();
        store
            .upsert("old", |_| PodRecord::open(&observation("old", 1), epoch()))
            .await;
        store
            .upsert("new", |_| {
                PodRecord::open(&observation("new", 1), epoch() + ChronoDuration::minutes(10))
            })
            .await;

        let cutoff = epoch() + ChronoDuration::minutes(5);
        let removed = store.sweep(|record| record.last_restart < cutoff).await;

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, "old");
        assert!(store.get("old").await.is_none());
        assert!(store.get("new").await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_upserts_are_serialized() {
        let store = RecordStore::new();
        store
            .upsert("a", |_| PodRecord::open(&observation("a", 0), epoch()))
            .await;

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert("a", |existing| {
                        let mut record = existing.cloned().unwrap();
                        record.restart_count += 1;
                        record
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get("a").await.unwrap().restart_count, 51);
    }
}
