//! Fence Store
//!
//! Durable ledger behind the fencing path. Every mutation is a single
//! conditional write (insert-if-absent or compare-and-set), so the store
//! alone decides races between duplicate or concurrent deliveries.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::state::{FenceRecord, FenceStatus};
use crate::tcc::error::FenceError;
use crate::tcc::status::Phase;

/// Storage contract for fence records
///
/// Implementations must make each method atomic per (xid, branch_id).
/// Claim staleness is judged by the store's own clock.
#[async_trait]
pub trait FenceStore: Send + Sync {
    /// Store name for logging
    fn name(&self) -> &'static str;

    /// Insert if absent. Returns false if a record already exists.
    async fn insert(&self, record: &FenceRecord) -> Result<bool, FenceError>;

    async fn get(&self, xid: &str, branch_id: i64) -> Result<Option<FenceRecord>, FenceError>;

    /// CAS NOT_STARTED → SUSPICIOUS held by `phase`
    ///
    /// Returns the new claim id if this call won.
    async fn acquire_claim(
        &self,
        xid: &str,
        branch_id: i64,
        phase: Phase,
    ) -> Result<Option<i64>, FenceError>;

    /// Take over a SUSPICIOUS claim of `phase` untouched for `stale_after`
    ///
    /// Bumps the claim id, so the previous holder can no longer resolve it.
    async fn reclaim_stale(
        &self,
        xid: &str,
        branch_id: i64,
        phase: Phase,
        stale_after: Duration,
    ) -> Result<Option<i64>, FenceError>;

    /// Claim `claim_id` is still SUSPICIOUS and untouched for `stale_after`
    async fn claim_is_stale(
        &self,
        xid: &str,
        branch_id: i64,
        claim_id: i64,
        stale_after: Duration,
    ) -> Result<bool, FenceError>;

    /// Refresh `updated_at` of a claim still held as `claim_id`
    async fn renew_claim(&self, xid: &str, branch_id: i64, claim_id: i64)
    -> Result<bool, FenceError>;

    /// Move a claim still held as `claim_id` to `new`
    ///
    /// Releasing to NOT_STARTED clears the claiming phase.
    async fn resolve_claim(
        &self,
        xid: &str,
        branch_id: i64,
        claim_id: i64,
        new: FenceStatus,
    ) -> Result<bool, FenceError>;

    /// Delete up to `limit` terminal records last updated before `before` (millis)
    async fn delete_terminal_before(&self, before: i64, limit: usize)
    -> Result<u64, FenceError>;
}

/// In-process fence store
///
/// Only safe when a single participant instance owns the branches.
/// Use the PostgreSQL store when several instances share them.
#[derive(Default)]
pub struct MemoryFenceStore {
    records: DashMap<(String, i64), FenceRecord>,
}

impl MemoryFenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn key(xid: &str, branch_id: i64) -> (String, i64) {
        (xid.to_string(), branch_id)
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn is_stale(record: &FenceRecord, stale_after: Duration) -> bool {
        record.status == FenceStatus::Suspicious
            && record.updated_at < Self::now() - stale_after.as_millis() as i64
    }
}

#[async_trait]
impl FenceStore for MemoryFenceStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, record: &FenceRecord) -> Result<bool, FenceError> {
        match self.records.entry(Self::key(&record.xid, record.branch_id)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, xid: &str, branch_id: i64) -> Result<Option<FenceRecord>, FenceError> {
        Ok(self
            .records
            .get(&Self::key(xid, branch_id))
            .map(|r| r.value().clone()))
    }

    async fn acquire_claim(
        &self,
        xid: &str,
        branch_id: i64,
        phase: Phase,
    ) -> Result<Option<i64>, FenceError> {
        match self.records.get_mut(&Self::key(xid, branch_id)) {
            Some(mut record) if record.status == FenceStatus::NotStarted => {
                record.status = FenceStatus::Suspicious;
                record.claim_phase = Some(phase);
                record.claim_id += 1;
                record.updated_at = Self::now();
                Ok(Some(record.claim_id))
            }
            _ => Ok(None),
        }
    }

    async fn reclaim_stale(
        &self,
        xid: &str,
        branch_id: i64,
        phase: Phase,
        stale_after: Duration,
    ) -> Result<Option<i64>, FenceError> {
        match self.records.get_mut(&Self::key(xid, branch_id)) {
            Some(mut record)
                if record.claim_phase == Some(phase) && Self::is_stale(&record, stale_after) =>
            {
                record.claim_id += 1;
                record.updated_at = Self::now();
                Ok(Some(record.claim_id))
            }
            _ => Ok(None),
        }
    }

    async fn claim_is_stale(
        &self,
        xid: &str,
        branch_id: i64,
        claim_id: i64,
        stale_after: Duration,
    ) -> Result<bool, FenceError> {
        Ok(self
            .records
            .get(&Self::key(xid, branch_id))
            .is_some_and(|r| r.claim_id == claim_id && Self::is_stale(&r, stale_after)))
    }

    async fn renew_claim(
        &self,
        xid: &str,
        branch_id: i64,
        claim_id: i64,
    ) -> Result<bool, FenceError> {
        match self.records.get_mut(&Self::key(xid, branch_id)) {
            Some(mut record)
                if record.status == FenceStatus::Suspicious && record.claim_id == claim_id =>
            {
                record.updated_at = Self::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn resolve_claim(
        &self,
        xid: &str,
        branch_id: i64,
        claim_id: i64,
        new: FenceStatus,
    ) -> Result<bool, FenceError> {
        match self.records.get_mut(&Self::key(xid, branch_id)) {
            Some(mut record)
                if record.status == FenceStatus::Suspicious && record.claim_id == claim_id =>
            {
                record.status = new;
                if new == FenceStatus::NotStarted {
                    record.claim_phase = None;
                }
                record.updated_at = Self::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_terminal_before(
        &self,
        before: i64,
        limit: usize,
    ) -> Result<u64, FenceError> {
        let mut removed = 0usize;
        self.records.retain(|_, record| {
            let expired = record.status.is_terminal() && record.updated_at < before;
            if expired && removed < limit {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_if_absent() {
        let store = MemoryFenceStore::new();
        let record = FenceRecord::claimed("xid1", 1, "a", Phase::Commit);

        assert!(store.insert(&record).await.unwrap());
        let mut again = record.clone();
        again.status = FenceStatus::RolledBack;
        assert!(!store.insert(&again).await.unwrap());

        let stored = store.get("xid1", 1).await.unwrap().unwrap();
        assert_eq!(stored.status, FenceStatus::Suspicious);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_acquire_claim_from_not_started_only() {
        let store = MemoryFenceStore::new();
        store
            .insert(&FenceRecord::new("xid1", 1, "a", FenceStatus::NotStarted))
            .await
            .unwrap();

        assert_eq!(store.acquire_claim("xid1", 1, Phase::Commit).await.unwrap(), Some(1));
        assert_eq!(store.acquire_claim("xid1", 1, Phase::Commit).await.unwrap(), None);
        assert_eq!(store.acquire_claim("missing", 1, Phase::Commit).await.unwrap(), None);

        let record = store.get("xid1", 1).await.unwrap().unwrap();
        assert_eq!(record.status, FenceStatus::Suspicious);
        assert_eq!(record.claim_phase, Some(Phase::Commit));
    }

    #[tokio::test]
    async fn test_resolve_requires_current_claim_id() {
        let store = MemoryFenceStore::new();
        store
            .insert(&FenceRecord::claimed("xid1", 1, "a", Phase::Commit))
            .await
            .unwrap();

        assert!(
            !store
                .resolve_claim("xid1", 1, 7, FenceStatus::Committed)
                .await
                .unwrap()
        );
        assert!(!store.renew_claim("xid1", 1, 7).await.unwrap());
        assert!(store.renew_claim("xid1", 1, 1).await.unwrap());

        // Release clears the phase, claim ids keep counting
        assert!(
            store
                .resolve_claim("xid1", 1, 1, FenceStatus::NotStarted)
                .await
                .unwrap()
        );
        let record = store.get("xid1", 1).await.unwrap().unwrap();
        assert_eq!(record.claim_phase, None);
        assert_eq!(store.acquire_claim("xid1", 1, Phase::Rollback).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_reclaim_only_stale_claim_of_same_phase() {
        let store = MemoryFenceStore::new();
        let mut record = FenceRecord::claimed("xid1", 1, "a", Phase::Commit);
        record.updated_at -= 10_000;
        store.insert(&record).await.unwrap();

        let (fresh, stale) = (Duration::from_secs(60), Duration::from_secs(5));
        assert_eq!(store.reclaim_stale("xid1", 1, Phase::Commit, fresh).await.unwrap(), None);
        assert_eq!(store.reclaim_stale("xid1", 1, Phase::Rollback, stale).await.unwrap(), None);
        assert!(store.claim_is_stale("xid1", 1, 1, stale).await.unwrap());

        assert_eq!(store.reclaim_stale("xid1", 1, Phase::Commit, stale).await.unwrap(), Some(2));
        // Refreshed: a second taker loses, the old holder is fenced off
        assert_eq!(store.reclaim_stale("xid1", 1, Phase::Commit, stale).await.unwrap(), None);
        assert!(!store.claim_is_stale("xid1", 1, 2, stale).await.unwrap());
        assert!(
            !store
                .resolve_claim("xid1", 1, 1, FenceStatus::Committed)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_delete_terminal_before() {
        let store = MemoryFenceStore::new();
        for (bid, status) in [
            (1, FenceStatus::Committed),
            (2, FenceStatus::RolledBack),
            (3, FenceStatus::Suspicious),
            (4, FenceStatus::Committed),
        ] {
            let mut record = FenceRecord::new("xid", bid, "a", status);
            record.updated_at -= 1_000;
            store.insert(&record).await.unwrap();
        }

        let cutoff = chrono::Utc::now().timestamp_millis();
        assert_eq!(store.delete_terminal_before(cutoff, 2).await.unwrap(), 2);
        assert_eq!(store.delete_terminal_before(cutoff, 10).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("xid", 3).await.unwrap().is_some());
    }
}
