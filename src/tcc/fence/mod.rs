//! TCC Fence
//!
//! Idempotent, anti-hanging execution of phase-two methods.
//!
//! # Protocol
//!
//! Every (xid, branch_id) owns one row in the fence store:
//!
//! ```text
//! try:       insert NOT_STARTED ── exists? ──▶ reject (hanging try)
//! phase two: insert SUSPICIOUS(phase, id) or CAS NOT_STARTED → SUSPICIOUS(phase, id)
//!            run phase method, renewing the claim while it runs
//!            ok    → CAS SUSPICIOUS(id) → COMMITTED | ROLLED_BACK
//!            fail  → CAS SUSPICIOUS(id) → NOT_STARTED (release, retryable)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Record-After-Success**: the terminal status is written only after the
//!    phase method returned success
//! 2. **Single Winner**: every claim carries an id bumped on each takeover;
//!    only the current id may resolve it, and a live holder keeps its claim
//!    fresh, so a duplicate delivery reports retryable instead of re-running
//! 3. **Anti-Hang**: rollback against COMMITTED (or commit against
//!    ROLLED_BACK) is rejected, never reported as success
//! 4. **Crash Repair**: a SUSPICIOUS row untouched for the suspicious timeout
//!    may only be taken over by the phase that claimed it. The opposite phase
//!    is rejected as an ordering violation, since the abandoned method may
//!    already have taken effect.

pub mod db;
pub mod state;
pub mod store;
pub mod worker;

pub use db::PgFenceStore;
pub use state::{FenceRecord, FenceStatus};
pub use store::{FenceStore, MemoryFenceStore};
pub use worker::{CleanerConfig, FenceCleanWorker};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::context::ActionContext;
use super::error::{ActionError, FenceError};
use super::resource::{Bean, MethodHandle};
use super::status::Phase;

/// Default age after which an in-flight claim is considered abandoned
pub const DEFAULT_SUSPICIOUS_TIMEOUT: Duration = Duration::from_secs(60);

/// Lower bound for the renewal period of a held claim
const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(10);

enum Claim {
    /// This call owns the SUSPICIOUS claim with this id
    Acquired(i64),
    /// Phase already decided the requested way
    Done,
    /// Another delivery holds a fresh claim
    Busy,
}

/// Fencing path over a [`FenceStore`]
pub struct TccFenceHandler {
    store: Arc<dyn FenceStore>,
    suspicious_timeout: Duration,
}

impl TccFenceHandler {
    pub fn new(store: Arc<dyn FenceStore>) -> Self {
        Self::with_suspicious_timeout(store, DEFAULT_SUSPICIOUS_TIMEOUT)
    }

    pub fn with_suspicious_timeout(store: Arc<dyn FenceStore>, timeout: Duration) -> Self {
        Self {
            store,
            suspicious_timeout: timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn FenceStore> {
        &self.store
    }

    /// Try-phase fence
    ///
    /// Records NOT_STARTED before running the try. If any record already
    /// exists (typically an empty rollback got here first) the try is
    /// rejected with [`FenceError::Hanging`].
    pub async fn prepare_fence<F, Fut>(
        &self,
        xid: &str,
        branch_id: i64,
        action_name: &str,
        try_call: F,
    ) -> Result<bool, FenceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<bool, ActionError>>,
    {
        let record = FenceRecord::new(xid, branch_id, action_name, FenceStatus::NotStarted);
        if !self.store.insert(&record).await? {
            let status = self
                .store
                .get(xid, branch_id)
                .await?
                .map(|r| r.status)
                .unwrap_or(FenceStatus::NotStarted);
            warn!(
                xid = %xid,
                branch_id = branch_id,
                action = %action_name,
                status = %status,
                "Try rejected, branch already fenced"
            );
            return Err(FenceError::Hanging {
                xid: xid.to_string(),
                branch_id,
                status,
            });
        }

        Ok(try_call().await?)
    }

    /// Commit through the fence
    pub async fn commit_fence(
        &self,
        method: &MethodHandle,
        target: Bean,
        ctx: Arc<ActionContext>,
    ) -> Result<bool, FenceError> {
        self.phase_fence(Phase::Commit, method, target, ctx).await
    }

    /// Rollback through the fence
    ///
    /// A rollback with no record (try never ran, or has not landed yet) still
    /// creates the record, so a late try is rejected.
    pub async fn rollback_fence(
        &self,
        method: &MethodHandle,
        target: Bean,
        ctx: Arc<ActionContext>,
    ) -> Result<bool, FenceError> {
        self.phase_fence(Phase::Rollback, method, target, ctx).await
    }

    /// Remove terminal records last touched before `cutoff`
    pub async fn clean_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, FenceError> {
        self.store
            .delete_terminal_before(cutoff.timestamp_millis(), batch_size)
            .await
    }

    async fn phase_fence(
        &self,
        phase: Phase,
        method: &MethodHandle,
        target: Bean,
        ctx: Arc<ActionContext>,
    ) -> Result<bool, FenceError> {
        match self.claim(phase, &ctx).await? {
            Claim::Done => {
                info!(
                    xid = %ctx.xid,
                    branch_id = ctx.branch_id,
                    phase = %phase,
                    "Branch already finished this phase (idempotent)"
                );
                Ok(true)
            }
            Claim::Busy => {
                warn!(
                    xid = %ctx.xid,
                    branch_id = ctx.branch_id,
                    phase = %phase,
                    "Branch phase two in flight elsewhere, asking for retry"
                );
                Ok(false)
            }
            Claim::Acquired(claim_id) => {
                self.run_claimed(phase, claim_id, method, target, ctx).await
            }
        }
    }

    async fn claim(&self, phase: Phase, ctx: &ActionContext) -> Result<Claim, FenceError> {
        let (xid, branch_id) = (ctx.xid.as_str(), ctx.branch_id);

        let fresh = FenceRecord::claimed(xid, branch_id, &ctx.action_name, phase);
        if self.store.insert(&fresh).await? {
            debug!(xid = %xid, branch_id = branch_id, phase = %phase, "Fence record created");
            return Ok(Claim::Acquired(fresh.claim_id));
        }

        let current = self.store.get(xid, branch_id).await?.ok_or_else(|| {
            FenceError::RecordMissing {
                xid: xid.to_string(),
                branch_id,
            }
        })?;

        match (phase, current.status) {
            (Phase::Commit, FenceStatus::Committed) | (Phase::Rollback, FenceStatus::RolledBack) => {
                Ok(Claim::Done)
            }
            (Phase::Commit, FenceStatus::RolledBack) | (Phase::Rollback, FenceStatus::Committed) => {
                Err(self.ordering_violation(phase, &current))
            }
            (_, FenceStatus::NotStarted) => {
                match self.store.acquire_claim(xid, branch_id, phase).await? {
                    Some(claim_id) => Ok(Claim::Acquired(claim_id)),
                    None => Ok(Claim::Busy),
                }
            }
            (_, FenceStatus::Suspicious) if current.claim_phase == Some(phase) => {
                match self
                    .store
                    .reclaim_stale(xid, branch_id, phase, self.suspicious_timeout)
                    .await?
                {
                    Some(claim_id) => {
                        warn!(
                            xid = %xid,
                            branch_id = branch_id,
                            phase = %phase,
                            claim_id = claim_id,
                            "Reclaimed abandoned fence claim, re-running phase method"
                        );
                        Ok(Claim::Acquired(claim_id))
                    }
                    None => Ok(Claim::Busy),
                }
            }
            (_, FenceStatus::Suspicious) => {
                let abandoned = self
                    .store
                    .claim_is_stale(xid, branch_id, current.claim_id, self.suspicious_timeout)
                    .await?;
                if abandoned {
                    Err(self.ordering_violation(phase, &current))
                } else {
                    Ok(Claim::Busy)
                }
            }
        }
    }

    fn ordering_violation(&self, phase: Phase, current: &FenceRecord) -> FenceError {
        error!(
            xid = %current.xid,
            branch_id = current.branch_id,
            phase = %phase,
            status = %current.status,
            claim_phase = ?current.claim_phase,
            "Fence ordering violation"
        );
        FenceError::IllegalStatus {
            xid: current.xid.clone(),
            branch_id: current.branch_id,
            status: current.status,
            phase,
        }
    }

    async fn run_claimed(
        &self,
        phase: Phase,
        claim_id: i64,
        method: &MethodHandle,
        target: Bean,
        ctx: Arc<ActionContext>,
    ) -> Result<bool, FenceError> {
        let (xid, branch_id) = (ctx.xid.clone(), ctx.branch_id);
        let terminal = match phase {
            Phase::Commit => FenceStatus::Committed,
            Phase::Rollback => FenceStatus::RolledBack,
        };

        let call = method.invoke_phase(target, ctx);
        tokio::pin!(call);
        let mut renew = tokio::time::interval(
            (self.suspicious_timeout / 3).max(MIN_RENEW_INTERVAL),
        );
        renew.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        renew.tick().await;

        let outcome = loop {
            tokio::select! {
                outcome = &mut call => break outcome,
                _ = renew.tick() => self.renew(&xid, branch_id, claim_id).await,
            }
        };

        match outcome {
            Ok(true) => {
                let recorded = self
                    .store
                    .resolve_claim(&xid, branch_id, claim_id, terminal)
                    .await?;
                if recorded {
                    Ok(true)
                } else {
                    error!(
                        xid = %xid,
                        branch_id = branch_id,
                        phase = %phase,
                        claim_id = claim_id,
                        "Phase method succeeded but fence claim was taken over"
                    );
                    Err(FenceError::LostClaim { xid, branch_id })
                }
            }
            Ok(false) => {
                self.release(&xid, branch_id, claim_id).await;
                Ok(false)
            }
            Err(e) => {
                self.release(&xid, branch_id, claim_id).await;
                Err(FenceError::Business(e))
            }
        }
    }

    /// Keep a held claim from going stale while the phase method runs
    async fn renew(&self, xid: &str, branch_id: i64, claim_id: i64) {
        match self.store.renew_claim(xid, branch_id, claim_id).await {
            Ok(true) => {}
            Ok(false) => warn!(
                xid = %xid,
                branch_id = branch_id,
                claim_id = claim_id,
                "Fence claim lost while phase method is running"
            ),
            Err(e) => warn!(xid = %xid, branch_id = branch_id, error = %e, "Fence claim renewal failed"),
        }
    }

    /// Hand the claim back after a failed phase method
    ///
    /// If this write fails the row stays SUSPICIOUS and is reclaimed after
    /// the suspicious timeout.
    async fn release(&self, xid: &str, branch_id: i64, claim_id: i64) {
        match self
            .store
            .resolve_claim(xid, branch_id, claim_id, FenceStatus::NotStarted)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(xid = %xid, branch_id = branch_id, "Fence claim already gone on release"),
            Err(e) => warn!(xid = %xid, branch_id = branch_id, error = %e, "Fence release failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Ledger {
        calls: AtomicUsize,
    }

    fn handler() -> (TccFenceHandler, Arc<MemoryFenceStore>) {
        let store = Arc::new(MemoryFenceStore::new());
        (TccFenceHandler::new(store.clone()), store)
    }

    fn counting(name: &str, outcome: bool) -> MethodHandle {
        MethodHandle::new(name, move |ledger: Arc<Ledger>, _| async move {
            ledger.calls.fetch_add(1, Ordering::SeqCst);
            Ok(outcome.into())
        })
    }

    fn ctx(xid: &str, branch_id: i64) -> Arc<ActionContext> {
        Arc::new(ActionContext::new(xid, branch_id, "payOrder", Map::new()))
    }

    fn ledger() -> (Arc<Ledger>, Bean) {
        let ledger = Arc::new(Ledger {
            calls: AtomicUsize::new(0),
        });
        let bean: Bean = ledger.clone();
        (ledger, bean)
    }

    #[tokio::test]
    async fn test_commit_is_idempotent() {
        let (fence, store) = handler();
        let (ledger, bean) = ledger();
        let commit = counting("commit", true);

        assert!(fence.commit_fence(&commit, bean.clone(), ctx("x", 1)).await.unwrap());
        assert!(fence.commit_fence(&commit, bean, ctx("x", 1)).await.unwrap());

        assert_eq!(ledger.calls.load(Ordering::SeqCst), 1);
        let record = store.get("x", 1).await.unwrap().unwrap();
        assert_eq!(record.status, FenceStatus::Committed);
    }

    #[tokio::test]
    async fn test_rollback_after_commit_rejected() {
        let (fence, _) = handler();
        let (ledger, bean) = ledger();

        fence
            .commit_fence(&counting("commit", true), bean.clone(), ctx("x", 1))
            .await
            .unwrap();
        let err = fence
            .rollback_fence(&counting("rollback", true), bean, ctx("x", 1))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FenceError::IllegalStatus {
                status: FenceStatus::Committed,
                phase: Phase::Rollback,
                ..
            }
        ));
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_rollback_blocks_late_try() {
        let (fence, store) = handler();
        let (ledger, bean) = ledger();

        assert!(
            fence
                .rollback_fence(&counting("rollback", true), bean, ctx("x", 2))
                .await
                .unwrap()
        );
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.get("x", 2).await.unwrap().unwrap().status,
            FenceStatus::RolledBack
        );

        let tried = AtomicUsize::new(0);
        let err = fence
            .prepare_fence("x", 2, "payOrder", || async {
                tried.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FenceError::Hanging {
                status: FenceStatus::RolledBack,
                ..
            }
        ));
        assert_eq!(tried.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prepare_then_commit() {
        let (fence, store) = handler();
        let (_, bean) = ledger();

        assert!(
            fence
                .prepare_fence("x", 3, "payOrder", || async { Ok(true) })
                .await
                .unwrap()
        );
        assert_eq!(
            store.get("x", 3).await.unwrap().unwrap().status,
            FenceStatus::NotStarted
        );

        assert!(
            fence
                .commit_fence(&counting("commit", true), bean, ctx("x", 3))
                .await
                .unwrap()
        );
        assert_eq!(
            store.get("x", 3).await.unwrap().unwrap().status,
            FenceStatus::Committed
        );
    }

    #[tokio::test]
    async fn test_failed_commit_releases_claim() {
        let (fence, store) = handler();
        let (ledger, bean) = ledger();

        assert!(
            !fence
                .commit_fence(&counting("commit", false), bean.clone(), ctx("x", 4))
                .await
                .unwrap()
        );
        assert_eq!(
            store.get("x", 4).await.unwrap().unwrap().status,
            FenceStatus::NotStarted
        );

        // Redelivery runs the method again and can now win
        assert!(
            fence
                .commit_fence(&counting("commit", true), bean, ctx("x", 4))
                .await
                .unwrap()
        );
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_business_error_is_unwrapped() {
        let (fence, store) = handler();
        let (_, bean) = ledger();
        let failing = MethodHandle::new("commit", |_: Arc<Ledger>, _| async {
            Err(ActionError::business("card declined"))
        });

        let err = fence.commit_fence(&failing, bean, ctx("x", 5)).await.unwrap_err();
        match err {
            FenceError::Business(ActionError::Business(inner)) => {
                assert_eq!(inner.to_string(), "card declined")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            store.get("x", 5).await.unwrap().unwrap().status,
            FenceStatus::NotStarted
        );
    }

    #[tokio::test]
    async fn test_fresh_claim_is_busy_stale_claim_reclaimed() {
        let store = Arc::new(MemoryFenceStore::new());
        let fence = TccFenceHandler::with_suspicious_timeout(store.clone(), Duration::from_secs(30));
        let (ledger, bean) = ledger();

        let mut record = FenceRecord::claimed("x", 6, "payOrder", Phase::Commit);
        store.insert(&record).await.unwrap();

        assert!(
            !fence
                .commit_fence(&counting("commit", true), bean.clone(), ctx("x", 6))
                .await
                .unwrap()
        );
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 0);

        // Simulate a participant that crashed a minute ago
        record.branch_id = 7;
        record.updated_at -= 60_000;
        store.insert(&record).await.unwrap();

        assert!(
            fence
                .commit_fence(&counting("commit", true), bean, ctx("x", 7))
                .await
                .unwrap()
        );
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 1);
        let stored = store.get("x", 7).await.unwrap().unwrap();
        assert_eq!(stored.status, FenceStatus::Committed);
        assert_eq!(stored.claim_id, 2);
    }

    #[tokio::test]
    async fn test_rollback_never_takes_over_abandoned_commit() {
        let store = Arc::new(MemoryFenceStore::new());
        let fence = TccFenceHandler::with_suspicious_timeout(store.clone(), Duration::from_secs(1));
        let (ledger, bean) = ledger();

        // Commit ran its method, then the participant died before recording it
        let mut record = FenceRecord::claimed("x", 9, "payOrder", Phase::Commit);
        record.updated_at -= 5_000;
        store.insert(&record).await.unwrap();

        let err = fence
            .rollback_fence(&counting("rollback", true), bean.clone(), ctx("x", 9))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FenceError::IllegalStatus {
                status: FenceStatus::Suspicious,
                phase: Phase::Rollback,
                ..
            }
        ));
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.get("x", 9).await.unwrap().unwrap().claim_phase,
            Some(Phase::Commit)
        );

        // The redelivered commit repairs it
        assert!(
            fence
                .commit_fence(&counting("commit", true), bean, ctx("x", 9))
                .await
                .unwrap()
        );
        assert_eq!(
            store.get("x", 9).await.unwrap().unwrap().status,
            FenceStatus::Committed
        );
    }

    #[tokio::test]
    async fn test_rollback_waits_on_live_commit_claim() {
        let (fence, store) = handler();
        let (ledger, bean) = ledger();
        store
            .insert(&FenceRecord::claimed("x", 10, "payOrder", Phase::Commit))
            .await
            .unwrap();

        assert!(
            !fence
                .rollback_fence(&counting("rollback", true), bean, ctx("x", 10))
                .await
                .unwrap()
        );
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_method_keeps_claim_past_timeout() {
        let store = Arc::new(MemoryFenceStore::new());
        let fence = Arc::new(TccFenceHandler::with_suspicious_timeout(
            store.clone(),
            Duration::from_millis(300),
        ));
        let (ledger, bean) = ledger();
        let slow = Arc::new(MethodHandle::new("commit", |ledger: Arc<Ledger>, _| async move {
            ledger.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(900)).await;
            Ok(true.into())
        }));

        let first = {
            let (fence, slow, bean) = (fence.clone(), slow.clone(), bean.clone());
            tokio::spawn(async move { fence.commit_fence(&slow, bean, ctx("x", 11)).await })
        };

        // Well past the timeout, but the holder is still renewing
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!fence.commit_fence(&slow, bean, ctx("x", 11)).await.unwrap());

        assert!(first.await.unwrap().unwrap());
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.get("x", 11).await.unwrap().unwrap().status,
            FenceStatus::Committed
        );
    }

    #[tokio::test]
    async fn test_taken_over_holder_cannot_record() {
        let store = Arc::new(MemoryFenceStore::new());
        let fence = TccFenceHandler::with_suspicious_timeout(store.clone(), Duration::from_secs(30));
        let (_, bean) = ledger();

        // Another instance takes the claim over while this method runs
        let takeover_store = store.clone();
        let commit = MethodHandle::new("commit", move |_: Arc<Ledger>, _| {
            let store = takeover_store.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let taken = store
                    .reclaim_stale("x", 12, Phase::Commit, Duration::ZERO)
                    .await
                    .unwrap();
                assert_eq!(taken, Some(2));
                Ok(true.into())
            }
        });

        let err = fence.commit_fence(&commit, bean, ctx("x", 12)).await.unwrap_err();
        assert!(matches!(err, FenceError::LostClaim { branch_id: 12, .. }));
        assert_eq!(
            store.get("x", 12).await.unwrap().unwrap().status,
            FenceStatus::Suspicious
        );
    }

    #[tokio::test]
    async fn test_clean_before_keeps_recent() {
        let (fence, store) = handler();
        let (_, bean) = ledger();
        fence
            .commit_fence(&counting("commit", true), bean, ctx("x", 8))
            .await
            .unwrap();

        let past = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(fence.clean_before(past, 100).await.unwrap(), 0);
        let future = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(fence.clean_before(future, 100).await.unwrap(), 1);
        assert!(store.is_empty());
    }
}
