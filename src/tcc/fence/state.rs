//! Fence Record State
//!
//! Status IDs are stored as SMALLINT in `tcc_fence_log`.

use std::fmt;

use crate::tcc::status::Phase;

/// Phase-two progress of one (xid, branch_id)
///
/// ```text
/// NOT_STARTED ──claim──▶ SUSPICIOUS ──ok──▶ COMMITTED | ROLLED_BACK
///      ▲                     │
///      └──────release────────┘  (phase method failed)
/// ```
///
/// A SUSPICIOUS record carries the phase that claimed it and the claim id
/// of its current holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum FenceStatus {
    /// Try ran (or the branch is known), phase two not applied
    NotStarted = 1,

    /// Terminal: commit applied
    Committed = 2,

    /// Terminal: rollback applied
    RolledBack = 3,

    /// Phase two in flight, outcome unknown until the claim resolves
    Suspicious = 4,
}

impl FenceStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, FenceStatus::Committed | FenceStatus::RolledBack)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(FenceStatus::NotStarted),
            2 => Some(FenceStatus::Committed),
            3 => Some(FenceStatus::RolledBack),
            4 => Some(FenceStatus::Suspicious),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FenceStatus::NotStarted => "NOT_STARTED",
            FenceStatus::Committed => "COMMITTED",
            FenceStatus::RolledBack => "ROLLED_BACK",
            FenceStatus::Suspicious => "SUSPICIOUS",
        }
    }
}

impl fmt::Display for FenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for FenceStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        FenceStatus::from_id(value).ok_or(())
    }
}

/// Durable fence record keyed by (xid, branch_id)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenceRecord {
    pub xid: String,
    pub branch_id: i64,
    pub action_name: String,
    pub status: FenceStatus,
    /// Phase holding the SUSPICIOUS claim, if any
    pub claim_phase: Option<Phase>,
    /// Bumped on every claim and takeover; only the current holder may resolve
    pub claim_id: i64,
    /// Created timestamp (millis)
    pub created_at: i64,
    /// Last updated timestamp (millis)
    pub updated_at: i64,
}

impl FenceRecord {
    pub fn new(
        xid: impl Into<String>,
        branch_id: i64,
        action_name: impl Into<String>,
        status: FenceStatus,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            xid: xid.into(),
            branch_id,
            action_name: action_name.into(),
            status,
            claim_phase: None,
            claim_id: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fresh record already claimed by `phase`
    pub fn claimed(
        xid: impl Into<String>,
        branch_id: i64,
        action_name: impl Into<String>,
        phase: Phase,
    ) -> Self {
        Self {
            claim_phase: Some(phase),
            claim_id: 1,
            ..Self::new(xid, branch_id, action_name, FenceStatus::Suspicious)
        }
    }
}

impl fmt::Display for FenceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fence[{}:{}] action={} status={}",
            self.xid, self.branch_id, self.action_name, self.status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(FenceStatus::Committed.is_terminal());
        assert!(FenceStatus::RolledBack.is_terminal());
        assert!(!FenceStatus::NotStarted.is_terminal());
        assert!(!FenceStatus::Suspicious.is_terminal());
    }

    #[test]
    fn test_invalid_status_id() {
        assert!(FenceStatus::from_id(0).is_none());
        assert!(FenceStatus::from_id(5).is_none());
        assert_eq!(FenceStatus::try_from(4), Ok(FenceStatus::Suspicious));
    }

    #[test]
    fn test_record_display() {
        let record = FenceRecord::new("xid1", 9, "payOrder", FenceStatus::NotStarted);
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(
            record.to_string(),
            "Fence[xid1:9] action=payOrder status=NOT_STARTED"
        );
        assert_eq!(record.claim_phase, None);
    }

    #[test]
    fn test_claimed_record_names_its_phase() {
        let record = FenceRecord::claimed("xid1", 9, "payOrder", Phase::Rollback);
        assert_eq!(record.status, FenceStatus::Suspicious);
        assert_eq!(record.claim_phase, Some(Phase::Rollback));
        assert_eq!(record.claim_id, 1);
    }
}
