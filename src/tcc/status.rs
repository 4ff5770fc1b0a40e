//! Branch Status and Branch Type
//!
//! Numeric IDs match the coordinator wire protocol.

use std::fmt;

/// Branch type of a transaction branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum BranchType {
    At = 0,
    Tcc = 1,
    Saga = 2,
    Xa = 3,
}

impl BranchType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(BranchType::At),
            1 => Some(BranchType::Tcc),
            2 => Some(BranchType::Saga),
            3 => Some(BranchType::Xa),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BranchType::At => "AT",
            BranchType::Tcc => "TCC",
            BranchType::Saga => "SAGA",
            BranchType::Xa => "XA",
        }
    }
}

impl fmt::Display for BranchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Phase-two outcome reported back to the coordinator
///
/// Retryable failures are re-driven by the coordinator.
/// Unretryable failures are terminal and need operator attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum BranchStatus {
    Unknown = 0,

    /// Terminal: commit applied
    PhaseTwoCommitted = 5,

    /// Commit did not apply, coordinator should retry
    PhaseTwoCommitFailedRetryable = 6,

    /// Terminal: commit rejected (ordering violation)
    PhaseTwoCommitFailedUnretryable = 7,

    /// Terminal: rollback applied
    PhaseTwoRollbacked = 8,

    /// Rollback did not apply, coordinator should retry
    PhaseTwoRollbackFailedRetryable = 9,

    /// Terminal: rollback rejected (ordering violation)
    PhaseTwoRollbackFailedUnretryable = 10,
}

impl BranchStatus {
    /// Check if the coordinator is expected to re-drive this branch
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BranchStatus::PhaseTwoCommitFailedRetryable
                | BranchStatus::PhaseTwoRollbackFailedRetryable
        )
    }

    /// Check if phase two finished successfully
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            BranchStatus::PhaseTwoCommitted | BranchStatus::PhaseTwoRollbacked
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(BranchStatus::Unknown),
            5 => Some(BranchStatus::PhaseTwoCommitted),
            6 => Some(BranchStatus::PhaseTwoCommitFailedRetryable),
            7 => Some(BranchStatus::PhaseTwoCommitFailedUnretryable),
            8 => Some(BranchStatus::PhaseTwoRollbacked),
            9 => Some(BranchStatus::PhaseTwoRollbackFailedRetryable),
            10 => Some(BranchStatus::PhaseTwoRollbackFailedUnretryable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BranchStatus::Unknown => "UNKNOWN",
            BranchStatus::PhaseTwoCommitted => "PHASE_TWO_COMMITTED",
            BranchStatus::PhaseTwoCommitFailedRetryable => "PHASE_TWO_COMMIT_FAILED_RETRYABLE",
            BranchStatus::PhaseTwoCommitFailedUnretryable => "PHASE_TWO_COMMIT_FAILED_UNRETRYABLE",
            BranchStatus::PhaseTwoRollbacked => "PHASE_TWO_ROLLBACKED",
            BranchStatus::PhaseTwoRollbackFailedRetryable => "PHASE_TWO_ROLLBACK_FAILED_RETRYABLE",
            BranchStatus::PhaseTwoRollbackFailedUnretryable => {
                "PHASE_TWO_ROLLBACK_FAILED_UNRETRYABLE"
            }
        }
    }
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for BranchStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        BranchStatus::from_id(value).ok_or(())
    }
}

/// Which half of phase two is being driven
///
/// IDs are persisted as the claiming phase of a fence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum Phase {
    Commit = 1,
    Rollback = 2,
}

impl Phase {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Phase::Commit),
            2 => Some(Phase::Rollback),
            _ => None,
        }
    }

    /// Status reported when the phase method ran to completion
    pub fn outcome(&self, success: bool) -> BranchStatus {
        match (self, success) {
            (Phase::Commit, true) => BranchStatus::PhaseTwoCommitted,
            (Phase::Commit, false) => BranchStatus::PhaseTwoCommitFailedRetryable,
            (Phase::Rollback, true) => BranchStatus::PhaseTwoRollbacked,
            (Phase::Rollback, false) => BranchStatus::PhaseTwoRollbackFailedRetryable,
        }
    }

    /// Terminal failure status for ordering violations
    pub fn unretryable(&self) -> BranchStatus {
        match self {
            Phase::Commit => BranchStatus::PhaseTwoCommitFailedUnretryable,
            Phase::Rollback => BranchStatus::PhaseTwoRollbackFailedUnretryable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Commit => "commit",
            Phase::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
