//! TCC Error Types
//!
//! Three layers:
//! - [`ActionError`]: raised by (or while calling) a business phase method
//! - [`FenceError`]: tagged result of the fencing path
//! - [`TccError`]: registration and branch-execution errors surfaced to callers

use thiserror::Error;

use super::fence::FenceStatus;
use super::status::Phase;

/// Error raised while invoking a phase method
#[derive(Error, Debug)]
pub enum ActionError {
    /// Failure raised by the business code itself
    #[error("business action failed: {0}")]
    Business(#[from] anyhow::Error),

    /// Bound method was handed a target of the wrong concrete type
    #[error("target instance is not a {expected}")]
    TargetMismatch { expected: &'static str },

    /// Method returned something other than void / bool / TwoPhaseResult
    #[error("method {method} returned an unsupported value: {found}")]
    UnexpectedReturn { method: String, found: String },

    /// Proxy called with a method its interface does not declare
    #[error("method {method} not declared on interface {interface}")]
    UnknownMethod { interface: String, method: String },

    /// Try phase refused by the fence
    #[error("try rejected by fence: {0}")]
    Fenced(Box<FenceError>),
}

impl ActionError {
    pub fn code(&self) -> &'static str {
        match self {
            ActionError::Business(_) => "BUSINESS_ERROR",
            ActionError::TargetMismatch { .. } => "TARGET_MISMATCH",
            ActionError::UnexpectedReturn { .. } => "UNEXPECTED_RETURN",
            ActionError::UnknownMethod { .. } => "UNKNOWN_METHOD",
            ActionError::Fenced(e) => e.code(),
        }
    }

    /// Convenience for business code: `Err(ActionError::business("no funds"))`
    pub fn business(msg: impl Into<String>) -> Self {
        ActionError::Business(anyhow::anyhow!(msg.into()))
    }
}

/// Fencing path error
///
/// `Business` carries the phase method's own error, unwrapped.
/// Everything else is an infrastructure or ordering failure.
#[derive(Error, Debug)]
pub enum FenceError {
    #[error("fence store error: {0}")]
    Store(String),

    #[error(transparent)]
    Business(#[from] ActionError),

    /// Phase requested against a record already decided the other way
    #[error("illegal fence status {status} for {phase}, xid={xid} branch_id={branch_id}")]
    IllegalStatus {
        xid: String,
        branch_id: i64,
        status: FenceStatus,
        phase: Phase,
    },

    /// Try phase arrived after phase two already touched the branch
    #[error("try rejected, branch already has fence status {status}, xid={xid} branch_id={branch_id}")]
    Hanging {
        xid: String,
        branch_id: i64,
        status: FenceStatus,
    },

    #[error("fence record vanished, xid={xid} branch_id={branch_id}")]
    RecordMissing { xid: String, branch_id: i64 },

    /// In-flight claim was taken over before the terminal write
    #[error("fence claim lost, xid={xid} branch_id={branch_id}")]
    LostClaim { xid: String, branch_id: i64 },
}

impl FenceError {
    pub fn code(&self) -> &'static str {
        match self {
            FenceError::Store(_) => "FENCE_STORE_ERROR",
            FenceError::Business(_) => "BUSINESS_ERROR",
            FenceError::IllegalStatus { .. } => "FENCE_ILLEGAL_STATUS",
            FenceError::Hanging { .. } => "FENCE_HANGING",
            FenceError::RecordMissing { .. } => "FENCE_RECORD_MISSING",
            FenceError::LostClaim { .. } => "FENCE_LOST_CLAIM",
        }
    }
}

impl From<sqlx::Error> for FenceError {
    fn from(e: sqlx::Error) -> Self {
        FenceError::Store(e.to_string())
    }
}

/// Registration and branch-execution errors
#[derive(Error, Debug)]
pub enum TccError {
    // === Fatal: coordinator / participant mismatch ===
    #[error("TCC resource does not exist, resourceId: {0}")]
    ResourceNotFound(String),

    #[error("TCC resource is not available, resourceId: {0}")]
    ResourceNotAvailable(String),

    #[error("TCC fence requested but no fence handler configured, resourceId: {0}")]
    FenceNotConfigured(String),

    // === Fatal: registration-time configuration errors ===
    #[error("more than one remoting parser claims bean: {0}")]
    AmbiguousParser(String),

    #[error("interface of remoting bean {bean} is not resolvable: {interface}")]
    InterfaceUnavailable { bean: String, interface: String },

    #[error("method {method} not found on interface {interface}")]
    MethodNotFound { interface: String, method: String },

    #[error("parse remoting bean {bean} failed: {reason}")]
    ParseRemoting { bean: String, reason: String },

    #[error("resource registration failed: {0}")]
    Registration(String),

    // === Business failure surfaced through the fencing path ===
    #[error("business error in {resource_id}, xid={xid} branch_id={branch_id}: {source}")]
    Business {
        resource_id: String,
        xid: String,
        branch_id: i64,
        #[source]
        source: ActionError,
    },

    #[error("invalid application data: {0}")]
    ApplicationData(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl TccError {
    pub fn code(&self) -> &'static str {
        match self {
            TccError::ResourceNotFound(_) => "RESOURCE_NOT_FOUND",
            TccError::ResourceNotAvailable(_) => "RESOURCE_NOT_AVAILABLE",
            TccError::FenceNotConfigured(_) => "FENCE_NOT_CONFIGURED",
            TccError::AmbiguousParser(_) => "AMBIGUOUS_PARSER",
            TccError::InterfaceUnavailable { .. } => "INTERFACE_UNAVAILABLE",
            TccError::MethodNotFound { .. } => "METHOD_NOT_FOUND",
            TccError::ParseRemoting { .. } => "PARSE_REMOTING",
            TccError::Registration(_) => "REGISTRATION_FAILED",
            TccError::Business { .. } => "BUSINESS_ERROR",
            TccError::ApplicationData(_) => "APPLICATION_DATA",
            TccError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Fatal errors indicate static misconfiguration or a protocol mismatch.
    /// Retrying them cannot succeed.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            TccError::Business { .. } | TccError::ApplicationData(_)
        )
    }
}

impl From<serde_json::Error> for TccError {
    fn from(e: serde_json::Error) -> Self {
        TccError::ApplicationData(e.to_string())
    }
}
