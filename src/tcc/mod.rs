//! TCC Participant
//!
//! Participant side of Try-Confirm/Cancel distributed transactions:
//! holds the registered two-phase resources and executes the coordinator's
//! phase-two decision against them.
//!
//! # Branch Lifecycle
//!
//! ```text
//! try (intercepted) ──▶ coordinator decides ──▶ branch_commit   → commit method
//!                                          └──▶ branch_rollback → rollback method
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Fail Fast**: commit/rollback names are resolved when the resource is
//!    registered, never at phase two
//! 2. **Never Lose a Branch**: a failing phase method maps to a retryable
//!    status so the coordinator re-drives it
//! 3. **One Winner**: with fencing on, only one of commit / rollback is
//!    ever recorded for a (xid, branch_id)

pub mod context;
pub mod error;
pub mod fence;
pub mod manager;
pub mod proxy;
pub mod registrar;
pub mod resource;
pub mod status;


// Re-exports for convenience
pub use context::{ACTION_CONTEXT_KEY, ActionContext, USE_TCC_FENCE};
pub use error::{ActionError, FenceError, TccError};
pub use fence::{
    CleanerConfig, FenceCleanWorker, FenceRecord, FenceStatus, FenceStore, MemoryFenceStore,
    PgFenceStore, TccFenceHandler,
};
pub use manager::TccResourceManager;
pub use proxy::{
    ActionInvocation, FenceTryInterceptor, PassThroughInterceptor, TccActionInterceptor,
    TccProxy, create_proxy,
};
pub use registrar::{
    ChannelRegistrar, RegistrationReceiver, RegistrationRequest, RegistrationResponse,
    ResourceRegistrar, registrar_channel,
};
pub use resource::{
    Bean, DEFAULT_RESOURCE_GROUP, MethodHandle, MethodReturn, ServiceInterface, TccResource,
    TwoPhaseAction, TwoPhaseResult, WeakBean,
};
pub use status::{BranchStatus, BranchType, Phase};
