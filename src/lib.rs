//! TCC Participant - Try-Confirm/Cancel branch execution
//!
//! Participant side of TCC distributed transactions: discovers remoting
//! beans, registers their two-phase actions as resources, and runs the
//! coordinator's commit/rollback decision against them.
//!
//! # Modules
//!
//! - [`tcc`] - Resource model, resource manager, fencing, proxy
//! - [`remoting`] - Remoting parsers, descriptor registry, proxy eligibility
//! - [`participant`] - Composition root wiring the above together
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod logging;
pub mod participant;
pub mod remoting;
pub mod tcc;

// Convenient re-exports at crate root
pub use config::{ConfigError, TccConfig};
pub use participant::TccParticipant;
pub use remoting::{
    BeanContainer, LocalTccBean, Protocol, RemotingDesc, RemotingParser, RemotingParserRegistry,
    RpcReferenceBean, RpcServiceBean, TccBeanInspector,
};
pub use tcc::{
    ActionContext, ActionError, Bean, BranchStatus, BranchType, MethodHandle, MethodReturn,
    ServiceInterface, TccError, TccResource, TccResourceManager, TwoPhaseAction, TwoPhaseResult,
};
