//! Remoting Bean Discovery
//!
//! Finds the container beans that expose or consume two-phase actions.
//!
//! # Flow
//!
//! ```text
//! container bean ──▶ RemotingParserRegistry (first-match parser)
//!                      ├─ service   ──▶ TccResource per two-phase method ──▶ TccResourceManager
//!                      └─ reference ──▶ TccBeanInspector ──▶ TccProxy
//! ```

pub mod desc;
pub mod inspector;
pub mod local;
pub mod parser;
pub mod registry;
pub mod rpc;

pub use desc::{Protocol, RemotingDesc};
pub use inspector::{BeanContainer, FACTORY_BEAN_PREFIX, TccBeanInspector};
pub use local::{LocalTccBean, LocalTccParser};
pub use parser::RemotingParser;
pub use registry::RemotingParserRegistry;
pub use rpc::{RpcReferenceBean, RpcRemotingParser, RpcServiceBean};
