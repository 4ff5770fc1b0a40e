//! Remoting Parser Trait
//!
//! One implementation per integration (in-process beans, each RPC framework).

use super::desc::{Protocol, RemotingDesc};
use crate::tcc::error::TccError;
use crate::tcc::resource::Bean;

/// Classifies beans and describes the remoting ones
///
/// All predicates must be side-effect free.
pub trait RemotingParser: Send + Sync {
    /// Parser name for logging
    fn name(&self) -> &'static str;

    fn is_remoting(&self, bean: &Bean, bean_name: &str) -> bool {
        self.is_reference(bean, bean_name) || self.is_service(bean, bean_name)
    }

    /// Consumer-side stub of a remote service
    fn is_reference(&self, bean: &Bean, bean_name: &str) -> bool;

    /// Provider-side exported service
    fn is_service(&self, bean: &Bean, bean_name: &str) -> bool;

    /// Describe the bean, `Ok(None)` if this parser does not handle it
    fn service_desc(&self, bean: &Bean, bean_name: &str)
    -> Result<Option<RemotingDesc>, TccError>;

    fn protocol(&self) -> Protocol;
}
