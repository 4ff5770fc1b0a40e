//! In-process TCC beans
//!
//! A [`LocalTccBean`] marks a target whose interface declares two-phase
//! actions but is called in-process. It is both the provider (its actions
//! become resources) and the consumer (calls to it are proxied).

use std::sync::Arc;

use super::desc::{Protocol, RemotingDesc};
use super::parser::RemotingParser;
use crate::tcc::error::TccError;
use crate::tcc::resource::{Bean, ServiceInterface};

pub struct LocalTccBean {
    pub interface: Arc<ServiceInterface>,
    pub target: Bean,
}

impl LocalTccBean {
    pub fn new(interface: Arc<ServiceInterface>, target: Bean) -> Self {
        Self { interface, target }
    }
}

/// Parser for [`LocalTccBean`], protocol `IN_JVM`
pub struct LocalTccParser;

impl LocalTccParser {
    fn local(bean: &Bean) -> Option<&LocalTccBean> {
        (**bean).downcast_ref::<LocalTccBean>()
    }
}

impl RemotingParser for LocalTccParser {
    fn name(&self) -> &'static str {
        "local-tcc"
    }

    fn is_reference(&self, bean: &Bean, _bean_name: &str) -> bool {
        Self::local(bean).is_some()
    }

    fn is_service(&self, bean: &Bean, _bean_name: &str) -> bool {
        Self::local(bean).is_some()
    }

    fn service_desc(
        &self,
        bean: &Bean,
        _bean_name: &str,
    ) -> Result<Option<RemotingDesc>, TccError> {
        Ok(Self::local(bean).map(|local| {
            RemotingDesc::new(local.interface.clone(), Protocol::InJvm).with_target(&local.target)
        }))
    }

    fn protocol(&self) -> Protocol {
        Protocol::InJvm
    }
}
