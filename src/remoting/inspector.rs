//! TCC Proxy Eligibility
//!
//! Decides, per container bean, whether calls to it must go through a
//! [`TccProxy`]. Deciding describes the bean through the registry, so
//! service-side resources get registered on the way.
//!
//! ```text
//! remoting?  ── yes ── IN_JVM?  ── yes ──▶ has two-phase actions
//!    │                   └─ no ──▶ false (reference resolved elsewhere)
//!    └─ no ── cached descriptor? ── yes ──▶ eligible(desc)
//!                 └─ no ── proxy + "&name" factory is remoting? ──▶ eligible(desc)
//! ```

use std::sync::Arc;

use tracing::debug;

use super::desc::{Protocol, RemotingDesc};
use super::registry::RemotingParserRegistry;
use crate::tcc::error::TccError;
use crate::tcc::proxy::{TccActionInterceptor, TccProxy, create_proxy};
use crate::tcc::resource::Bean;

/// Container key prefix addressing the factory that produced a bean
pub const FACTORY_BEAN_PREFIX: &str = "&";

/// View of the hosting container
pub trait BeanContainer: Send + Sync {
    fn get_bean(&self, name: &str) -> Option<Bean>;

    /// Bean is a container-generated dynamic proxy
    fn is_proxy(&self, bean: &Bean) -> bool;
}

pub struct TccBeanInspector {
    registry: Arc<RemotingParserRegistry>,
}

impl TccBeanInspector {
    pub fn new(registry: Arc<RemotingParserRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<RemotingParserRegistry> {
        &self.registry
    }

    pub async fn is_tcc_auto_proxy(
        &self,
        bean: &Bean,
        bean_name: &str,
        container: Option<&dyn BeanContainer>,
    ) -> Result<bool, TccError> {
        let is_remoting = self.describe(bean, bean_name).await?;
        let desc = self.registry.remoting_desc(bean_name);

        if is_remoting {
            return Ok(desc.is_some_and(|d| d.protocol == Protocol::InJvm && Self::is_tcc_proxy_target(&d)));
        }

        if let Some(desc) = desc {
            return Ok(Self::is_tcc_proxy_target(&desc));
        }

        if self.is_remoting_factory_bean(bean, bean_name, container).await? {
            return Ok(self
                .registry
                .remoting_desc(bean_name)
                .is_some_and(|d| Self::is_tcc_proxy_target(&d)));
        }

        Ok(false)
    }

    /// Interface declares two-phase actions and calls to it are local or
    /// go out through a reference
    pub fn is_tcc_proxy_target(desc: &RemotingDesc) -> bool {
        if !desc.has_two_phase_actions() {
            return false;
        }
        desc.protocol == Protocol::InJvm || desc.is_reference
    }

    /// Wrap `bean` in a [`TccProxy`] if it is eligible
    ///
    /// In-process beans are proxied around their local target; references
    /// around the stub itself.
    pub async fn auto_proxy(
        &self,
        bean: Bean,
        bean_name: &str,
        container: Option<&dyn BeanContainer>,
        interceptor: Arc<dyn TccActionInterceptor>,
    ) -> Result<Option<TccProxy>, TccError> {
        if !self.is_tcc_auto_proxy(&bean, bean_name, container).await? {
            return Ok(None);
        }

        let Some(desc) = self.registry.remoting_desc(bean_name) else {
            return Ok(None);
        };
        let Some(interface) = desc.interface.clone() else {
            return Ok(None);
        };

        let target = match desc.protocol {
            Protocol::InJvm => desc
                .target()
                .ok_or_else(|| TccError::ResourceNotAvailable(bean_name.to_string()))?,
            _ => bean,
        };

        debug!(bean = %bean_name, interface = %interface.name(), "Creating TCC proxy");
        Ok(Some(create_proxy(interface, target, interceptor)))
    }

    async fn is_remoting_factory_bean(
        &self,
        bean: &Bean,
        bean_name: &str,
        container: Option<&dyn BeanContainer>,
    ) -> Result<bool, TccError> {
        let Some(container) = container else {
            return Ok(false);
        };
        if !container.is_proxy(bean) {
            return Ok(false);
        }

        let factory_name = format!("{}{}", FACTORY_BEAN_PREFIX, bean_name);
        let Some(factory) = container.get_bean(&factory_name) else {
            return Ok(false);
        };

        // Described through the factory, cached under the product's name
        self.describe(&factory, bean_name).await
    }

    async fn describe(&self, bean: &Bean, bean_name: &str) -> Result<bool, TccError> {
        match self.registry.is_remoting(bean, bean_name) {
            Some(parser) => Ok(self
                .registry
                .parse_remoting_service(bean, bean_name, parser.as_ref())
                .await?
                .is_some()),
            None => Ok(false),
        }
    }
}
