//! Remoting Parser Registry
//!
//! Ordered parser set with first-match classification. Describing a
//! service-side bean registers every two-phase action on its interface with
//! the resource manager.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error, info};

use super::desc::RemotingDesc;
use super::parser::RemotingParser;
use crate::tcc::error::TccError;
use crate::tcc::manager::TccResourceManager;
use crate::tcc::resource::{Bean, DEFAULT_RESOURCE_GROUP, TccResource};

pub struct RemotingParserRegistry {
    parsers: Vec<Arc<dyn RemotingParser>>,
    /// bean name → descriptor
    descs: DashMap<String, Arc<RemotingDesc>>,
    resource_manager: Arc<TccResourceManager>,
    resource_group_id: String,
}

impl RemotingParserRegistry {
    pub fn new(resource_manager: Arc<TccResourceManager>) -> Self {
        Self {
            parsers: Vec::new(),
            descs: DashMap::new(),
            resource_manager,
            resource_group_id: DEFAULT_RESOURCE_GROUP.to_string(),
        }
    }

    /// Append a parser; earlier parsers win classification
    pub fn with_parser(mut self, parser: Arc<dyn RemotingParser>) -> Self {
        self.parsers.push(parser);
        self
    }

    pub fn with_resource_group(mut self, group: impl Into<String>) -> Self {
        self.resource_group_id = group.into();
        self
    }

    pub fn parsers(&self) -> &[Arc<dyn RemotingParser>] {
        &self.parsers
    }

    pub fn resource_manager(&self) -> &Arc<TccResourceManager> {
        &self.resource_manager
    }

    /// First parser (registration order) claiming the bean
    pub fn is_remoting(&self, bean: &Bean, bean_name: &str) -> Option<Arc<dyn RemotingParser>> {
        self.parsers
            .iter()
            .find(|p| p.is_remoting(bean, bean_name))
            .cloned()
    }

    pub fn is_reference(&self, bean: &Bean, bean_name: &str) -> bool {
        self.parsers.iter().any(|p| p.is_reference(bean, bean_name))
    }

    pub fn is_service(&self, bean: &Bean, bean_name: &str) -> bool {
        self.parsers.iter().any(|p| p.is_service(bean, bean_name))
    }

    /// Ask every parser; more than one answer is a configuration error
    pub fn service_desc(
        &self,
        bean: &Bean,
        bean_name: &str,
    ) -> Result<Option<RemotingDesc>, TccError> {
        let mut found = None;
        for parser in &self.parsers {
            if let Some(desc) = parser.service_desc(bean, bean_name)? {
                if found.is_some() {
                    return Err(TccError::AmbiguousParser(bean_name.to_string()));
                }
                found = Some(desc);
            }
        }
        Ok(found)
    }

    /// Cached descriptor for a bean name
    pub fn remoting_desc(&self, bean_name: &str) -> Option<Arc<RemotingDesc>> {
        self.descs.get(bean_name).map(|d| d.value().clone())
    }

    /// Describe `bean` with `parser`, cache the result and register resources
    ///
    /// Returns `Ok(None)` if the parser produced no descriptor. Any resolution
    /// failure is returned immediately; resources registered before it stay
    /// registered.
    pub async fn parse_remoting_service(
        &self,
        bean: &Bean,
        bean_name: &str,
        parser: &dyn RemotingParser,
    ) -> Result<Option<Arc<RemotingDesc>>, TccError> {
        let claims = self
            .parsers
            .iter()
            .filter(|p| p.is_service(bean, bean_name))
            .count();
        if claims > 1 {
            error!(bean = %bean_name, parsers = claims, "More than one remoting parser claims service bean");
            return Err(TccError::AmbiguousParser(bean_name.to_string()));
        }

        let Some(mut desc) = parser.service_desc(bean, bean_name)? else {
            return Ok(None);
        };

        let is_service = parser.is_service(bean, bean_name);
        if parser.is_reference(bean, bean_name) {
            desc.is_reference = true;
        }

        let desc = Arc::new(desc);
        if self
            .descs
            .insert(bean_name.to_string(), desc.clone())
            .is_some()
        {
            debug!(bean = %bean_name, "Remoting descriptor replaced");
        }

        if is_service {
            self.register_service(bean, bean_name, &desc).await?;
        }

        info!(
            bean = %bean_name,
            interface = %desc.interface_name,
            protocol = %desc.protocol,
            parser = parser.name(),
            reference = desc.is_reference,
            "Remoting bean described"
        );
        Ok(Some(desc))
    }

    async fn register_service(
        &self,
        bean: &Bean,
        bean_name: &str,
        desc: &RemotingDesc,
    ) -> Result<(), TccError> {
        let interface = desc
            .interface
            .as_ref()
            .ok_or_else(|| TccError::InterfaceUnavailable {
                bean: bean_name.to_string(),
                interface: desc.interface_name.clone(),
            })?;

        // A parser that reports no separate target describes the bean itself
        let target = desc.target.clone().unwrap_or_else(|| Arc::downgrade(bean));

        for (prepare, action) in interface.two_phase_methods() {
            let resource = TccResource::resolve(interface, prepare, action, Some(target.clone()))
                .inspect_err(|e| {
                    error!(bean = %bean_name, action = %action.name, error = %e, "Parse remoting service failed")
                })?
                .with_resource_group(self.resource_group_id.as_str());
            self.resource_manager.register_resource(resource).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remoting::local::{LocalTccBean, LocalTccParser};
    use crate::remoting::rpc::{RpcReferenceBean, RpcRemotingParser, RpcServiceBean};
    use crate::remoting::desc::Protocol;
    use crate::tcc::registrar::MockRegistrar;
    use crate::tcc::resource::{MethodHandle, ServiceInterface, TwoPhaseAction};

    struct Stock;

    fn stock_interface(commit: &str) -> Arc<ServiceInterface> {
        ServiceInterface::builder("demo.StockService")
            .two_phase(
                TwoPhaseAction::new("deductStock").commit_method(commit),
                MethodHandle::new("prepare", |_: Arc<Stock>, _| async { Ok(true.into()) }),
            )
            .method(MethodHandle::new("commit", |_: Arc<Stock>, _| async { Ok(true.into()) }))
            .method(MethodHandle::new("rollback", |_: Arc<Stock>, _| async { Ok(true.into()) }))
            .build()
    }

    fn registry() -> (RemotingParserRegistry, Arc<MockRegistrar>) {
        let registrar = Arc::new(MockRegistrar::new());
        let rm = Arc::new(TccResourceManager::new(registrar.clone()));
        let registry = RemotingParserRegistry::new(rm)
            .with_parser(Arc::new(LocalTccParser))
            .with_parser(Arc::new(RpcRemotingParser::new(Protocol::Dubbo)));
        (registry, registrar)
    }

    fn dubbo_service(interface: Arc<ServiceInterface>) -> Bean {
        Arc::new(RpcServiceBean::new(interface, Protocol::Dubbo, Arc::new(Stock)))
    }

    #[tokio::test]
    async fn test_service_registers_resources() {
        let (registry, registrar) = registry();
        let bean = dubbo_service(stock_interface("commit"));

        let parser = registry.is_remoting(&bean, "stockService").unwrap();
        assert_eq!(parser.protocol(), Protocol::Dubbo);

        let desc = registry
            .parse_remoting_service(&bean, "stockService", parser.as_ref())
            .await
            .unwrap()
            .unwrap();
        assert!(!desc.is_reference);
        assert_eq!(registrar.registered(), vec!["deductStock".to_string()]);

        let resource = registry
            .resource_manager()
            .get_resource("deductStock")
            .unwrap();
        assert!(resource.target().is_some());
        assert_eq!(resource.resource_group_id, DEFAULT_RESOURCE_GROUP);
        assert!(registry.remoting_desc("stockService").is_some());
    }

    #[tokio::test]
    async fn test_reference_registers_nothing() {
        let (registry, registrar) = registry();
        let bean: Bean = Arc::new(RpcReferenceBean::new(
            Some(stock_interface("commit")),
            "demo.StockService",
            Protocol::Dubbo,
        ));

        let parser = registry.is_remoting(&bean, "stockRef").unwrap();
        let desc = registry
            .parse_remoting_service(&bean, "stockRef", parser.as_ref())
            .await
            .unwrap()
            .unwrap();

        assert!(desc.is_reference);
        assert!(registry.is_reference(&bean, "stockRef"));
        assert!(!registry.is_service(&bean, "stockRef"));
        assert!(registrar.registered().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_commit_fails_registration() {
        let (registry, registrar) = registry();
        let bean = dubbo_service(stock_interface("confirm"));
        let parser = registry.is_remoting(&bean, "stockService").unwrap();

        let err = registry
            .parse_remoting_service(&bean, "stockService", parser.as_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, TccError::MethodNotFound { ref method, .. } if method == "confirm"));
        assert!(err.is_fatal());
        assert!(registrar.registered().is_empty());
    }

    #[tokio::test]
    async fn test_service_without_interface() {
        let (registry, _) = registry();
        let bean: Bean = Arc::new(RpcServiceBean {
            interface: None,
            interface_name: "demo.Gone".into(),
            version: None,
            group: None,
            protocol: Protocol::Dubbo,
            target: Arc::new(Stock),
        });
        let parser = registry.is_remoting(&bean, "gone").unwrap();

        let err = registry
            .parse_remoting_service(&bean, "gone", parser.as_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, TccError::InterfaceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_ambiguous_service_claim() {
        let registrar = Arc::new(MockRegistrar::new());
        let rm = Arc::new(TccResourceManager::new(registrar));
        let registry = RemotingParserRegistry::new(rm)
            .with_parser(Arc::new(RpcRemotingParser::new(Protocol::Dubbo)))
            .with_parser(Arc::new(RpcRemotingParser::new(Protocol::Dubbo)));
        let bean = dubbo_service(stock_interface("commit"));

        let err = registry.service_desc(&bean, "stockService").unwrap_err();
        assert!(matches!(err, TccError::AmbiguousParser(ref name) if name == "stockService"));

        let parser = registry.is_remoting(&bean, "stockService").unwrap();
        let err = registry
            .parse_remoting_service(&bean, "stockService", parser.as_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, TccError::AmbiguousParser(_)));
    }

    #[tokio::test]
    async fn test_redescribe_overwrites_descriptor_keeps_resources() {
        let (registry, _) = registry();
        let service = dubbo_service(stock_interface("commit"));
        let parser = registry.is_remoting(&service, "stock").unwrap();
        registry
            .parse_remoting_service(&service, "stock", parser.as_ref())
            .await
            .unwrap();

        let reference: Bean = Arc::new(RpcReferenceBean::new(
            Some(stock_interface("commit")),
            "demo.StockService",
            Protocol::Dubbo,
        ));
        registry
            .parse_remoting_service(&reference, "stock", parser.as_ref())
            .await
            .unwrap();

        assert!(registry.remoting_desc("stock").unwrap().is_reference);
        assert!(
            registry
                .resource_manager()
                .get_resource("deductStock")
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_first_match_classification() {
        let (registry, _) = registry();
        let local: Bean = Arc::new(LocalTccBean::new(
            stock_interface("commit"),
            Arc::new(Stock),
        ));
        let parser = registry.is_remoting(&local, "localStock").unwrap();
        assert_eq!(parser.protocol(), Protocol::InJvm);

        let plain: Bean = Arc::new(Stock);
        assert!(registry.is_remoting(&plain, "plain").is_none());
        assert!(registry.service_desc(&plain, "plain").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_custom_resource_group() {
        let registrar = Arc::new(MockRegistrar::new());
        let rm = Arc::new(TccResourceManager::new(registrar));
        let registry = RemotingParserRegistry::new(rm)
            .with_parser(Arc::new(RpcRemotingParser::new(Protocol::Dubbo)))
            .with_resource_group("order-group");
        let bean = dubbo_service(stock_interface("commit"));
        let parser = registry.is_remoting(&bean, "s").unwrap();
        registry
            .parse_remoting_service(&bean, "s", parser.as_ref())
            .await
            .unwrap();

        let resource = registry
            .resource_manager()
            .get_resource("deductStock")
            .unwrap();
        assert_eq!(resource.resource_group_id, "order-group");
    }
}
