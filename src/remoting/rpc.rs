//! RPC export / reference beans
//!
//! An RPC integration hands the container one [`RpcServiceBean`] per exported
//! service and one [`RpcReferenceBean`] per consumed stub.
//! [`RpcRemotingParser`] recognises both for a single protocol tag, so one
//! parser instance is installed per framework (Dubbo, SOFA-RPC, gRPC, ...).

use std::sync::Arc;

use super::desc::{Protocol, RemotingDesc};
use super::parser::RemotingParser;
use crate::tcc::error::TccError;
use crate::tcc::resource::{Bean, ServiceInterface};

/// Provider-side export of `target`
pub struct RpcServiceBean {
    /// `None` if the framework could not resolve the contract locally
    pub interface: Option<Arc<ServiceInterface>>,
    pub interface_name: String,
    pub version: Option<String>,
    pub group: Option<String>,
    pub protocol: Protocol,
    /// Implementation behind the export
    pub target: Bean,
}

impl RpcServiceBean {
    pub fn new(interface: Arc<ServiceInterface>, protocol: Protocol, target: Bean) -> Self {
        Self {
            interface_name: interface.name().to_string(),
            interface: Some(interface),
            version: None,
            group: None,
            protocol,
            target,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// Consumer-side stub of a remote service
pub struct RpcReferenceBean {
    pub interface: Option<Arc<ServiceInterface>>,
    pub interface_name: String,
    pub version: Option<String>,
    pub group: Option<String>,
    pub protocol: Protocol,
}

impl RpcReferenceBean {
    pub fn new(
        interface: Option<Arc<ServiceInterface>>,
        interface_name: impl Into<String>,
        protocol: Protocol,
    ) -> Self {
        Self {
            interface,
            interface_name: interface_name.into(),
            version: None,
            group: None,
            protocol,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

pub struct RpcRemotingParser {
    protocol: Protocol,
}

impl RpcRemotingParser {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    fn service<'a>(&self, bean: &'a Bean) -> Option<&'a RpcServiceBean> {
        (**bean)
            .downcast_ref::<RpcServiceBean>()
            .filter(|s| s.protocol == self.protocol)
    }

    fn reference<'a>(&self, bean: &'a Bean) -> Option<&'a RpcReferenceBean> {
        (**bean)
            .downcast_ref::<RpcReferenceBean>()
            .filter(|r| r.protocol == self.protocol)
    }

    fn check_interface_name(bean_name: &str, interface_name: &str) -> Result<(), TccError> {
        if interface_name.trim().is_empty() {
            return Err(TccError::ParseRemoting {
                bean: bean_name.to_string(),
                reason: "missing interface name".to_string(),
            });
        }
        Ok(())
    }
}

impl RemotingParser for RpcRemotingParser {
    fn name(&self) -> &'static str {
        "rpc"
    }

    fn is_reference(&self, bean: &Bean, _bean_name: &str) -> bool {
        self.reference(bean).is_some()
    }

    fn is_service(&self, bean: &Bean, _bean_name: &str) -> bool {
        self.service(bean).is_some()
    }

    fn service_desc(
        &self,
        bean: &Bean,
        bean_name: &str,
    ) -> Result<Option<RemotingDesc>, TccError> {
        if let Some(service) = self.service(bean) {
            Self::check_interface_name(bean_name, &service.interface_name)?;
            let desc = RemotingDesc {
                interface: service.interface.clone(),
                interface_name: service.interface_name.clone(),
                protocol: self.protocol,
                group: service.group.clone(),
                unique_id: service.version.clone(),
                is_reference: false,
                target: Some(Arc::downgrade(&service.target)),
            };
            return Ok(Some(desc));
        }

        if let Some(reference) = self.reference(bean) {
            Self::check_interface_name(bean_name, &reference.interface_name)?;
            let desc = RemotingDesc {
                interface: reference.interface.clone(),
                interface_name: reference.interface_name.clone(),
                protocol: self.protocol,
                group: reference.group.clone(),
                unique_id: reference.version.clone(),
                is_reference: false,
                target: None,
            };
            return Ok(Some(desc));
        }

        Ok(None)
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Payment;

    fn interface() -> Arc<ServiceInterface> {
        ServiceInterface::builder("demo.PaymentService").build()
    }

    #[test]
    fn test_service_desc_fields() {
        let target: Bean = Arc::new(Payment);
        let bean: Bean = Arc::new(
            RpcServiceBean::new(interface(), Protocol::Dubbo, target.clone())
                .version("1.0.0")
                .group("pay"),
        );
        let parser = RpcRemotingParser::new(Protocol::Dubbo);

        assert!(parser.is_service(&bean, "payment"));
        assert!(!parser.is_reference(&bean, "payment"));

        let desc = parser.service_desc(&bean, "payment").unwrap().unwrap();
        assert_eq!(desc.interface_name, "demo.PaymentService");
        assert_eq!(desc.unique_id.as_deref(), Some("1.0.0"));
        assert_eq!(desc.group.as_deref(), Some("pay"));
        assert_eq!(desc.protocol, Protocol::Dubbo);
        assert!(Arc::ptr_eq(&desc.target().unwrap(), &target));
    }

    #[test]
    fn test_protocol_must_match() {
        let bean: Bean = Arc::new(RpcReferenceBean::new(
            Some(interface()),
            "demo.PaymentService",
            Protocol::Grpc,
        ));
        let dubbo = RpcRemotingParser::new(Protocol::Dubbo);
        let grpc = RpcRemotingParser::new(Protocol::Grpc);

        assert!(!dubbo.is_remoting(&bean, "payRef"));
        assert!(dubbo.service_desc(&bean, "payRef").unwrap().is_none());
        assert!(grpc.is_reference(&bean, "payRef"));

        let desc = grpc.service_desc(&bean, "payRef").unwrap().unwrap();
        assert!(desc.target.is_none());
        assert_eq!(desc.protocol, Protocol::Grpc);
    }

    #[test]
    fn test_missing_interface_name() {
        let bean: Bean = Arc::new(RpcReferenceBean::new(None, "  ", Protocol::SofaRpc));
        let err = RpcRemotingParser::new(Protocol::SofaRpc)
            .service_desc(&bean, "broken")
            .unwrap_err();
        assert!(matches!(err, TccError::ParseRemoting { ref bean, .. } if bean == "broken"));
    }
}
