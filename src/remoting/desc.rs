//! Remoting Service Descriptor

use std::fmt;
use std::sync::{Arc, Weak};

use crate::tcc::resource::{Bean, ServiceInterface, WeakBean};

/// Remoting protocol tag
///
/// Numeric IDs are stable and appear in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum Protocol {
    SofaRpc = 2,
    Dubbo = 3,
    Restful = 4,
    /// In-process call, no remoting
    InJvm = 5,
    Grpc = 6,
    Hsf = 8,
}

impl Protocol {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            2 => Some(Protocol::SofaRpc),
            3 => Some(Protocol::Dubbo),
            4 => Some(Protocol::Restful),
            5 => Some(Protocol::InJvm),
            6 => Some(Protocol::Grpc),
            8 => Some(Protocol::Hsf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::SofaRpc => "SOFA_RPC",
            Protocol::Dubbo => "DUBBO",
            Protocol::Restful => "RESTFUL",
            Protocol::InJvm => "IN_JVM",
            Protocol::Grpc => "GRPC",
            Protocol::Hsf => "HSF",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a parser learned about a remoting bean
#[derive(Debug, Clone)]
pub struct RemotingDesc {
    /// Resolved contract, `None` if the parser could not resolve it
    pub interface: Option<Arc<ServiceInterface>>,
    pub interface_name: String,
    pub protocol: Protocol,
    pub group: Option<String>,
    /// Service version
    pub unique_id: Option<String>,
    pub is_reference: bool,
    /// Provider-side implementation
    pub target: Option<WeakBean>,
}

impl RemotingDesc {
    pub fn new(interface: Arc<ServiceInterface>, protocol: Protocol) -> Self {
        Self {
            interface_name: interface.name().to_string(),
            interface: Some(interface),
            protocol,
            group: None,
            unique_id: None,
            is_reference: false,
            target: None,
        }
    }

    pub fn with_target(mut self, target: &Bean) -> Self {
        self.target = Some(Arc::downgrade(target));
        self
    }

    pub fn target(&self) -> Option<Bean> {
        self.target.as_ref().and_then(Weak::upgrade)
    }

    /// Interface declares at least one two-phase action
    pub fn has_two_phase_actions(&self) -> bool {
        self.interface
            .as_ref()
            .is_some_and(|i| i.has_two_phase_actions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_ids() {
        for p in [
            Protocol::SofaRpc,
            Protocol::Dubbo,
            Protocol::Restful,
            Protocol::InJvm,
            Protocol::Grpc,
            Protocol::Hsf,
        ] {
            assert_eq!(Protocol::from_id(p.id()), Some(p));
        }
        assert_eq!(Protocol::from_id(7), None);
        assert_eq!(Protocol::InJvm.to_string(), "IN_JVM");
    }

    #[test]
    fn test_desc_without_interface() {
        let desc = RemotingDesc {
            interface: None,
            interface_name: "demo.Missing".into(),
            protocol: Protocol::Dubbo,
            group: None,
            unique_id: None,
            is_reference: true,
            target: None,
        };
        assert!(!desc.has_two_phase_actions());
        assert!(desc.target().is_none());
    }
}
