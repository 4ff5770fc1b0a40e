//! Resource Registration Transport
//!
//! The resource manager forwards every registered resource to the
//! coordinator through a [`ResourceRegistrar`]. The wire protocol lives
//! outside this crate; [`ChannelRegistrar`] hands requests to a transport
//! task over mpsc and waits for its acknowledgement on a oneshot.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::error::TccError;
use super::resource::TccResource;
use super::status::BranchType;

/// Coordinator-facing registration transport
#[async_trait]
pub trait ResourceRegistrar: Send + Sync {
    /// Registrar name for logging
    fn name(&self) -> &'static str;

    /// Announce a resource to the coordinator
    async fn register(&self, resource: &TccResource) -> Result<(), TccError>;
}

// ============================================================================
// Registration Request/Response Types
// ============================================================================

/// Registration request handed to the transport task
#[derive(Debug)]
pub struct RegistrationRequest {
    pub resource_group_id: String,
    pub resource_id: String,
    pub branch_type: BranchType,
    /// Response channel (oneshot)
    pub response_tx: oneshot::Sender<RegistrationResponse>,
}

/// Transport acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationResponse {
    Accepted,
    Rejected(String),
}

// ============================================================================
// Registration Channel
// ============================================================================

/// Sender side (held by the resource manager)
#[derive(Clone)]
pub struct ChannelRegistrar {
    tx: mpsc::Sender<RegistrationRequest>,
}

#[async_trait]
impl ResourceRegistrar for ChannelRegistrar {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn register(&self, resource: &TccResource) -> Result<(), TccError> {
        let (response_tx, response_rx) = oneshot::channel();

        let request = RegistrationRequest {
            resource_group_id: resource.resource_group_id.clone(),
            resource_id: resource.resource_id().to_string(),
            branch_type: resource.branch_type(),
            response_tx,
        };

        self.tx
            .send(request)
            .await
            .map_err(|_| TccError::Registration("registration channel closed".to_string()))?;

        let response = response_rx.await.map_err(|_| {
            TccError::Registration("registration response channel closed".to_string())
        })?;

        match response {
            RegistrationResponse::Accepted => {
                debug!(resource_id = %resource.resource_id(), "Resource registration acknowledged");
                Ok(())
            }
            RegistrationResponse::Rejected(reason) => Err(TccError::Registration(format!(
                "{} rejected: {}",
                resource.resource_id(),
                reason
            ))),
        }
    }
}

/// Receiver side (owned by the coordinator transport task)
pub struct RegistrationReceiver {
    rx: mpsc::Receiver<RegistrationRequest>,
}

impl RegistrationReceiver {
    /// Try to receive a registration request (non-blocking)
    pub fn try_recv(&mut self) -> Option<RegistrationRequest> {
        self.rx.try_recv().ok()
    }

    /// Receive a registration request (until available or closed)
    pub async fn recv(&mut self) -> Option<RegistrationRequest> {
        self.rx.recv().await
    }
}

/// Create a new registration channel pair
pub fn registrar_channel(buffer: usize) -> (ChannelRegistrar, RegistrationReceiver) {
    let (tx, rx) = mpsc::channel(buffer);
    (ChannelRegistrar { tx }, RegistrationReceiver { rx })
}

/// Mock registrar for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockRegistrar {
        registered: Mutex<Vec<String>>,
        fail: Mutex<bool>,
    }

    impl MockRegistrar {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_fail(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }

        pub fn registered(&self) -> Vec<String> {
            self.registered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ResourceRegistrar for MockRegistrar {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn register(&self, resource: &TccResource) -> Result<(), TccError> {
            if *self.fail.lock().unwrap() {
                return Err(TccError::Registration("mock registrar failure".to_string()));
            }
            self.registered
                .lock()
                .unwrap()
                .push(resource.resource_id().to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
pub use mock::MockRegistrar;
