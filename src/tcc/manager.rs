//! TCC Resource Manager
//!
//! Owns the resource registry (action name → [`TccResource`]) and executes
//! phase two for the coordinator.
//!
//! # Outcome Rules
//!
//! - Unknown resource / missing target or method → `Err`, fatal
//! - Fenced business error → `Err(TccError::Business)` carrying the original error
//! - Fence ordering violation → unretryable status
//! - Anything else that goes wrong (bad application data, direct-path method
//!   error or panic, fence store failure) → retryable status, logged

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::context::ActionContext;
use super::error::{FenceError, TccError};
use super::fence::TccFenceHandler;
use super::registrar::ResourceRegistrar;
use super::resource::{Bean, MethodHandle, TccResource};
use super::status::{BranchStatus, BranchType, Phase};

pub struct TccResourceManager {
    resources: DashMap<String, Arc<TccResource>>,
    registrar: Arc<dyn ResourceRegistrar>,
    fence: Option<Arc<TccFenceHandler>>,
}

impl TccResourceManager {
    pub fn new(registrar: Arc<dyn ResourceRegistrar>) -> Self {
        Self {
            resources: DashMap::new(),
            registrar,
            fence: None,
        }
    }

    /// Enable the fencing path for branches that ask for it
    pub fn with_fence(mut self, fence: Arc<TccFenceHandler>) -> Self {
        self.fence = Some(fence);
        self
    }

    pub fn fence(&self) -> Option<&Arc<TccFenceHandler>> {
        self.fence.as_ref()
    }

    pub fn branch_type(&self) -> BranchType {
        BranchType::Tcc
    }

    /// Cache the resource, then announce it to the coordinator
    ///
    /// A colliding action name from a different interface or target is a
    /// misconfiguration; the last registration wins.
    pub async fn register_resource(&self, resource: TccResource) -> Result<(), TccError> {
        let resource = Arc::new(resource);
        let resource_id = resource.resource_id().to_string();

        if let Some(previous) = self.resources.insert(resource_id.clone(), resource.clone()) {
            if same_origin(&previous, &resource) {
                debug!(resource_id = %resource_id, "TCC resource re-registered");
            } else {
                warn!(
                    resource_id = %resource_id,
                    previous_interface = %previous.interface_name,
                    interface = %resource.interface_name,
                    "Duplicate TCC action name, last registration wins"
                );
            }
        }

        self.registrar.register(&resource).await?;
        info!(
            resource_id = %resource_id,
            interface = %resource.interface_name,
            registrar = self.registrar.name(),
            "TCC resource registered"
        );
        Ok(())
    }

    /// Snapshot of all managed resources
    pub fn managed_resources(&self) -> HashMap<String, Arc<TccResource>> {
        self.resources
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn get_resource(&self, resource_id: &str) -> Option<Arc<TccResource>> {
        self.resources.get(resource_id).map(|r| r.value().clone())
    }

    pub async fn branch_commit(
        &self,
        branch_type: BranchType,
        xid: &str,
        branch_id: i64,
        resource_id: &str,
        application_data: Option<&str>,
    ) -> Result<BranchStatus, TccError> {
        self.branch_phase(
            Phase::Commit,
            branch_type,
            xid,
            branch_id,
            resource_id,
            application_data,
        )
        .await
    }

    pub async fn branch_rollback(
        &self,
        branch_type: BranchType,
        xid: &str,
        branch_id: i64,
        resource_id: &str,
        application_data: Option<&str>,
    ) -> Result<BranchStatus, TccError> {
        self.branch_phase(
            Phase::Rollback,
            branch_type,
            xid,
            branch_id,
            resource_id,
            application_data,
        )
        .await
    }

    async fn branch_phase(
        &self,
        phase: Phase,
        branch_type: BranchType,
        xid: &str,
        branch_id: i64,
        resource_id: &str,
        application_data: Option<&str>,
    ) -> Result<BranchStatus, TccError> {
        let resource = self
            .get_resource(resource_id)
            .ok_or_else(|| TccError::ResourceNotFound(resource_id.to_string()))?;

        let (target, method) = match (resource.target(), resource.phase_method(phase)) {
            (Some(target), Some(method)) => (target, method.clone()),
            _ => return Err(TccError::ResourceNotAvailable(resource_id.to_string())),
        };

        if branch_type != BranchType::Tcc {
            warn!(
                xid = %xid,
                branch_id = branch_id,
                resource_id = %resource_id,
                branch_type = %branch_type,
                "Non-TCC branch type routed to TCC resource manager"
            );
        }

        let dispatch = self.dispatch(phase, target, &method, xid, branch_id, resource_id, application_data);
        let status = match AssertUnwindSafe(dispatch).catch_unwind().await {
            Ok(result) => result?,
            Err(_) => {
                error!(
                    xid = %xid,
                    branch_id = branch_id,
                    resource_id = %resource_id,
                    phase = %phase,
                    "TCC phase method panicked"
                );
                phase.outcome(false)
            }
        };

        info!(
            xid = %xid,
            branch_id = branch_id,
            resource_id = %resource_id,
            status = %status,
            "TCC resource {} result",
            phase
        );
        Ok(status)
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        phase: Phase,
        target: Bean,
        method: &MethodHandle,
        xid: &str,
        branch_id: i64,
        resource_id: &str,
        application_data: Option<&str>,
    ) -> Result<BranchStatus, TccError> {
        let ctx = match ActionContext::from_application_data(
            xid,
            branch_id,
            resource_id,
            application_data,
        ) {
            Ok(ctx) => Arc::new(ctx),
            Err(e) => {
                error!(
                    xid = %xid,
                    branch_id = branch_id,
                    resource_id = %resource_id,
                    error = %e,
                    "{} TCC resource error: bad application data",
                    phase
                );
                return Ok(phase.outcome(false));
            }
        };

        if !ctx.is_fence_enabled() {
            return match method.invoke_phase(target, ctx).await {
                Ok(ok) => Ok(phase.outcome(ok)),
                Err(e) => {
                    error!(
                        xid = %xid,
                        branch_id = branch_id,
                        resource_id = %resource_id,
                        method = %method.name(),
                        error = %e,
                        "{} TCC resource error",
                        phase
                    );
                    Ok(phase.outcome(false))
                }
            };
        }

        let fence = self
            .fence
            .as_ref()
            .ok_or_else(|| TccError::FenceNotConfigured(resource_id.to_string()))?;

        let fenced = match phase {
            Phase::Commit => fence.commit_fence(method, target, ctx).await,
            Phase::Rollback => fence.rollback_fence(method, target, ctx).await,
        };

        match fenced {
            Ok(ok) => Ok(phase.outcome(ok)),
            Err(FenceError::Business(source)) => {
                error!(
                    xid = %xid,
                    branch_id = branch_id,
                    resource_id = %resource_id,
                    error = %source,
                    "{} TCC resource business error",
                    phase
                );
                Err(TccError::Business {
                    resource_id: resource_id.to_string(),
                    xid: xid.to_string(),
                    branch_id,
                    source,
                })
            }
            Err(e @ FenceError::IllegalStatus { .. }) => {
                error!(
                    xid = %xid,
                    branch_id = branch_id,
                    resource_id = %resource_id,
                    error = %e,
                    "{} TCC resource rejected by fence",
                    phase
                );
                Ok(phase.unretryable())
            }
            Err(e) => {
                error!(
                    xid = %xid,
                    branch_id = branch_id,
                    resource_id = %resource_id,
                    code = e.code(),
                    error = %e,
                    "{} TCC resource fence error",
                    phase
                );
                Ok(phase.outcome(false))
            }
        }
    }
}

fn same_origin(a: &TccResource, b: &TccResource) -> bool {
    let same_target = match (&a.target, &b.target) {
        (Some(x), Some(y)) => Weak::ptr_eq(x, y),
        (None, None) => true,
        _ => false,
    };
    same_target && a.interface_name == b.interface_name
}
