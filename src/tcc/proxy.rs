//! TCC Proxy
//!
//! [`TccProxy`] stands in front of a target and routes calls by method name.
//! Try methods carrying two-phase metadata go through a
//! [`TccActionInterceptor`]; every other method is called straight through.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::context::{ActionContext, USE_TCC_FENCE};
use super::error::{ActionError, FenceError};
use super::fence::TccFenceHandler;
use super::resource::{Bean, MethodHandle, MethodReturn, ServiceInterface, TwoPhaseAction};

/// A pending call to a two-phase try method
pub struct ActionInvocation {
    pub action: TwoPhaseAction,
    pub method: MethodHandle,
    pub target: Bean,
    /// Still mutable here; frozen once `proceed` dispatches it
    pub context: ActionContext,
}

impl ActionInvocation {
    /// Run the try method
    pub async fn proceed(self) -> Result<MethodReturn, ActionError> {
        self.method
            .invoke(self.target, Arc::new(self.context))
            .await
    }
}

/// Interception strategy for try methods
#[async_trait]
pub trait TccActionInterceptor: Send + Sync {
    async fn intercept(&self, invocation: ActionInvocation) -> Result<MethodReturn, ActionError>;
}

/// Passes every invocation through untouched
pub struct PassThroughInterceptor;

#[async_trait]
impl TccActionInterceptor for PassThroughInterceptor {
    async fn intercept(&self, invocation: ActionInvocation) -> Result<MethodReturn, ActionError> {
        invocation.proceed().await
    }
}

/// Runs fenced try methods under [`TccFenceHandler::prepare_fence`]
///
/// Actions declared with `use_fence` get `useTCCFence = true` written into
/// their context, so phase two takes the fencing path as well.
pub struct FenceTryInterceptor {
    fence: Arc<TccFenceHandler>,
}

impl FenceTryInterceptor {
    pub fn new(fence: Arc<TccFenceHandler>) -> Self {
        Self { fence }
    }
}

#[async_trait]
impl TccActionInterceptor for FenceTryInterceptor {
    async fn intercept(
        &self,
        mut invocation: ActionInvocation,
    ) -> Result<MethodReturn, ActionError> {
        if !invocation.action.use_fence {
            return invocation.proceed().await;
        }

        invocation.context.set(USE_TCC_FENCE, true);
        let xid = invocation.context.xid.clone();
        let branch_id = invocation.context.branch_id;
        let action_name = invocation.action.name.clone();

        let mut returned = None;
        let slot = &mut returned;
        let fenced = self
            .fence
            .prepare_fence(&xid, branch_id, &action_name, move || async move {
                let value = invocation.proceed().await?;
                let ok = match &value {
                    MethodReturn::Bool(ok) => *ok,
                    MethodReturn::TwoPhase(result) => result.success,
                    MethodReturn::Void | MethodReturn::Value(_) => true,
                };
                *slot = Some(value);
                Ok(ok)
            })
            .await;

        match fenced {
            Ok(ok) => {
                if !ok {
                    debug!(xid = %xid, branch_id = branch_id, action = %action_name, "Fenced try reported failure");
                }
                Ok(returned.unwrap_or(MethodReturn::Void))
            }
            Err(FenceError::Business(e)) => Err(e),
            Err(e) => {
                warn!(
                    xid = %xid,
                    branch_id = branch_id,
                    action = %action_name,
                    error = %e,
                    "Fenced try rejected"
                );
                Err(ActionError::Fenced(Box::new(e)))
            }
        }
    }
}

/// Proxy over a target implementing `interface`
pub struct TccProxy {
    interface: Arc<ServiceInterface>,
    target: Bean,
    interceptor: Arc<dyn TccActionInterceptor>,
}

impl TccProxy {
    pub fn interface(&self) -> &Arc<ServiceInterface> {
        &self.interface
    }

    pub fn target(&self) -> &Bean {
        &self.target
    }

    pub async fn invoke(
        &self,
        method: &str,
        context: ActionContext,
    ) -> Result<MethodReturn, ActionError> {
        let declared = self
            .interface
            .method(method)
            .ok_or_else(|| ActionError::UnknownMethod {
                interface: self.interface.name().to_string(),
                method: method.to_string(),
            })?;

        match &declared.two_phase {
            Some(action) => {
                debug!(
                    xid = %context.xid,
                    branch_id = context.branch_id,
                    action = %action.name,
                    "Intercepting two-phase try"
                );
                self.interceptor
                    .intercept(ActionInvocation {
                        action: action.clone(),
                        method: declared.handle.clone(),
                        target: self.target.clone(),
                        context,
                    })
                    .await
            }
            None => {
                declared
                    .handle
                    .invoke(self.target.clone(), Arc::new(context))
                    .await
            }
        }
    }
}

/// Wrap `target` so two-phase methods of `interface` are intercepted
pub fn create_proxy(
    interface: Arc<ServiceInterface>,
    target: Bean,
    interceptor: Arc<dyn TccActionInterceptor>,
) -> TccProxy {
    TccProxy {
        interface,
        target,
        interceptor,
    }
}
