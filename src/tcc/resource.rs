//! TCC Resource Model
//!
//! A two-phase action is declared on a [`ServiceInterface`] by attaching
//! [`TwoPhaseAction`] metadata to its try method. At registration the commit and
//! rollback names are resolved against the same interface into bound
//! [`MethodHandle`]s, so a dangling name fails before any transaction runs.

use std::any::{Any, type_name};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use super::context::ActionContext;
use super::error::{ActionError, TccError};
use super::status::{BranchType, Phase};

/// Container-managed business object
pub type Bean = Arc<dyn Any + Send + Sync>;

/// Non-owning handle to a container-managed object
pub type WeakBean = Weak<dyn Any + Send + Sync>;

/// Resource group used when none is configured
pub const DEFAULT_RESOURCE_GROUP: &str = "DEFAULT";

pub type MethodFuture = BoxFuture<'static, Result<MethodReturn, ActionError>>;

type MethodFn = dyn Fn(Bean, Arc<ActionContext>) -> MethodFuture + Send + Sync;

/// Structured phase result for methods that report more than a flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoPhaseResult {
    pub success: bool,
    pub message: Option<String>,
}

impl TwoPhaseResult {
    pub fn success() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Value returned by an interface method
#[derive(Debug, Clone, PartialEq)]
pub enum MethodReturn {
    Void,
    Bool(bool),
    TwoPhase(TwoPhaseResult),
    /// Plain business return, only legal outside phase two
    Value(Value),
}

impl MethodReturn {
    /// Interpret as a phase-two outcome
    ///
    /// Void counts as success. A plain value is a programming error.
    pub fn into_outcome(self, method: &str) -> Result<bool, ActionError> {
        match self {
            MethodReturn::Void => Ok(true),
            MethodReturn::Bool(ok) => Ok(ok),
            MethodReturn::TwoPhase(result) => Ok(result.success),
            MethodReturn::Value(v) => Err(ActionError::UnexpectedReturn {
                method: method.to_string(),
                found: v.to_string(),
            }),
        }
    }
}

impl From<()> for MethodReturn {
    fn from(_: ()) -> Self {
        MethodReturn::Void
    }
}

impl From<bool> for MethodReturn {
    fn from(ok: bool) -> Self {
        MethodReturn::Bool(ok)
    }
}

impl From<TwoPhaseResult> for MethodReturn {
    fn from(result: TwoPhaseResult) -> Self {
        MethodReturn::TwoPhase(result)
    }
}

/// A method bound to the concrete target type it was declared for
///
/// The target is passed at call time so resources can keep only a weak
/// reference to it.
#[derive(Clone)]
pub struct MethodHandle {
    name: String,
    func: Arc<MethodFn>,
}

impl MethodHandle {
    pub fn new<T, F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>, Arc<ActionContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<MethodReturn, ActionError>> + Send + 'static,
    {
        let func = move |target: Bean, ctx: Arc<ActionContext>| -> MethodFuture {
            match target.downcast::<T>() {
                Ok(target) => f(target, ctx).boxed(),
                Err(_) => futures::future::ready(Err(ActionError::TargetMismatch {
                    expected: type_name::<T>(),
                }))
                .boxed(),
            }
        };

        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn invoke(
        &self,
        target: Bean,
        ctx: Arc<ActionContext>,
    ) -> Result<MethodReturn, ActionError> {
        (self.func)(target, ctx).await
    }

    /// Invoke as a phase method and normalize the return shape
    pub async fn invoke_phase(
        &self,
        target: Bean,
        ctx: Arc<ActionContext>,
    ) -> Result<bool, ActionError> {
        self.invoke(target, ctx).await?.into_outcome(&self.name)
    }
}

impl fmt::Debug for MethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Two-phase metadata attached to a try method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoPhaseAction {
    /// Resource id the coordinator addresses the action by
    pub name: String,
    pub commit_method: String,
    pub rollback_method: String,
    /// Ask the try interceptor to enable fencing for this branch
    pub use_fence: bool,
}

impl TwoPhaseAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commit_method: "commit".to_string(),
            rollback_method: "rollback".to_string(),
            use_fence: false,
        }
    }

    pub fn commit_method(mut self, name: impl Into<String>) -> Self {
        self.commit_method = name.into();
        self
    }

    pub fn rollback_method(mut self, name: impl Into<String>) -> Self {
        self.rollback_method = name.into();
        self
    }

    pub fn use_fence(mut self, enabled: bool) -> Self {
        self.use_fence = enabled;
        self
    }
}

#[derive(Debug, Clone)]
pub struct InterfaceMethod {
    pub handle: MethodHandle,
    pub two_phase: Option<TwoPhaseAction>,
}

/// Contract exposed or consumed by a remoting bean
#[derive(Debug, Clone)]
pub struct ServiceInterface {
    name: String,
    methods: Vec<InterfaceMethod>,
}

impl ServiceInterface {
    pub fn builder(name: impl Into<String>) -> ServiceInterfaceBuilder {
        ServiceInterfaceBuilder {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[InterfaceMethod] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Option<&InterfaceMethod> {
        self.methods.iter().find(|m| m.handle.name() == name)
    }

    /// Methods carrying two-phase metadata
    pub fn two_phase_methods(&self) -> impl Iterator<Item = (&MethodHandle, &TwoPhaseAction)> {
        self.methods
            .iter()
            .filter_map(|m| m.two_phase.as_ref().map(|a| (&m.handle, a)))
    }

    pub fn has_two_phase_actions(&self) -> bool {
        self.two_phase_methods().next().is_some()
    }

    fn resolve(&self, method: &str) -> Result<MethodHandle, TccError> {
        self.method(method)
            .map(|m| m.handle.clone())
            .ok_or_else(|| TccError::MethodNotFound {
                interface: self.name.clone(),
                method: method.to_string(),
            })
    }
}

pub struct ServiceInterfaceBuilder {
    name: String,
    methods: Vec<InterfaceMethod>,
}

impl ServiceInterfaceBuilder {
    /// Plain method (a later method with the same name replaces it)
    pub fn method(self, handle: MethodHandle) -> Self {
        self.push(InterfaceMethod {
            handle,
            two_phase: None,
        })
    }

    /// Try method carrying two-phase metadata
    pub fn two_phase(self, action: TwoPhaseAction, handle: MethodHandle) -> Self {
        self.push(InterfaceMethod {
            handle,
            two_phase: Some(action),
        })
    }

    pub fn build(self) -> Arc<ServiceInterface> {
        Arc::new(ServiceInterface {
            name: self.name,
            methods: self.methods,
        })
    }

    fn push(mut self, method: InterfaceMethod) -> Self {
        self.methods
            .retain(|m| m.handle.name() != method.handle.name());
        self.methods.push(method);
        self
    }
}

/// One registered two-phase action
#[derive(Debug, Clone)]
pub struct TccResource {
    pub resource_group_id: String,
    pub action_name: String,
    pub interface_name: String,
    pub target: Option<WeakBean>,
    pub prepare_method: Option<MethodHandle>,
    pub commit_method: Option<MethodHandle>,
    pub rollback_method: Option<MethodHandle>,
}

impl TccResource {
    /// Resolve commit/rollback for `action` against `interface`
    ///
    /// Fails fast with `MethodNotFound` if either name is unknown.
    pub fn resolve(
        interface: &ServiceInterface,
        prepare: &MethodHandle,
        action: &TwoPhaseAction,
        target: Option<WeakBean>,
    ) -> Result<Self, TccError> {
        let commit = interface.resolve(&action.commit_method)?;
        let rollback = interface.resolve(&action.rollback_method)?;

        Ok(Self {
            resource_group_id: DEFAULT_RESOURCE_GROUP.to_string(),
            action_name: action.name.clone(),
            interface_name: interface.name().to_string(),
            target,
            prepare_method: Some(prepare.clone()),
            commit_method: Some(commit),
            rollback_method: Some(rollback),
        })
    }

    pub fn with_resource_group(mut self, group: impl Into<String>) -> Self {
        self.resource_group_id = group.into();
        self
    }

    /// Action name doubles as resource id
    pub fn resource_id(&self) -> &str {
        &self.action_name
    }

    pub fn branch_type(&self) -> BranchType {
        BranchType::Tcc
    }

    /// Live target, `None` once the container dropped it
    pub fn target(&self) -> Option<Bean> {
        self.target.as_ref().and_then(Weak::upgrade)
    }

    pub fn phase_method(&self, phase: Phase) -> Option<&MethodHandle> {
        match phase {
            Phase::Commit => self.commit_method.as_ref(),
            Phase::Rollback => self.rollback_method.as_ref(),
        }
    }
}
