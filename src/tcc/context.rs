//! Business Action Context
//!
//! Carries transaction coordinates plus the parameter map captured when the
//! branch was opened. The coordinator echoes the map back as JSON
//! application data on commit/rollback:
//!
//! ```text
//! {"actionContext": {"amount": 50, "useTCCFence": true}}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::TccError;

/// Top-level application data key holding the action parameters
pub const ACTION_CONTEXT_KEY: &str = "actionContext";

/// Boolean parameter enabling the fencing path for phase two
pub const USE_TCC_FENCE: &str = "useTCCFence";

/// Context handed to prepare/commit/rollback methods
///
/// Phase methods receive it behind an `Arc`, so it is read-only once dispatched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionContext {
    pub xid: String,
    pub branch_id: i64,
    pub action_name: String,
    /// Insertion-ordered parameters
    pub action_context: Map<String, Value>,
}

impl ActionContext {
    pub fn new(
        xid: impl Into<String>,
        branch_id: i64,
        action_name: impl Into<String>,
        action_context: Map<String, Value>,
    ) -> Self {
        Self {
            xid: xid.into(),
            branch_id,
            action_name: action_name.into(),
            action_context,
        }
    }

    /// Build the phase-two context from coordinator application data
    ///
    /// Blank data, a missing key, or a `null` value all yield an empty map.
    pub fn from_application_data(
        xid: &str,
        branch_id: i64,
        action_name: &str,
        application_data: Option<&str>,
    ) -> Result<Self, TccError> {
        let params = match application_data.map(str::trim) {
            Some(data) if !data.is_empty() => {
                let mut root: Map<String, Value> = serde_json::from_str(data)?;
                match root.remove(ACTION_CONTEXT_KEY) {
                    Some(Value::Object(map)) => map,
                    Some(Value::Null) | None => Map::new(),
                    Some(other) => {
                        return Err(TccError::ApplicationData(format!(
                            "{} must be an object, got {}",
                            ACTION_CONTEXT_KEY, other
                        )));
                    }
                }
            }
            _ => Map::new(),
        };

        Ok(Self::new(xid, branch_id, action_name, params))
    }

    /// Serialize parameters back into application data form
    pub fn to_application_data(&self) -> Result<String, TccError> {
        let mut root = Map::new();
        root.insert(
            ACTION_CONTEXT_KEY.to_string(),
            Value::Object(self.action_context.clone()),
        );
        Ok(serde_json::to_string(&root)?)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.action_context.get(key)
    }

    /// Typed parameter lookup. `None` if missing or not convertible.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.action_context.insert(key.into(), value.into());
    }

    /// Merge parameters persisted by the action (later keys win)
    pub fn merge(&mut self, params: Map<String, Value>) {
        for (k, v) in params {
            self.action_context.insert(k, v);
        }
    }

    /// Fencing is on only for an explicit boolean `true`
    pub fn is_fence_enabled(&self) -> bool {
        matches!(self.get(USE_TCC_FENCE), Some(Value::Bool(true)))
    }
}
