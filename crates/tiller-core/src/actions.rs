// Action handlers and the dispatch registry
//
// The runner resolves `action_type` strings against an explicit registry.
// Unknown types never fail: they fall through to a permissive handler that
// echoes the payload back, so a workflow written against handlers the
// deployment has not registered still completes observably.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{EngineError, Result};

/// Trait for implementing task actions.
///
/// Handlers receive the interpolated payload and must be re-entrant: a
/// retried attempt invokes the same handler with the same payload.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// The `action_type` this handler serves
    fn action_type(&self) -> &str;

    /// Execute the action against its payload
    async fn execute(&self, payload: Value) -> Result<Value>;
}

// ============================================================================
// ActionRegistry
// ============================================================================

/// Registry mapping `action_type` strings to handlers, with a fallback for
/// unknown types. A first-class parameter of the runner, never a global.
#[derive(Clone)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    fallback: Arc<dyn ActionHandler>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("action_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::new()
    }

    /// Handler for `action_type`, or the fallback when none is registered
    pub fn resolve(&self, action_type: &str) -> Arc<dyn ActionHandler> {
        self.handlers
            .get(action_type)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Dispatch a payload to the handler for `action_type`
    pub async fn dispatch(&self, action_type: &str, payload: Value) -> Result<Value> {
        self.resolve(action_type).execute(payload).await
    }

    pub fn registered_types(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }
}

/// Builder for ActionRegistry with a fluent API
pub struct ActionRegistryBuilder {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    fallback: Arc<dyn ActionHandler>,
}

impl ActionRegistryBuilder {
    fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(EchoAction),
        }
    }

    /// Register a handler under its own `action_type`
    pub fn handler(mut self, handler: impl ActionHandler + 'static) -> Self {
        self.handlers
            .insert(handler.action_type().to_string(), Arc::new(handler));
        self
    }

    /// Register an Arc-wrapped handler
    pub fn handler_arc(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.handlers
            .insert(handler.action_type().to_string(), handler);
        self
    }

    /// Replace the fallback used for unknown action types
    pub fn fallback(mut self, handler: impl ActionHandler + 'static) -> Self {
        self.fallback = Arc::new(handler);
        self
    }

    pub fn build(self) -> ActionRegistry {
        ActionRegistry {
            handlers: self.handlers,
            fallback: self.fallback,
        }
    }
}

// ============================================================================
// Built-in handlers
// ============================================================================

/// Echoes the payload back; the default fallback for unknown action types
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoAction;

#[async_trait]
impl ActionHandler for EchoAction {
    fn action_type(&self) -> &str {
        "echo"
    }

    async fn execute(&self, payload: Value) -> Result<Value> {
        Ok(json!({ "status": "success", "payload": payload }))
    }
}

/// Sleeps for `duration_seconds` (fractional allowed, default 1.0)
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepAction;

#[async_trait]
impl ActionHandler for SleepAction {
    fn action_type(&self) -> &str {
        "sleep"
    }

    async fn execute(&self, payload: Value) -> Result<Value> {
        let seconds = payload
            .get("duration_seconds")
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0)
            .max(0.0);
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        Ok(json!({ "status": "success", "slept": seconds }))
    }
}

/// Fails the first `failures` invocations, then succeeds; for exercising
/// retry behavior in tests and examples
#[derive(Debug)]
pub struct FlakyAction {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyAction {
    pub fn failing_times(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }

    /// Number of invocations so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionHandler for FlakyAction {
    fn action_type(&self) -> &str {
        "flaky"
    }

    async fn execute(&self, payload: Value) -> Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(EngineError::task_failed(
                "flaky",
                format!("induced failure on call {call}"),
            ));
        }
        Ok(json!({ "status": "success", "calls": call + 1, "payload": payload }))
    }
}
