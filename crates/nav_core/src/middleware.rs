//! Phase/subphase middleware registry and sequential async executor.
//!
//! Middleware runs around navigation events. Registration order is execution
//! order; each middleware receives the phase params plus the previous
//! middleware's success value, and a failing middleware either recovers
//! (chain continues with the recovery value) or aborts the chain.

use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Known phase names. Unknown names are rejected by [`MiddlewareEngine::add`].
pub mod phases {
    pub const ROUTE: &str = "route";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubPhase {
    Before,
    During,
    After,
}

pub const DEFAULT_SUBPHASE: SubPhase = SubPhase::During;

#[async_trait]
pub trait Middleware: Send + Sync {
    /// `params` is the phase payload (the serialized route config for the
    /// `route` phase); `carried` is the previous middleware's success value,
    /// `Value::Null` for the first in the chain.
    async fn run(&self, params: &Value, carried: Value) -> Result<Value>;

    /// Recovery hook consulted when [`Middleware::run`] fails.
    ///
    /// - `Some(Ok(v))` absorbs the failure; the chain continues with `v`.
    /// - `Some(Err(e))` aborts the whole chain with the new error.
    /// - `None` (the default) aborts with the original error.
    async fn recover(&self, _error: &anyhow::Error) -> Option<Result<Value>> {
        None
    }
}

#[derive(Default)]
struct PhaseTable {
    before: Vec<Arc<dyn Middleware>>,
    during: Vec<Arc<dyn Middleware>>,
    after: Vec<Arc<dyn Middleware>>,
}

impl PhaseTable {
    fn slot(&self, sub_phase: SubPhase) -> &[Arc<dyn Middleware>] {
        match sub_phase {
            SubPhase::Before => &self.before,
            SubPhase::During => &self.during,
            SubPhase::After => &self.after,
        }
    }

    fn slot_mut(&mut self, sub_phase: SubPhase) -> &mut Vec<Arc<dyn Middleware>> {
        match sub_phase {
            SubPhase::Before => &mut self.before,
            SubPhase::During => &mut self.during,
            SubPhase::After => &mut self.after,
        }
    }
}

pub struct MiddlewareEngine {
    phases: HashMap<&'static str, PhaseTable>,
}

impl Default for MiddlewareEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MiddlewareEngine {
    pub fn new() -> Self {
        let mut phases = HashMap::new();
        phases.insert(phases::ROUTE, PhaseTable::default());
        Self { phases }
    }

    /// Registers a middleware. Returns `false` (and registers nothing) when
    /// the phase is unknown.
    pub fn add(
        &mut self,
        middleware: Arc<dyn Middleware>,
        phase: &str,
        sub_phase: SubPhase,
    ) -> bool {
        match self.phases.get_mut(phase) {
            Some(table) => {
                table.slot_mut(sub_phase).push(middleware);
                true
            }
            None => false,
        }
    }

    /// Executes the registered middleware for `phase:sub_phase` strictly
    /// sequentially in registration order.
    ///
    /// Returns `None` when nothing is registered there (a silent no-op for
    /// the caller), otherwise the overall chain outcome. The engine itself
    /// never propagates a panic or error past this boundary.
    pub async fn run(
        &self,
        phase: &str,
        sub_phase: SubPhase,
        params: &Value,
    ) -> Option<Result<Value>> {
        let chain = self.phases.get(phase)?.slot(sub_phase);
        if chain.is_empty() {
            return None;
        }

        let mut carried = Value::Null;
        for middleware in chain {
            match middleware.run(params, carried).await {
                Ok(value) => carried = value,
                Err(error) => match middleware.recover(&error).await {
                    Some(Ok(value)) => carried = value,
                    Some(Err(new_error)) => return Some(Err(new_error)),
                    None => return Some(Err(error)),
                },
            }
        }

        debug!(phase, ?sub_phase, "middleware chain ran successfully");
        Some(Ok(carried))
    }
}

#[cfg(test)]
#[path = "tests/middleware_tests.rs"]
mod tests;
