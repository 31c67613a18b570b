//! Presentation-wrapper handling: decides stacking vs. root display for a
//! requested route, injects the wrapper module as a dependency, and gates
//! route handling on the wrapper's async pre-display hook.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::{
    factory::ControllerEntry,
    types::{NavigateOptions, RouteConfig, RouteId, WrapperSpec},
    WrapperModule,
};

/// Dependency slot name under which the wrapper module path travels through
/// dependency resolution.
pub const WRAPPER_DEPENDENCY_KEY: &str = "controllerWrapper";

/// Module paths queued for dependency loading, keyed by slot name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyPaths(BTreeMap<String, String>);

impl DependencyPaths {
    pub fn insert(&mut self, key: impl Into<String>, path: impl Into<String>) {
        self.0.insert(key.into(), path.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn wrapper_path(&self) -> Option<&str> {
        self.get(WRAPPER_DEPENDENCY_KEY)
    }
}

/// Wrapper dependencies after module loading. The wrapper entry is consumed
/// by [`set_wrapper_instance`] so it is never mistaken for application data.
#[derive(Default)]
pub struct ResolvedDependencies {
    pub controller_wrapper: Option<Arc<dyn WrapperModule>>,
}

/// Per-navigation stacking decision, built from the requested route config
/// and a snapshot of the controller stack.
///
/// A request stacks (displays inside its wrapper, nested under whatever is on
/// top of the stack right now) only when the stack is non-empty and the route
/// declares a wrapper; otherwise it displays as a root view.
pub struct WrapperPlan {
    spec: Option<WrapperSpec>,
    is_root_controller: bool,
    do_stack: bool,
    current_controller: Option<RouteId>,
}

impl WrapperPlan {
    pub fn new(config: &RouteConfig, stack: &[RouteId]) -> Self {
        let has_wrapper = config.controller_wrapper.is_some();
        let is_root_controller = stack.is_empty();
        let do_stack = !is_root_controller && has_wrapper;
        Self {
            spec: config.controller_wrapper.clone(),
            is_root_controller,
            do_stack,
            current_controller: if do_stack { stack.last().cloned() } else { None },
        }
    }

    pub fn is_root_controller(&self) -> bool {
        self.is_root_controller
    }

    pub fn do_stack(&self) -> bool {
        self.do_stack
    }

    /// When stacking, rewrites `root_id` to the controller currently on top
    /// of the stack. This intentionally takes precedence over any statically
    /// declared root so the wrapped target nests under the live view.
    pub fn prepare_route_info(&self, mut config: RouteConfig) -> RouteConfig {
        if self.do_stack {
            config.root_id = self.current_controller.clone();
        }
        config
    }

    /// When stacking, merges the wrapper module path into a clone of the
    /// existing dependency paths without overwriting a caller-supplied entry
    /// of the same name.
    pub fn handle_dependencies(&self, existing: &DependencyPaths) -> DependencyPaths {
        if existing.contains(WRAPPER_DEPENDENCY_KEY) {
            warn!(
                key = WRAPPER_DEPENDENCY_KEY,
                "invalid caller-supplied dependency name"
            );
        }

        if !self.do_stack {
            return existing.clone();
        }

        let Some(path) = self.spec.as_ref().and_then(WrapperSpec::path) else {
            error!("unable to resolve wrapper path from route configuration");
            return existing.clone();
        };

        let mut merged = existing.clone();
        if !merged.contains(WRAPPER_DEPENDENCY_KEY) {
            merged.insert(WRAPPER_DEPENDENCY_KEY, path);
        }
        merged
    }

    /// Free-form option fields accompanying the wrapper descriptor; empty for
    /// the bare-path form.
    pub fn options(&self) -> Map<String, Value> {
        self.spec
            .as_ref()
            .map(WrapperSpec::options)
            .unwrap_or_default()
    }
}

/// Awaits the wrapper's pre-display `wrap` hook if the entry carries one,
/// merging the route's wrapper options with any per-dispatch overrides
/// (dispatch wins). A controller without a wrapper resolves immediately with
/// `None`; route handling never stalls on it.
pub async fn wrap_before_handling_route(
    entry: &ControllerEntry,
    wrapper_options: &Map<String, Value>,
    already_in_stack: bool,
    dispatch_options: &NavigateOptions,
) -> Result<Option<Value>> {
    let Some(wrapper) = entry.wrapper().await else {
        return Ok(None);
    };

    let mut merged = wrapper_options.clone();
    for (key, value) in &dispatch_options.wrapper_options {
        merged.insert(key.clone(), value.clone());
    }

    let context = wrapper.wrap(&merged, already_in_stack).await?;
    Ok(Some(context))
}

/// Constructs (at most once) the wrapper bound to the controller from the
/// resolved dependency module and clears the dependency entry.
pub async fn set_wrapper_instance(entry: &ControllerEntry, resolved: &mut ResolvedDependencies) {
    if let Some(module) = resolved.controller_wrapper.take() {
        let controller = entry.controller.clone();
        entry
            .attach_wrapper_if_absent(move || module.construct(controller))
            .await;
    }
}

/// Detaches and destroys the entry's wrapper. Idempotent: a second call on an
/// already-detached entry is a no-op.
pub async fn destroy_wrapper(entry: &ControllerEntry) {
    if let Some(wrapper) = entry.take_wrapper().await {
        wrapper.destroy().await;
    }
}

#[cfg(test)]
#[path = "tests/wrapper_tests.rs"]
mod tests;
