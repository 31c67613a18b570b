//! Single-page-application navigation runtime.
//!
//! Maps URL routes to controller modules, manages a stack of simultaneously
//! resident controllers for nested/back-stack navigation, decorates
//! controllers with optional presentation wrappers (dialogs, toasts), and
//! runs an extensible async middleware pipeline around navigation events.
//!
//! The URL-pattern router, browser-history adapter, transition engine, and
//! module loader are external collaborators injected through the traits in
//! this module; [`PageManager`] owns the route-resolution state machine, the
//! controller-stack lifecycle, and the middleware/wrapper pipelines.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Weak},
};

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

pub mod error;
pub mod factory;
pub mod middleware;
pub mod types;
pub mod wrapper;

pub use error::NavError;
pub use factory::{ControllerEntry, ReadySignal};
pub use middleware::{phases, Middleware, MiddlewareEngine, SubPhase};
pub use types::{
    parse_query_string, NavigateOptions, RouteConfig, RouteDefinition, RouteHandled, RouteId,
    RouteMatch, Surface, TransitionDirection, UrlParams, WrapperOptions, WrapperSpec,
};

use factory::InstanceFactory;
use wrapper::{DependencyPaths, ResolvedDependencies, WrapperPlan};

/// Handling method invoked on a controller when the route config does not
/// override it.
pub const DEFAULT_ROUTE_METHOD: &str = "handle_route";

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// URL-pattern router and history adapter seam.
pub trait Router: Send + Sync {
    /// Registers a routing expression for a route id.
    fn register(&self, pattern: &str, route_id: &RouteId);

    /// Navigates the history adapter to `path`. Returns the matched route
    /// (raw match segments, query string last) when `options.trigger` asks
    /// for the route to be handled and a registered pattern matched.
    fn navigate(&self, path: &str, options: &NavigateOptions) -> Option<RouteMatch>;

    /// Builds a path for a route id, substituting positional params.
    fn build_path(&self, route_id: &RouteId, params: &[String]) -> Option<String>;

    fn format_query_string(&self, query: &BTreeMap<String, String>) -> String;

    /// Current location fragment, route and query string included.
    fn current_fragment(&self) -> String;

    /// Steps back one entry in the history.
    fn back(&self);
}

/// Visual transition engine seam.
#[async_trait]
pub trait TransitionEngine: Send + Sync {
    async fn transition(
        &self,
        from: Option<Surface>,
        to: Surface,
        direction: TransitionDirection,
    );
}

/// Async module loader seam. `Ok(None)` means the path resolved to no usable
/// constructor; both that and `Err` stall the navigation with no fallback.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load_controller(&self, path: &str) -> Result<Option<Arc<dyn ControllerModule>>>;

    async fn load_wrapper(&self, path: &str) -> Result<Option<Arc<dyn WrapperModule>>>;
}

/// A loaded controller module: a constructor, optionally exposing a shared
/// instance preferred for singleton routes.
pub trait ControllerModule: Send + Sync {
    fn construct(&self) -> Arc<dyn Controller>;

    fn shared_instance(&self) -> Option<Arc<dyn Controller>> {
        None
    }
}

/// A resident controller instance.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Invoked once per navigation resolution. `method` is the configured
    /// handling method name ([`DEFAULT_ROUTE_METHOD`] unless the route
    /// overrides it); unknown names should be reported as errors.
    async fn handle(
        &self,
        method: &str,
        already_in_stack: bool,
        params: &Value,
        url_params: &UrlParams,
    ) -> Result<()>;

    /// Invoked when the controller is dropped from the stack. Singleton
    /// controllers never receive this from stack truncation.
    async fn destroy(&self);

    /// Readiness signal driving visual dispatch; see [`ReadySignal`].
    fn ready(&self) -> watch::Receiver<u64>;

    /// Display container identity used for transitions.
    fn surface(&self) -> Surface;

    /// Notification that another controller is about to be displayed over
    /// this one.
    fn on_view_hidden(&self) {}
}

/// Presentation decorator (dialog, toast) attached to a controller instance.
#[async_trait]
pub trait PresentationWrapper: Send + Sync {
    /// Pre-display hook; route handling waits for it to settle. The returned
    /// value is the wrapper context handed to chained consumers.
    async fn wrap(&self, options: &Map<String, Value>, already_in_stack: bool) -> Result<Value>;

    async fn destroy(&self);
}

/// A loaded wrapper module constructing wrappers bound to a controller.
pub trait WrapperModule: Send + Sync {
    fn construct(&self, controller: Arc<dyn Controller>) -> Arc<dyn PresentationWrapper>;
}

/// Notifications observable on [`PageManager::subscribe_events`].
#[derive(Debug, Clone)]
pub enum PageEvent {
    /// A route finished handling; payload is the resolved (possibly
    /// root-augmented) route config.
    RouteHandled(RouteConfig),
    /// A controller was visually dispatched to the page.
    PageDispatched { controller_path: String },
    /// A `route:before` middleware chain rejected the navigation.
    NavigationBlocked { route_id: RouteId, reason: String },
}

#[derive(Default)]
struct PageManagerState {
    routes_map: HashMap<RouteId, RouteConfig>,
    controller_stack: Vec<RouteId>,
    recently_added_controller: bool,
    current_controller: Option<Arc<dyn Controller>>,
    current_controller_name: Option<String>,
    current_displayed: Option<Arc<dyn Controller>>,
}

/// The route orchestrator: owns the controller stack, the instance
/// directories, the root-enforcement rules, and the dispatch/transition
/// sequence.
///
/// All collaborators are injected; multiple independent managers can coexist
/// (nothing is process-global). Navigations are serialized through a single
/// lock: a request issued while another is suspended at an async step waits
/// for it instead of interleaving stack mutation.
pub struct PageManager {
    self_weak: Weak<PageManager>,
    router: Arc<dyn Router>,
    transitions: Arc<dyn TransitionEngine>,
    factory: InstanceFactory,
    middleware: RwLock<Arc<MiddlewareEngine>>,
    inner: Mutex<PageManagerState>,
    nav_lock: Mutex<()>,
    events: broadcast::Sender<PageEvent>,
}

impl PageManager {
    pub fn new(
        router: Arc<dyn Router>,
        transitions: Arc<dyn TransitionEngine>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new_cyclic(|self_weak| Self {
            self_weak: self_weak.clone(),
            router,
            transitions,
            factory: InstanceFactory::new(loader),
            middleware: RwLock::new(Arc::new(MiddlewareEngine::new())),
            inner: Mutex::new(PageManagerState::default()),
            nav_lock: Mutex::new(()),
            events,
        })
    }

    /// Registers a route table, additively merged over previous
    /// registrations. Malformed entries (missing routing expression or
    /// controller path) are logged and skipped.
    pub async fn routes(&self, routes: HashMap<String, RouteConfig>) {
        info!(count = routes.len(), "processing route table");
        for (route_id, mut config) in routes {
            if config.route.is_empty() || config.controller.as_deref().unwrap_or("").is_empty() {
                warn!(%route_id, "route config format is not valid; skipping");
                continue;
            }
            let route_id = RouteId(route_id);
            config.route_id = route_id.clone();
            debug!(%route_id, pattern = %config.route, "registering route");
            self.router.register(&config.route, &route_id);
            self.inner.lock().await.routes_map.insert(route_id, config);
        }
    }

    /// Replaces the middleware engine consulted around navigation events.
    pub async fn set_middleware(&self, engine: MiddlewareEngine) {
        *self.middleware.write().await = Arc::new(engine);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    /// Navigates to a new page given its path, creating a history entry and
    /// handling the matched route.
    pub async fn navigate_to_page(&self, path: &str, options: NavigateOptions) {
        let options = NavigateOptions {
            trigger: true,
            force: true,
            ..options
        };
        self.navigate(path, options).await;
    }

    /// Navigates using a route definition (route id + positional params +
    /// query string) instead of a prebuilt path.
    pub async fn navigate_to_route(&self, definition: RouteDefinition) {
        let Some(path) = self.build_path(&definition) else {
            warn!(route_id = %definition.route, "no path could be built for route");
            return;
        };
        let mut options = NavigateOptions::default();
        options.route_handled = definition.route_handled.clone();
        self.navigate_to_page(&path, options).await;
    }

    /// Dispatches directly to a controller path without touching the router
    /// or creating a history entry.
    pub async fn navigate_to_controller(&self, controller_path: &str, url_params: UrlParams) {
        let config = RouteConfig {
            controller: Some(controller_path.to_string()),
            ..RouteConfig::default()
        };
        self.handle_route(config, url_params, NavigateOptions::default())
            .await;
    }

    /// Navigates to the previous entry in the history.
    pub fn navigate_to_previous_page(&self) {
        self.router.back();
    }

    /// Builds a path from a route definition, appending its query string.
    pub fn build_path(&self, definition: &RouteDefinition) -> Option<String> {
        let mut path = self
            .router
            .build_path(&definition.route, &definition.params)?;
        if !definition.query_string.is_empty() {
            path.push_str(&self.router.format_query_string(&definition.query_string));
        }
        Some(path)
    }

    /// Pushes a route to the history without handling it.
    pub async fn push_route(&self, definition: &RouteDefinition) {
        let Some(path) = self.build_path(definition) else {
            warn!(route_id = %definition.route, "no path could be built for route");
            return;
        };
        self.push_path(&path).await;
    }

    /// Pushes a path to the history without handling it.
    pub async fn push_path(&self, path: &str) {
        self.navigate(path, NavigateOptions::default()).await;
    }

    /// Replaces the current history entry using a route definition.
    pub async fn replace_current_route(&self, definition: &RouteDefinition) {
        let Some(path) = self.build_path(definition) else {
            warn!(route_id = %definition.route, "no path could be built for route");
            return;
        };
        self.replace_current_path(&path).await;
    }

    /// Replaces the current history entry using a path.
    pub async fn replace_current_path(&self, path: &str) {
        let options = NavigateOptions {
            replace: true,
            ..NavigateOptions::default()
        };
        self.navigate(path, options).await;
    }

    /// Re-handles the currently loaded route.
    pub async fn reload_current_route(&self, route_handled: Option<RouteHandled>) {
        let fragment = self.router.current_fragment();
        let options = NavigateOptions {
            replace: true,
            trigger: true,
            force: true,
            route_handled,
            ..NavigateOptions::default()
        };
        self.navigate(&fragment, options).await;
    }

    pub async fn current_controller(&self) -> Option<Arc<dyn Controller>> {
        self.inner.lock().await.current_controller.clone()
    }

    pub async fn current_controller_name(&self) -> Option<String> {
        self.inner.lock().await.current_controller_name.clone()
    }

    /// Current route fragment without its query string.
    pub fn current_route(&self) -> String {
        let fragment = self.router.current_fragment();
        match fragment.split_once('?') {
            Some((route, _)) => route.to_string(),
            None => fragment,
        }
    }

    /// Query-string portion of the current fragment, leading `?` included;
    /// empty when there is none.
    pub fn current_params(&self) -> String {
        let fragment = self.router.current_fragment();
        match fragment.split_once('?') {
            Some((_, params)) => format!("?{params}"),
            None => String::new(),
        }
    }

    /// Controller path registered for a route id.
    pub async fn route_controller(&self, route_id: &RouteId) -> Option<String> {
        self.inner
            .lock()
            .await
            .routes_map
            .get(route_id)
            .and_then(|config| config.controller.clone())
    }

    /// Snapshot of the controller stack, most recent last.
    pub async fn controller_stack(&self) -> Vec<RouteId> {
        self.inner.lock().await.controller_stack.clone()
    }

    async fn navigate(&self, path: &str, options: NavigateOptions) {
        debug!(path, ?options, "navigating");
        let matched = self.router.navigate(path, &options);
        if !options.trigger {
            return;
        }
        let Some(matched) = matched else {
            debug!(path, "no registered route matched the path");
            return;
        };
        let config = {
            self.inner
                .lock()
                .await
                .routes_map
                .get(&matched.route_id)
                .cloned()
        };
        let Some(config) = config else {
            warn!(route_id = %matched.route_id, "router matched an unregistered route id");
            return;
        };
        let url_params = UrlParams::normalize(matched.url_params);
        self.handle_route(config, url_params, options).await;
    }

    /// One full navigation resolution: middleware, wrapper plan, root
    /// enforcement, instancing, and dispatch.
    fn handle_route<'a>(
        &'a self,
        config: RouteConfig,
        url_params: UrlParams,
        options: NavigateOptions,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
        let nav_guard = self.nav_lock.lock().await;

        // route:before middleware gates the whole resolution.
        let engine = self.middleware.read().await.clone();
        let before_params = serde_json::to_value(&config).unwrap_or(Value::Null);
        if let Some(Err(err)) = engine
            .run(phases::ROUTE, SubPhase::Before, &before_params)
            .await
        {
            warn!(route_id = %config.route_id, error = %err, "before middleware rejected navigation");
            let _ = self.events.send(PageEvent::NavigationBlocked {
                route_id: config.route_id.clone(),
                reason: err.to_string(),
            });
            return;
        }

        let stack_snapshot = { self.inner.lock().await.controller_stack.clone() };
        let plan = WrapperPlan::new(&config, &stack_snapshot);
        let config = plan.prepare_route_info(config);

        let Some(controller_path) = config.controller.clone() else {
            debug!("provided controller path is empty; dropping navigation");
            return;
        };
        let route_id = config.route_id.clone();
        let singleton = config.singleton;

        let mut already_in_stack = false;

        if let Some(root_id) = config.root_id.clone() {
            // The requested route needs an ancestor resident in the stack.
            match self.stack_index_of(&root_id).await {
                None => {
                    debug!(%root_id, "root not resident; re-routing to its default route");
                    let default_route = {
                        self.inner
                            .lock()
                            .await
                            .routes_map
                            .get(&root_id)
                            .and_then(|root| root.default_route.clone())
                    };
                    let Some(root_path) = default_route else {
                        error!(%root_id, "attempting to navigate to a rootId without defaultRoute");
                        return;
                    };
                    drop(nav_guard);
                    let redirect: BoxFuture<'_, ()> =
                        Box::pin(self.navigate_to_page(&root_path, NavigateOptions::default()));
                    redirect.await;
                    return;
                }
                Some(_) => match self.stack_index_of(&route_id).await {
                    Some(stack_index) => {
                        let removed = self.truncate_stack_after(stack_index).await;
                        already_in_stack = true;
                        self.destroy_controllers(&removed).await;
                    }
                    None => {
                        if !self
                            .push_route_to_stack(&route_id, &controller_path, singleton, &plan)
                            .await
                        {
                            return;
                        }
                    }
                },
            }
        } else {
            // Root-level page.
            match self.stack_index_of(&route_id).await {
                None => {
                    // A fresh virtual stack: everything resident is torn down.
                    let removed = {
                        let mut inner = self.inner.lock().await;
                        std::mem::take(&mut inner.controller_stack)
                    };
                    self.destroy_controllers(&removed).await;
                    if !self
                        .push_route_to_stack(&route_id, &controller_path, singleton, &plan)
                        .await
                    {
                        return;
                    }
                }
                Some(stack_index) => {
                    // Reload of the resident root, or back-navigation to it.
                    let removed = self.truncate_stack_after(stack_index).await;
                    already_in_stack = true;
                    self.destroy_controllers(&removed).await;
                }
            }
        }

        // Dispatch.
        {
            let mut inner = self.inner.lock().await;
            inner.recently_added_controller = !already_in_stack;
        }

        let Some(entry) = self
            .factory
            .lookup(&route_id, &controller_path, singleton)
            .await
        else {
            error!(%route_id, %controller_path, "no controller instance found for dispatch");
            return;
        };

        if let Err(err) =
            wrapper::wrap_before_handling_route(&entry, &plan.options(), already_in_stack, &options)
                .await
        {
            error!(error = %err, "wrapper pre-display hook failed");
            return;
        }

        let method = config
            .method
            .clone()
            .unwrap_or_else(|| DEFAULT_ROUTE_METHOD.to_string());
        if let Err(err) = entry
            .controller
            .handle(&method, already_in_stack, &config.params, &url_params)
            .await
        {
            error!(%route_id, %method, error = %err, "controller failed to handle route");
            return;
        }

        if let Some(route_handled) = &options.route_handled {
            route_handled(&config, entry.controller.clone());
        }

        {
            let mut inner = self.inner.lock().await;
            inner.current_controller_name = Some(controller_path.clone());
            inner.current_controller = Some(entry.controller.clone());
        }
        let _ = self.events.send(PageEvent::RouteHandled(config.clone()));

        // route:after middleware is a best-effort notification pass.
        let after_params = serde_json::to_value(&config).unwrap_or(Value::Null);
        if let Some(Err(err)) = engine
            .run(phases::ROUTE, SubPhase::After, &after_params)
            .await
        {
            warn!(route_id = %config.route_id, error = %err, "after middleware reported an error");
        }
        })
    }

    /// Scans the stack for a route id. More than one occurrence is a
    /// configuration error: it is logged and treated as authoritative
    /// "not found" rather than an ambiguous index.
    async fn stack_index_of(&self, route_id: &RouteId) -> Option<usize> {
        let inner = self.inner.lock().await;
        let mut found = None;
        for (index, resident) in inner.controller_stack.iter().enumerate() {
            if resident == route_id {
                if found.is_some() {
                    error!(%route_id, "duplicate route ids found in the controller stack");
                    return None;
                }
                found = Some(index);
            }
        }
        found
    }

    async fn truncate_stack_after(&self, index: usize) -> Vec<RouteId> {
        let mut inner = self.inner.lock().await;
        inner.controller_stack.split_off(index + 1)
    }

    /// Pushes the route id onto the stack, creating its controller instance
    /// first if none exists. Returns `false` when instancing failed and the
    /// navigation must stall.
    async fn push_route_to_stack(
        &self,
        route_id: &RouteId,
        controller_path: &str,
        singleton: bool,
        plan: &WrapperPlan,
    ) -> bool {
        match self
            .factory
            .create_or_reuse(&self.self_weak, route_id, controller_path, singleton)
            .await
        {
            Ok(created) => {
                if created.freshly_constructed {
                    self.resolve_wrapper_dependency(&created.entry, plan).await;
                }
                debug!(%route_id, "pushing route to stack");
                self.inner
                    .lock()
                    .await
                    .controller_stack
                    .push(route_id.clone());
                true
            }
            Err(err) => {
                error!(%route_id, controller_path = %controller_path, error = %err, "controller instance could not be created");
                false
            }
        }
    }

    /// Runs the wrapper dependency flow for a freshly constructed instance:
    /// inject the wrapper path, load the module, attach the wrapper.
    async fn resolve_wrapper_dependency(&self, entry: &Arc<ControllerEntry>, plan: &WrapperPlan) {
        let deps = plan.handle_dependencies(&DependencyPaths::default());
        let Some(path) = deps.wrapper_path() else {
            return;
        };
        match self.factory.load_wrapper(path).await {
            Ok(module) => {
                let mut resolved = ResolvedDependencies {
                    controller_wrapper: Some(module),
                };
                wrapper::set_wrapper_instance(entry, &mut resolved).await;
            }
            Err(err) => error!(path, error = %err, "wrapper module could not be loaded"),
        }
    }

    /// Destroys a set of truncated route ids: each resident non-singleton
    /// controller's destroy, its wrapper detach, and removal from the
    /// per-route directory. Singleton instances only lose stack membership.
    async fn destroy_controllers(&self, route_ids: &[RouteId]) {
        if !route_ids.is_empty() {
            debug!(removed = ?route_ids, "destroying truncated controllers");
        }
        for route_id in route_ids {
            if let Some(entry) = self.factory.remove_route_instance(route_id).await {
                entry.controller.destroy().await;
                wrapper::destroy_wrapper(&entry).await;
            }
        }
    }

    /// Visual dispatch, triggered by a controller's readiness signal:
    /// transition bookkeeping between the previously displayed surface and
    /// the ready controller's surface.
    pub(crate) async fn dispatch_to_page(&self, controller_path: &str, controller: Arc<dyn Controller>) {
        let (direction, previous) = {
            let inner = self.inner.lock().await;
            let direction = if inner.recently_added_controller {
                TransitionDirection::Right
            } else {
                TransitionDirection::Left
            };
            (direction, inner.current_displayed.clone())
        };

        if let Some(previous) = &previous {
            previous.on_view_hidden();
        }

        let from = previous.map(|controller| controller.surface());
        let to = controller.surface();
        debug!(controller_path, ?from, ?to, ?direction, "controller is ready, dispatching to page");
        if from.as_ref() == Some(&to) {
            return;
        }

        self.transitions.transition(from, to, direction).await;
        self.inner.lock().await.current_displayed = Some(controller);
        let _ = self.events.send(PageEvent::PageDispatched {
            controller_path: controller_path.to_string(),
        });
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
