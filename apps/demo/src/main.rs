//! Terminal walkthrough of the navigation runtime: loads a TOML route table,
//! wires in-memory collaborators, and replays a sequence of navigations while
//! printing every page event.

use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tracing::info;

use nav_core::{
    phases, Controller, ControllerModule, Middleware, MiddlewareEngine, ModuleLoader,
    NavigateOptions, PageManager, PresentationWrapper, ReadySignal, RouteConfig, RouteId,
    RouteMatch, Router, SubPhase, Surface, TransitionDirection, TransitionEngine, UrlParams,
    WrapperModule,
};

#[derive(Parser, Debug)]
struct Cli {
    /// Route table to load.
    #[arg(long, default_value = "apps/demo/routes.toml")]
    routes: PathBuf,
    /// Paths to navigate through, in order. Defaults to a scripted tour.
    paths: Vec<String>,
}

/// Segment-matching router over the registered routing expressions. `:name`
/// segments capture positionally; the query string rides along as the final
/// raw match segment.
#[derive(Default)]
struct SegmentRouter {
    patterns: Mutex<Vec<(String, RouteId)>>,
    fragment: Mutex<String>,
    history: Mutex<Vec<String>>,
}

impl Router for SegmentRouter {
    fn register(&self, pattern: &str, route_id: &RouteId) {
        self.patterns
            .lock()
            .unwrap()
            .push((pattern.to_string(), route_id.clone()));
    }

    fn navigate(&self, path: &str, options: &NavigateOptions) -> Option<RouteMatch> {
        {
            let mut history = self.history.lock().unwrap();
            if options.replace {
                history.pop();
            }
            history.push(path.to_string());
        }
        *self.fragment.lock().unwrap() = path.to_string();

        let (route, query) = match path.split_once('?') {
            Some((route, query)) => (route, query),
            None => (path, ""),
        };
        let patterns = self.patterns.lock().unwrap();
        'candidates: for (pattern, route_id) in patterns.iter() {
            let pattern_segments: Vec<&str> = pattern.split('/').collect();
            let path_segments: Vec<&str> = route.split('/').collect();
            if pattern_segments.len() != path_segments.len() {
                continue;
            }
            let mut url_params = Vec::new();
            for (expected, actual) in pattern_segments.iter().zip(path_segments.iter()) {
                if expected.starts_with(':') {
                    url_params.push(actual.to_string());
                } else if expected != actual {
                    continue 'candidates;
                }
            }
            url_params.push(query.to_string());
            return Some(RouteMatch {
                route_id: route_id.clone(),
                url_params,
            });
        }
        None
    }

    fn build_path(&self, route_id: &RouteId, params: &[String]) -> Option<String> {
        let patterns = self.patterns.lock().unwrap();
        let (pattern, _) = patterns.iter().find(|(_, id)| id == route_id)?;
        let mut supplied = params.iter();
        let mut segments = Vec::new();
        for segment in pattern.split('/') {
            if segment.starts_with(':') {
                segments.push(supplied.next()?.clone());
            } else {
                segments.push(segment.to_string());
            }
        }
        Some(segments.join("/"))
    }

    fn format_query_string(&self, query: &BTreeMap<String, String>) -> String {
        let pairs: Vec<String> = query
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        format!("?{}", pairs.join("&"))
    }

    fn current_fragment(&self) -> String {
        self.fragment.lock().unwrap().clone()
    }

    fn back(&self) {
        let mut history = self.history.lock().unwrap();
        history.pop();
        if let Some(previous) = history.last() {
            *self.fragment.lock().unwrap() = previous.clone();
        }
    }
}

struct ConsoleTransitions;

#[async_trait]
impl TransitionEngine for ConsoleTransitions {
    async fn transition(
        &self,
        from: Option<Surface>,
        to: Surface,
        direction: TransitionDirection,
    ) {
        info!(?from, ?to, ?direction, "transition");
    }
}

struct DemoController {
    path: String,
    ready: ReadySignal,
}

#[async_trait]
impl Controller for DemoController {
    async fn handle(
        &self,
        method: &str,
        already_in_stack: bool,
        _params: &Value,
        url_params: &UrlParams,
    ) -> Result<()> {
        info!(
            controller = %self.path,
            method,
            already_in_stack,
            positional = ?url_params.positional,
            query = ?url_params.query,
            "handling route"
        );
        self.ready.notify_ready();
        Ok(())
    }

    async fn destroy(&self) {
        info!(controller = %self.path, "destroyed");
    }

    fn ready(&self) -> watch::Receiver<u64> {
        self.ready.subscribe()
    }

    fn surface(&self) -> Surface {
        Surface::new(self.path.clone())
    }
}

struct DemoModule {
    path: String,
}

impl ControllerModule for DemoModule {
    fn construct(&self) -> Arc<dyn Controller> {
        Arc::new(DemoController {
            path: self.path.clone(),
            ready: ReadySignal::new(),
        })
    }
}

struct DialogWrapper;

#[async_trait]
impl PresentationWrapper for DialogWrapper {
    async fn wrap(&self, options: &Map<String, Value>, already_in_stack: bool) -> Result<Value> {
        info!(?options, already_in_stack, "opening dialog");
        Ok(json!({ "dialog": true }))
    }

    async fn destroy(&self) {
        info!("closing dialog");
    }
}

struct DialogWrapperModule;

impl WrapperModule for DialogWrapperModule {
    fn construct(&self, _controller: Arc<dyn Controller>) -> Arc<dyn PresentationWrapper> {
        Arc::new(DialogWrapper)
    }
}

struct DemoLoader;

#[async_trait]
impl ModuleLoader for DemoLoader {
    async fn load_controller(&self, path: &str) -> Result<Option<Arc<dyn ControllerModule>>> {
        Ok(Some(Arc::new(DemoModule {
            path: path.to_string(),
        })))
    }

    async fn load_wrapper(&self, path: &str) -> Result<Option<Arc<dyn WrapperModule>>> {
        if path == "wrappers/dialog" {
            Ok(Some(Arc::new(DialogWrapperModule)))
        } else {
            Ok(None)
        }
    }
}

struct TraceNavigation;

#[async_trait]
impl Middleware for TraceNavigation {
    async fn run(&self, params: &Value, carried: Value) -> Result<Value> {
        info!(route_id = ?params.get("routeId"), "navigation requested");
        Ok(carried)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let cli = Cli::parse();

    let raw = std::fs::read_to_string(&cli.routes)
        .with_context(|| format!("reading route table {}", cli.routes.display()))?;
    let table: HashMap<String, RouteConfig> =
        toml::from_str(&raw).context("parsing route table")?;

    let manager = PageManager::new(
        Arc::new(SegmentRouter::default()),
        Arc::new(ConsoleTransitions),
        Arc::new(DemoLoader),
    );
    manager.routes(table).await;

    let mut middleware = MiddlewareEngine::new();
    middleware.add(Arc::new(TraceNavigation), phases::ROUTE, SubPhase::Before);
    manager.set_middleware(middleware).await;

    let mut events = manager.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(?event, "page event");
        }
    });

    let paths = if cli.paths.is_empty() {
        vec![
            "calendar/appointment/7?source=email".to_string(),
            "calendar/appointment/7?source=email".to_string(),
            "calendar/share/7".to_string(),
            "calendar".to_string(),
            "settings".to_string(),
        ]
    } else {
        cli.paths
    };
    for path in paths {
        info!(%path, "navigating");
        manager
            .navigate_to_page(&path, NavigateOptions::default())
            .await;
    }

    // Let the readiness-driven dispatch tasks drain before exiting.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
