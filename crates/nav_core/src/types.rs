use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Controller;

/// Stable identifier for a registered route config; doubles as the
/// controller-stack and instance-dictionary key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(pub String);

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RouteId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RouteId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Static route descriptor. Registered once through [`crate::PageManager::routes`]
/// and never mutated afterwards; per-navigation augmentation works on clones.
///
/// Field names follow the route-table convention of the original application
/// config, so a table like
///
/// ```toml
/// [calendar-appointment]
/// route = "calendar/appointment/:id"
/// rootId = "calendar-landing"
/// controller = "calendar/appointment"
/// ```
///
/// deserializes directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouteConfig {
    /// Injected at registration from the route-table key.
    #[serde(skip_deserializing)]
    pub route_id: RouteId,
    /// Routing expression handed to the router collaborator.
    pub route: String,
    /// Module path of the controller handling this route.
    pub controller: Option<String>,
    /// Route id that must already be resident in the controller stack.
    pub root_id: Option<RouteId>,
    /// Share one controller instance (keyed by controller path) across all
    /// routes referencing it; never destroyed by stack operations.
    pub singleton: bool,
    /// Handling method name, overriding [`crate::DEFAULT_ROUTE_METHOD`].
    pub method: Option<String>,
    /// Free-form params forwarded to the controller's handling method.
    pub params: Value,
    pub controller_wrapper: Option<WrapperSpec>,
    /// Path navigated to when this route is a missing root for a child route.
    pub default_route: Option<String>,
}

/// Wrapper descriptor: either a bare module path or a module path plus
/// free-form presentation options merged at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WrapperSpec {
    Bare(String),
    WithOptions(WrapperOptions),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrapperOptions {
    /// The object form must name its wrapper module; a missing path is a
    /// configuration error reported at navigation time, not at parse time.
    pub wrapper: Option<String>,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl WrapperSpec {
    pub fn path(&self) -> Option<&str> {
        match self {
            WrapperSpec::Bare(path) => Some(path),
            WrapperSpec::WithOptions(opts) => opts.wrapper.as_deref(),
        }
    }

    pub fn options(&self) -> Map<String, Value> {
        match self {
            WrapperSpec::Bare(_) => Map::new(),
            WrapperSpec::WithOptions(opts) => opts.options.clone(),
        }
    }
}

/// Completion callback supplied with a navigation request, invoked with the
/// resolved route config and the controller instance that handled it.
pub type RouteHandled = Arc<dyn Fn(&RouteConfig, Arc<dyn Controller>) + Send + Sync>;

#[derive(Clone, Default)]
pub struct NavigateOptions {
    pub trigger: bool,
    pub replace: bool,
    pub force: bool,
    pub route_handled: Option<RouteHandled>,
    /// Merged over the route's own wrapper options before the pre-display hook.
    pub wrapper_options: Map<String, Value>,
}

impl NavigateOptions {
    pub fn with_route_handled(mut self, handler: RouteHandled) -> Self {
        self.route_handled = Some(handler);
        self
    }
}

impl fmt::Debug for NavigateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigateOptions")
            .field("trigger", &self.trigger)
            .field("replace", &self.replace)
            .field("force", &self.force)
            .field("route_handled", &self.route_handled.is_some())
            .field("wrapper_options", &self.wrapper_options)
            .finish()
    }
}

/// Object form accepted by `navigate_to_route` / `push_route` /
/// `replace_current_route`: a route id plus positional params and an optional
/// query-string map.
#[derive(Clone, Default)]
pub struct RouteDefinition {
    pub route: RouteId,
    pub params: Vec<String>,
    pub query_string: BTreeMap<String, String>,
    pub route_handled: Option<RouteHandled>,
}

impl RouteDefinition {
    pub fn new(route: impl Into<RouteId>) -> Self {
        Self {
            route: route.into(),
            ..Self::default()
        }
    }
}

/// URL parameters after normalization: the router's trailing query-string
/// segment is parsed into a map, the rest stay positional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParams {
    pub positional: Vec<String>,
    pub query: Option<BTreeMap<String, String>>,
}

impl UrlParams {
    /// The router yields raw match segments with the query string (possibly
    /// empty) as the last entry.
    pub fn normalize(mut raw: Vec<String>) -> Self {
        let Some(tail) = raw.pop() else {
            return Self::default();
        };
        let query = if tail.is_empty() {
            None
        } else {
            Some(parse_query_string(&tail))
        };
        Self {
            positional: raw,
            query,
        }
    }
}

/// Parses `a=1&b=2` (with or without a leading `?`) into a map. Keys without
/// a value map to an empty string.
pub fn parse_query_string(raw: &str) -> BTreeMap<String, String> {
    raw.trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Identity handle for a controller's display container. Two controllers
/// sharing a surface skip the visual transition between them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Surface(pub String);

impl Surface {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDirection {
    Left,
    Right,
}

/// A successful router match for a navigated path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub route_id: RouteId,
    /// Raw match segments, query string last; see [`UrlParams::normalize`].
    pub url_params: Vec<String>,
}
