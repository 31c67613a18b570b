//! Lazy controller instancing and the readiness signal that drives visual
//! dispatch.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::{
    error::NavError, types::RouteId, Controller, ModuleLoader, PageManager, PresentationWrapper,
    WrapperModule,
};

/// One-shot-subscribed, repeatedly-notifiable readiness signal.
///
/// Controllers embed one of these and call [`ReadySignal::notify_ready`]
/// whenever they become presentable (typically after their own async load).
/// The factory subscribes exactly once per construction; every notification
/// after that triggers one visual dispatch.
pub struct ReadySignal {
    tx: watch::Sender<u64>,
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadySignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx }
    }

    pub fn notify_ready(&self) {
        self.tx.send_modify(|generation| *generation += 1);
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

/// A resident controller instance plus its wrapper slot.
///
/// The slot stands in for the reserved hidden field the wrapper would occupy
/// on the instance itself: attached at most once, detached exactly once on
/// destruction.
pub struct ControllerEntry {
    pub controller: Arc<dyn Controller>,
    wrapper: Mutex<Option<Arc<dyn PresentationWrapper>>>,
}

impl ControllerEntry {
    pub(crate) fn new(controller: Arc<dyn Controller>) -> Arc<Self> {
        Arc::new(Self {
            controller,
            wrapper: Mutex::new(None),
        })
    }

    pub async fn wrapper(&self) -> Option<Arc<dyn PresentationWrapper>> {
        self.wrapper.lock().await.clone()
    }

    pub(crate) async fn attach_wrapper_if_absent(
        &self,
        construct: impl FnOnce() -> Arc<dyn PresentationWrapper>,
    ) {
        let mut slot = self.wrapper.lock().await;
        if slot.is_none() {
            *slot = Some(construct());
        }
    }

    pub(crate) async fn take_wrapper(&self) -> Option<Arc<dyn PresentationWrapper>> {
        self.wrapper.lock().await.take()
    }
}

pub(crate) struct CreatedInstance {
    pub entry: Arc<ControllerEntry>,
    pub freshly_constructed: bool,
}

/// Owns the two instance directories: per-route entries for non-singleton
/// controllers and per-controller-path entries for singletons.
pub(crate) struct InstanceFactory {
    loader: Arc<dyn ModuleLoader>,
    per_route: Mutex<HashMap<RouteId, Arc<ControllerEntry>>>,
    singletons: Mutex<HashMap<String, Arc<ControllerEntry>>>,
}

impl InstanceFactory {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            per_route: Mutex::new(HashMap::new()),
            singletons: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the resident entry for a dispatch: singletons by controller
    /// path, everything else by route id.
    pub async fn lookup(
        &self,
        route_id: &RouteId,
        controller_path: &str,
        singleton: bool,
    ) -> Option<Arc<ControllerEntry>> {
        if singleton {
            self.singletons.lock().await.get(controller_path).cloned()
        } else {
            self.per_route.lock().await.get(route_id).cloned()
        }
    }

    /// Returns the existing entry, or loads the controller module and
    /// constructs a fresh instance. A fresh construction subscribes to the
    /// controller's readiness signal exactly once.
    pub async fn create_or_reuse(
        &self,
        manager: &Weak<PageManager>,
        route_id: &RouteId,
        controller_path: &str,
        singleton: bool,
    ) -> Result<CreatedInstance, NavError> {
        if singleton {
            if let Some(entry) = self.singletons.lock().await.get(controller_path).cloned() {
                return Ok(CreatedInstance {
                    entry,
                    freshly_constructed: false,
                });
            }
            let entry = self.construct(manager, controller_path, true).await?;
            self.singletons
                .lock()
                .await
                .insert(controller_path.to_string(), entry.clone());
            Ok(CreatedInstance {
                entry,
                freshly_constructed: true,
            })
        } else {
            if let Some(entry) = self.per_route.lock().await.get(route_id).cloned() {
                debug!(%route_id, "an instance already exists for this route id");
                return Ok(CreatedInstance {
                    entry,
                    freshly_constructed: false,
                });
            }
            let entry = self.construct(manager, controller_path, false).await?;
            self.per_route
                .lock()
                .await
                .insert(route_id.clone(), entry.clone());
            Ok(CreatedInstance {
                entry,
                freshly_constructed: true,
            })
        }
    }

    /// Drops the per-route entry for a truncated route id. Singleton entries
    /// are never removed here; only their stack membership goes away.
    pub async fn remove_route_instance(&self, route_id: &RouteId) -> Option<Arc<ControllerEntry>> {
        self.per_route.lock().await.remove(route_id)
    }

    pub async fn load_wrapper(&self, path: &str) -> Result<Arc<dyn WrapperModule>, NavError> {
        self.loader
            .load_wrapper(path)
            .await
            .map_err(|source| NavError::LoadFailure {
                path: path.to_string(),
                source,
            })?
            .ok_or_else(|| NavError::WrapperNotFound(path.to_string()))
    }

    async fn construct(
        &self,
        manager: &Weak<PageManager>,
        controller_path: &str,
        singleton: bool,
    ) -> Result<Arc<ControllerEntry>, NavError> {
        let module = self
            .loader
            .load_controller(controller_path)
            .await
            .map_err(|source| NavError::LoadFailure {
                path: controller_path.to_string(),
                source,
            })?
            .ok_or_else(|| NavError::ControllerNotFound(controller_path.to_string()))?;

        debug!(controller_path, singleton, "instantiating controller");
        let controller = if singleton {
            module
                .shared_instance()
                .unwrap_or_else(|| module.construct())
        } else {
            module.construct()
        };

        let entry = ControllerEntry::new(controller.clone());
        spawn_dispatch_on_ready(manager, controller_path, controller);
        Ok(entry)
    }
}

/// Subscribes to the controller's readiness signal and forwards each
/// notification to the manager's visual dispatch. The task holds only a weak
/// manager handle so a dropped manager tears the subscription down.
fn spawn_dispatch_on_ready(
    manager: &Weak<PageManager>,
    controller_path: &str,
    controller: Arc<dyn Controller>,
) {
    let weak = manager.clone();
    let path = controller_path.to_string();
    let mut ready = controller.ready();

    tokio::spawn(async move {
        // The controller may have signalled readiness during construction,
        // before this subscription existed.
        if *ready.borrow_and_update() > 0 {
            let Some(manager) = weak.upgrade() else {
                return;
            };
            manager.dispatch_to_page(&path, controller.clone()).await;
        }
        while ready.changed().await.is_ok() {
            let Some(manager) = weak.upgrade() else {
                return;
            };
            manager.dispatch_to_page(&path, controller.clone()).await;
        }
    });
}
