//! Observability
//!
//! An optional instrumentation hook that sees what the reactive core (and
//! the component layer built on top of it) is doing. Dev tools, profilers
//! and test recorders implement [`Hook`].
//!
//! The hook is held by an [`Observability`] context that belongs to a
//! runtime, not by a process-wide global. At most one hook is installed per
//! context. Installing a new hook replaces the old one, last writer wins,
//! and the replaced hook is handed back to the caller.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::graph::NodeId;

/// Instrumentation callbacks. Every method defaults to a no-op.
///
/// Values are passed as `&dyn Any`; a hook that knows the concrete type of
/// a cell can downcast.
#[allow(unused_variables)]
pub trait Hook: Send + Sync {
    fn on_component_mount(&self, component_id: &str, name: &str) {}
    fn on_component_update(&self, component_id: &str, message: &str) {}
    fn on_component_unmount(&self, component_id: &str) {}

    fn on_ref_change(&self, ref_id: &str, old: &dyn Any, new: &dyn Any) {}
    fn on_computed_change(&self, computed_id: NodeId, old: Option<&dyn Any>, new: &dyn Any) {}
    fn on_watch_callback(&self, watcher_id: NodeId, new: &dyn Any, old: &dyn Any) {}
    fn on_effect_run(&self, effect_id: NodeId) {}

    fn on_child_added(&self, parent_id: &str, child_id: &str) {}
    fn on_child_removed(&self, parent_id: &str, child_id: &str) {}
    fn on_event(&self, component_id: &str, event_name: &str, data: &dyn Any) {}
    fn on_render_complete(&self, component_id: &str, duration: Duration) {}
}

/// Holder for the currently installed hook.
#[derive(Default)]
pub struct Observability {
    hook: RwLock<Option<Arc<dyn Hook>>>,
}

impl Observability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `hook`, returning the hook it replaced.
    pub fn set_hook(&self, hook: Arc<dyn Hook>) -> Option<Arc<dyn Hook>> {
        let previous = self.hook.write().replace(hook);
        if previous.is_some() {
            tracing::debug!("replaced existing instrumentation hook");
        }
        previous
    }

    /// Remove the installed hook, returning it.
    pub fn clear_hook(&self) -> Option<Arc<dyn Hook>> {
        self.hook.write().take()
    }

    pub fn is_enabled(&self) -> bool {
        self.hook.read().is_some()
    }

    /// Run `f` against the hook, if any.
    ///
    /// The hook is cloned out first so the lock is not held while it runs;
    /// a hook may install or clear hooks from inside a callback.
    pub fn with_hook(&self, f: impl FnOnce(&dyn Hook)) {
        let hook = self.hook.read().clone();
        if let Some(hook) = hook {
            f(hook.as_ref());
        }
    }

    pub fn component_mounted(&self, component_id: &str, name: &str) {
        self.with_hook(|hook| hook.on_component_mount(component_id, name));
    }

    pub fn component_updated(&self, component_id: &str, message: &str) {
        self.with_hook(|hook| hook.on_component_update(component_id, message));
    }

    pub fn component_unmounted(&self, component_id: &str) {
        self.with_hook(|hook| hook.on_component_unmount(component_id));
    }

    pub fn child_added(&self, parent_id: &str, child_id: &str) {
        self.with_hook(|hook| hook.on_child_added(parent_id, child_id));
    }

    pub fn child_removed(&self, parent_id: &str, child_id: &str) {
        self.with_hook(|hook| hook.on_child_removed(parent_id, child_id));
    }

    pub fn event(&self, component_id: &str, event_name: &str, data: &dyn Any) {
        self.with_hook(|hook| hook.on_event(component_id, event_name, data));
    }

    pub fn render_complete(&self, component_id: &str, duration: Duration) {
        self.with_hook(|hook| hook.on_render_complete(component_id, duration));
    }
}

impl std::fmt::Debug for Observability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observability")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
