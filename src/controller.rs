//! Process-wide controller lifecycle
//!
//! Disposal tasks outlive the code that created them, so they reach the node
//! registry through a [`ControllerSlot`] instead of holding it. The slot is
//! empty before startup has installed a controller and again once shutdown
//! has begun; tasks treat an empty slot as "try again later".

use once_cell::sync::Lazy;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use crate::node::{Node, NodeRegistry};

static GLOBAL_SLOT: Lazy<ControllerSlot> = Lazy::new(ControllerSlot::default);

/// The running controller and the collaborators it exposes to tasks
pub struct Controller {
    registry: Arc<dyn NodeRegistry>,
}

impl Controller {
    pub fn new(registry: Arc<dyn NodeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &dyn NodeRegistry {
        self.registry.as_ref()
    }

    /// Look up a node by name in the live registry
    pub fn resolve_node(&self, name: &str) -> Option<Node> {
        self.registry.resolve(name)
    }
}

/// Shared holder of the active controller, if any
#[derive(Clone, Default)]
pub struct ControllerSlot {
    inner: Arc<RwLock<Option<Arc<Controller>>>>,
}

impl ControllerSlot {
    /// The slot shared by the whole process
    pub fn global() -> ControllerSlot {
        GLOBAL_SLOT.clone()
    }

    /// Make `controller` the active one, replacing any previous controller
    pub fn install(&self, controller: Controller) -> Arc<Controller> {
        let controller = Arc::new(controller);
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::clone(&controller));
        info!("Controller installed");
        controller
    }

    /// Signal shutdown; subsequent lookups see no controller
    pub fn shutdown(&self) -> Option<Arc<Controller>> {
        let previous = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            debug!("Controller shut down");
        }
        previous
    }

    pub fn current(&self) -> Option<Arc<Controller>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::StaticRegistry;

    #[test]
    fn test_slot_starts_empty() {
        let slot = ControllerSlot::default();
        assert!(!slot.is_active());
        assert!(slot.current().is_none());
    }

    #[test]
    fn test_install_then_shutdown() {
        let slot = ControllerSlot::default();
        slot.install(Controller::new(Arc::new(StaticRegistry::with_controller())));

        let controller = slot.current().unwrap();
        assert!(controller.resolve_node("").is_some());

        assert!(slot.shutdown().is_some());
        assert!(!slot.is_active());
        assert!(slot.shutdown().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let slot = ControllerSlot::default();
        let other = slot.clone();

        slot.install(Controller::new(Arc::new(StaticRegistry::new())));

        assert!(other.is_active());
    }
}
