//! The concurrent map of installed controllers, keyed by [`ServiceName`].

use crate::controller::ControllerHandle;
use crate::error::{ContainerError, Result};
use crate::name::ServiceName;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

#[cfg(not(feature = "logging"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "logging"))]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// Number of shards the underlying `DashMap` is split into, the same
/// concurrency knob the teacher tunes for its factory table.
const SHARD_AMOUNT: usize = 8;

/// Concurrent name -> controller map. Cheap to clone: the map itself lives
/// behind an `Arc`.
#[derive(Clone)]
pub struct ServiceRegistry {
    controllers: Arc<DashMap<ServiceName, Arc<dyn ControllerHandle>, RandomState>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            controllers: Arc::new(DashMap::with_capacity_and_hasher_and_shard_amount(
                64,
                RandomState::new(),
                SHARD_AMOUNT,
            )),
        }
    }

    /// Look up a controller by name.
    pub fn get(&self, name: &ServiceName) -> Option<Arc<dyn ControllerHandle>> {
        self.controllers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Look up a controller by name, or fail with [`ContainerError::ServiceNotFound`].
    pub fn get_required(&self, name: &ServiceName) -> Result<Arc<dyn ControllerHandle>> {
        self.get(name).ok_or_else(|| ContainerError::ServiceNotFound(name.clone()))
    }

    /// Insert a controller under `name`, failing with
    /// [`ContainerError::DuplicateService`] if the name is already taken.
    /// Used by the installer inside its rollback-capable batch loop.
    pub(crate) fn insert_new(&self, name: ServiceName, controller: Arc<dyn ControllerHandle>) -> Result<()> {
        match self.controllers.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ContainerError::DuplicateService(name)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                trace!(service = %name, "inserted controller into registry");
                slot.insert(controller);
                Ok(())
            }
        }
    }

    /// Remove `name` from the registry, unconditionally. Used by the
    /// installer to roll back a partially-applied batch.
    pub(crate) fn remove_unconditionally(&self, name: &ServiceName) {
        trace!(service = %name, "removed controller from registry (rollback)");
        self.controllers.remove(name);
    }

    /// Remove a controller if (and only if) it is currently in a removable
    /// state (`Down` or `StartFailed`) *and* has no live dependent, atomically
    /// with respect to any concurrent state transition: there is no separate
    /// "tombstone" state between a removable controller and its removal from
    /// the map — the check and the removal happen under the same `DashMap`
    /// shard lock that guards the entry, so no observer can see a gap between
    /// them. A controller some other still-registered service lists as a
    /// dependency is never dropped, even once it is itself `Down`, so that
    /// dependent never later fails to start with a missing dependency.
    pub fn remove_if_down(&self, name: &ServiceName) -> Result<()> {
        let removed = self
            .controllers
            .remove_if(name, |_, controller| controller.removable() && !controller.has_live_dependents());
        match removed {
            Some((_, controller)) => {
                debug!(service = %name, "removed service from registry");
                controller.mark_removed();
                Ok(())
            }
            None => {
                if self.controllers.contains_key(name) {
                    Err(ContainerError::IllegalState(
                        "service is not in a removable state (must be DOWN or START_FAILED, with no live dependents)",
                    ))
                } else {
                    Err(ContainerError::ServiceNotFound(name.clone()))
                }
            }
        }
    }

    /// Request removal: forces the controller into a mode that never starts
    /// and, if currently `Up` or `Starting`, towards `Down`, overriding any
    /// outstanding demand. Returns immediately; the actual stop (and any
    /// cascade into dependents that still demanded this service) happens
    /// through the executor. Callers that need "remove once fully stopped"
    /// should follow up with [`Self::remove_if_down`], retrying once a
    /// listener observes the `down` transition.
    pub fn request_removal(&self, name: &ServiceName) -> Result<()> {
        let controller = self.get_required(name)?;
        debug!(service = %name, "requesting removal");
        controller.remove();
        Ok(())
    }

    /// Number of controllers currently tracked (any state).
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
