use crate::types::{ApplicationId, Generation};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Last known active generation per application, plus the generation of the
/// aggregate model.
///
/// Written only from the activation path and read on every resolution, so a
/// read-biased lock is used. Generations never move backwards.
pub struct ApplicationGenerations {
    active: RwLock<HashMap<ApplicationId, Generation>>,
    aggregate: AtomicU64,
}

impl ApplicationGenerations {
    pub fn new() -> Self {
        ApplicationGenerations {
            active: RwLock::new(HashMap::new()),
            aggregate: AtomicU64::new(0),
        }
    }

    pub fn active(&self, application: &ApplicationId) -> Option<Generation> {
        if application.is_global() {
            return Some(self.aggregate());
        }
        self.active.read().get(application).copied()
    }

    /// Records an activation. Returns the generation now in effect, which is
    /// the old one if `generation` is older. Activating the global
    /// application moves the aggregate view.
    pub fn update(&self, application: &ApplicationId, generation: Generation) -> Generation {
        if application.is_global() {
            self.advance_aggregate(generation);
            return self.aggregate();
        }

        let mut write_guard = self.active.write();
        let current = write_guard.entry(application.clone()).or_insert(generation);
        if generation > *current {
            *current = generation;
        }
        *current
    }

    pub fn remove(&self, application: &ApplicationId) -> Option<Generation> {
        self.active.write().remove(application)
    }

    pub fn aggregate(&self) -> Generation {
        self.aggregate.load(Ordering::Acquire)
    }

    /// Moves the aggregate view forward. Returns true if `generation` was
    /// strictly ahead of it.
    pub fn advance_aggregate(&self, generation: Generation) -> bool {
        self.aggregate.fetch_max(generation, Ordering::AcqRel) < generation
    }

    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ApplicationGenerations {
    fn default() -> Self {
        Self::new()
    }
}
