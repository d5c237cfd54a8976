//! Explicit registry of open device actors.
//!
//! Replaces the teacher's `LazyLock<MtpConnectionManager>` global singleton
//! (spec §9 Design Notes: "no hidden singletons in the core"). Callers
//! construct and own a `Registry` value and pass it where needed.

use super::DeviceActor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Tracks the set of currently-open device actors, keyed by device id.
#[derive(Default)]
pub struct Registry {
    actors: Mutex<HashMap<String, Arc<DeviceActor>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self { actors: Mutex::new(HashMap::new()) }
    }

    /// Registers an actor, replacing any previous entry for the same device
    /// id (e.g. after a reattach) and returning the one it displaced, if any.
    pub fn insert(&self, actor: Arc<DeviceActor>) -> Option<Arc<DeviceActor>> {
        self.actors.lock().unwrap().insert(actor.device_id().to_string(), actor)
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceActor>> {
        self.actors.lock().unwrap().get(device_id).cloned()
    }

    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceActor>> {
        self.actors.lock().unwrap().remove(device_id)
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.actors.lock().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.actors.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quirks::DevicePolicy;

    #[test]
    fn insert_and_get_round_trip() {
        let registry = Registry::new();
        let actor = Arc::new(DeviceActor::new("dev-1", DevicePolicy::conservative_default()));
        registry.insert(actor);
        assert!(registry.get("dev-1").is_some());
        assert!(registry.get("dev-2").is_none());
    }

    #[test]
    fn remove_drops_the_entry() {
        let registry = Registry::new();
        let actor = Arc::new(DeviceActor::new("dev-1", DevicePolicy::conservative_default()));
        registry.insert(actor);
        assert!(registry.remove("dev-1").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn reinserting_the_same_device_id_returns_the_displaced_actor() {
        let registry = Registry::new();
        let first = Arc::new(DeviceActor::new("dev-1", DevicePolicy::conservative_default()));
        let second = Arc::new(DeviceActor::new("dev-1", DevicePolicy::conservative_default()));
        registry.insert(first);
        let displaced = registry.insert(second);
        assert!(displaced.is_some());
        assert_eq!(registry.len(), 1);
    }
}
