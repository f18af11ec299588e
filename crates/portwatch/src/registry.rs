//! Registration table for monitored targets.
//!
//! Registering the same `host:port` twice never creates a second entry.
//! The existing target absorbs the new registration instead: the smaller
//! polling interval wins and the new callbacks are appended.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::target::{Callback, OutageWindow, Target, TargetId};

/// A request to monitor one endpoint.
pub struct Registration {
    id: TargetId,
    on_down: Callback,
    on_up: Callback,
    interval_secs: u64,
    outage: Option<OutageWindow>,
}

impl Registration {
    /// Monitor `host:port` every second with no outage window.
    pub fn new<D, U>(host: impl Into<String>, port: u16, on_down: D, on_up: U) -> Self
    where
        D: Fn() + Send + Sync + 'static,
        U: Fn() + Send + Sync + 'static,
    {
        Self {
            id: TargetId::new(host, port),
            on_down: Arc::new(on_down),
            on_up: Arc::new(on_up),
            interval_secs: 1,
            outage: None,
        }
    }

    /// Polling interval in seconds. Values below one are raised to one.
    pub fn interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    /// Suspend checks while `window` is in effect.
    pub fn outage(mut self, window: OutageWindow) -> Self {
        self.outage = Some(window);
        self
    }

    /// Endpoint this registration is for.
    pub fn id(&self) -> &TargetId {
        &self.id
    }

    /// Build the candidate target.
    pub fn into_target(self) -> Target {
        Target::new(
            self.id,
            self.on_down,
            self.on_up,
            self.interval_secs,
            self.outage,
        )
    }
}

/// Insertion-ordered set of unique targets.
#[derive(Debug, Default)]
pub struct Registry {
    targets: Vec<Target>,
    /// Identity → position in `targets`.
    index: HashMap<TargetId, usize>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration, merging it into an existing target with the
    /// same identity.
    pub fn register(&mut self, registration: Registration) {
        self.insert(registration.into_target());
    }

    /// Add a fully built target, merging duplicates.
    pub fn insert(&mut self, target: Target) {
        if let Some(&pos) = self.index.get(target.id()) {
            let existing = &mut self.targets[pos];
            existing.merge(target);
            debug!(
                addr = %existing.id(),
                interval_secs = existing.interval_secs(),
                callbacks = existing.down_callback_count(),
                "duplicate registration merged"
            );
            return;
        }

        debug!(addr = %target.id(), interval_secs = target.interval_secs(), "target registered");
        self.index.insert(target.id().clone(), self.targets.len());
        self.targets.push(target);
    }

    /// All targets in registration order.
    pub fn all(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    /// Look up a target by identity.
    pub fn get(&self, id: &TargetId) -> Option<&Target> {
        self.index.get(id).map(|&pos| &self.targets[pos])
    }

    /// Number of distinct targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Hand the targets over to their check tasks.
    pub fn into_targets(self) -> Vec<Target> {
        self.targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn void() {}

    #[test]
    fn duplicate_registrations_collapse() {
        let mut registry = Registry::new();
        for _ in 0..3 {
            registry.register(Registration::new("127.0.0.1", 8989, void, void));
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn minimum_interval_wins() {
        let mut registry = Registry::new();
        for secs in [10, 5, 20] {
            registry.register(Registration::new("127.0.0.1", 8989, void, void).interval_secs(secs));
        }

        let target = registry.all().next().unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(target.interval_secs(), 5);
    }

    #[test]
    fn interval_below_one_is_clamped() {
        let mut registry = Registry::new();
        registry.register(Registration::new("127.0.0.1", 8989, void, void).interval_secs(4));
        registry.register(Registration::new("127.0.0.1", 8989, void, void).interval_secs(0));

        let id = TargetId::new("127.0.0.1", 8989);
        assert_eq!(registry.get(&id).unwrap().interval_secs(), 1);
    }

    #[test]
    fn callbacks_accumulate() {
        let mut registry = Registry::new();
        registry.register(Registration::new("127.0.0.1", 8989, || println!("callback func 1"), void));
        registry.register(Registration::new("127.0.0.1", 8989, || println!("callback func 2"), void));
        registry.register(Registration::new("127.0.0.1", 8989, || println!("callback func 3"), void));

        let target = registry.all().next().unwrap();
        assert_eq!(target.down_callback_count(), 3);
        assert_eq!(target.up_callback_count(), 3);
    }

    #[test]
    fn distinct_targets_keep_registration_order() {
        let mut registry = Registry::new();
        registry.register(Registration::new("127.0.0.1", 9008, void, void));
        registry.register(Registration::new("example.com", 80, void, void).interval_secs(10));
        registry.register(Registration::new("127.0.0.1", 9009, void, void));
        registry.register(Registration::new("127.0.0.1", 9008, void, void));

        let order: Vec<String> = registry.all().map(|t| t.id().to_string()).collect();
        assert_eq!(order, ["127.0.0.1:9008", "example.com:80", "127.0.0.1:9009"]);
    }

    #[test]
    fn same_host_different_port_is_distinct() {
        let mut registry = Registry::new();
        registry.register(Registration::new("127.0.0.1", 80, void, void));
        registry.register(Registration::new("127.0.0.1", 81, void, void));
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&TargetId::new("127.0.0.1", 82)).is_none());
    }
}
