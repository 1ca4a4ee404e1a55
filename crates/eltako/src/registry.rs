use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::actor::ShadingActor;

/// An in-memory index of live [`ShadingActor`]s.
///
/// Actors are looked up by case-insensitive name when routing inbound
/// commands, and linearly by serial number when discovery resolves an
/// announcement. Registration is append-only: actors that vanish from
/// the network keep their last known entry.
#[derive(Debug, Default)]
pub struct ActorRegistry {
    actors: RwLock<HashMap<String, Arc<ShadingActor>>>,
}

impl ActorRegistry {
    /// Creates an empty [`ActorRegistry`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an actor under its lowercased display name.
    ///
    /// A second actor with the same name replaces the first.
    pub fn add_actor(&self, actor: Arc<ShadingActor>) {
        let key = actor.display_name().to_lowercase();
        let mut actors = self.actors.write().unwrap_or_else(|e| e.into_inner());
        drop(actors.insert(key, actor));
    }

    /// Finds the actor registered under the given name, ignoring case.
    ///
    /// A miss is a normal, reportable condition, not a fault.
    #[must_use]
    pub fn get_actor(&self, name: &str) -> Option<Arc<ShadingActor>> {
        let actors = self.actors.read().unwrap_or_else(|e| e.into_inner());
        actors.get(&name.to_lowercase()).cloned()
    }

    /// Finds the actor with the given serial number.
    #[must_use]
    pub fn get_actor_by_serial(&self, serial: &str) -> Option<Arc<ShadingActor>> {
        let actors = self.actors.read().unwrap_or_else(|e| e.into_inner());
        actors
            .values()
            .find(|actor| actor.serial() == Some(serial))
            .cloned()
    }

    /// Returns the number of registered actors.
    #[must_use]
    pub fn len(&self) -> usize {
        let actors = self.actors.read().unwrap_or_else(|e| e.into_inner());
        actors.len()
    }

    /// Returns `true` when no actor has been registered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
