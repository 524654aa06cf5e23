//! Immutable name -> state registry, built once and shared with the executor.

use std::collections::HashMap;
use std::sync::Arc;

use super::State;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("state '{0}' registered twice")]
    Duplicate(String),
}

/// Registry of every state an executor can dispatch.
#[derive(Clone, Default)]
pub struct StateRegistry {
    states: HashMap<String, Arc<dyn State>>,
}

impl StateRegistry {
    pub fn builder() -> StateRegistryBuilder {
        StateRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn State>> {
        self.states.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl std::fmt::Debug for StateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.states.keys().collect();
        names.sort();
        f.debug_struct("StateRegistry").field("states", &names).finish()
    }
}

#[derive(Default)]
pub struct StateRegistryBuilder {
    states: HashMap<String, Arc<dyn State>>,
}

impl StateRegistryBuilder {
    pub fn register(mut self, state: Arc<dyn State>) -> Result<Self, RegistryError> {
        let name = state.name().to_string();
        if self.states.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.states.insert(name, state);
        Ok(self)
    }

    pub fn build(self) -> StateRegistry {
        StateRegistry {
            states: self.states,
        }
    }
}
