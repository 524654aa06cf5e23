//! In-memory instance store.
//!
//! Instances live in an arena and are found through id, parent and execution
//! indexes; parent links are plain ids, never references. Used by tests and
//! by embedders that do not need durability.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use shipyard_types::error::RepositoryError;
use shipyard_types::instance::StateExecutionInstance;
use shipyard_types::status::ExecutionStatus;

use super::InstanceRepository;

#[derive(Default)]
struct Arena {
    instances: Vec<StateExecutionInstance>,
    by_id: HashMap<Uuid, usize>,
    by_parent: HashMap<Uuid, Vec<usize>>,
    by_execution: HashMap<Uuid, Vec<usize>>,
}

impl Arena {
    fn insert(&mut self, instance: &StateExecutionInstance) -> Result<(), RepositoryError> {
        if self.by_id.contains_key(&instance.id) {
            return Err(RepositoryError::Conflict(format!(
                "instance {} already exists",
                instance.id
            )));
        }
        let slot = self.instances.len();
        self.instances.push(instance.clone());
        self.by_id.insert(instance.id, slot);
        if let Some(parent) = instance.parent_instance_id {
            self.by_parent.entry(parent).or_default().push(slot);
        }
        self.by_execution
            .entry(instance.execution_id)
            .or_default()
            .push(slot);
        Ok(())
    }

    fn get(&self, app_id: &str, id: Uuid) -> Option<&StateExecutionInstance> {
        self.by_id
            .get(&id)
            .map(|&slot| &self.instances[slot])
            .filter(|i| i.app_id == app_id)
    }

    fn collect(&self, slots: Option<&Vec<usize>>, app_id: &str) -> Vec<StateExecutionInstance> {
        slots
            .into_iter()
            .flatten()
            .map(|&slot| &self.instances[slot])
            .filter(|i| i.app_id == app_id)
            .cloned()
            .collect()
    }
}

/// Arena-backed `InstanceRepository`.
#[derive(Default)]
pub struct InMemoryInstanceStore {
    arena: RwLock<Arena>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.arena.read().await.instances.len()
    }
}

impl InstanceRepository for InMemoryInstanceStore {
    async fn insert(&self, instance: &StateExecutionInstance) -> Result<(), RepositoryError> {
        self.arena.write().await.insert(instance)
    }

    async fn insert_all(&self, instances: &[StateExecutionInstance]) -> Result<(), RepositoryError> {
        let mut arena = self.arena.write().await;
        if let Some(dup) = instances.iter().find(|i| arena.by_id.contains_key(&i.id)) {
            return Err(RepositoryError::Conflict(format!(
                "instance {} already exists",
                dup.id
            )));
        }
        for instance in instances {
            arena.insert(instance)?;
        }
        Ok(())
    }

    async fn get(
        &self,
        app_id: &str,
        instance_id: Uuid,
    ) -> Result<Option<StateExecutionInstance>, RepositoryError> {
        Ok(self.arena.read().await.get(app_id, instance_id).cloned())
    }

    async fn update_if_status(
        &self,
        instance: &StateExecutionInstance,
        expected: &[ExecutionStatus],
    ) -> Result<bool, RepositoryError> {
        let mut arena = self.arena.write().await;
        let slot = match arena.by_id.get(&instance.id) {
            Some(&slot) if arena.instances[slot].app_id == instance.app_id => slot,
            _ => return Err(RepositoryError::NotFound),
        };
        if !expected.contains(&arena.instances[slot].status) {
            return Ok(false);
        }
        arena.instances[slot] = instance.clone();
        Ok(true)
    }

    async fn list_by_parent(
        &self,
        app_id: &str,
        parent_id: Uuid,
    ) -> Result<Vec<StateExecutionInstance>, RepositoryError> {
        let arena = self.arena.read().await;
        Ok(arena.collect(arena.by_parent.get(&parent_id), app_id))
    }

    async fn list_by_execution(
        &self,
        app_id: &str,
        execution_id: Uuid,
    ) -> Result<Vec<StateExecutionInstance>, RepositoryError> {
        let arena = self.arena.read().await;
        Ok(arena.collect(arena.by_execution.get(&execution_id), app_id))
    }

    async fn list_active(&self) -> Result<Vec<StateExecutionInstance>, RepositoryError> {
        Ok(self
            .arena
            .read()
            .await
            .instances
            .iter()
            .filter(|i| i.status.is_active())
            .cloned()
            .collect())
    }
}
