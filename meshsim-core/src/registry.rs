//! Per-worker container registry
//!
//! The ordered set of container names currently bound to one worker.
//! Insertion order is creation order and is observable: teardown
//! iterates it and VIP resolution scans it. The owning worker is the
//! only mutator; everything else reads.

use crate::error::{MeshError, MeshResult};

#[derive(Debug, Default)]
pub struct ContainerRegistry {
    names: Vec<String>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `name` at the end of the set.
    pub fn add(&mut self, name: &str) -> MeshResult<()> {
        if self.contains(name) {
            return Err(MeshError::DuplicateContainer {
                name: name.to_string(),
            });
        }
        self.names.push(name.to_string());
        Ok(())
    }

    /// Remove `name`, preserving the order of the remaining entries.
    pub fn remove(&mut self, name: &str) -> MeshResult<()> {
        match self.names.iter().position(|n| n == name) {
            Some(idx) => {
                self.names.remove(idx);
                Ok(())
            }
            None => Err(MeshError::ContainerNotFound {
                name: name.to_string(),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn list(&self) -> &[String] {
        &self.names
    }

    /// Owned copy for iteration while the registry is being mutated.
    pub fn snapshot(&self) -> Vec<String> {
        self.names.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}
