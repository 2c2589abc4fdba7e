//! In-memory (single process) implementation of the pillar store for tests
//! and local development.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kubeboot_pillar::{PillarKey, PillarStore};
use tokio::sync::Mutex;

/// In-memory pillar store. Clones share the same pillars.
#[derive(Clone, Debug, Default)]
pub struct MemoryPillarStore {
    map: Arc<Mutex<BTreeMap<PillarKey, String>>>,
}

impl MemoryPillarStore {
    /// Creates a new, empty `MemoryPillarStore`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `pillars`.
    pub fn with_pillars<I, V>(pillars: I) -> Self
    where
        I: IntoIterator<Item = (PillarKey, V)>,
        V: Into<String>,
    {
        let map = pillars
            .into_iter()
            .map(|(key, value)| (key, value.into()))
            .collect();

        Self {
            map: Arc::new(Mutex::new(map)),
        }
    }
}

#[async_trait]
impl PillarStore for MemoryPillarStore {
    type Error = Error;

    async fn delete(&self, key: PillarKey) -> Result<(), Self::Error> {
        self.map.lock().await.remove(&key);
        Ok(())
    }

    async fn get(&self, key: PillarKey) -> Result<Option<String>, Self::Error> {
        Ok(self.map.lock().await.get(&key).cloned())
    }

    async fn all(&self) -> Result<BTreeMap<PillarKey, String>, Self::Error> {
        Ok(self.map.lock().await.clone())
    }

    async fn set(&self, key: PillarKey, value: String) -> Result<(), Self::Error> {
        self.map.lock().await.insert(key, value);
        Ok(())
    }
}
