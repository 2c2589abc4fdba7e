//! Shared fixtures for the setup integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use kubeboot_agent::{DiscoveredMinion, MinionId};
use kubeboot_agent_mock::MockAgent;
use kubeboot_pillar::{PillarKey, PillarStore, PillarStoreError};
use kubeboot_pillar_memory::MemoryPillarStore;
use kubeboot_setup::{NodeRegistry, RoleSelection, SettingsForm, SetupConfig, SetupWizard};
use tokio::sync::Mutex;

/// Error returned by [`FlakyStore`] for broken keys.
#[derive(Debug, thiserror::Error)]
#[error("disk quota exceeded")]
pub struct FlakyError;

impl PillarStoreError for FlakyError {}

/// A memory store whose writes to selected keys fail, and whose listing can
/// be made to fail.
#[derive(Clone, Debug, Default)]
pub struct FlakyStore {
    inner: MemoryPillarStore,
    broken: Arc<Mutex<BTreeSet<PillarKey>>>,
    unlistable: Arc<AtomicBool>,
}

impl FlakyStore {
    /// Wrap `inner`.
    pub fn new(inner: MemoryPillarStore) -> Self {
        Self {
            inner,
            broken: Arc::default(),
            unlistable: Arc::default(),
        }
    }

    /// Make every later write or delete of `key` fail.
    pub async fn break_key(&self, key: PillarKey) {
        self.broken.lock().await.insert(key);
    }

    /// Make every later `all()` fail.
    pub fn break_listing(&self) {
        self.unlistable.store(true, Ordering::SeqCst);
    }

    async fn check(&self, key: PillarKey) -> Result<(), FlakyError> {
        if self.broken.lock().await.contains(&key) {
            Err(FlakyError)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PillarStore for FlakyStore {
    type Error = FlakyError;

    async fn delete(&self, key: PillarKey) -> Result<(), Self::Error> {
        self.check(key).await?;
        self.inner.delete(key).await.map_err(|_| FlakyError)
    }

    async fn get(&self, key: PillarKey) -> Result<Option<String>, Self::Error> {
        self.inner.get(key).await.map_err(|_| FlakyError)
    }

    async fn all(&self) -> Result<BTreeMap<PillarKey, String>, Self::Error> {
        if self.unlistable.load(Ordering::SeqCst) {
            return Err(FlakyError);
        }
        self.inner.all().await.map_err(|_| FlakyError)
    }

    async fn set(&self, key: PillarKey, value: String) -> Result<(), Self::Error> {
        self.check(key).await?;
        self.inner.set(key, value).await.map_err(|_| FlakyError)
    }
}

/// Minions announced by the default agent.
pub fn minions() -> Vec<DiscoveredMinion> {
    ["alpha", "bravo", "charlie"]
        .into_iter()
        .map(|name| DiscoveredMinion {
            id: MinionId::from(format!("{name}-id")),
            fqdn: format!("{name}.cluster.local"),
        })
        .collect()
}

/// A settings form from field/value pairs.
pub fn settings_form(pairs: &[(&str, &str)]) -> SettingsForm {
    let map: BTreeMap<&str, &str> = pairs.iter().copied().collect();
    serde_json::from_value(serde_json::to_value(map).unwrap()).unwrap()
}

/// Select `master` and `workers` by minion name.
pub fn selection(master: &[&str], workers: &[&str]) -> RoleSelection {
    let ids = |names: &[&str]| {
        names
            .iter()
            .map(|name| MinionId::from(format!("{name}-id")))
            .collect()
    };
    RoleSelection {
        master: ids(master),
        worker: ids(workers),
    }
}

/// A wizard over `store` and `agent` whose registry already discovered the
/// agent's minions.
pub async fn discovered_wizard<S>(store: S, agent: MockAgent) -> SetupWizard<S, MockAgent>
where
    S: PillarStore,
{
    let registry = NodeRegistry::new(agent);
    registry.discover().await.unwrap();
    SetupWizard::with_registry(store, registry, SetupConfig::default())
}
