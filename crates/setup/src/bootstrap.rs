//! The final setup step: store the bootstrap settings, confirm every role
//! with the agent, then start orchestration.

use std::collections::BTreeMap;

use kubeboot_agent::Agent;
use kubeboot_pillar::{PillarKey, PillarStore};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::BootstrapConfig;
use crate::error::{Error, Result};
use crate::registry::{AssignmentReport, NodeRegistry};

/// The bootstrap form.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BootstrapForm {
    /// External FQDN of the API server.
    pub apiserver: Option<String>,
}

impl BootstrapForm {
    /// The submitted, trimmed value for `key`, if the form has a non-blank one.
    #[must_use]
    pub fn filled(&self, key: PillarKey) -> Option<&str> {
        let value = match key {
            PillarKey::Apiserver => &self.apiserver,
            _ => return None,
        };
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}

/// What a successful bootstrap did.
#[derive(Clone, Debug)]
pub struct BootstrapReport {
    /// Pillars written before orchestration.
    pub settings: BTreeMap<PillarKey, String>,

    /// Role confirmations sent to the agent.
    pub assignments: AssignmentReport,
}

/// Runs the bootstrap sequence.
///
/// The sequence is not transactional. Settings stored by the first stage stay
/// in effect when a later stage fails, and so do roles the agent accepted.
/// Orchestration is only started when every earlier stage succeeded.
#[derive(Clone, Debug)]
pub struct BootstrapOrchestrator<S, A>
where
    S: PillarStore,
    A: Agent,
{
    store: S,
    registry: NodeRegistry<A>,
    config: BootstrapConfig,
}

impl<S, A> BootstrapOrchestrator<S, A>
where
    S: PillarStore,
    A: Agent,
{
    /// Create an orchestrator with the default configuration.
    pub fn new(store: S, registry: NodeRegistry<A>) -> Self {
        Self::with_config(store, registry, BootstrapConfig::default())
    }

    /// Create an orchestrator with a custom configuration.
    pub const fn with_config(store: S, registry: NodeRegistry<A>, config: BootstrapConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Bootstrap the cluster.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if a required field is blank. Nothing is
    ///   written and the agent is not called.
    /// - [`Error::PrecedenceWarning`] if setup is already complete or no
    ///   master was assigned yet. Nothing is written.
    /// - [`Error::Persistence`] if a bootstrap setting did not take effect,
    ///   in which case the agent is not called, or if the completion marker
    ///   could not be written after orchestration started.
    /// - [`Error::RemoteAssignment`] if the agent rejected a role or failed
    ///   to orchestrate.
    pub async fn bootstrap(&self, form: &BootstrapForm) -> Result<BootstrapReport> {
        let missing: Vec<String> = self
            .config
            .required_pillars
            .iter()
            .filter(|key| form.filled(**key).is_none())
            .map(|key| format!("{key} can't be blank"))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Validation(missing));
        }

        if self.is_done().await? {
            return Err(Error::PrecedenceWarning(
                "setup is already complete".to_string(),
            ));
        }

        if self.registry.master().await.is_none() {
            return Err(Error::PrecedenceWarning(
                "no master has been assigned, please select one first".to_string(),
            ));
        }

        let settings = self.store_settings(form).await?;

        let assignments = self.registry.assign_recorded_roles().await;
        if let Err(e) = assignments.verdict() {
            error!("role confirmation failed, not orchestrating: {}", e);
            return Err(e);
        }

        info!(
            "starting orchestration with {} confirmed nodes",
            assignments.committed().count()
        );
        self.registry.agent().orchestrate().await.map_err(|e| {
            error!("orchestration failed: {}", e);
            Error::RemoteAssignment(format!("orchestration failed: {e}"))
        })?;

        self.store
            .set(PillarKey::SetupDone, "true".to_string())
            .await
            .map_err(|e| {
                error!("orchestration started but setup could not be marked done: {}", e);
                Error::store(PillarKey::SetupDone, &e)
            })?;
        info!("setup complete");

        Ok(BootstrapReport {
            settings,
            assignments,
        })
    }

    /// Whether a bootstrap already started orchestration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the marker cannot be read.
    pub async fn is_done(&self) -> Result<bool> {
        let marker = self
            .store
            .get(PillarKey::SetupDone)
            .await
            .map_err(|e| Error::store(PillarKey::SetupDone, &e))?;

        Ok(marker.as_deref() == Some("true"))
    }

    async fn store_settings(&self, form: &BootstrapForm) -> Result<BTreeMap<PillarKey, String>> {
        let settings: BTreeMap<PillarKey, String> = [PillarKey::Apiserver]
            .into_iter()
            .filter_map(|key| form.filled(key).map(|value| (key, value.to_string())))
            .collect();

        let failures = self
            .store
            .apply_all(&settings, &self.config.required_pillars)
            .await;

        if failures.is_empty() {
            return Ok(settings);
        }

        for failure in &failures {
            warn!("bootstrap pillar {} did not take effect", failure);
        }
        let committed = settings
            .keys()
            .filter(|key| !failures.iter().any(|f| f.key == **key))
            .copied()
            .collect();

        Err(Error::Persistence {
            failures,
            committed,
        })
    }
}

#[cfg(test)]
mod tests {
    use kubeboot_agent::{MinionId, Role};
    use kubeboot_agent_mock::MockAgent;
    use kubeboot_pillar_memory::MemoryPillarStore;

    use super::*;
    use crate::registry::Minion;

    fn minion(id: &str, role: Role) -> Minion {
        Minion {
            id: MinionId::from(id),
            fqdn: format!("{id}.example.com"),
            role,
        }
    }

    fn form(apiserver: &str) -> BootstrapForm {
        BootstrapForm {
            apiserver: Some(apiserver.to_string()),
        }
    }

    #[tokio::test]
    async fn test_blank_apiserver_stops_before_the_agent() {
        let agent = MockAgent::default();
        let registry = NodeRegistry::with_minions(agent.clone(), vec![minion("m", Role::Master)]);
        let orchestrator = BootstrapOrchestrator::new(MemoryPillarStore::new(), registry);

        let err = orchestrator.bootstrap(&form("  ")).await.unwrap_err();

        assert!(matches!(err, Error::Validation(ref errors) if errors == &["apiserver can't be blank"]));
        assert!(agent.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_master_is_a_warning() {
        let agent = MockAgent::default();
        let store = MemoryPillarStore::new();
        let registry = NodeRegistry::with_minions(agent.clone(), vec![minion("w", Role::Worker)]);
        let orchestrator = BootstrapOrchestrator::new(store.clone(), registry);

        let err = orchestrator.bootstrap(&form("api.example.com")).await.unwrap_err();

        assert!(matches!(err, Error::PrecedenceWarning(_)));
        assert!(store.get(PillarKey::Apiserver).await.unwrap().is_none());
        assert!(agent.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_bootstrap_does_not_orchestrate_again() {
        let agent = MockAgent::default();
        let store = MemoryPillarStore::new();
        let registry = NodeRegistry::with_minions(agent.clone(), vec![minion("m", Role::Master)]);
        let orchestrator = BootstrapOrchestrator::new(store.clone(), registry);

        assert!(!orchestrator.is_done().await.unwrap());
        orchestrator.bootstrap(&form("api.example.com")).await.unwrap();
        assert!(orchestrator.is_done().await.unwrap());
        assert_eq!(
            store.get(PillarKey::SetupDone).await.unwrap().as_deref(),
            Some("true")
        );

        let err = orchestrator.bootstrap(&form("api.example.com")).await.unwrap_err();

        assert!(matches!(err, Error::PrecedenceWarning(_)));
        assert_eq!(agent.orchestrations().await, 1);
    }
}
