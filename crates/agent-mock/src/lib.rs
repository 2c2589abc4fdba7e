//! Mock implementation of the agent interface: records every call and answers
//! according to a script, for tests and local runs.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;

use config::Config;
pub use error::Error;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use kubeboot_agent::{Agent, DiscoveredMinion, MinionId, Role};
use tokio::sync::Mutex;
use tracing::info;

/// A call received by the mock agent.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AgentCall {
    /// `pending_minions`
    PendingMinions,

    /// `assign_role`
    AssignRole {
        /// Target minion.
        minion: MinionId,
        /// Requested role.
        role: Role,
    },

    /// `refresh_pillar`
    RefreshPillar,

    /// `build_cloud_cluster`
    BuildCloudCluster {
        /// Requested worker count.
        instance_count: u32,
    },

    /// `orchestrate`
    Orchestrate,
}

#[derive(Clone, Debug, Default)]
struct Script {
    reject_roles: HashSet<Role>,
    reject_minions: HashSet<MinionId>,
    fail_orchestration: bool,
    fail_provisioning: bool,
    fail_pillar_refresh: bool,
    unreachable: bool,
}

/// Mock implementation of the agent interface.
///
/// Clones share the call log, so a clone handed to the code under test can
/// be inspected from the test afterwards.
#[derive(Clone, Debug, Default)]
pub struct MockAgent {
    minions: Vec<DiscoveredMinion>,
    script: Script,
    calls: Arc<Mutex<Vec<AgentCall>>>,
}

impl MockAgent {
    /// Create a mock agent announcing `minions` and accepting every call.
    #[must_use]
    pub fn new(minions: Vec<DiscoveredMinion>) -> Self {
        Self {
            minions,
            ..Self::default()
        }
    }

    /// Create a mock agent from a JSON script file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The script file cannot be read
    /// - The script file contains invalid JSON
    pub fn from_config_file<P: AsRef<Path>>(config_path: P) -> Result<Self, Error> {
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| Error::ConfigFile(format!("Failed to read agent config file: {e}")))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::ConfigFile(format!("Failed to parse agent config file: {e}")))?;

        Ok(Self {
            minions: config.minions,
            script: Script {
                reject_roles: config.reject_roles.into_iter().collect(),
                reject_minions: config.reject_minions.into_iter().collect(),
                fail_orchestration: config.fail_orchestration,
                fail_provisioning: config.fail_provisioning,
                fail_pillar_refresh: config.fail_pillar_refresh,
                unreachable: config.unreachable,
            },
            calls: Arc::default(),
        })
    }

    /// Answer `false` to every assignment of `role`.
    #[must_use]
    pub fn reject_role(mut self, role: Role) -> Self {
        self.script.reject_roles.insert(role);
        self
    }

    /// Answer `false` to every assignment on `minion`.
    #[must_use]
    pub fn reject_minion(mut self, minion: impl Into<MinionId>) -> Self {
        self.script.reject_minions.insert(minion.into());
        self
    }

    /// Fail `orchestrate`.
    #[must_use]
    pub fn fail_orchestration(mut self) -> Self {
        self.script.fail_orchestration = true;
        self
    }

    /// Fail `build_cloud_cluster`.
    #[must_use]
    pub fn fail_provisioning(mut self) -> Self {
        self.script.fail_provisioning = true;
        self
    }

    /// Fail `refresh_pillar`.
    #[must_use]
    pub fn fail_pillar_refresh(mut self) -> Self {
        self.script.fail_pillar_refresh = true;
        self
    }

    /// Fail every call as unreachable.
    #[must_use]
    pub fn unreachable(mut self) -> Self {
        self.script.unreachable = true;
        self
    }

    /// Every call received so far, in order.
    pub async fn calls(&self) -> Vec<AgentCall> {
        self.calls.lock().await.clone()
    }

    /// Every role assignment received so far, in order.
    pub async fn role_assignments(&self) -> Vec<(MinionId, Role)> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                AgentCall::AssignRole { minion, role } => Some((minion.clone(), *role)),
                _ => None,
            })
            .collect()
    }

    /// Worker counts of every provisioning call received so far.
    pub async fn cloud_builds(&self) -> Vec<u32> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                AgentCall::BuildCloudCluster { instance_count } => Some(*instance_count),
                _ => None,
            })
            .collect()
    }

    /// How many times `orchestrate` was called.
    pub async fn orchestrations(&self) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| **call == AgentCall::Orchestrate)
            .count()
    }

    async fn record(&self, call: AgentCall) -> Result<(), Error> {
        info!("mock agent received {:?}", call);
        self.calls.lock().await.push(call);

        if self.script.unreachable {
            return Err(Error::Unreachable);
        }

        Ok(())
    }
}

#[async_trait]
impl Agent for MockAgent {
    type Error = Error;

    async fn pending_minions(&self) -> Result<Vec<DiscoveredMinion>, Self::Error> {
        self.record(AgentCall::PendingMinions).await?;
        Ok(self.minions.clone())
    }

    async fn assign_role(&self, minion: &MinionId, role: Role) -> Result<bool, Self::Error> {
        self.record(AgentCall::AssignRole {
            minion: minion.clone(),
            role,
        })
        .await?;

        Ok(!self.script.reject_roles.contains(&role) && !self.script.reject_minions.contains(minion))
    }

    async fn refresh_pillar(&self) -> Result<(), Self::Error> {
        self.record(AgentCall::RefreshPillar).await?;

        if self.script.fail_pillar_refresh {
            return Err(Error::CallFailed("pillar refresh".to_string()));
        }
        Ok(())
    }

    async fn build_cloud_cluster(&self, instance_count: u32) -> Result<(), Self::Error> {
        self.record(AgentCall::BuildCloudCluster { instance_count })
            .await?;

        if self.script.fail_provisioning {
            return Err(Error::CallFailed(format!(
                "cloud provisioning of {instance_count} workers"
            )));
        }
        Ok(())
    }

    async fn orchestrate(&self) -> Result<(), Self::Error> {
        self.record(AgentCall::Orchestrate).await?;

        if self.script.fail_orchestration {
            return Err(Error::CallFailed("orchestration".to_string()));
        }
        Ok(())
    }
}
