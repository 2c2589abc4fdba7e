//! Step-by-step setup flow.
//!
//! Every operation returns a [`StepReport`] telling the caller which step to
//! show next and what to tell the administrator. Once a bootstrap started
//! orchestration every step sends the administrator home.

use std::fmt::{self, Display};

use kubeboot_agent::Agent;
use kubeboot_pillar::PillarStore;
use serde::Serialize;
use tracing::{info, warn};

use crate::bootstrap::{BootstrapForm, BootstrapOrchestrator, BootstrapReport};
use crate::cloud::{CloudCluster, CloudClusterFactory, CloudClusterForm, WorkerBootstrapView};
use crate::config::SetupConfig;
use crate::error::{Error, Result, Severity};
use crate::registry::{AssignmentReport, Minion, NodeRegistry, RoleSelection};
use crate::settings::{PillarPlan, SettingsForm, SettingsMerger, SettingsSnapshot};

/// The screens of the setup flow.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    /// Cluster settings.
    Welcome,
    /// Instructions for adding workers, or the cloud worker form.
    WorkerBootstrap,
    /// Pending minions and role selection.
    Discovery,
    /// The final bootstrap form.
    Bootstrap,
    /// Setup is complete.
    Home,
}

impl Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Welcome => "welcome",
            Self::WorkerBootstrap => "worker bootstrap",
            Self::Discovery => "discovery",
            Self::Bootstrap => "bootstrap",
            Self::Home => "home",
        })
    }
}

/// How prominent a message is.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    /// Informational.
    Notice,
    /// Something to correct.
    Alert,
    /// Something went wrong.
    Error,
}

/// A message for the administrator.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Flash {
    /// Prominence.
    pub level: FlashLevel,
    /// Text.
    pub message: String,
}

impl Flash {
    fn new(level: FlashLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    fn for_error(error: &Error) -> Self {
        let level = match error.severity() {
            Severity::Warning => FlashLevel::Alert,
            Severity::Error => FlashLevel::Error,
        };
        Self::new(level, error.to_string())
    }
}

/// Result of a wizard operation.
#[derive(Debug)]
pub struct StepReport<T> {
    /// Step to show next.
    pub next: WizardStep,
    /// Message to show with it.
    pub flash: Option<Flash>,
    /// What the operation produced.
    pub outcome: Result<T>,
}

impl<T> StepReport<T> {
    const fn done(next: WizardStep, value: T) -> Self {
        Self {
            next,
            flash: None,
            outcome: Ok(value),
        }
    }

    fn failed(next: WizardStep, flash: Flash, error: Error) -> Self {
        warn!("{} step failed: {}", next, error);
        Self {
            next,
            flash: Some(flash),
            outcome: Err(error),
        }
    }

    fn with_flash(mut self, flash: Flash) -> Self {
        self.flash = Some(flash);
        self
    }

    /// Whether the operation succeeded.
    pub const fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// The setup flow over one pillar store and one agent.
#[derive(Clone, Debug)]
pub struct SetupWizard<S, A>
where
    S: PillarStore,
    A: Agent,
{
    merger: SettingsMerger<S>,
    cloud: CloudClusterFactory<S, A>,
    registry: NodeRegistry<A>,
    orchestrator: BootstrapOrchestrator<S, A>,
}

impl<S, A> SetupWizard<S, A>
where
    S: PillarStore,
    A: Agent,
{
    /// Create a wizard with an empty registry and the default configuration.
    pub fn new(store: S, agent: A) -> Self {
        Self::with_config(store, agent, SetupConfig::default())
    }

    /// Create a wizard with an empty registry.
    pub fn with_config(store: S, agent: A, config: SetupConfig) -> Self {
        Self::with_registry(store, NodeRegistry::new(agent), config)
    }

    /// Create a wizard around an existing registry.
    pub fn with_registry(store: S, registry: NodeRegistry<A>, config: SetupConfig) -> Self {
        Self {
            merger: SettingsMerger::with_config(store.clone(), config.merge),
            cloud: CloudClusterFactory::new(store.clone(), registry.agent().clone()),
            orchestrator: BootstrapOrchestrator::with_config(
                store,
                registry.clone(),
                config.bootstrap,
            ),
            registry,
        }
    }

    /// The node registry.
    pub const fn registry(&self) -> &NodeRegistry<A> {
        &self.registry
    }

    /// A report sending the administrator home if setup is already complete.
    async fn completed<T>(&self, here: WizardStep) -> Option<StepReport<T>> {
        match self.orchestrator.is_done().await {
            Ok(false) => None,
            Ok(true) => {
                let e = Error::PrecedenceWarning("setup is already complete".to_string());
                Some(StepReport::failed(
                    WizardStep::Home,
                    Flash::new(FlashLevel::Notice, e.to_string()),
                    e,
                ))
            }
            Err(e) => Some(StepReport::failed(here, Flash::for_error(&e), e)),
        }
    }

    /// Current cluster settings.
    pub async fn welcome(&self) -> StepReport<SettingsSnapshot> {
        if let Some(report) = self.completed(WizardStep::Welcome).await {
            return report;
        }

        match self.merger.current().await {
            Ok(snapshot) => StepReport::done(WizardStep::Welcome, snapshot),
            Err(e) => StepReport::failed(WizardStep::Welcome, Flash::for_error(&e), e),
        }
    }

    /// Store the cluster settings.
    pub async fn configure(&self, form: &SettingsForm) -> StepReport<PillarPlan> {
        if let Some(report) = self.completed(WizardStep::Welcome).await {
            return report;
        }

        match self.merger.merge(form).await {
            Ok(plan) => {
                info!("cluster settings stored");
                StepReport::done(WizardStep::WorkerBootstrap, plan)
            }
            Err(e) => StepReport::failed(
                WizardStep::Welcome,
                Flash::new(FlashLevel::Alert, e.to_string()),
                e,
            ),
        }
    }

    /// What the worker bootstrap step shows.
    pub async fn worker_bootstrap(&self) -> StepReport<WorkerBootstrapView> {
        if let Some(report) = self.completed(WizardStep::WorkerBootstrap).await {
            return report;
        }

        match self.cloud.worker_bootstrap().await {
            Ok(view) => StepReport::done(WizardStep::WorkerBootstrap, view),
            Err(e) => StepReport::failed(WizardStep::WorkerBootstrap, Flash::for_error(&e), e),
        }
    }

    /// Provision cloud workers.
    pub async fn build_cloud_cluster(&self, form: &CloudClusterForm) -> StepReport<CloudCluster> {
        if let Some(report) = self.completed(WizardStep::WorkerBootstrap).await {
            return report;
        }

        match self.cloud.provision(form).await {
            Ok(cluster) => {
                let notice = format!(
                    "Starting {} {} worker{} of type {}. They will show up for discovery once booted.",
                    cluster.instance_count(),
                    cluster.cloud_framework(),
                    if cluster.instance_count() == 1 { "" } else { "s" },
                    cluster.instance_type()
                );
                StepReport::done(WizardStep::Discovery, cluster)
                    .with_flash(Flash::new(FlashLevel::Notice, notice))
            }
            Err(e) => StepReport::failed(
                WizardStep::WorkerBootstrap,
                Flash::new(FlashLevel::Error, e.to_string()),
                e,
            ),
        }
    }

    /// Pull pending minions and list every known one.
    pub async fn discovery(&self) -> StepReport<Vec<Minion>> {
        if let Some(report) = self.completed(WizardStep::Discovery).await {
            return report;
        }

        match self.registry.discover().await {
            Ok(minions) => StepReport::done(WizardStep::Discovery, minions),
            Err(e) => StepReport::failed(WizardStep::Discovery, Flash::for_error(&e), e),
        }
    }

    /// Assign the selected roles.
    ///
    /// Any rejection keeps the flow on the discovery step; roles the agent
    /// accepted stay recorded.
    pub async fn set_roles(&self, selection: &RoleSelection) -> StepReport<AssignmentReport> {
        if let Some(report) = self.completed(WizardStep::Discovery).await {
            return report;
        }

        let report = match self.registry.assign_roles(selection).await {
            Ok(report) => report,
            Err(e) => return StepReport::failed(WizardStep::Discovery, Flash::for_error(&e), e),
        };

        match report.verdict() {
            Ok(()) => StepReport::done(WizardStep::Bootstrap, report),
            Err(e) => StepReport::failed(WizardStep::Discovery, Flash::for_error(&e), e),
        }
    }

    /// Bootstrap the cluster.
    pub async fn bootstrap(&self, form: &BootstrapForm) -> StepReport<BootstrapReport> {
        if let Some(report) = self.completed(WizardStep::Bootstrap).await {
            return report;
        }

        match self.orchestrator.bootstrap(form).await {
            Ok(report) => {
                info!("cluster bootstrap started");
                StepReport::done(WizardStep::Home, report)
            }
            Err(e) => {
                let level = match e {
                    Error::RemoteAssignment(_) => FlashLevel::Error,
                    _ => FlashLevel::Alert,
                };
                StepReport::failed(WizardStep::Bootstrap, Flash::new(level, e.to_string()), e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flash_follows_severity() {
        let warning = Flash::for_error(&Error::PrecedenceWarning("pick one".to_string()));
        assert_eq!(warning.level, FlashLevel::Alert);

        let fault = Flash::for_error(&Error::RemoteAssignment("down".to_string()));
        assert_eq!(fault.level, FlashLevel::Error);
        assert_eq!(fault.message, "remote call failed: down");
    }

    #[test]
    fn test_step_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&WizardStep::WorkerBootstrap).unwrap(),
            "\"worker_bootstrap\""
        );
    }
}
