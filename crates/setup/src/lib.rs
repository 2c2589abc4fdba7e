//! Cluster setup for kubeboot.
//!
//! This crate provides:
//! - Merging of the cluster settings form into pillars ([`SettingsMerger`])
//! - Minion discovery and role assignment ([`NodeRegistry`])
//! - Cloud worker provisioning ([`CloudClusterFactory`])
//! - The final bootstrap sequence ([`BootstrapOrchestrator`])
//! - The step-by-step flow tying them together ([`SetupWizard`])
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod bootstrap;
pub mod cloud;
pub mod config;
mod error;
pub mod registry;
pub mod settings;
pub mod wizard;

pub use bootstrap::{BootstrapForm, BootstrapOrchestrator, BootstrapReport};
pub use cloud::{
    CloudCluster, CloudClusterFactory, CloudClusterForm, CloudFramework, ProviderSettings,
    WorkerBootstrapView,
};
pub use config::{BootstrapConfig, MergeConfig, SetupConfig};
pub use error::{Error, Result, Severity};
pub use registry::{
    AssignmentOutcome, AssignmentReport, Minion, NodeAssignment, NodeRegistry, RoleSelection,
};
pub use settings::{PillarPlan, SettingsForm, SettingsMerger, SettingsSnapshot, Toggle};
pub use wizard::{Flash, FlashLevel, SetupWizard, StepReport, WizardStep};
