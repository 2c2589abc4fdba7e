//! Tunables for the setup steps.

use kubeboot_pillar::PillarKey;

/// Configuration for merging the settings form.
#[derive(Clone, Debug)]
pub struct MergeConfig {
    /// Pillars the form must provide with a non-blank value.
    pub required_pillars: Vec<PillarKey>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            required_pillars: vec![PillarKey::Dashboard],
        }
    }
}

/// Configuration for the final bootstrap step.
#[derive(Clone, Debug)]
pub struct BootstrapConfig {
    /// Pillars the bootstrap form must provide with a non-blank value.
    pub required_pillars: Vec<PillarKey>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            required_pillars: vec![PillarKey::Apiserver],
        }
    }
}

/// Configuration for the whole setup wizard.
#[derive(Clone, Debug, Default)]
pub struct SetupConfig {
    /// Settings merge configuration.
    pub merge: MergeConfig,

    /// Bootstrap configuration.
    pub bootstrap: BootstrapConfig,
}
