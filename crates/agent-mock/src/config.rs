use kubeboot_agent::{DiscoveredMinion, MinionId, Role};
use serde::Deserialize;

/// Agent script file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub minions: Vec<DiscoveredMinion>,
    pub reject_roles: Vec<Role>,
    pub reject_minions: Vec<MinionId>,
    pub fail_orchestration: bool,
    pub fail_provisioning: bool,
    pub fail_pillar_refresh: bool,
    pub unreachable: bool,
}
