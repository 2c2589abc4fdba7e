//! Abstract interface for the remote configuration agent that assigns roles,
//! refreshes pillars, provisions cloud workers and orchestrates the cluster.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Stable identifier of a minion, as reported by the agent.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinionId(String);

impl MinionId {
    /// Wraps an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MinionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MinionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MinionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The role a minion plays in the cluster.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Discovered but not yet given a role.
    #[default]
    Unassigned,

    /// Runs the control plane.
    Master,

    /// Runs workloads.
    Worker,
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unassigned => "unassigned",
            Self::Master => "master",
            Self::Worker => "worker",
        })
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unassigned" => Ok(Self::Unassigned),
            "master" => Ok(Self::Master),
            "worker" => Ok(Self::Worker),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A minion announced by the agent's discovery feed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredMinion {
    /// The minion's identifier.
    pub id: MinionId,

    /// The minion's fully qualified domain name.
    pub fqdn: String,
}

/// The kind of agent error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AgentErrorKind {
    /// The agent could not be reached.
    Unreachable,

    /// The agent ran the call and reported a failure.
    Failed,

    /// Other/unknown error
    Other,
}

impl Display for AgentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Marker trait for `Agent` errors
pub trait AgentError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> AgentErrorKind;
}

/// Remote procedure calls understood by the configuration agent.
///
/// Every call blocks until the agent answers. Nothing is retried here;
/// callers decide whether to invoke again after a failure.
#[async_trait]
pub trait Agent
where
    Self: Send + Sync + Clone + 'static,
{
    /// The error type for this agent.
    type Error: AgentError;

    /// Minions that have checked in with the agent.
    async fn pending_minions(&self) -> Result<Vec<DiscoveredMinion>, Self::Error>;

    /// Applies `role` on the minion. `Ok(false)` means the agent refused it.
    async fn assign_role(&self, minion: &MinionId, role: Role) -> Result<bool, Self::Error>;

    /// Makes every minion reload its pillars.
    async fn refresh_pillar(&self) -> Result<(), Self::Error>;

    /// Provisions `instance_count` cloud workers from the stored cloud profile.
    async fn build_cloud_cluster(&self, instance_count: u32) -> Result<(), Self::Error>;

    /// Starts cluster-wide orchestration.
    async fn orchestrate(&self) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_its_name() {
        for role in [Role::Unassigned, Role::Master, Role::Worker] {
            assert_eq!(role.to_string().parse::<Role>(), Ok(role));
        }
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_discovered_minion_wire_format() {
        let minion: DiscoveredMinion =
            serde_json::from_str(r#"{"id":"a1b2","fqdn":"worker0.example.com"}"#).unwrap();

        assert_eq!(minion.id, MinionId::new("a1b2"));
        assert_eq!(minion.fqdn, "worker0.example.com");
    }
}
