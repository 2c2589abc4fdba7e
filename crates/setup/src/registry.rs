//! Discovered minions and their roles.

use std::collections::BTreeMap;
use std::sync::Arc;

use kubeboot_agent::{Agent, MinionId, Role};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// A discovered node and the role committed for it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Minion {
    /// Stable identifier.
    pub id: MinionId,

    /// Fully qualified domain name.
    pub fqdn: String,

    /// Last role the agent accepted for this node.
    #[serde(default)]
    pub role: Role,
}

/// Roles requested by the administrator.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleSelection {
    /// Minions to become master. Exactly one is expected.
    pub master: Vec<MinionId>,

    /// Minions to become workers.
    pub worker: Vec<MinionId>,
}

impl RoleSelection {
    /// Whether nothing at all was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.master.is_empty() && self.worker.is_empty()
    }
}

/// What happened to one role assignment attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AssignmentOutcome {
    /// The agent applied the role and the registry recorded it.
    Committed,

    /// The agent refused the role or could not be reached.
    Rejected(String),
}

/// One attempted role assignment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeAssignment {
    /// Target minion.
    pub minion: MinionId,

    /// Requested role.
    pub role: Role,

    /// Result of the attempt.
    pub outcome: AssignmentOutcome,
}

/// Outcomes of every assignment attempted in one call, in attempt order.
///
/// When the master is rejected no further node is attempted.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AssignmentReport {
    /// Attempted assignments.
    pub assignments: Vec<NodeAssignment>,
}

impl AssignmentReport {
    /// Minions whose role was committed.
    pub fn committed(&self) -> impl Iterator<Item = &NodeAssignment> {
        self.assignments
            .iter()
            .filter(|a| a.outcome == AssignmentOutcome::Committed)
    }

    /// Minions whose role was rejected.
    pub fn rejected(&self) -> impl Iterator<Item = &NodeAssignment> {
        self.assignments
            .iter()
            .filter(|a| a.outcome != AssignmentOutcome::Committed)
    }

    /// Whether the master assignment was rejected.
    #[must_use]
    pub fn master_rejected(&self) -> bool {
        self.rejected().any(|a| a.role == Role::Master)
    }

    /// The overall verdict: every attempt must have been committed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RemoteAssignment`] naming the rejected minions.
    pub fn verdict(&self) -> Result<()> {
        let rejected: Vec<String> = self
            .assignments
            .iter()
            .filter_map(|a| match &a.outcome {
                AssignmentOutcome::Rejected(reason) => {
                    Some(format!("{} as {} ({reason})", a.minion, a.role))
                }
                AssignmentOutcome::Committed => None,
            })
            .collect();

        if rejected.is_empty() {
            return Ok(());
        }

        let scope = if self.master_rejected() {
            "master assignment failed, nothing else was attempted"
        } else {
            "some worker assignments failed, committed roles stand"
        };
        Err(Error::RemoteAssignment(format!(
            "{scope}: {}",
            rejected.join(", ")
        )))
    }
}

/// Registry of discovered minions.
///
/// Roles are only recorded after the agent accepted them. Clones share the
/// same minions.
#[derive(Clone, Debug)]
pub struct NodeRegistry<A>
where
    A: Agent,
{
    agent: A,
    minions: Arc<RwLock<BTreeMap<MinionId, Minion>>>,
}

impl<A> NodeRegistry<A>
where
    A: Agent,
{
    /// Create an empty registry.
    pub fn new(agent: A) -> Self {
        Self::with_minions(agent, Vec::new())
    }

    /// Create a registry holding previously known minions.
    pub fn with_minions(agent: A, minions: Vec<Minion>) -> Self {
        let minions = minions.into_iter().map(|m| (m.id.clone(), m)).collect();

        Self {
            agent,
            minions: Arc::new(RwLock::new(minions)),
        }
    }

    /// The agent used for remote calls.
    pub const fn agent(&self) -> &A {
        &self.agent
    }

    /// Pull pending minions from the agent and register unseen ones.
    ///
    /// Already registered minions keep their role. Returns every minion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RemoteAssignment`] if the agent cannot be queried.
    pub async fn discover(&self) -> Result<Vec<Minion>> {
        let pending = self
            .agent
            .pending_minions()
            .await
            .map_err(|e| Error::RemoteAssignment(format!("minion discovery failed: {e}")))?;

        {
            let mut minions = self.minions.write().await;
            for discovered in pending {
                if minions.contains_key(&discovered.id) {
                    continue;
                }
                info!("discovered minion {} ({})", discovered.id, discovered.fqdn);
                minions.insert(
                    discovered.id.clone(),
                    Minion {
                        id: discovered.id,
                        fqdn: discovered.fqdn,
                        role: Role::Unassigned,
                    },
                );
            }
        }

        Ok(self.minions().await)
    }

    /// Every minion, sorted by FQDN.
    pub async fn minions(&self) -> Vec<Minion> {
        let mut minions: Vec<Minion> = self.minions.read().await.values().cloned().collect();
        minions.sort_by(|a, b| a.fqdn.cmp(&b.fqdn).then_with(|| a.id.cmp(&b.id)));
        minions
    }

    /// A single minion.
    pub async fn get(&self, id: &MinionId) -> Option<Minion> {
        self.minions.read().await.get(id).cloned()
    }

    /// The minion currently holding the master role.
    pub async fn master(&self) -> Option<Minion> {
        self.minions
            .read()
            .await
            .values()
            .find(|m| m.role == Role::Master)
            .cloned()
    }

    /// Assign the selected roles through the agent.
    ///
    /// The master is attempted first; if it is rejected nothing else is
    /// attempted. Worker rejections do not undo roles committed in this call.
    /// Inspect the returned report, or call [`AssignmentReport::verdict`], for
    /// the overall result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PrecedenceWarning`] if no master or several masters
    /// were selected and [`Error::Validation`] for unknown or doubly selected
    /// minions. In both cases the agent is not called.
    pub async fn assign_roles(&self, selection: &RoleSelection) -> Result<AssignmentReport> {
        if selection.is_empty() {
            return Err(Error::PrecedenceWarning(
                "no nodes were selected, please select a master".to_string(),
            ));
        }
        let master = match selection.master.as_slice() {
            [master] => master.clone(),
            [] => {
                return Err(Error::PrecedenceWarning(
                    "no master was selected, please select one".to_string(),
                ));
            }
            _ => {
                return Err(Error::PrecedenceWarning(
                    "exactly one master must be selected".to_string(),
                ));
            }
        };

        self.check_selection(selection).await?;

        let mut plan = vec![(master, Role::Master)];
        plan.extend(selection.worker.iter().map(|id| (id.clone(), Role::Worker)));

        Ok(self.run(plan).await)
    }

    /// Re-apply every recorded role through the agent, master first.
    ///
    /// Minions without a role are skipped. Used by the bootstrap step to make
    /// sure the agent side matches the registry before orchestration.
    pub async fn assign_recorded_roles(&self) -> AssignmentReport {
        let mut plan: Vec<(MinionId, Role)> = self
            .minions()
            .await
            .into_iter()
            .filter(|m| m.role != Role::Unassigned)
            .map(|m| (m.id, m.role))
            .collect();
        plan.sort_by_key(|(_, role)| *role != Role::Master);

        self.run(plan).await
    }

    async fn check_selection(&self, selection: &RoleSelection) -> Result<()> {
        let minions = self.minions.read().await;
        let mut errors = Vec::new();

        for id in selection.master.iter().chain(&selection.worker) {
            if !minions.contains_key(id) {
                errors.push(format!("unknown minion {id}"));
            }
        }
        for id in &selection.worker {
            if selection.master.contains(id) {
                errors.push(format!("minion {id} cannot be both master and worker"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }

    async fn run(&self, plan: Vec<(MinionId, Role)>) -> AssignmentReport {
        let mut report = AssignmentReport::default();

        for (minion, role) in plan {
            let outcome = self.attempt(&minion, role).await;
            let master_rejected =
                role == Role::Master && outcome != AssignmentOutcome::Committed;

            report.assignments.push(NodeAssignment {
                minion,
                role,
                outcome,
            });

            if master_rejected {
                warn!("master assignment rejected, skipping remaining assignments");
                break;
            }
        }

        report
    }

    async fn attempt(&self, minion: &MinionId, role: Role) -> AssignmentOutcome {
        debug!("assigning role {} to minion {}", role, minion);

        match self.agent.assign_role(minion, role).await {
            Ok(true) => {
                self.commit(minion, role).await;
                AssignmentOutcome::Committed
            }
            Ok(false) => {
                warn!("agent refused role {} for minion {}", role, minion);
                AssignmentOutcome::Rejected("refused by the agent".to_string())
            }
            Err(e) => {
                warn!("assigning role {} to minion {} failed: {}", role, minion, e);
                AssignmentOutcome::Rejected(e.to_string())
            }
        }
    }

    async fn commit(&self, id: &MinionId, role: Role) {
        let mut minions = self.minions.write().await;

        if role == Role::Master {
            for other in minions.values_mut() {
                if other.role == Role::Master && other.id != *id {
                    warn!("demoting previous master {}", other.id);
                    other.role = Role::Unassigned;
                }
            }
        }

        if let Some(minion) = minions.get_mut(id) {
            minion.role = role;
            info!("minion {} is now {}", id, role);
        }
    }
}
