//! Cloud worker provisioning for EC2 and Azure.
//!
//! The cloud framework is a cluster-wide fact stored in the
//! [`PillarKey::CloudFramework`] pillar. It is read from the store every time
//! a cluster is built and a form trying to set it is refused.

mod instance_type;

pub use instance_type::{InstanceCategory, InstanceType, for_framework as instance_types};

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use kubeboot_agent::Agent;
use kubeboot_pillar::{PillarKey, PillarStore};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Cloud provider backend of the cluster.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudFramework {
    /// Amazon EC2.
    Ec2,

    /// Microsoft Azure.
    Azure,
}

impl CloudFramework {
    /// The value stored in the framework pillar.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ec2 => "ec2",
            Self::Azure => "azure",
        }
    }
}

impl Display for CloudFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudFramework {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ec2" => Ok(Self::Ec2),
            "azure" => Ok(Self::Azure),
            other => Err(format!("unsupported cloud framework: {other}")),
        }
    }
}

/// A credential that never shows up in logs.
#[derive(Clone, Eq, PartialEq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a credential.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The credential in clear.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Count {
    Number(u64),
    Text(String),
}

fn deserialize_count<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Count>::deserialize(deserializer)?.map(|count| match count {
        Count::Number(n) => n.to_string(),
        Count::Text(s) => s,
    }))
}

/// The cloud worker form as submitted.
///
/// Carries the union of the EC2 and Azure fields; which ones are used depends
/// on the stored framework.
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CloudClusterForm {
    /// Refused when present: the framework comes from the store.
    pub cloud_framework: Option<String>,
    /// Worker instance size.
    pub instance_type: Option<String>,
    /// Number of workers, as submitted.
    #[serde(deserialize_with = "deserialize_count")]
    pub instance_count: Option<String>,
    /// Subnet (EC2 subnet id, Azure subnet name).
    pub subnet_id: Option<String>,
    /// EC2 security group.
    pub security_group_id: Option<String>,
    /// Azure subscription.
    pub subscription_id: Option<String>,
    /// Azure tenant.
    pub tenant_id: Option<String>,
    /// Azure service principal id.
    pub client_id: Option<String>,
    /// Azure service principal secret.
    pub secret: Option<String>,
    /// Azure resource group.
    pub resource_group: Option<String>,
    /// Azure storage account.
    pub storage_account: Option<String>,
    /// Azure virtual network.
    pub network_id: Option<String>,
}

impl Debug for CloudClusterForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudClusterForm")
            .field("cloud_framework", &self.cloud_framework)
            .field("instance_type", &self.instance_type)
            .field("instance_count", &self.instance_count)
            .field("subnet_id", &self.subnet_id)
            .field("security_group_id", &self.security_group_id)
            .field("subscription_id", &self.subscription_id)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("resource_group", &self.resource_group)
            .field("storage_account", &self.storage_account)
            .field("network_id", &self.network_id)
            .finish()
    }
}

/// Azure specific worker settings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AzureSettings {
    /// Subscription.
    pub subscription_id: String,
    /// Tenant.
    pub tenant_id: String,
    /// Service principal id.
    pub client_id: String,
    /// Service principal secret.
    pub secret: Secret,
    /// Resource group.
    pub resource_group: String,
    /// Storage account.
    pub storage_account: String,
    /// Virtual network.
    pub network_id: String,
    /// Subnet name.
    pub subnet_id: String,
}

/// Provider specific part of a cloud cluster.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderSettings {
    /// EC2 workers. Both fields fall back to the VPC defaults when unset.
    Ec2 {
        /// Subnet.
        subnet_id: Option<String>,
        /// Security group.
        security_group_id: Option<String>,
    },

    /// Azure workers.
    Azure(AzureSettings),
}

/// A request to provision cloud workers.
///
/// Only [`CloudClusterFactory`] builds these, so the provider always matches
/// the stored framework.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloudCluster {
    instance_type: String,
    instance_count: u32,
    provider: ProviderSettings,
}

impl CloudCluster {
    /// Framework the cluster is provisioned on.
    #[must_use]
    pub const fn cloud_framework(&self) -> CloudFramework {
        match self.provider {
            ProviderSettings::Ec2 { .. } => CloudFramework::Ec2,
            ProviderSettings::Azure(_) => CloudFramework::Azure,
        }
    }

    /// Worker instance size.
    #[must_use]
    pub fn instance_type(&self) -> &str {
        &self.instance_type
    }

    /// Number of workers.
    #[must_use]
    pub const fn instance_count(&self) -> u32 {
        self.instance_count
    }

    /// Provider specific settings.
    #[must_use]
    pub const fn provider(&self) -> &ProviderSettings {
        &self.provider
    }

    /// Subnet of the workers, for either provider.
    #[must_use]
    pub fn subnet_id(&self) -> Option<&str> {
        match &self.provider {
            ProviderSettings::Ec2 { subnet_id, .. } => subnet_id.as_deref(),
            ProviderSettings::Azure(azure) => Some(&azure.subnet_id),
        }
    }

    /// Pillars describing this cluster, and which of them must not be blank.
    fn pillars(&self) -> (BTreeMap<PillarKey, String>, Vec<PillarKey>) {
        let mut pillars = BTreeMap::from([(PillarKey::CloudWorkerType, self.instance_type.clone())]);

        let required = match &self.provider {
            ProviderSettings::Ec2 {
                subnet_id,
                security_group_id,
            } => {
                // Blank values clear previous settings.
                pillars.insert(
                    PillarKey::CloudWorkerSubnet,
                    subnet_id.clone().unwrap_or_default(),
                );
                pillars.insert(
                    PillarKey::CloudWorkerSecurityGroup,
                    security_group_id.clone().unwrap_or_default(),
                );
                vec![PillarKey::CloudWorkerType]
            }
            ProviderSettings::Azure(azure) => {
                let fields = [
                    (PillarKey::AzureSubscriptionId, &azure.subscription_id),
                    (PillarKey::AzureTenantId, &azure.tenant_id),
                    (PillarKey::AzureClientId, &azure.client_id),
                    (PillarKey::AzureSecret, &azure.secret.0),
                    (PillarKey::AzureResourceGroup, &azure.resource_group),
                    (PillarKey::AzureStorageAccount, &azure.storage_account),
                    (PillarKey::AzureNetworkId, &azure.network_id),
                    (PillarKey::CloudWorkerSubnet, &azure.subnet_id),
                ];
                for (key, value) in fields {
                    pillars.insert(key, value.clone());
                }
                pillars.keys().copied().collect()
            }
        };

        (pillars, required)
    }
}

/// What the worker bootstrap step needs to render.
#[derive(Clone, Debug, Serialize)]
pub struct WorkerBootstrapView {
    /// The dashboard address workers register with.
    pub controller_node: Option<String>,

    /// Stored cloud framework, if the cluster runs in a cloud.
    pub cloud_framework: Option<CloudFramework>,

    /// Instance sizes offered for that framework.
    pub instance_types: &'static [InstanceType],
}

/// Builds cloud clusters from the form and the stored framework, and
/// provisions them through the agent.
#[derive(Clone, Debug)]
pub struct CloudClusterFactory<S, A>
where
    S: PillarStore,
    A: Agent,
{
    store: S,
    agent: A,
}

impl<S, A> CloudClusterFactory<S, A>
where
    S: PillarStore,
    A: Agent,
{
    /// Create a factory.
    pub const fn new(store: S, agent: A) -> Self {
        Self { store, agent }
    }

    /// The stored cloud framework, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the store cannot be read and
    /// [`Error::Validation`] if it holds an unsupported framework.
    pub async fn framework(&self) -> Result<Option<CloudFramework>> {
        let value = self
            .store
            .get(PillarKey::CloudFramework)
            .await
            .map_err(|e| Error::store(PillarKey::CloudFramework, &e))?;

        value
            .map(|v| v.parse().map_err(Error::validation))
            .transpose()
    }

    /// Build a cluster from `form` for the stored framework.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the form names a framework, no
    /// framework is stored, or a field is missing or malformed.
    pub async fn build(&self, form: &CloudClusterForm) -> Result<CloudCluster> {
        if form.cloud_framework.is_some() {
            return Err(Error::validation(
                "cloud_framework is set cluster-wide and cannot be chosen per request",
            ));
        }

        let Some(framework) = self.framework().await? else {
            return Err(Error::validation("no cloud framework is configured"));
        };

        let mut errors = Vec::new();
        let mut take = |name: &str, value: &Option<String>| -> Option<String> {
            let value = value.as_deref().map(str::trim).filter(|v| !v.is_empty());
            if value.is_none() {
                errors.push(format!("{name} can't be blank"));
            }
            value.map(ToString::to_string)
        };

        let instance_type = take("instance_type", &form.instance_type);
        let instance_count = take("instance_count", &form.instance_count);

        let provider = match framework {
            CloudFramework::Ec2 => Some(ProviderSettings::Ec2 {
                subnet_id: optional(&form.subnet_id),
                security_group_id: optional(&form.security_group_id),
            }),
            CloudFramework::Azure => {
                let subscription_id = take("subscription_id", &form.subscription_id);
                let tenant_id = take("tenant_id", &form.tenant_id);
                let client_id = take("client_id", &form.client_id);
                let secret = take("secret", &form.secret);
                let resource_group = take("resource_group", &form.resource_group);
                let storage_account = take("storage_account", &form.storage_account);
                let network_id = take("network_id", &form.network_id);
                let subnet_id = take("subnet_id", &form.subnet_id);

                match (
                    subscription_id,
                    tenant_id,
                    client_id,
                    secret,
                    resource_group,
                    storage_account,
                    network_id,
                    subnet_id,
                ) {
                    (
                        Some(subscription_id),
                        Some(tenant_id),
                        Some(client_id),
                        Some(secret),
                        Some(resource_group),
                        Some(storage_account),
                        Some(network_id),
                        Some(subnet_id),
                    ) => Some(ProviderSettings::Azure(AzureSettings {
                        subscription_id,
                        tenant_id,
                        client_id,
                        secret: Secret(secret),
                        resource_group,
                        storage_account,
                        network_id,
                        subnet_id,
                    })),
                    _ => None,
                }
            }
        };

        let instance_count = match instance_count.map(|c| c.parse::<u32>()) {
            Some(Ok(count)) if count > 0 => Some(count),
            Some(_) => {
                errors.push("instance_count must be a positive number".to_string());
                None
            }
            None => None,
        };

        match (instance_type, instance_count, provider) {
            (Some(instance_type), Some(instance_count), Some(provider)) if errors.is_empty() => {
                Ok(CloudCluster {
                    instance_type,
                    instance_count,
                    provider,
                })
            }
            _ => Err(Error::Validation(errors)),
        }
    }

    /// Store the cluster's settings so the agent can read them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if any pillar did not take effect.
    pub async fn save(&self, cluster: &CloudCluster) -> Result<()> {
        let (pillars, required) = cluster.pillars();
        let failures = self.store.apply_all(&pillars, &required).await;

        if failures.is_empty() {
            return Ok(());
        }

        for failure in &failures {
            warn!("cloud pillar {} did not take effect", failure);
        }
        let committed = pillars
            .keys()
            .filter(|key| !failures.iter().any(|f| f.key == **key))
            .copied()
            .collect();

        Err(Error::Persistence {
            failures,
            committed,
        })
    }

    /// Build, save and provision a cloud cluster.
    ///
    /// The agent's pillars are refreshed after saving, then provisioning is
    /// requested exactly once with the worker count.
    ///
    /// # Errors
    ///
    /// Returns the [`build`](Self::build) or [`save`](Self::save) error
    /// without calling the agent, or [`Error::RemoteAssignment`] if the
    /// refresh or the provisioning call fails.
    pub async fn provision(&self, form: &CloudClusterForm) -> Result<CloudCluster> {
        let cluster = self.build(form).await?;
        self.save(&cluster).await?;

        self.agent
            .refresh_pillar()
            .await
            .map_err(|e| Error::RemoteAssignment(format!("pillar refresh failed: {e}")))?;

        info!(
            "provisioning {} {} workers of type {}",
            cluster.instance_count,
            cluster.cloud_framework(),
            cluster.instance_type
        );

        self.agent
            .build_cloud_cluster(cluster.instance_count)
            .await
            .map_err(|e| Error::RemoteAssignment(format!("cloud provisioning failed: {e}")))?;

        Ok(cluster)
    }

    /// Data for the worker bootstrap step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the store cannot be read and
    /// [`Error::Validation`] if it holds an unsupported framework.
    pub async fn worker_bootstrap(&self) -> Result<WorkerBootstrapView> {
        let controller_node = self
            .store
            .get(PillarKey::Dashboard)
            .await
            .map_err(|e| Error::store(PillarKey::Dashboard, &e))?;
        let cloud_framework = self.framework().await?;

        Ok(WorkerBootstrapView {
            controller_node,
            cloud_framework,
            instance_types: cloud_framework.map(instance_types).unwrap_or_default(),
        })
    }
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use kubeboot_agent_mock::MockAgent;
    use kubeboot_pillar_memory::MemoryPillarStore;

    use super::*;

    fn fixture(
        framework: Option<&str>,
    ) -> (
        CloudClusterFactory<MemoryPillarStore, MockAgent>,
        MemoryPillarStore,
        MockAgent,
    ) {
        let store = match framework {
            Some(framework) => {
                MemoryPillarStore::with_pillars([(PillarKey::CloudFramework, framework)])
            }
            None => MemoryPillarStore::new(),
        };
        let agent = MockAgent::default();
        (
            CloudClusterFactory::new(store.clone(), agent.clone()),
            store,
            agent,
        )
    }

    fn ec2_form() -> CloudClusterForm {
        serde_json::from_value(serde_json::json!({
            "instance_type": "t2.xlarge",
            "instance_count": 5,
            "subnet_id": "subnet-9d4a7b6c",
            "security_group_id": "sg-903004f8",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_ec2_cluster_uses_stored_framework() {
        let (factory, store, agent) = fixture(Some("ec2"));

        let cluster = factory.provision(&ec2_form()).await.unwrap();

        assert_eq!(cluster.cloud_framework(), CloudFramework::Ec2);
        assert_eq!(cluster.instance_type(), "t2.xlarge");
        assert_eq!(cluster.instance_count(), 5);
        assert_eq!(cluster.subnet_id(), Some("subnet-9d4a7b6c"));
        assert_eq!(agent.cloud_builds().await, vec![5]);
        assert_eq!(
            store.get(PillarKey::CloudWorkerSecurityGroup).await.unwrap(),
            Some("sg-903004f8".to_string())
        );
    }

    #[tokio::test]
    async fn test_form_framework_is_refused() {
        let (factory, _, agent) = fixture(Some("ec2"));
        let mut form = ec2_form();
        form.cloud_framework = Some("azure".to_string());

        let err = factory.provision(&form).await.unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert!(agent.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_framework_is_refused() {
        let (factory, _, agent) = fixture(None);

        assert!(matches!(
            factory.provision(&ec2_form()).await,
            Err(Error::Validation(_))
        ));
        assert!(agent.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_framework_is_refused() {
        let (factory, _, _) = fixture(Some("gce"));

        assert!(matches!(factory.framework().await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_azure_requires_every_field() {
        let (factory, _, _) = fixture(Some("azure"));

        let err = factory.build(&ec2_form()).await.unwrap_err();

        let Error::Validation(errors) = err else {
            panic!("expected a validation error, got {err:?}");
        };
        assert!(errors.contains(&"tenant_id can't be blank".to_string()));
        assert!(errors.contains(&"storage_account can't be blank".to_string()));
        assert!(!errors.iter().any(|e| e.starts_with("subnet_id")));
    }

    #[tokio::test]
    async fn test_bad_instance_count() {
        let (factory, _, _) = fixture(Some("ec2"));

        for count in ["0", "-2", "many"] {
            let mut form = ec2_form();
            form.instance_count = Some(count.to_string());

            assert!(matches!(factory.build(&form).await, Err(Error::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_refresh_failure_blocks_provisioning() {
        let store = MemoryPillarStore::with_pillars([(PillarKey::CloudFramework, "ec2")]);
        let agent = MockAgent::default().fail_pillar_refresh();
        let factory = CloudClusterFactory::new(store, agent.clone());

        let err = factory.provision(&ec2_form()).await.unwrap_err();

        assert!(matches!(err, Error::RemoteAssignment(_)));
        assert!(agent.cloud_builds().await.is_empty());
    }

    #[tokio::test]
    async fn test_worker_bootstrap_view() {
        let (factory, store, _) = fixture(Some("azure"));
        store
            .set(PillarKey::Dashboard, "localhost".to_string())
            .await
            .unwrap();

        let view = factory.worker_bootstrap().await.unwrap();

        assert_eq!(view.controller_node.as_deref(), Some("localhost"));
        assert_eq!(view.cloud_framework, Some(CloudFramework::Azure));
        assert_eq!(view.instance_types, instance_types(CloudFramework::Azure));

        let (bare, _, _) = fixture(None);
        assert!(bare.worker_bootstrap().await.unwrap().instance_types.is_empty());
    }

    #[test]
    fn test_secret_is_not_debug_printed() {
        let form = CloudClusterForm {
            secret: Some("hunter2".to_string()),
            ..CloudClusterForm::default()
        };
        assert!(!format!("{form:?}").contains("hunter2"));
        assert!(!format!("{:?}", Secret::new("hunter2")).contains("hunter2"));
    }
}
