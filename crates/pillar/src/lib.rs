//! Abstract interface for the cluster configuration ("pillar") key/value store.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

macro_rules! define_pillar_keys {
    ($($(#[$doc:meta])* $variant:ident => ($pillar:literal, $form:literal)),+ $(,)?) => {
        /// A recognized pillar key.
        ///
        /// Every key has two names: the pillar path the remote agent reads
        /// (`pillar()`), and the short name used by forms (`form_name()`).
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
        pub enum PillarKey {
            $(
                $(#[$doc])*
                #[serde(rename = $pillar, alias = $form)]
                $variant,
            )+
        }

        impl PillarKey {
            /// Every recognized key, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// The pillar path of this key.
            #[must_use]
            pub const fn pillar(self) -> &'static str {
                match self {
                    $(Self::$variant => $pillar,)+
                }
            }

            /// The short name used by settings forms.
            #[must_use]
            pub const fn form_name(self) -> &'static str {
                match self {
                    $(Self::$variant => $form,)+
                }
            }
        }
    };
}

define_pillar_keys! {
    /// Address of the admin dashboard (controller node).
    Dashboard => ("dashboard", "dashboard"),
    /// External FQDN of the Kubernetes API server.
    Apiserver => ("api:server:external_fqdn", "apiserver"),
    /// Whether a proxy is configured.
    EnableProxy => ("proxy:enabled", "enable_proxy"),
    /// HTTP proxy host and port.
    HttpProxy => ("proxy:http", "http_proxy"),
    /// HTTPS proxy host and port.
    HttpsProxy => ("proxy:https", "https_proxy"),
    /// Hosts excluded from proxying.
    NoProxy => ("proxy:no_proxy", "no_proxy"),
    /// Whether the proxy applies system-wide, not only to the container runtime.
    ProxySystemwide => ("proxy:systemwide", "proxy_systemwide"),
    /// Whether a registry mirror is configured.
    RegistryMirrorEnabled => ("suse_registry_mirror:enabled", "suse_registry_mirror_enabled"),
    /// URL of the registry mirror.
    RegistryMirrorUrl => ("suse_registry_mirror:url", "suse_registry_mirror_url"),
    /// Whether the registry mirror uses a custom certificate.
    RegistryMirrorCertEnabled => ("suse_registry_mirror:cert_enabled", "suse_registry_mirror_cert_enabled"),
    /// Certificate of the registry mirror.
    RegistryMirrorCert => ("suse_registry_mirror:cert", "suse_registry_mirror_cert"),
    /// Cloud framework the cluster runs on.
    CloudFramework => ("cloud:framework", "cloud_framework"),
    /// Instance type of cloud worker nodes.
    CloudWorkerType => ("cloud:profiles:cluster_node:size", "cloud_worker_type"),
    /// Subnet of cloud worker nodes.
    CloudWorkerSubnet => ("cloud:profiles:cluster_node:subnet", "cloud_worker_subnet"),
    /// EC2 security group of cloud worker nodes.
    CloudWorkerSecurityGroup => ("cloud:profiles:cluster_node:security_group", "cloud_worker_security_group"),
    /// Azure subscription.
    AzureSubscriptionId => ("cloud:providers:azure:subscription_id", "azure_subscription_id"),
    /// Azure tenant.
    AzureTenantId => ("cloud:providers:azure:tenant", "azure_tenant_id"),
    /// Azure service principal client id.
    AzureClientId => ("cloud:providers:azure:client_id", "azure_client_id"),
    /// Azure service principal secret.
    AzureSecret => ("cloud:providers:azure:secret", "azure_secret"),
    /// Azure resource group of worker nodes.
    AzureResourceGroup => ("cloud:profiles:cluster_node:resource_group", "azure_resource_group"),
    /// Azure storage account of worker nodes.
    AzureStorageAccount => ("cloud:profiles:cluster_node:storage_account", "azure_storage_account"),
    /// Azure virtual network of worker nodes.
    AzureNetworkId => ("cloud:profiles:cluster_node:network", "azure_network_id"),
    /// Set once the cluster bootstrap was started; the setup flow is over.
    SetupDone => ("setup:done", "setup_done"),
}

impl Display for PillarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.form_name())
    }
}

/// Returned when a string names no recognized pillar.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnknownPillar(pub String);

impl Display for UnknownPillar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown pillar: {}", self.0)
    }
}

impl Error for UnknownPillar {}

impl FromStr for PillarKey {
    type Err = UnknownPillar;

    /// Accepts either the pillar path or the form name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|key| key.pillar() == s || key.form_name() == s)
            .ok_or_else(|| UnknownPillar(s.to_string()))
    }
}

/// A key that did not take effect during a bulk apply.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PillarFailure {
    /// The key that failed.
    pub key: PillarKey,

    /// Why it failed.
    pub message: String,
}

impl PillarFailure {
    /// Creates a failure for `key`.
    pub fn new(key: PillarKey, message: impl Into<String>) -> Self {
        Self {
            key,
            message: message.into(),
        }
    }
}

impl Display for PillarFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key, self.message)
    }
}

/// Marker trait for `PillarStore` errors
pub trait PillarStoreError: Debug + Error + Send + Sync + 'static {}

/// A durable key/value store of cluster configuration.
///
/// Every single-key operation is atomic and durable before it returns.
/// There is no transaction spanning several calls.
#[async_trait]
pub trait PillarStore: Clone + Send + Sync + 'static {
    /// The error type for this store.
    type Error: PillarStoreError;

    /// Removes a pillar. Removing an unset pillar is not an error.
    async fn delete(&self, key: PillarKey) -> Result<(), Self::Error>;

    /// Reads a pillar. `None` means unset, which is distinct from an empty value.
    async fn get(&self, key: PillarKey) -> Result<Option<String>, Self::Error>;

    /// Lists every live pillar.
    async fn all(&self) -> Result<BTreeMap<PillarKey, String>, Self::Error>;

    /// Writes a pillar, replacing any previous value.
    async fn set(&self, key: PillarKey, value: String) -> Result<(), Self::Error>;

    /// Applies a batch of pillars key by key.
    ///
    /// A blank value for a key in `required` is refused, a blank value for
    /// any other key deletes that pillar, and a required key missing from the
    /// batch is refused as blank. Keys that succeed stay committed even when
    /// others fail: the returned list names exactly what did not take effect.
    async fn apply_all(
        &self,
        pillars: &BTreeMap<PillarKey, String>,
        required: &[PillarKey],
    ) -> Vec<PillarFailure> {
        let mut failures: Vec<PillarFailure> = required
            .iter()
            .filter(|key| !pillars.contains_key(key))
            .map(|key| PillarFailure::new(*key, "can't be blank"))
            .collect();

        for (key, value) in pillars {
            let result = if value.trim().is_empty() {
                if required.contains(key) {
                    failures.push(PillarFailure::new(*key, "can't be blank"));
                    continue;
                }
                self.delete(*key).await
            } else {
                self.set(*key, value.clone()).await
            };

            if let Err(e) = result {
                failures.push(PillarFailure::new(*key, format!("could not be saved: {e}")));
            }
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_both_names() {
        assert_eq!("proxy:http".parse::<PillarKey>(), Ok(PillarKey::HttpProxy));
        assert_eq!("http_proxy".parse::<PillarKey>(), Ok(PillarKey::HttpProxy));
        assert_eq!(
            "bogus".parse::<PillarKey>(),
            Err(UnknownPillar("bogus".to_string()))
        );
    }

    #[test]
    fn test_names_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for key in PillarKey::ALL {
            assert!(seen.insert(key.pillar()), "duplicate pillar {}", key.pillar());
            assert!(seen.insert(key.form_name()) || key.pillar() == key.form_name());
        }
    }

    #[test]
    fn test_serde_uses_pillar_path() {
        let json = serde_json::to_string(&PillarKey::RegistryMirrorUrl).unwrap();
        assert_eq!(json, "\"suse_registry_mirror:url\"");

        let key: PillarKey = serde_json::from_str("\"suse_registry_mirror_url\"").unwrap();
        assert_eq!(key, PillarKey::RegistryMirrorUrl);
    }
}
