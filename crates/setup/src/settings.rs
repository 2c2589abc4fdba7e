//! Translation of the cluster settings form into pillar writes and deletes.
//!
//! Merging happens in two phases. [`SettingsMerger::plan`] validates the form,
//! resolves every toggle and only then decides, field by field, whether the
//! field is written, deleted or left alone. [`SettingsMerger::merge`] executes
//! the resulting [`PillarPlan`]. A disabled toggle always erases its
//! dependent pillars, whatever else the form carries.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};
use std::str::FromStr;

use kubeboot_pillar::{PillarFailure, PillarKey, PillarStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MergeConfig;
use crate::error::{Error, Result};

const PROXY_FIELDS: [PillarKey; 3] = [
    PillarKey::HttpProxy,
    PillarKey::HttpsProxy,
    PillarKey::NoProxy,
];

/// State of an enable/disable switch in the settings form.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Toggle {
    /// Dependent fields are written from the form.
    Enable,

    /// Dependent fields are erased.
    Disable,
}

impl Toggle {
    /// The value stored in the toggle's own pillar.
    #[must_use]
    pub const fn as_pillar(self) -> &'static str {
        match self {
            Self::Enable => "true",
            Self::Disable => "false",
        }
    }
}

impl Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
        })
    }
}

impl FromStr for Toggle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "enable" => Ok(Self::Enable),
            "disable" => Ok(Self::Disable),
            other => Err(format!("expected enable or disable, got {other:?}")),
        }
    }
}

/// The cluster settings form as submitted.
///
/// Every field is optional. A missing or blank toggle leaves its group
/// untouched.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SettingsForm {
    /// Dashboard address.
    pub dashboard: Option<String>,
    /// API server address.
    pub apiserver: Option<String>,
    /// Proxy group toggle.
    pub enable_proxy: Option<String>,
    /// HTTP proxy.
    pub http_proxy: Option<String>,
    /// HTTPS proxy.
    pub https_proxy: Option<String>,
    /// Proxy exclusions.
    pub no_proxy: Option<String>,
    /// `"true"` to apply the proxy system-wide.
    pub proxy_systemwide: Option<String>,
    /// Registry mirror group toggle.
    pub suse_registry_mirror_enabled: Option<String>,
    /// Registry mirror URL.
    pub suse_registry_mirror_url: Option<String>,
    /// Registry mirror certificate toggle.
    pub suse_registry_mirror_cert_enabled: Option<String>,
    /// Registry mirror certificate.
    pub suse_registry_mirror_cert: Option<String>,
}

impl SettingsForm {
    /// The submitted value for the field backing `key`, if the form has one.
    #[must_use]
    pub fn field(&self, key: PillarKey) -> Option<&str> {
        let value = match key {
            PillarKey::Dashboard => &self.dashboard,
            PillarKey::Apiserver => &self.apiserver,
            PillarKey::HttpProxy => &self.http_proxy,
            PillarKey::HttpsProxy => &self.https_proxy,
            PillarKey::NoProxy => &self.no_proxy,
            PillarKey::ProxySystemwide => &self.proxy_systemwide,
            PillarKey::RegistryMirrorUrl => &self.suse_registry_mirror_url,
            PillarKey::RegistryMirrorCert => &self.suse_registry_mirror_cert,
            _ => return None,
        };
        value.as_deref()
    }

    fn filled(&self, key: PillarKey) -> Option<&str> {
        self.field(key).map(str::trim).filter(|v| !v.is_empty())
    }
}

fn parse_toggle(name: &str, value: Option<&str>, errors: &mut Vec<String>) -> Option<Toggle> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    match value.parse() {
        Ok(toggle) => Some(toggle),
        Err(e) => {
            errors.push(format!("{name}: {e}"));
            None
        }
    }
}

/// The exact pillar changes a form resolves to.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PillarPlan {
    writes: BTreeMap<PillarKey, String>,
    deletes: BTreeSet<PillarKey>,
}

impl PillarPlan {
    /// Schedules `key` to be written. Cancels a scheduled delete.
    pub fn write(&mut self, key: PillarKey, value: impl Into<String>) {
        self.deletes.remove(&key);
        self.writes.insert(key, value.into());
    }

    /// Schedules `key` to be deleted. Cancels a scheduled write.
    pub fn delete(&mut self, key: PillarKey) {
        self.writes.remove(&key);
        self.deletes.insert(key);
    }

    /// Pillars to write.
    #[must_use]
    pub const fn writes(&self) -> &BTreeMap<PillarKey, String> {
        &self.writes
    }

    /// Pillars to delete.
    #[must_use]
    pub const fn deletes(&self) -> &BTreeSet<PillarKey> {
        &self.deletes
    }

    /// What the plan does to `key`: `Some(Some(v))` writes, `Some(None)`
    /// deletes, `None` leaves it alone.
    #[must_use]
    pub fn change(&self, key: PillarKey) -> Option<Option<&str>> {
        if self.deletes.contains(&key) {
            return Some(None);
        }
        self.writes.get(&key).map(|v| Some(v.as_str()))
    }

    /// Whether the plan changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }
}

/// Current settings, read back from the pillars to pre-fill the form.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct SettingsSnapshot {
    /// Dashboard address.
    pub dashboard: Option<String>,
    /// API server address.
    pub apiserver: Option<String>,
    /// Whether a proxy is configured.
    pub enable_proxy: bool,
    /// HTTP proxy.
    pub http_proxy: Option<String>,
    /// HTTPS proxy.
    pub https_proxy: Option<String>,
    /// Proxy exclusions.
    pub no_proxy: Option<String>,
    /// Stored system-wide flag.
    pub proxy_systemwide: Option<String>,
    /// Whether a registry mirror is configured.
    pub registry_mirror_enabled: bool,
    /// Registry mirror URL.
    pub registry_mirror_url: Option<String>,
    /// Whether the registry mirror has a certificate.
    pub registry_mirror_cert_enabled: bool,
    /// Registry mirror certificate.
    pub registry_mirror_cert: Option<String>,
}

/// Merges the settings form into the pillar store.
#[derive(Clone, Debug)]
pub struct SettingsMerger<S>
where
    S: PillarStore,
{
    store: S,
    config: MergeConfig,
}

impl<S> SettingsMerger<S>
where
    S: PillarStore,
{
    /// Create a merger with the default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, MergeConfig::default())
    }

    /// Create a merger with a custom configuration.
    pub const fn with_config(store: S, config: MergeConfig) -> Self {
        Self { store, config }
    }

    /// Resolve `form` into a plan without touching the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if a required field is blank or a toggle
    /// carries an unknown value.
    pub fn plan(&self, form: &SettingsForm) -> Result<PillarPlan> {
        let mut errors: Vec<String> = self
            .config
            .required_pillars
            .iter()
            .filter(|key| form.filled(**key).is_none())
            .map(|key| format!("{key} can't be blank"))
            .collect();

        // Phase one: toggles.
        let proxy = parse_toggle("enable_proxy", form.enable_proxy.as_deref(), &mut errors);
        let mirror = parse_toggle(
            "suse_registry_mirror_enabled",
            form.suse_registry_mirror_enabled.as_deref(),
            &mut errors,
        );
        let mirror_cert = parse_toggle(
            "suse_registry_mirror_cert_enabled",
            form.suse_registry_mirror_cert_enabled.as_deref(),
            &mut errors,
        );

        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        // Phase two: fields, gated by the toggles.
        let mut plan = PillarPlan::default();

        for key in [PillarKey::Dashboard, PillarKey::Apiserver] {
            if let Some(value) = form.filled(key) {
                plan.write(key, value);
            }
        }

        match proxy {
            Some(Toggle::Disable) => {
                plan.write(PillarKey::EnableProxy, Toggle::Disable.as_pillar());
                for key in PROXY_FIELDS {
                    plan.delete(key);
                }
                plan.write(PillarKey::ProxySystemwide, "false");
            }
            Some(Toggle::Enable) => {
                plan.write(PillarKey::EnableProxy, Toggle::Enable.as_pillar());
                for key in PROXY_FIELDS {
                    if let Some(value) = form.filled(key) {
                        plan.write(key, value);
                    }
                }
                // Absent means unchanged.
                if let Some(systemwide) = form.filled(PillarKey::ProxySystemwide) {
                    plan.write(PillarKey::ProxySystemwide, (systemwide == "true").to_string());
                }
            }
            None => {}
        }

        if mirror == Some(Toggle::Disable) {
            plan.write(PillarKey::RegistryMirrorEnabled, Toggle::Disable.as_pillar());
            plan.write(PillarKey::RegistryMirrorCertEnabled, Toggle::Disable.as_pillar());
            plan.delete(PillarKey::RegistryMirrorUrl);
            plan.delete(PillarKey::RegistryMirrorCert);
        } else {
            if mirror == Some(Toggle::Enable) {
                plan.write(PillarKey::RegistryMirrorEnabled, Toggle::Enable.as_pillar());
                if let Some(url) = form.filled(PillarKey::RegistryMirrorUrl) {
                    plan.write(PillarKey::RegistryMirrorUrl, url);
                }
            }

            match mirror_cert {
                Some(Toggle::Disable) => {
                    plan.write(PillarKey::RegistryMirrorCertEnabled, Toggle::Disable.as_pillar());
                    plan.delete(PillarKey::RegistryMirrorCert);
                }
                Some(Toggle::Enable) => {
                    plan.write(PillarKey::RegistryMirrorCertEnabled, Toggle::Enable.as_pillar());
                    if let Some(cert) = form.filled(PillarKey::RegistryMirrorCert) {
                        plan.write(PillarKey::RegistryMirrorCert, cert);
                    }
                }
                None => {}
            }
        }

        debug!(
            "settings resolve to {} writes and {} deletes",
            plan.writes.len(),
            plan.deletes.len()
        );

        Ok(plan)
    }

    /// Validate `form` and apply it to the store.
    ///
    /// Returns the plan that was applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] without touching the store if the form is
    /// invalid, and [`Error::Persistence`] if any pillar did not take effect.
    /// In the latter case the pillars listed as committed stay in effect.
    pub async fn merge(&self, form: &SettingsForm) -> Result<PillarPlan> {
        let plan = self.plan(form)?;
        self.apply(&plan).await?;
        Ok(plan)
    }

    /// Apply a resolved plan: deletes first, then the bulk write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if any pillar did not take effect.
    pub async fn apply(&self, plan: &PillarPlan) -> Result<()> {
        let mut failures = Vec::new();
        let mut committed = Vec::new();

        for key in &plan.deletes {
            match self.store.delete(*key).await {
                Ok(()) => committed.push(*key),
                Err(e) => failures.push(PillarFailure::new(
                    *key,
                    format!("could not be deleted: {e}"),
                )),
            }
        }

        let write_failures = self
            .store
            .apply_all(&plan.writes, &self.config.required_pillars)
            .await;

        committed.extend(
            plan.writes
                .keys()
                .filter(|key| !write_failures.iter().any(|f| f.key == **key)),
        );
        failures.extend(write_failures);

        if failures.is_empty() {
            info!(
                "applied settings: {} pillars written, {} deleted",
                plan.writes.len(),
                plan.deletes.len()
            );
            return Ok(());
        }

        for failure in &failures {
            warn!("settings pillar {} did not take effect", failure);
        }

        Err(Error::Persistence {
            failures,
            committed,
        })
    }

    /// Read the current settings back from the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unreadable`] if the store cannot be read.
    pub async fn current(&self) -> Result<SettingsSnapshot> {
        let mut pillars = self
            .store
            .all()
            .await
            .map_err(|e| Error::Unreadable(e.to_string()))?;

        let flag = |pillars: &BTreeMap<PillarKey, String>, key| {
            pillars.get(&key).map(|value| value == "true")
        };

        let enable_proxy = flag(&pillars, PillarKey::EnableProxy)
            .unwrap_or_else(|| PROXY_FIELDS.iter().any(|key| pillars.contains_key(key)));
        let registry_mirror_enabled = flag(&pillars, PillarKey::RegistryMirrorEnabled)
            .unwrap_or_else(|| pillars.contains_key(&PillarKey::RegistryMirrorUrl));
        let registry_mirror_cert_enabled = flag(&pillars, PillarKey::RegistryMirrorCertEnabled)
            .unwrap_or_else(|| pillars.contains_key(&PillarKey::RegistryMirrorCert));

        Ok(SettingsSnapshot {
            dashboard: pillars.remove(&PillarKey::Dashboard),
            apiserver: pillars.remove(&PillarKey::Apiserver),
            enable_proxy,
            http_proxy: pillars.remove(&PillarKey::HttpProxy),
            https_proxy: pillars.remove(&PillarKey::HttpsProxy),
            no_proxy: pillars.remove(&PillarKey::NoProxy),
            proxy_systemwide: pillars.remove(&PillarKey::ProxySystemwide),
            registry_mirror_enabled,
            registry_mirror_url: pillars.remove(&PillarKey::RegistryMirrorUrl),
            registry_mirror_cert_enabled,
            registry_mirror_cert: pillars.remove(&PillarKey::RegistryMirrorCert),
        })
    }
}
