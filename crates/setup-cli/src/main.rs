//! CLI binary to walk a kubeboot cluster through setup.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod state;

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use kubeboot_agent_mock::MockAgent;
use kubeboot_pillar::{PillarKey, PillarStore};
use kubeboot_pillar_fs::FsPillarStore;
use kubeboot_setup::{
    BootstrapForm, CloudClusterForm, NodeRegistry, RoleSelection, SettingsForm, SetupConfig,
    SetupWizard, StepReport,
};
use tracing::info;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Mock agent error
    #[error("agent error: {0}")]
    Agent(#[from] kubeboot_agent_mock::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Pillar store error
    #[error("pillar store error: {0}")]
    Pillar(#[from] kubeboot_pillar_fs::Error),

    /// A setup step failed
    #[error(transparent)]
    Setup(#[from] kubeboot_setup::Error),

    /// Registry state file error
    #[error("state error: {0}")]
    State(String),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory holding pillars.json and minions.json
    #[arg(long, default_value = "/tmp/kubeboot", env = "KUBEBOOT_STATE_DIR")]
    state_dir: PathBuf,

    /// JSON script for the agent (minions to announce, calls to fail)
    #[arg(long, env = "KUBEBOOT_AGENT_CONFIG")]
    agent_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Show the current cluster settings
    Welcome,

    /// Store the cluster settings
    Configure(ConfigureArgs),

    /// Show how workers join the cluster
    WorkerBootstrap,

    /// Provision cloud workers
    BuildCloudCluster(CloudArgs),

    /// Pull pending minions from the agent
    Discover,

    /// Assign master and worker roles
    SetRoles {
        /// Minion to make master
        #[arg(long)]
        master: Vec<String>,

        /// Minions to make workers
        #[arg(long)]
        worker: Vec<String>,
    },

    /// Store the bootstrap settings and start orchestration
    Bootstrap {
        /// External FQDN of the API server
        #[arg(long, env = "KUBEBOOT_APISERVER")]
        apiserver: Option<String>,
    },

    /// Low-level pillar access
    Pillar {
        #[command(subcommand)]
        command: PillarCommand,
    },
}

#[derive(Clone, Debug, Subcommand)]
enum PillarCommand {
    /// Print a pillar
    Get {
        /// Pillar path or form name
        key: PillarKey,
    },

    /// Write a pillar
    Set {
        /// Pillar path or form name
        key: PillarKey,

        /// New value
        value: String,
    },

    /// Remove a pillar
    Delete {
        /// Pillar path or form name
        key: PillarKey,
    },
}

#[derive(Clone, Debug, ClapArgs)]
struct ConfigureArgs {
    /// Dashboard address
    #[arg(long)]
    dashboard: Option<String>,

    /// External FQDN of the API server
    #[arg(long)]
    apiserver: Option<String>,

    /// enable or disable the proxy settings
    #[arg(long)]
    enable_proxy: Option<String>,

    /// HTTP proxy
    #[arg(long)]
    http_proxy: Option<String>,

    /// HTTPS proxy
    #[arg(long)]
    https_proxy: Option<String>,

    /// Hosts bypassing the proxy
    #[arg(long)]
    no_proxy: Option<String>,

    /// Whether the proxy applies system-wide
    #[arg(long)]
    proxy_systemwide: Option<String>,

    /// enable or disable the registry mirror
    #[arg(long)]
    registry_mirror: Option<String>,

    /// Registry mirror URL
    #[arg(long)]
    registry_mirror_url: Option<String>,

    /// enable or disable the registry mirror certificate
    #[arg(long)]
    registry_mirror_cert_enabled: Option<String>,

    /// Registry mirror certificate (PEM)
    #[arg(long)]
    registry_mirror_cert: Option<String>,
}

impl From<ConfigureArgs> for SettingsForm {
    fn from(args: ConfigureArgs) -> Self {
        Self {
            dashboard: args.dashboard,
            apiserver: args.apiserver,
            enable_proxy: args.enable_proxy,
            http_proxy: args.http_proxy,
            https_proxy: args.https_proxy,
            no_proxy: args.no_proxy,
            proxy_systemwide: args.proxy_systemwide,
            suse_registry_mirror_enabled: args.registry_mirror,
            suse_registry_mirror_url: args.registry_mirror_url,
            suse_registry_mirror_cert_enabled: args.registry_mirror_cert_enabled,
            suse_registry_mirror_cert: args.registry_mirror_cert,
        }
    }
}

#[derive(Clone, Debug, ClapArgs)]
struct CloudArgs {
    /// Worker instance size
    #[arg(long)]
    instance_type: Option<String>,

    /// Number of workers
    #[arg(long)]
    instance_count: Option<String>,

    /// Subnet id (EC2) or name (Azure)
    #[arg(long)]
    subnet_id: Option<String>,

    /// EC2 security group
    #[arg(long)]
    security_group_id: Option<String>,

    /// Azure subscription
    #[arg(long)]
    subscription_id: Option<String>,

    /// Azure tenant
    #[arg(long)]
    tenant_id: Option<String>,

    /// Azure service principal id
    #[arg(long)]
    client_id: Option<String>,

    /// Azure service principal secret
    #[arg(long, env = "KUBEBOOT_AZURE_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Azure resource group
    #[arg(long)]
    resource_group: Option<String>,

    /// Azure storage account
    #[arg(long)]
    storage_account: Option<String>,

    /// Azure virtual network
    #[arg(long)]
    network_id: Option<String>,
}

impl From<CloudArgs> for CloudClusterForm {
    fn from(args: CloudArgs) -> Self {
        Self {
            cloud_framework: None,
            instance_type: args.instance_type,
            instance_count: args.instance_count,
            subnet_id: args.subnet_id,
            security_group_id: args.security_group_id,
            subscription_id: args.subscription_id,
            tenant_id: args.tenant_id,
            client_id: args.client_id,
            secret: args.secret,
            resource_group: args.resource_group,
            storage_account: args.storage_account,
            network_id: args.network_id,
        }
    }
}

/// Print the outcome of a step and turn a failure into an error.
fn report<T>(
    step: StepReport<T>,
    describe: impl FnOnce(&T) -> Result<String, Error>,
) -> Result<(), Error> {
    if let Some(flash) = &step.flash {
        println!("[{:?}] {}", flash.level, flash.message);
    }

    println!("next: {}", step.next);

    let value = step.outcome?;
    println!("{}", describe(&value)?);

    Ok(())
}

async fn run_pillar_command(store: &FsPillarStore, command: PillarCommand) -> Result<(), Error> {
    match command {
        PillarCommand::Get { key } => {
            if let Some(value) = store.get(key).await? {
                println!("{value}");
            }
        }
        PillarCommand::Set { key, value } => {
            store.set(key, value).await?;
            info!("set pillar {}", key.pillar());
        }
        PillarCommand::Delete { key } => {
            store.delete(key).await?;
            info!("deleted pillar {}", key.pillar());
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let store = FsPillarStore::new(args.state_dir.join("pillars.json"));
    let agent = match &args.agent_config {
        Some(path) => MockAgent::from_config_file(path)?,
        None => MockAgent::default(),
    };
    let minions_path = args.state_dir.join("minions.json");
    let registry = NodeRegistry::with_minions(agent, state::load_minions(&minions_path).await?);
    let wizard = SetupWizard::with_registry(store.clone(), registry, SetupConfig::default());

    let result = match args.command {
        Command::Welcome => report(wizard.welcome().await, |snapshot| {
            Ok(serde_json::to_string_pretty(snapshot)?)
        }),
        Command::Configure(form) => report(wizard.configure(&form.into()).await, |plan| {
            Ok(format!(
                "{} pillars written, {} deleted",
                plan.writes().len(),
                plan.deletes().len()
            ))
        }),
        Command::WorkerBootstrap => report(wizard.worker_bootstrap().await, |view| {
            Ok(serde_json::to_string_pretty(view)?)
        }),
        Command::BuildCloudCluster(form) => {
            report(wizard.build_cloud_cluster(&form.into()).await, |cluster| {
                Ok(format!(
                    "requested {} workers of type {}",
                    cluster.instance_count(),
                    cluster.instance_type()
                ))
            })
        }
        Command::Discover => report(wizard.discovery().await, |minions| {
            Ok(minions
                .iter()
                .map(|m| format!("{}\t{}\t{}", m.id, m.fqdn, m.role))
                .collect::<Vec<_>>()
                .join("\n"))
        }),
        Command::SetRoles { master, worker } => {
            let selection = RoleSelection {
                master: master.into_iter().map(Into::into).collect(),
                worker: worker.into_iter().map(Into::into).collect(),
            };
            report(wizard.set_roles(&selection).await, |assignments| {
                Ok(assignments
                    .assignments
                    .iter()
                    .map(|a| format!("{} {}: {:?}", a.minion, a.role, a.outcome))
                    .collect::<Vec<_>>()
                    .join("\n"))
            })
        }
        Command::Bootstrap { apiserver } => {
            report(wizard.bootstrap(&BootstrapForm { apiserver }).await, |done| {
                Ok(format!(
                    "orchestration started with {} nodes",
                    done.assignments.committed().count()
                ))
            })
        }
        Command::Pillar { command } => run_pillar_command(&store, command).await,
    };

    // Roles committed before a failure stand, so the registry is saved either way.
    state::save_minions(&minions_path, &wizard.registry().minions().await).await?;

    result
}
