//! Integration tests walking the setup wizard step by step

mod common;

use assert_matches::assert_matches;
use common::{FlakyStore, discovered_wizard, minions, selection, settings_form};
use kubeboot_agent_mock::MockAgent;
use kubeboot_agent::MinionId;
use kubeboot_pillar::{PillarKey, PillarStore};
use kubeboot_pillar_memory::MemoryPillarStore;
use kubeboot_setup::{BootstrapForm, CloudClusterForm, Error, FlashLevel, SetupWizard, WizardStep};
use serde_json::json;
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn test_full_setup_flow() {
    let store = MemoryPillarStore::new();
    let agent = MockAgent::new(minions());
    let wizard = SetupWizard::new(store, agent.clone());

    let welcome = wizard.welcome().await;
    assert_eq!(welcome.next, WizardStep::Welcome);
    assert_eq!(welcome.outcome.unwrap().dashboard, None);

    let configured = wizard
        .configure(&settings_form(&[("dashboard", "dashboard.cluster.local")]))
        .await;
    assert_eq!(configured.next, WizardStep::WorkerBootstrap);
    assert!(configured.flash.is_none());

    let view = wizard.worker_bootstrap().await.outcome.unwrap();
    assert_eq!(view.controller_node.as_deref(), Some("dashboard.cluster.local"));
    assert_eq!(view.cloud_framework, None);

    let discovered = wizard.discovery().await;
    assert_eq!(discovered.next, WizardStep::Discovery);
    assert_eq!(discovered.outcome.unwrap().len(), 3);

    let roles = wizard
        .set_roles(&selection(&["alpha"], &["bravo", "charlie"]))
        .await;
    assert_eq!(roles.next, WizardStep::Bootstrap);
    assert!(roles.is_ok());

    let done = wizard
        .bootstrap(&BootstrapForm {
            apiserver: Some("api.cluster.local".to_string()),
        })
        .await;
    assert_eq!(done.next, WizardStep::Home);
    assert!(done.is_ok());
    assert_eq!(agent.orchestrations().await, 1);
}

#[tokio::test]
async fn test_invalid_settings_stay_on_welcome() {
    let wizard = SetupWizard::new(MemoryPillarStore::new(), MockAgent::default());

    let report = wizard.configure(&settings_form(&[("dashboard", " ")])).await;

    assert_eq!(report.next, WizardStep::Welcome);
    assert_eq!(report.flash.unwrap().level, FlashLevel::Alert);
    assert_matches!(report.outcome, Err(Error::Validation(_)));
}

#[tokio::test]
async fn test_cloud_cluster_moves_to_discovery_with_notice() {
    let store = MemoryPillarStore::with_pillars([(PillarKey::CloudFramework, "ec2")]);
    let wizard = SetupWizard::new(store, MockAgent::default());
    let form: CloudClusterForm = serde_json::from_value(json!({
        "instance_type": "t2.xlarge",
        "instance_count": 5,
    }))
    .unwrap();

    let report = wizard.build_cloud_cluster(&form).await;

    assert_eq!(report.next, WizardStep::Discovery);
    let flash = report.flash.unwrap();
    assert_eq!(flash.level, FlashLevel::Notice);
    assert!(flash.message.contains("5 ec2 workers"));
}

#[tokio::test]
async fn test_cloud_save_failure_returns_to_worker_bootstrap() {
    let store = FlakyStore::new(MemoryPillarStore::with_pillars([(
        PillarKey::CloudFramework,
        "ec2",
    )]));
    store.break_key(PillarKey::CloudWorkerType).await;
    let agent = MockAgent::default();
    let wizard = SetupWizard::new(store, agent.clone());
    let form: CloudClusterForm = serde_json::from_value(json!({
        "instance_type": "t2.xlarge",
        "instance_count": 5,
    }))
    .unwrap();

    let report = wizard.build_cloud_cluster(&form).await;

    assert_eq!(report.next, WizardStep::WorkerBootstrap);
    assert_eq!(report.flash.unwrap().level, FlashLevel::Error);
    assert!(agent.cloud_builds().await.is_empty());
}

#[tokio::test]
async fn test_missing_master_is_an_alert() {
    let agent = MockAgent::new(minions());
    let wizard = discovered_wizard(MemoryPillarStore::new(), agent.clone()).await;

    let report = wizard.set_roles(&selection(&[], &[])).await;

    assert_eq!(report.next, WizardStep::Discovery);
    assert_eq!(report.flash.unwrap().level, FlashLevel::Alert);
    assert!(agent.role_assignments().await.is_empty());
}

#[tokio::test]
async fn test_rejected_worker_stays_on_discovery() {
    let agent = MockAgent::new(minions()).reject_minion("charlie-id");
    let wizard = discovered_wizard(MemoryPillarStore::new(), agent).await;

    let report = wizard
        .set_roles(&selection(&["alpha"], &["bravo", "charlie"]))
        .await;

    assert_eq!(report.next, WizardStep::Discovery);
    assert_eq!(report.flash.unwrap().level, FlashLevel::Error);
    assert!(wizard.registry().master().await.is_some());
}

#[tokio::test]
async fn test_bootstrap_failures_stay_on_bootstrap() {
    let agent = MockAgent::new(minions()).fail_orchestration();
    let wizard = discovered_wizard(MemoryPillarStore::new(), agent).await;
    assert!(wizard.set_roles(&selection(&["alpha"], &[])).await.is_ok());

    let blank = wizard.bootstrap(&BootstrapForm::default()).await;
    assert_eq!(blank.next, WizardStep::Bootstrap);
    assert_eq!(blank.flash.unwrap().level, FlashLevel::Alert);

    let remote = wizard
        .bootstrap(&BootstrapForm {
            apiserver: Some("api.cluster.local".to_string()),
        })
        .await;
    assert_eq!(remote.next, WizardStep::Bootstrap);
    assert_eq!(remote.flash.unwrap().level, FlashLevel::Error);
}

#[tokio::test]
#[traced_test]
async fn test_completed_setup_sends_every_step_home() {
    let store = MemoryPillarStore::new();
    let agent = MockAgent::new(minions());
    let wizard = discovered_wizard(store.clone(), agent.clone()).await;
    assert!(wizard.set_roles(&selection(&["alpha"], &["bravo"])).await.is_ok());
    let form = BootstrapForm {
        apiserver: Some("api.cluster.local".to_string()),
    };

    let first = wizard.bootstrap(&form).await;
    assert_eq!(first.next, WizardStep::Home);
    assert!(first.is_ok());
    let calls_after_bootstrap = agent.calls().await.len();

    let second = wizard.bootstrap(&form).await;
    assert_eq!(second.next, WizardStep::Home);
    assert_eq!(second.flash.unwrap().level, FlashLevel::Notice);
    assert_matches!(second.outcome, Err(Error::PrecedenceWarning(_)));

    let reassign = wizard.set_roles(&selection(&["bravo"], &["alpha"])).await;
    assert_eq!(reassign.next, WizardStep::Home);
    assert!(!reassign.is_ok());

    assert_eq!(wizard.welcome().await.next, WizardStep::Home);
    assert_eq!(wizard.discovery().await.next, WizardStep::Home);
    assert_eq!(wizard.worker_bootstrap().await.next, WizardStep::Home);
    let reconfigure = wizard
        .configure(&settings_form(&[("dashboard", "other.cluster.local")]))
        .await;
    assert_eq!(reconfigure.next, WizardStep::Home);

    assert_eq!(agent.orchestrations().await, 1);
    assert_eq!(agent.calls().await.len(), calls_after_bootstrap);
    assert_eq!(
        wizard.registry().master().await.map(|m| m.id),
        Some(MinionId::from("alpha-id"))
    );
    assert_eq!(store.get(PillarKey::Dashboard).await.unwrap(), None);
}

#[tokio::test]
async fn test_blank_apiserver_is_a_validation_alert() {
    let agent = MockAgent::new(minions());
    let wizard = discovered_wizard(MemoryPillarStore::new(), agent.clone()).await;
    assert!(wizard.set_roles(&selection(&["alpha"], &[])).await.is_ok());
    let calls_before = agent.calls().await.len();

    let report = wizard
        .bootstrap(&BootstrapForm {
            apiserver: Some("   ".to_string()),
        })
        .await;

    assert_eq!(report.next, WizardStep::Bootstrap);
    assert_eq!(report.flash.unwrap().level, FlashLevel::Alert);
    assert_matches!(report.outcome, Err(Error::Validation(errors)) => {
        assert_eq!(errors, vec!["apiserver can't be blank".to_string()]);
    });
    assert_eq!(agent.calls().await.len(), calls_before);
}
