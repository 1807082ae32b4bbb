//! Batch scheduler and manager tests

use std::collections::HashMap;

use super::test_utils::*;
use module_host::module::scheduler::{BatchFailure, DependencyOrderedLoader, Phase};
use module_host::module::traits::ModuleError;
use module_host::{HostConfig, ModuleManager};

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_load_all_orders_by_dependencies() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);
    let batch = vec![
        module("cache", &["broker"], &[]),
        module("broker", &["archive"], &[]),
        module("archive", &[], &[]),
    ];

    let report = DependencyOrderedLoader::default()
        .load_all(&mut registry, batch)
        .await;

    assert_eq!(report.phase, Phase::Load);
    assert!(report.is_success());
    assert_eq!(report.completed, vec!["archive", "broker", "cache"]);
    assert_eq!(backend.modules_for(Op::Load), vec!["archive", "broker", "cache"]);
}

#[tokio::test]
async fn test_dependency_cycle_terminates() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);
    let batch = vec![module("left", &["right"], &[]), module("right", &["left"], &[])];

    let report = DependencyOrderedLoader::default()
        .load_all(&mut registry, batch)
        .await;

    assert!(report.completed.is_empty());
    assert_eq!(report.failed_modules(), vec!["left", "right"]);
    for failure in &report.failures {
        match failure {
            BatchFailure::Transition { error, .. } => {
                assert!(matches!(error, ModuleError::DependencyUnmet { .. }))
            }
            other => panic!("expected a failed transition, got {}", other),
        }
    }
    assert!(registry.is_empty());
    assert!(backend.events().is_empty());
}

#[tokio::test]
async fn test_single_pass_leaves_blocked_modules_unscheduled() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);
    let batch = vec![
        module("left", &["right"], &[]),
        module("right", &["left"], &[]),
        module("solo", &[], &[]),
    ];

    let report = DependencyOrderedLoader::new(1)
        .load_all(&mut registry, batch)
        .await;

    assert_eq!(report.completed, vec!["solo"]);
    assert_eq!(report.failures.len(), 2);
    assert!(report
        .failures
        .iter()
        .all(|f| matches!(f, BatchFailure::Unscheduled { .. })));
}

#[tokio::test]
async fn test_soft_dependencies_order_without_warnings() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);
    let batch = vec![module("web", &[], &["metrics"]), module("metrics", &[], &[])];

    let report = DependencyOrderedLoader::default()
        .load_all(&mut registry, batch)
        .await;

    assert_eq!(report.completed, vec!["metrics", "web"]);
    assert!(report.warnings.is_empty());
}

#[tokio::test]
async fn test_soft_cycle_loads_with_warning() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);
    let batch = vec![module("alpha", &[], &["beta"]), module("beta", &[], &["alpha"])];

    let report = DependencyOrderedLoader::default()
        .load_all(&mut registry, batch)
        .await;

    assert!(report.is_success());
    assert_eq!(report.completed, vec!["alpha", "beta"]);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].warnings[0].dependency, "beta");
}

#[tokio::test]
async fn test_unsupported_language_fails_in_batch() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);
    let foreign = module_host::module::ModuleDescriptor::from_value(
        serde_json::json!({"name": "legacy", "version": "1", "language": "cobol"}),
        "legacy",
    )
    .unwrap();
    let batch = vec![
        module_host::module::traits::Module::new(foreign, "/nonexistent/legacy"),
        module("core", &[], &[]),
    ];

    let report = DependencyOrderedLoader::default()
        .load_all(&mut registry, batch)
        .await;

    assert_eq!(report.completed, vec!["core"]);
    match &report.failures[..] {
        [BatchFailure::Transition { module, error }] => {
            assert_eq!(module, "legacy");
            assert!(matches!(error, ModuleError::NoInterpreterRegistered { .. }));
        }
        other => panic!("unexpected failures: {:?}", other),
    }
}

#[tokio::test]
async fn test_start_stop_unload_orders() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);
    let scheduler = DependencyOrderedLoader::default();
    scheduler
        .load_all(
            &mut registry,
            vec![module("web", &["core"], &[]), module("core", &[], &[])],
        )
        .await;

    let started = scheduler
        .start_all(&mut registry, names(&["web", "core"]))
        .await;
    assert_eq!(started.completed, vec!["core", "web"]);

    let stopped = scheduler
        .stop_all(&mut registry, names(&["core", "web"]))
        .await;
    assert_eq!(stopped.completed, vec!["web", "core"]);

    let unloaded = scheduler
        .unload_all(&mut registry, names(&["core", "web"]))
        .await;
    assert_eq!(unloaded.completed, vec!["web", "core"]);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_failed_start_blocks_dependents() {
    let backend = RecordingBackend::new();
    backend.fail_on(Op::Start, "core");
    let mut registry = registry_with(&backend);
    let scheduler = DependencyOrderedLoader::default();
    scheduler
        .load_all(
            &mut registry,
            vec![module("core", &[], &[]), module("web", &["core"], &[])],
        )
        .await;

    let report = scheduler
        .start_all(&mut registry, names(&["core", "web"]))
        .await;

    assert!(report.completed.is_empty());
    assert_eq!(report.failed_modules(), vec!["core", "web"]);
    assert_eq!(backend.count(Op::Start, "web"), 0);
}

fn host_config(fixture: &ModuleTestFixture) -> HostConfig {
    let mut config = HostConfig::default();
    config.modules.modules_dir = fixture.modules_dir.to_string_lossy().into_owned();
    config
}

#[tokio::test]
async fn test_manager_startup_and_shutdown() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module("web", &descriptor_json("web", &["core"], &[]));
    fixture.write_module("core", &descriptor_json("core", &[], &[]));
    std::fs::create_dir_all(fixture.modules_dir.join("scratch")).unwrap();

    let mut config = host_config(&fixture);
    let mut overrides = HashMap::new();
    overrides.insert("port".to_string(), "9000".to_string());
    config.modules.module_configs.insert("web".to_string(), overrides);

    let backend = RecordingBackend::new();
    let manager = ModuleManager::new(&config);
    manager
        .register_interpreter(TEST_LANGUAGE, backend.clone(), &[] as &[&str])
        .await
        .unwrap();

    let report = manager.startup().await.unwrap();
    assert!(report.is_success());
    assert_eq!(manager.list_modules().await, vec!["core", "web"]);
    assert!(manager.is_running("core").await);
    assert!(manager.is_running("web").await);
    assert_eq!(backend.modules_for(Op::Start), vec!["core", "web"]);
    assert_eq!(
        backend.config_of("web").unwrap().get("port").map(String::as_str),
        Some("9000")
    );

    let report = manager.shutdown().await;
    assert!(report.is_success());
    assert!(manager.list_modules().await.is_empty());
    assert_eq!(backend.modules_for(Op::Stop), vec!["web", "core"]);
    assert_eq!(backend.modules_for(Op::Unload), vec!["web", "core"]);
}

#[tokio::test]
async fn test_manager_respects_enabled_list() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module("core", &descriptor_json("core", &[], &[]));
    fixture.write_module("extra", &descriptor_json("extra", &[], &[]));

    let mut config = host_config(&fixture);
    config.modules.enabled_modules = vec!["core".to_string()];

    let backend = RecordingBackend::new();
    let manager = ModuleManager::new(&config);
    manager
        .register_interpreter(TEST_LANGUAGE, backend.clone(), &[] as &[&str])
        .await
        .unwrap();

    manager.startup().await.unwrap();
    assert_eq!(manager.list_modules().await, vec!["core"]);
}

#[tokio::test]
async fn test_manager_disabled() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module("core", &descriptor_json("core", &[], &[]));

    let mut config = host_config(&fixture);
    config.modules.enabled = false;

    let manager = ModuleManager::new(&config);
    let report = manager.startup().await.unwrap();
    assert!(report.batches.is_empty());
    assert!(manager.list_modules().await.is_empty());
}

#[tokio::test]
async fn test_manager_reload_restarts_running_module() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module("core", &descriptor_json("core", &[], &[]));

    let backend = RecordingBackend::new();
    let manager = ModuleManager::new(&host_config(&fixture));
    manager
        .register_interpreter(TEST_LANGUAGE, backend.clone(), &[] as &[&str])
        .await
        .unwrap();
    manager.startup().await.unwrap();

    manager.reload_module("core").await.unwrap();

    assert!(manager.is_running("core").await);
    assert_eq!(backend.count(Op::Load, "core"), 2);
    assert_eq!(backend.count(Op::Start, "core"), 2);
    assert_eq!(backend.count(Op::Unload, "core"), 1);
    assert!(matches!(
        manager.reload_module("ghost").await,
        Err(ModuleError::ModuleNotFound(_))
    ));
}
