//! Module lifecycle tests
//!
//! Dependency rules for load, start, stop and unload, and how backend
//! failures leave the registry.

use super::test_utils::*;
use module_host::module::traits::{DependencyKind, ModuleError, RequiredState};
use module_host::module::ModuleRegistry;

#[tokio::test]
async fn test_load_with_missing_hard_dependency_fails() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);

    let err = registry
        .load_with_interpreter(module("web", &["core"], &[]))
        .await
        .unwrap_err();

    match err {
        ModuleError::DependencyUnmet {
            module,
            dependency,
            kind,
            required,
        } => {
            assert_eq!(module, "web");
            assert_eq!(dependency, "core");
            assert_eq!(kind, DependencyKind::Hard);
            assert_eq!(required, RequiredState::Loaded);
        }
        other => panic!("expected DependencyUnmet, got {:?}", other),
    }
    assert!(registry.get_all().is_empty());
    assert!(backend.events().is_empty());
}

#[tokio::test]
async fn test_load_with_missing_soft_dependency_warns() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);

    let report = registry
        .load_with_interpreter(module("web", &[], &["metrics"]))
        .await
        .unwrap();

    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].dependency, "metrics");
    assert_eq!(report.warnings[0].required, RequiredState::Loaded);
    assert_eq!(
        report.warnings[0].to_string(),
        "The soft-dependency metrics (used by web) isn't loaded"
    );
    assert!(registry.contains("web"));
    assert_eq!(backend.count(Op::Load, "web"), 1);
}

#[tokio::test]
async fn test_load_twice_is_rejected() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);

    registry
        .load_with_interpreter(module("core", &[], &[]))
        .await
        .unwrap();
    let err = registry
        .load_with_interpreter(module("core", &[], &[]))
        .await
        .unwrap_err();

    assert!(matches!(err, ModuleError::AlreadyLoaded(ref name) if name == "core"));
    assert_eq!(backend.count(Op::Load, "core"), 1);
}

#[tokio::test]
async fn test_start_requires_running_hard_dependency() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);
    registry.load_with_interpreter(module("core", &[], &[])).await.unwrap();
    registry.load_with_interpreter(module("web", &["core"], &[])).await.unwrap();

    let err = registry.start_module("web").await.unwrap_err();
    assert!(err.is_dependency_unmet(RequiredState::Started));
    assert!(!registry.is_running("web"));

    registry.start_module("core").await.unwrap();
    registry.start_module("web").await.unwrap();
    assert!(registry.is_running("web"));
}

#[tokio::test]
async fn test_start_with_stopped_soft_dependency_warns() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);
    registry.load_with_interpreter(module("metrics", &[], &[])).await.unwrap();
    registry
        .load_with_interpreter(module("web", &[], &["metrics"]))
        .await
        .unwrap();

    let report = registry.start_module("web").await.unwrap();
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].required, RequiredState::Started);
    assert!(registry.is_running("web"));
}

#[tokio::test]
async fn test_start_hook_runs_once() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);
    registry.load_with_interpreter(module("core", &[], &[])).await.unwrap();

    registry.start_module("core").await.unwrap();
    let err = registry.start_module("core").await.unwrap_err();

    assert!(matches!(err, ModuleError::AlreadyRunning(_)));
    assert_eq!(backend.count(Op::Start, "core"), 1);
}

#[tokio::test]
async fn test_stop_blocked_by_running_hard_dependent() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);
    registry.load_with_interpreter(module("core", &[], &[])).await.unwrap();
    registry.load_with_interpreter(module("web", &["core"], &[])).await.unwrap();
    registry.start_module("core").await.unwrap();
    registry.start_module("web").await.unwrap();

    let err = registry.stop_module("core").await.unwrap_err();
    match err {
        ModuleError::DependencyUnmet {
            dependency,
            required,
            ..
        } => {
            assert_eq!(dependency, "web");
            assert_eq!(required, RequiredState::Stopped);
        }
        other => panic!("expected DependencyUnmet, got {:?}", other),
    }
    assert!(registry.is_running("core"));

    registry.stop_module("web").await.unwrap();
    registry.stop_module("core").await.unwrap();
    assert!(!registry.is_running("core"));
}

#[tokio::test]
async fn test_stop_with_running_soft_dependent_warns() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);
    registry.load_with_interpreter(module("metrics", &[], &[])).await.unwrap();
    registry
        .load_with_interpreter(module("web", &[], &["metrics"]))
        .await
        .unwrap();
    registry.start_module("metrics").await.unwrap();
    registry.start_module("web").await.unwrap();

    let report = registry.stop_module("metrics").await.unwrap();
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].dependency, "web");
    assert!(!registry.is_running("metrics"));
}

#[tokio::test]
async fn test_unload_order_follows_dependents() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);
    registry.load_with_interpreter(module("data", &[], &[])).await.unwrap();
    registry
        .load_with_interpreter(module("engine", &["data"], &[]))
        .await
        .unwrap();

    let err = registry.unload_module("data").await.unwrap_err();
    assert!(err.is_dependency_unmet(RequiredState::Unloaded));
    assert!(registry.contains("data"));

    registry.unload_module("engine").await.unwrap();
    registry.unload_module("data").await.unwrap();
    assert!(registry.is_empty());
    assert_eq!(backend.modules_for(Op::Unload), vec!["engine", "data"]);
}

#[tokio::test]
async fn test_state_errors() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);

    assert!(matches!(
        registry.start_module("ghost").await,
        Err(ModuleError::ModuleNotFound(_))
    ));
    assert!(matches!(
        registry.unload_module("ghost").await,
        Err(ModuleError::ModuleNotFound(_))
    ));

    registry.load_with_interpreter(module("core", &[], &[])).await.unwrap();
    assert!(matches!(
        registry.stop_module("core").await,
        Err(ModuleError::NotRunning(_))
    ));

    registry.start_module("core").await.unwrap();
    assert!(matches!(
        registry.unload_module("core").await,
        Err(ModuleError::ModuleRunning(_))
    ));
    assert!(registry.contains("core"));
}

#[tokio::test]
async fn test_failed_load_leaves_module_unregistered() {
    let backend = RecordingBackend::new();
    backend.fail_on(Op::Load, "core");
    let mut registry = registry_with(&backend);

    let err = registry
        .load_with_interpreter(module("core", &[], &[]))
        .await
        .unwrap_err();

    assert!(matches!(err, ModuleError::InterpreterFailure { ref module, .. } if module == "core"));
    assert!(!registry.contains("core"));

    backend.heal(Op::Load, "core");
    registry.load_with_interpreter(module("core", &[], &[])).await.unwrap();
    assert!(registry.contains("core"));
}

#[tokio::test]
async fn test_failed_transitions_keep_previous_state() {
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);
    registry.load_with_interpreter(module("core", &[], &[])).await.unwrap();

    backend.fail_on(Op::Start, "core");
    assert!(registry.start_module("core").await.is_err());
    assert!(!registry.is_running("core"));

    backend.heal(Op::Start, "core");
    registry.start_module("core").await.unwrap();

    backend.fail_on(Op::Stop, "core");
    assert!(registry.stop_module("core").await.is_err());
    assert!(registry.is_running("core"));

    backend.heal(Op::Stop, "core");
    registry.stop_module("core").await.unwrap();

    backend.fail_on(Op::Unload, "core");
    assert!(registry.unload_module("core").await.is_err());
    assert!(registry.contains("core"));
}

#[tokio::test]
async fn test_backend_receives_module_config() {
    let fixture = ModuleTestFixture::new();
    let dir = fixture.write_module("core", &descriptor_json("core", &[], &[]));
    std::fs::write(dir.join("config.toml"), "[server]\nport = 8080\n").unwrap();

    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);
    registry.load_from_dir(&dir).await.unwrap();

    let config = backend.config_of("core").unwrap();
    assert_eq!(config.get("server.port").map(String::as_str), Some("8080"));
    assert_eq!(registry.get("core").unwrap().data_dir(), dir.as_path());
}

#[tokio::test]
async fn test_load_from_dir_rejects_bad_directories() {
    let fixture = ModuleTestFixture::new();
    let backend = RecordingBackend::new();
    let mut registry = registry_with(&backend);

    let missing = fixture.modules_dir.join("missing");
    assert!(matches!(
        registry.load_from_dir(&missing).await,
        Err(ModuleError::NotADirectory(_))
    ));

    let empty = fixture.modules_dir.join("empty");
    std::fs::create_dir_all(&empty).unwrap();
    assert!(matches!(
        registry.load_from_dir(&empty).await,
        Err(ModuleError::DescriptorNotFound(_))
    ));

    let bad = fixture.write_module("bad", &serde_json::json!({"name": "bad", "language": "test"}));
    match registry.load_from_dir(&bad).await {
        Err(ModuleError::InvalidDescriptor { field, .. }) => assert_eq!(field, "version"),
        other => panic!("expected InvalidDescriptor, got {:?}", other),
    }
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_unsupported_language() {
    let mut registry = ModuleRegistry::new();
    let err = registry
        .load_with_interpreter(module("core", &[], &[]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ModuleError::NoInterpreterRegistered { ref language, .. } if language == TEST_LANGUAGE
    ));
}
