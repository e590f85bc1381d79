//! Behaviour of the scripted engine the controller tests rely on.

use keel_migrator::{Connector, Engine, EngineError, SchemaVersion};
use keel_test_utils::{EngineCall, FakeConnector, FakeEngine};
use std::time::Duration;

#[tokio::test]
async fn test_fresh_engine_has_no_version() {
    let mut engine = FakeEngine::new();
    assert_eq!(engine.version().await.unwrap(), None);
}

#[tokio::test]
async fn test_migrate_up_and_down() {
    let mut engine = FakeEngine::new().with_migrations(5);
    let handle = engine.handle();

    engine.migrate_to(4).await.unwrap();
    assert_eq!(handle.version(), Some(4));
    assert_eq!(handle.steps_applied(), 4);

    engine.migrate_to(1).await.unwrap();
    assert_eq!(
        engine.version().await.unwrap(),
        Some(SchemaVersion::clean(1))
    );
    assert_eq!(handle.steps_applied(), 7);

    engine.migrate_to(0).await.unwrap();
    assert_eq!(handle.version(), None);
}

#[tokio::test]
async fn test_missing_migration() {
    let mut engine = FakeEngine::new().with_migrations(2);
    let err = engine.migrate_to(3).await.unwrap_err();
    assert!(matches!(err, EngineError::MissingMigration(3)));
}

#[tokio::test]
async fn test_force_clears_dirty() {
    let mut engine = FakeEngine::new().dirty_at(2);
    let handle = engine.handle();
    assert!(handle.is_dirty());

    engine.force(2).await.unwrap();
    assert!(!handle.is_dirty());
    assert_eq!(handle.calls(), vec![EngineCall::Force(2)]);

    engine.force(-1).await.unwrap();
    assert_eq!(handle.version(), None);
}

#[tokio::test]
async fn test_graceful_stop_between_steps() {
    let mut engine = FakeEngine::new()
        .with_migrations(10)
        .with_step_delay(Duration::from_millis(5));
    let handle = engine.handle();

    assert!(engine.graceful_stop().request());
    let err = engine.migrate_to(10).await.unwrap_err();
    assert!(matches!(err, EngineError::Stopped));
    assert_eq!(handle.version(), None);
}

#[tokio::test]
async fn test_second_close_reports_already_closed() {
    let mut engine = FakeEngine::new();
    let first = engine.close().await;
    assert!(first.source.is_none() && first.database.is_none());

    let second = engine.close().await;
    let err = second.database.unwrap();
    assert!(err.to_string().contains("connection is already closed"));
}

#[tokio::test]
async fn test_connector_refuses_then_connects() {
    let connector = FakeConnector::new(FakeEngine::new()).refusing(2);

    assert!(connector.open("file://m", "postgresql://x").await.is_err());
    assert!(connector.open("file://m", "postgresql://x").await.is_err());
    assert!(connector.open("file://m", "postgresql://x").await.is_ok());
    assert_eq!(connector.attempts().lock().unwrap().len(), 3);
}
