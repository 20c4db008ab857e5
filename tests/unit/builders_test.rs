//! Tests for builder modules

use backpressure_engine::builders::EngineBuilder;
use backpressure_engine::config::EngineConfig;
use backpressure_engine::core::EngineError;

#[test]
fn test_engine_builder_keeps_config() {
    let config = EngineConfig {
        queue_capacity: 7,
        pool_size: 3,
        ..EngineConfig::default()
    };
    let builder = EngineBuilder::new(config.clone());
    assert_eq!(builder.config(), &config);
}

#[test]
fn test_demo_mode_selects_simulator() {
    let config = EngineConfig::default();
    assert!(config.demo_mode);
    assert!(EngineBuilder::configured_backend(&config).is_ok());
}

#[test]
fn test_http_backend_requires_url() {
    let config = EngineConfig {
        demo_mode: false,
        downstream_url: None,
        ..EngineConfig::default()
    };
    assert!(matches!(
        EngineBuilder::configured_backend(&config),
        Err(EngineError::Backend(_))
    ));

    let config = EngineConfig {
        downstream_url: Some("http://127.0.0.1:9/process".to_string()),
        ..config
    };
    assert!(EngineBuilder::configured_backend(&config).is_ok());
}

#[tokio::test]
async fn test_build_rejects_invalid_config() {
    let config = EngineConfig {
        pool_size: 0,
        ..EngineConfig::default()
    };
    assert!(matches!(
        EngineBuilder::new(config).build(),
        Err(EngineError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_build_starts_engine() {
    let config = EngineConfig {
        queue_capacity: 4,
        pool_size: 2,
        ..EngineConfig::default()
    };
    let engine = EngineBuilder::new(config).build().expect("engine");
    let stats = engine.stats();
    assert_eq!(stats.queue_capacity, 4);
    assert_eq!(stats.max_in_flight, 6);
    assert_eq!(stats.pool.worker_count, 2);
    engine.shutdown().await;
}
