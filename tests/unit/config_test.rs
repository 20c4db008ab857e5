//! Tests for configuration loading and validation

use std::collections::HashMap;
use std::net::SocketAddr;

use backpressure_engine::config::{AdmissionMode, AppConfig, ConfigError, EngineConfig};
use backpressure_engine::util::LogFormat;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn test_engine_config_defaults_validate() {
    let config = EngineConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.queue_capacity, 100);
    assert_eq!(config.max_retry_attempts, 3);
    assert_eq!(config.admission_mode, AdmissionMode::Enqueue);
    assert_eq!(
        config.effective_max_in_flight(),
        config.queue_capacity + config.pool_size
    );
}

#[test]
fn test_engine_config_invalid_values() {
    let cases = [
        EngineConfig { queue_capacity: 0, ..EngineConfig::default() },
        EngineConfig { pool_size: 0, ..EngineConfig::default() },
        EngineConfig { max_retry_attempts: 0, ..EngineConfig::default() },
        EngineConfig { retry_multiplier: 0.5, ..EngineConfig::default() },
        EngineConfig { retry_jitter: 1.5, ..EngineConfig::default() },
        EngineConfig { breaker_failure_threshold: 0, ..EngineConfig::default() },
        EngineConfig { call_timeout_ms: 0, ..EngineConfig::default() },
        EngineConfig {
            pool_size: 4,
            max_in_flight: Some(2),
            ..EngineConfig::default()
        },
        EngineConfig {
            retry_after_min_ms: 10_000,
            retry_after_max_ms: 1_000,
            ..EngineConfig::default()
        },
    ];
    for config in cases {
        assert!(
            matches!(config.validate(), Err(ConfigError::Invalid(_))),
            "accepted {config:?}"
        );
    }
}

#[test]
fn test_toml_config() {
    let config = AppConfig::from_toml_str(
        r#"
        [server]
        bind = "127.0.0.1:9000"
        log_format = "json"

        [engine]
        queue_capacity = 5
        pool_size = 2
        admission_mode = "wait"
        breaker_failure_rate = 0.5
        "#,
    )
    .unwrap();
    assert_eq!(config.server.bind, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
    assert_eq!(config.server.log_format, LogFormat::Json);
    assert_eq!(config.engine.queue_capacity, 5);
    assert_eq!(config.engine.pool_size, 2);
    assert_eq!(config.engine.admission_mode, AdmissionMode::Wait);
    assert_eq!(config.engine.breaker_config().failure_rate, Some(0.5));
    // Unset keys keep their defaults.
    assert_eq!(config.engine.max_retry_attempts, 3);
}

#[test]
fn test_json_config_is_validated() {
    let err = AppConfig::from_json_str(r#"{"engine": {"queue_capacity": 0}}"#).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(matches!(
        AppConfig::from_json_str("{not json"),
        Err(ConfigError::Json(_))
    ));
}

#[test]
fn test_env_overrides() {
    let mut config = AppConfig::default();
    config
        .apply_env_overrides(env(&[
            ("ENGINE_BIND", "127.0.0.1:7000"),
            ("ENGINE_QUEUE_CAPACITY", "42"),
            ("ENGINE_POOL_SIZE", "3"),
            ("ENGINE_ADMISSION_MODE", "wait"),
            ("DEMO_MODE", "false"),
            ("ENGINE_DOWNSTREAM_URL", "http://localhost:9100/process"),
        ]))
        .unwrap();
    assert_eq!(config.server.bind.port(), 7000);
    assert_eq!(config.engine.queue_capacity, 42);
    assert_eq!(config.engine.pool_size, 3);
    assert_eq!(config.engine.admission_mode, AdmissionMode::Wait);
    assert!(!config.engine.demo_mode);
    assert_eq!(
        config.engine.downstream_url.as_deref(),
        Some("http://localhost:9100/process")
    );
    assert!(config.validate().is_ok());
}

#[test]
fn test_env_override_rejects_garbage() {
    let mut config = AppConfig::default();
    let err = config
        .apply_env_overrides(env(&[("ENGINE_POOL_SIZE", "lots")]))
        .unwrap_err();
    match err {
        ConfigError::Env { key, value } => {
            assert_eq!(key, "ENGINE_POOL_SIZE");
            assert_eq!(value, "lots");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_real_downstream_needs_url() {
    let config = EngineConfig {
        demo_mode: false,
        ..EngineConfig::default()
    };
    assert!(config.validate().is_err());
}
