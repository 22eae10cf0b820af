//! 配置加载测试

use meshgate_core::discovery::{BackendType, SelectionStrategy};
use meshgate_core::error::ErrorCode;
use meshgate_core::{Config, LogConfig, MeshError, init_tracing};
use std::io::Write;
use std::time::Duration;

#[test]
fn test_defaults() {
    let config = Config::from_toml_str("").unwrap();

    assert_eq!(config.registry.backend, BackendType::Consul);
    assert_eq!(config.registry.address, "http://127.0.0.1:8500");
    assert_eq!(config.registry.request_timeout(), Duration::from_secs(10));
    assert_eq!(config.registry.watch_wait(), Duration::from_secs(300));
    assert_eq!(
        config.registry.watch_backoff(),
        (Duration::from_secs(1), Duration::from_secs(30))
    );
    assert_eq!(config.pool.connect_timeout_secs, 5);
    assert_eq!(config.pool.request_timeout_secs, 30);
    assert_eq!(config.pool.selection, SelectionStrategy::First);
    assert_eq!(config.breaker.max_failures, 5);
    assert_eq!(config.breaker.cool_down(), Duration::from_secs(30));
    assert_eq!(config.log.level, "info");
    assert_eq!(config.log.format, "pretty");
}

#[test]
fn test_parse_full_config() {
    let config = Config::from_toml_str(
        r#"
        [registry]
        backend = "memory"
        address = "http://consul.internal:8500"
        datacenter = "dc2"
        token = "secret"
        watch_wait_secs = 60

        [pool]
        selection = "round_robin"
        connect_timeout_secs = 2

        [breaker]
        max_failures = 3
        cool_down_ms = 500

        [log]
        level = "debug"
        format = "json"
        "#,
    )
    .unwrap();

    assert_eq!(config.registry.backend, BackendType::Memory);
    assert_eq!(config.registry.address, "http://consul.internal:8500");
    assert_eq!(config.registry.datacenter.as_deref(), Some("dc2"));
    assert_eq!(config.registry.token.as_deref(), Some("secret"));
    assert_eq!(config.registry.watch_wait_secs, 60);
    assert_eq!(config.pool.selection, SelectionStrategy::RoundRobin);
    assert_eq!(config.pool.connect_timeout_secs, 2);
    assert_eq!(config.pool.request_timeout_secs, 30);
    assert_eq!(config.breaker.max_failures, 3);
    assert_eq!(config.breaker.cool_down(), Duration::from_millis(500));
    assert_eq!(config.log.format, "json");
}

#[test]
fn test_validation_errors() {
    let cases = [
        "[registry]\naddress = \"\"",
        "[breaker]\nmax_failures = 0",
        "[registry]\nwatch_backoff_initial_ms = 5000\nwatch_backoff_max_ms = 100",
        "[registry]\nbackend = \"zookeeper\"",
    ];
    for content in cases {
        let err = Config::from_toml_str(content).unwrap_err();
        assert!(matches!(err, MeshError::Config(_)), "{}", content);
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
    }
}

#[test]
fn test_env_overrides() {
    let path = std::env::temp_dir().join(format!("meshgate-config-{}.toml", uuid::Uuid::new_v4()));
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "[breaker]\nmax_failures = 3").unwrap();

    // 只有本测试修改环境变量
    unsafe {
        std::env::set_var("CONSUL_HTTP_ADDR", "10.1.2.3:8500");
        std::env::set_var("MESH_BREAKER_COOLDOWN_SECS", "7");
    }
    let result = Config::load_from_file(path.to_str().unwrap());
    unsafe {
        std::env::remove_var("CONSUL_HTTP_ADDR");
        std::env::remove_var("MESH_BREAKER_COOLDOWN_SECS");
    }
    std::fs::remove_file(&path).unwrap();

    let config = result.unwrap();
    assert_eq!(config.registry.address, "http://10.1.2.3:8500");
    assert_eq!(config.breaker.max_failures, 3);
    assert_eq!(config.breaker.cool_down(), Duration::from_secs(7));

    // 超出范围的数值返回配置错误，不截断也不溢出
    let mut config = Config::default();
    unsafe { std::env::set_var("MESH_BREAKER_MAX_FAILURES", "4294967297") };
    let result = config.apply_env_overrides();
    unsafe { std::env::remove_var("MESH_BREAKER_MAX_FAILURES") };
    assert!(matches!(result, Err(MeshError::Config(_))));
    assert_eq!(config.breaker.max_failures, 5);

    unsafe { std::env::set_var("MESH_BREAKER_COOLDOWN_SECS", "18446744073709552") };
    let result = config.apply_env_overrides();
    unsafe { std::env::remove_var("MESH_BREAKER_COOLDOWN_SECS") };
    assert!(matches!(result, Err(MeshError::Config(_))));
    assert_eq!(config.breaker.cool_down(), Duration::from_secs(30));
}

#[test]
fn test_missing_file() {
    let err = Config::load_from_file("/nonexistent/meshgate.toml").unwrap_err();
    assert!(matches!(err, MeshError::Config(_)));
}

#[test]
fn test_init_tracing_rejects_unknown_format() {
    let config = LogConfig {
        level: "info".to_string(),
        format: "xml".to_string(),
    };
    assert!(init_tracing(&config).is_err());

    let config = LogConfig::default();
    init_tracing(&config).unwrap();
    // 第二次安装只返回错误
    assert!(init_tracing(&config).is_err());
}
