//! Consul 后端测试
//!
//! 大部分测试使用 httpmock 模拟 Consul HTTP API。
//! 真实 Consul 的测试默认被忽略，需要使用 `cargo test --test consul_registry_test -- --ignored` 运行。
//!
//! 启动 Consul：
//! ```bash
//! docker run -d --name consul-test -p 8500:8500 hashicorp/consul:1.17 agent -dev -client=0.0.0.0
//! ```

use httpmock::prelude::*;
use meshgate_core::discovery::{ConsulRegistry, HealthCheck, ServiceInfo, ServiceRegistry};
use meshgate_core::{MeshError, RegistryConfig};
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn config_for(server: &MockServer) -> RegistryConfig {
    RegistryConfig {
        address: server.base_url(),
        watch_wait_secs: 1,
        watch_backoff_initial_ms: 10,
        watch_backoff_max_ms: 50,
        ..Default::default()
    }
}

fn health_entry(id: &str, address: &str, port: u16) -> serde_json::Value {
    json!({
        "Node": { "Node": "node-1", "Address": "10.0.0.1" },
        "Service": {
            "ID": id,
            "Service": "upload",
            "Address": address,
            "Port": port,
            "Tags": ["v1"],
            "Meta": { "region": "local" }
        },
        "Checks": []
    })
}

#[tokio::test]
async fn test_register_sends_consul_payload() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(Method::PUT)
                .path("/v1/agent/service/register")
                .header("x-consul-token", "secret")
                .json_body(json!({
                    "ID": "upload-1",
                    "Name": "upload",
                    "Address": "127.0.0.1",
                    "Port": 9091,
                    "Tags": ["v1"],
                    "Meta": { "region": "local" },
                    "Check": {
                        "HTTP": "http://127.0.0.1:9091/health",
                        "Interval": "10s",
                        "Timeout": "5s"
                    }
                }));
            then.status(200);
        })
        .await;

    let config = RegistryConfig {
        token: Some("secret".to_string()),
        ..config_for(&server)
    };
    let registry = ConsulRegistry::new(&config).unwrap();
    let info = ServiceInfo::new("upload-1", "upload", "127.0.0.1", 9091)
        .with_tag("v1")
        .with_metadata("region", "local")
        .with_health_check(HealthCheck::http("127.0.0.1", 9091));

    registry.register(info).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_register_rejected_returns_registration_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(Method::PUT).path("/v1/agent/service/register");
            then.status(400).body("Invalid check");
        })
        .await;

    let registry = ConsulRegistry::new(&config_for(&server)).unwrap();
    let err = registry
        .register(ServiceInfo::new("upload-1", "upload", "127.0.0.1", 9091))
        .await
        .unwrap_err();
    match err {
        MeshError::Registration { service_id, reason } => {
            assert_eq!(service_id, "upload-1");
            assert!(reason.contains("Invalid check"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_discover_parses_healthy_instances() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(Method::GET)
                .path("/v1/health/service/upload")
                .query_param("passing", "true");
            then.status(200)
                .header("X-Consul-Index", "42")
                .json_body(json!([
                    health_entry("upload-1", "192.168.1.10", 9091),
                    health_entry("upload-2", "", 19091),
                ]));
        })
        .await;

    let registry = ConsulRegistry::new(&config_for(&server)).unwrap();
    let found = registry.discover("upload").await.unwrap();
    mock.assert_async().await;

    assert_eq!(found.len(), 2);
    assert_eq!(found[0].id, "upload-1");
    assert_eq!(found[0].host_port(), "192.168.1.10:9091");
    assert!(found[0].tags.contains("v1"));
    assert_eq!(found[0].metadata.get("region").map(String::as_str), Some("local"));
    // 服务没有地址时回退到节点地址
    assert_eq!(found[1].host_port(), "10.0.0.1:19091");
}

#[tokio::test]
async fn test_discover_empty_and_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(Method::GET).path("/v1/health/service/metadata");
            then.status(200).json_body(json!([]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(Method::GET).path("/v1/health/service/broken");
            then.status(500).body("rpc error");
        })
        .await;

    let registry = ConsulRegistry::new(&config_for(&server)).unwrap();
    assert!(registry.discover("metadata").await.unwrap().is_empty());

    let err = registry.discover("broken").await.unwrap_err();
    assert!(matches!(err, MeshError::Discovery { ref service_name, .. } if service_name == "broken"));
}

#[tokio::test]
async fn test_discover_unreachable_backend() {
    let config = RegistryConfig {
        address: "http://127.0.0.1:1".to_string(),
        request_timeout_secs: 2,
        ..Default::default()
    };
    let registry = ConsulRegistry::new(&config).unwrap();
    let err = registry.discover("upload").await.unwrap_err();
    assert!(matches!(err, MeshError::Discovery { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_deregister() {
    let server = MockServer::start_async().await;
    let ok = server
        .mock_async(|when, then| {
            when.method(Method::PUT)
                .path("/v1/agent/service/deregister/upload-1");
            then.status(200);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(Method::PUT)
                .path("/v1/agent/service/deregister/missing");
            then.status(404).body("Unknown service ID");
        })
        .await;

    let registry = ConsulRegistry::new(&config_for(&server)).unwrap();
    registry.deregister("upload-1").await.unwrap();
    ok.assert_async().await;

    let err = registry.deregister("missing").await.unwrap_err();
    assert!(matches!(err, MeshError::Deregistration { .. }));
}

#[tokio::test]
async fn test_health_checks_leader() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(Method::GET).path("/v1/status/leader");
            then.status(200).json_body(json!("10.0.0.1:8300"));
        })
        .await;

    let registry = ConsulRegistry::connect(&config_for(&server)).await.unwrap();
    assert_eq!(registry.base_url(), server.base_url());
}

#[tokio::test]
async fn test_health_without_leader_fails() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(Method::GET).path("/v1/status/leader");
            then.status(200).json_body(json!(""));
        })
        .await;

    let registry = ConsulRegistry::new(&config_for(&server)).unwrap();
    assert!(registry.health().await.is_err());
    assert!(ConsulRegistry::connect(&config_for(&server)).await.is_err());
}

#[tokio::test]
async fn test_watch_emits_on_index_change_and_stops_on_cancel() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(Method::GET)
                .path("/v1/health/service/upload")
                .query_param("index", "0");
            then.status(200)
                .header("X-Consul-Index", "5")
                .json_body(json!([health_entry("upload-1", "127.0.0.1", 9091)]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(Method::GET)
                .path("/v1/health/service/upload")
                .query_param("index", "5");
            then.status(200)
                .header("X-Consul-Index", "6")
                .json_body(json!([
                    health_entry("upload-1", "127.0.0.1", 9091),
                    health_entry("upload-2", "127.0.0.1", 19091),
                ]));
        })
        .await;
    // 没有变化：阻塞直到超时
    server
        .mock_async(|when, then| {
            when.method(Method::GET)
                .path("/v1/health/service/upload")
                .query_param("index", "6");
            then.status(200)
                .header("X-Consul-Index", "6")
                .delay(Duration::from_millis(300))
                .json_body(json!([
                    health_entry("upload-1", "127.0.0.1", 9091),
                    health_entry("upload-2", "127.0.0.1", 19091),
                ]));
        })
        .await;

    let registry = ConsulRegistry::new(&config_for(&server)).unwrap();
    let cancel = CancellationToken::new();
    let mut stream = registry.watch("upload", cancel.clone());

    let first = timeout(Duration::from_secs(2), stream.recv()).await.unwrap().unwrap();
    assert_eq!(first.len(), 1);
    let second = timeout(Duration::from_secs(2), stream.recv()).await.unwrap().unwrap();
    assert_eq!(second.len(), 2);

    // 索引不变的响应不会产生快照
    assert!(timeout(Duration::from_millis(800), stream.recv()).await.is_err());

    cancel.cancel();
    let closed = timeout(Duration::from_secs(1), stream.recv()).await.unwrap();
    assert!(closed.is_none());
}

#[tokio::test]
async fn test_watch_keeps_retrying_after_errors() {
    let server = MockServer::start_async().await;
    let mut failing = server
        .mock_async(|when, then| {
            when.method(Method::GET).path("/v1/health/service/upload");
            then.status(500).body("no cluster leader");
        })
        .await;

    let registry = ConsulRegistry::new(&config_for(&server)).unwrap();
    let mut stream = registry.watch("upload", CancellationToken::new());
    assert!(timeout(Duration::from_millis(200), stream.recv()).await.is_err());

    failing.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(Method::GET).path("/v1/health/service/upload");
            then.status(200)
                .header("X-Consul-Index", "3")
                .json_body(json!([health_entry("upload-1", "127.0.0.1", 9091)]));
        })
        .await;

    let snapshot = timeout(Duration::from_secs(2), stream.recv()).await.unwrap().unwrap();
    assert_eq!(snapshot[0].id, "upload-1");
}

#[tokio::test]
async fn test_watch_skips_index_bump_without_instance_change() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(Method::GET)
                .path("/v1/health/service/upload")
                .query_param("index", "0");
            then.status(200)
                .header("X-Consul-Index", "5")
                .json_body(json!([health_entry("upload-1", "127.0.0.1", 9091)]));
        })
        .await;
    // 只有健康检查输出变化：索引前进，实例列表相同
    let bumped = server
        .mock_async(|when, then| {
            when.method(Method::GET)
                .path("/v1/health/service/upload")
                .query_param("index", "5");
            then.status(200)
                .header("X-Consul-Index", "6")
                .json_body(json!([health_entry("upload-1", "127.0.0.1", 9091)]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(Method::GET)
                .path("/v1/health/service/upload")
                .query_param("index", "6");
            then.status(200)
                .header("X-Consul-Index", "6")
                .delay(Duration::from_millis(300))
                .json_body(json!([health_entry("upload-1", "127.0.0.1", 9091)]));
        })
        .await;

    let registry = ConsulRegistry::new(&config_for(&server)).unwrap();
    let mut stream = registry.watch("upload", CancellationToken::new());

    let first = timeout(Duration::from_secs(2), stream.recv()).await.unwrap().unwrap();
    assert_eq!(first[0].id, "upload-1");

    assert!(timeout(Duration::from_millis(800), stream.recv()).await.is_err());
    assert!(bumped.calls_async().await >= 1);
}

#[tokio::test]
async fn test_service_name_is_escaped_in_path() {
    let server = MockServer::start_async().await;
    let injected = server
        .mock_async(|when, then| {
            when.method(Method::GET)
                .path("/v1/health/service/upload")
                .query_param("passing", "false");
            then.status(200)
                .json_body(json!([health_entry("upload-1", "127.0.0.1", 9091)]));
        })
        .await;
    let deregister = server
        .mock_async(|when, then| {
            when.method(Method::PUT)
                .path("/v1/agent/service/deregister/upload-1");
            then.status(200);
        })
        .await;

    let registry = ConsulRegistry::new(&config_for(&server)).unwrap();
    let err = registry
        .discover("upload?passing=false&x=")
        .await
        .unwrap_err();
    assert!(matches!(err, MeshError::Discovery { .. }));

    assert!(registry.deregister("upload-1/../other").await.is_err());
    assert!(registry.deregister("upload-1?x=").await.is_err());

    assert_eq!(injected.calls_async().await, 0);
    assert_eq!(deregister.calls_async().await, 0);
}

#[test]
fn test_invalid_address_is_config_error() {
    let config = RegistryConfig {
        address: "not a url".to_string(),
        ..Default::default()
    };
    assert!(matches!(ConsulRegistry::new(&config), Err(MeshError::Config(_))));
}

#[test]
fn test_watch_outside_runtime_returns_closed_stream() {
    let registry = ConsulRegistry::new(&RegistryConfig::default()).unwrap();
    let mut stream = registry.watch("upload", CancellationToken::new());

    assert!(stream.is_cancelled());
    assert!(futures::executor::block_on(stream.recv()).is_none());
}

fn live_config() -> RegistryConfig {
    let mut config = RegistryConfig::default();
    if let Ok(addr) = std::env::var("CONSUL_HTTP_ADDR") {
        config.address = addr;
    }
    config
}

#[tokio::test]
#[ignore]
async fn test_live_consul_register_discover_deregister() {
    let registry = ConsulRegistry::connect(&live_config()).await.unwrap();
    let info = ServiceInfo::with_generated_id("meshgate-live-test", "127.0.0.1", 19999);
    let id = info.id.clone();

    registry.register(info).await.unwrap();
    let found = registry.discover("meshgate-live-test").await.unwrap();
    assert!(found.iter().any(|s| s.id == id));

    registry.deregister(&id).await.unwrap();
    let found = registry.discover("meshgate-live-test").await.unwrap();
    assert!(found.iter().all(|s| s.id != id));
}
