//! Meshgate Core Library
//!
//! 服务间调用的弹性层：服务注册与发现、连接池、熔断器以及内置服务定位器。

pub mod breaker;
pub mod config;
pub mod discovery;
pub mod error;
pub mod locator;
pub mod pool;
pub mod telemetry;

// Re-exports
pub use breaker::{BreakerError, BreakerStats, CircuitBreaker, CircuitBreakerManager, CircuitState};
pub use config::{BreakerConfig, Config, LogConfig, PoolConfig, RegistryConfig};
pub use discovery::{
    BackendType, ConsulRegistry, HealthCheck, InstanceSelector, MemoryRegistry,
    RegistrationGuard, SelectionStrategy, ServiceInfo, ServiceRegistry, WatchStream,
    create_registry,
};
pub use error::{ErrorCategory, ErrorCode, MeshError, MeshResultExt, Result};
pub use locator::{ServiceLocator, WellKnownService, default_port_for};
pub use pool::{ConnectionPool, Connector, GrpcConnector, PooledConnection};
pub use telemetry::init_tracing;
