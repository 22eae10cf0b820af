//! 服务注册与发现
//!
//! 注册中心以 `Arc<dyn ServiceRegistry>` 显式注入到连接池与定位器中

pub mod backend;
pub mod instance;
pub mod lifecycle;
pub mod registry;
pub mod selector;
pub mod watch;

pub use backend::{BackendType, ConsulRegistry, MemoryRegistry, create_registry};
pub use instance::{HealthCheck, ServiceInfo};
pub use lifecycle::RegistrationGuard;
pub use registry::ServiceRegistry;
pub use selector::{InstanceSelector, SelectionStrategy};
pub use watch::{Backoff, WatchSender, WatchStream};
