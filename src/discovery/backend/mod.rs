//! 服务注册发现后端

pub mod consul;
pub mod memory;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::RegistryConfig;
use crate::discovery::registry::ServiceRegistry;
use crate::error::Result;

pub use consul::ConsulRegistry;
pub use memory::MemoryRegistry;

/// 后端类型
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Consul HTTP API
    #[default]
    Consul,
    /// 进程内注册中心（单体模式）
    Memory,
}

impl std::str::FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "consul" => Ok(BackendType::Consul),
            "memory" | "in-memory" | "local" => Ok(BackendType::Memory),
            _ => Err(format!("Unknown backend type: {}", s)),
        }
    }
}

/// 根据配置创建注册中心
///
/// Consul 后端会先确认 agent 可达
pub async fn create_registry(config: &RegistryConfig) -> Result<Arc<dyn ServiceRegistry>> {
    match config.backend {
        BackendType::Consul => Ok(Arc::new(ConsulRegistry::connect(config).await?)),
        BackendType::Memory => Ok(Arc::new(MemoryRegistry::new())),
    }
}
