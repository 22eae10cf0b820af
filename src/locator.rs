//! 服务定位器
//!
//! 对固定的一组平台服务提供类型化的地址查询。实际地址总是来自注册中心，
//! 目录中的默认端口只是约定，不会用来拼接地址

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::discovery::{InstanceSelector, SelectionStrategy, ServiceRegistry};
use crate::error::{MeshError, Result};

/// 未知服务名使用的默认端口
pub const FALLBACK_PORT: u16 = 8080;

/// 平台内置服务目录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WellKnownService {
    ApiGateway,
    Upload,
    Transcoder,
    Streaming,
    Metadata,
    Cache,
    Auth,
    Worker,
    Monitor,
}

impl WellKnownService {
    pub const ALL: [WellKnownService; 9] = [
        WellKnownService::ApiGateway,
        WellKnownService::Upload,
        WellKnownService::Transcoder,
        WellKnownService::Streaming,
        WellKnownService::Metadata,
        WellKnownService::Cache,
        WellKnownService::Auth,
        WellKnownService::Worker,
        WellKnownService::Monitor,
    ];

    /// 注册中心里的逻辑服务名
    pub fn name(&self) -> &'static str {
        match self {
            WellKnownService::ApiGateway => "api-gateway",
            WellKnownService::Upload => "upload",
            WellKnownService::Transcoder => "transcoder",
            WellKnownService::Streaming => "streaming",
            WellKnownService::Metadata => "metadata",
            WellKnownService::Cache => "cache",
            WellKnownService::Auth => "auth",
            WellKnownService::Worker => "worker",
            WellKnownService::Monitor => "monitor",
        }
    }

    /// 约定的默认端口
    pub fn default_port(&self) -> u16 {
        match self {
            WellKnownService::ApiGateway => 9090,
            WellKnownService::Upload => 9091,
            WellKnownService::Transcoder => 9092,
            WellKnownService::Streaming => 9093,
            WellKnownService::Metadata => 9005,
            WellKnownService::Cache => 9006,
            WellKnownService::Auth => 9007,
            WellKnownService::Worker => 9008,
            WellKnownService::Monitor => 9009,
        }
    }
}

impl fmt::Display for WellKnownService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WellKnownService {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self> {
        WellKnownService::ALL
            .into_iter()
            .find(|svc| svc.name() == s)
            .ok_or_else(|| MeshError::config(format!("unknown well-known service: {}", s)))
    }
}

/// 按服务名查询默认端口，未知服务返回 [`FALLBACK_PORT`]
pub fn default_port_for(service_name: &str) -> u16 {
    service_name
        .parse::<WellKnownService>()
        .map(|svc| svc.default_port())
        .unwrap_or(FALLBACK_PORT)
}

/// 服务定位器
pub struct ServiceLocator {
    registry: Arc<dyn ServiceRegistry>,
    selector: InstanceSelector,
}

impl ServiceLocator {
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        Self::with_strategy(registry, SelectionStrategy::First)
    }

    pub fn with_strategy(registry: Arc<dyn ServiceRegistry>, strategy: SelectionStrategy) -> Self {
        Self {
            registry,
            selector: InstanceSelector::new(strategy),
        }
    }

    pub async fn get_api_gateway_service(&self) -> Result<String> {
        self.get(WellKnownService::ApiGateway).await
    }

    pub async fn get_upload_service(&self) -> Result<String> {
        self.get(WellKnownService::Upload).await
    }

    pub async fn get_transcoder_service(&self) -> Result<String> {
        self.get(WellKnownService::Transcoder).await
    }

    pub async fn get_streaming_service(&self) -> Result<String> {
        self.get(WellKnownService::Streaming).await
    }

    pub async fn get_metadata_service(&self) -> Result<String> {
        self.get(WellKnownService::Metadata).await
    }

    pub async fn get_cache_service(&self) -> Result<String> {
        self.get(WellKnownService::Cache).await
    }

    pub async fn get_auth_service(&self) -> Result<String> {
        self.get(WellKnownService::Auth).await
    }

    pub async fn get_worker_service(&self) -> Result<String> {
        self.get(WellKnownService::Worker).await
    }

    pub async fn get_monitor_service(&self) -> Result<String> {
        self.get(WellKnownService::Monitor).await
    }

    /// 查询目录中某个服务的地址
    pub async fn get(&self, service: WellKnownService) -> Result<String> {
        self.get_service_address(service.name()).await
    }

    /// 解析服务名为 `host:port`，按选择策略挑一个健康实例
    pub async fn get_service_address(&self, service_name: &str) -> Result<String> {
        let instances = self.registry.discover(service_name).await?;
        let instance = self
            .selector
            .select(service_name, &instances)
            .ok_or_else(|| MeshError::unavailable(service_name))?;
        let address = instance.host_port();
        debug!(service_name = %service_name, address = %address, "Resolved service address");
        Ok(address)
    }

    /// 返回所有健康实例的地址，没有实例时返回空列表
    pub async fn get_all_service_addresses(&self, service_name: &str) -> Result<Vec<String>> {
        let instances = self.registry.discover(service_name).await?;
        Ok(instances.iter().map(|i| i.host_port()).collect())
    }
}
