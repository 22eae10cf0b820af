//! gRPC 连接器
//!
//! 负责把一个已解析的实例地址变成可复用的 RPC 通道；报文编码由 tonic 负责

use async_trait::async_trait;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

use crate::config::PoolConfig;
use crate::discovery::ServiceInfo;

/// 连接器错误
pub type ConnectError = Box<dyn std::error::Error + Send + Sync>;

/// 连接器 trait
///
/// 连接池通过它建立通道，测试中可以替换为计数的假连接器
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// 通道类型，需要能廉价克隆并在任务间共享
    type Channel: Clone + Send + Sync + 'static;

    async fn connect(&self, instance: &ServiceInfo) -> Result<Self::Channel, ConnectError>;
}

/// 连接器配置
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
        }
    }
}

impl From<&PoolConfig> for ConnectorConfig {
    fn from(config: &PoolConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

/// 基于 tonic 的 gRPC 连接器（明文 HTTP/2）
#[derive(Debug, Clone, Default)]
pub struct GrpcConnector {
    config: ConnectorConfig,
}

impl GrpcConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self { config }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for GrpcConnector {
    type Channel = Channel;

    async fn connect(&self, instance: &ServiceInfo) -> Result<Channel, ConnectError> {
        let endpoint = Endpoint::from_shared(instance.to_grpc_uri())
            .map_err(|e| format!("Invalid address: {}", e))?
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.timeout);

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| format!("Failed to connect: {}", e))?;

        Ok(channel)
    }
}
