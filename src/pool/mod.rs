//! 连接池
//!
//! 按逻辑服务名缓存一个可复用的 RPC 通道。第一次调用时通过注册中心解析地址并建立连接，
//! 之后的调用直接返回缓存的通道，不再解析也不再拨号。
//!
//! 取得或创建是一个原子步骤：同名的并发首次调用只会拨号一次。
//! 连接池自身不做重试或退避

pub mod connector;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::discovery::{InstanceSelector, SelectionStrategy, ServiceInfo, ServiceRegistry};
use crate::error::{MeshError, Result};

pub use connector::{ConnectError, Connector, ConnectorConfig, GrpcConnector};

/// 缓存中的连接
#[derive(Debug, Clone)]
pub struct PooledConnection<T> {
    pub service_name: String,
    /// 建立连接时选中的实例
    pub instance: ServiceInfo,
    pub channel: T,
    pub created_at: DateTime<Utc>,
}

type Slot<T> = Arc<OnceCell<PooledConnection<T>>>;

/// 连接池
pub struct ConnectionPool<C: Connector = GrpcConnector> {
    registry: Arc<dyn ServiceRegistry>,
    connector: C,
    selector: InstanceSelector,
    connections: DashMap<String, Slot<C::Channel>>,
}

impl ConnectionPool<GrpcConnector> {
    /// 使用 tonic gRPC 连接器创建连接池
    pub fn grpc(registry: Arc<dyn ServiceRegistry>, config: &PoolConfig) -> Self {
        Self::with_strategy(
            registry,
            GrpcConnector::new(ConnectorConfig::from(config)),
            config.selection,
        )
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(registry: Arc<dyn ServiceRegistry>, connector: C) -> Self {
        Self::with_strategy(registry, connector, SelectionStrategy::First)
    }

    pub fn with_strategy(
        registry: Arc<dyn ServiceRegistry>,
        connector: C,
        strategy: SelectionStrategy,
    ) -> Self {
        Self {
            registry,
            connector,
            selector: InstanceSelector::new(strategy),
            connections: DashMap::new(),
        }
    }

    /// 获取到某个服务的通道，不存在时解析并建立
    ///
    /// - 没有健康实例：`MeshError::ServiceUnavailable`
    /// - 注册中心不可达：`MeshError::Discovery`
    /// - 地址已解析但无法连接：`MeshError::Connection`
    pub async fn get_connection(&self, service_name: &str) -> Result<C::Channel> {
        Ok(self.get_pooled(service_name).await?.channel)
    }

    /// 与 [`get_connection`](Self::get_connection) 相同，但同时返回选中的实例信息
    pub async fn get_pooled(&self, service_name: &str) -> Result<PooledConnection<C::Channel>> {
        // entry() 持有分片锁，保证同名只会插入一个槽位
        let slot = self
            .connections
            .entry(service_name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        // 同一槽位的并发调用在这里排队，只有一个会执行拨号
        let conn = slot.get_or_try_init(|| self.dial(service_name)).await?;
        Ok(conn.clone())
    }

    async fn dial(&self, service_name: &str) -> Result<PooledConnection<C::Channel>> {
        let instances = self.registry.discover(service_name).await?;
        let instance = self
            .selector
            .select(service_name, &instances)
            .ok_or_else(|| {
                warn!(service_name = %service_name, "No healthy instance available");
                MeshError::unavailable(service_name)
            })?
            .clone();

        let address = instance.host_port();
        let channel = self.connector.connect(&instance).await.map_err(|e| {
            warn!(service_name = %service_name, address = %address, error = %e, "Failed to dial service");
            MeshError::connection(service_name, &address, e)
        })?;

        info!(service_name = %service_name, address = %address, "Created gRPC connection");

        Ok(PooledConnection {
            service_name: service_name.to_string(),
            instance,
            channel,
            created_at: Utc::now(),
        })
    }

    /// 移除某个服务的缓存通道，下次调用会重新解析并拨号
    pub fn evict(&self, service_name: &str) -> bool {
        let removed = self.connections.remove(service_name).is_some();
        if removed {
            debug!(service_name = %service_name, "Evicted pooled connection");
        }
        removed
    }

    /// 已建立的连接快照
    pub fn connections(&self) -> Vec<PooledConnection<C::Channel>> {
        self.connections
            .iter()
            .filter_map(|slot| slot.value().get().cloned())
            .collect()
    }

    /// 已建立连接的数量
    pub fn len(&self) -> usize {
        self.connections
            .iter()
            .filter(|slot| slot.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 释放所有缓存的通道
    ///
    /// 幂等，从未建立过连接时调用也是安全的。通道在最后一个克隆被丢弃时关闭
    pub fn close(&self) {
        let count = self.len();
        self.connections.clear();
        info!(count, "Closed all gRPC connections");
    }
}
