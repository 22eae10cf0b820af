//! 服务注册发现 Trait 定义

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::discovery::instance::ServiceInfo;
use crate::discovery::watch::WatchStream;
use crate::error::Result;

/// 服务注册发现 Trait
///
/// 实现方需要可在多个任务间共享（通常以 `Arc<dyn ServiceRegistry>` 注入），
/// 不存在全局单例
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// 注册服务实例
    ///
    /// 对同一个 `id` 幂等：重复注册会覆盖之前的内容，不会产生重复实例
    async fn register(&self, info: ServiceInfo) -> Result<()>;

    /// 注销服务实例
    ///
    /// 尽力而为，失败时实现方会记录日志并以 `MeshError::Deregistration` 返回，调用方不应视为致命错误
    async fn deregister(&self, service_id: &str) -> Result<()>;

    /// 发现服务（只返回当前健康的实例）
    ///
    /// 空列表是合法结果；注册中心不可达时返回 `MeshError::Discovery`
    async fn discover(&self, service_name: &str) -> Result<Vec<ServiceInfo>>;

    /// 持续监听服务变化
    ///
    /// 返回的流在后台任务中产生健康实例快照。`cancel` 被取消或流被丢弃后，
    /// 后台任务停止发起新的查询并关闭流。
    ///
    /// 后台任务运行在调用方所在的 tokio 运行时上；在运行时之外调用时返回一个已关闭的流
    fn watch(&self, service_name: &str, cancel: CancellationToken) -> WatchStream;

    /// 检查注册中心本身是否可达（与任何已注册服务的健康状态无关）
    async fn health(&self) -> Result<()>;
}
