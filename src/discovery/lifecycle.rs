//! 服务生命周期
//!
//! 启动时注册当前服务实例，优雅关闭时注销

use std::sync::Arc;
use tracing::{info, warn};

use crate::discovery::instance::ServiceInfo;
use crate::discovery::registry::ServiceRegistry;
use crate::error::Result;

/// 服务注册守卫
///
/// 应该在服务关闭前显式调用 [`RegistrationGuard::shutdown`]，而不是依赖 Drop
pub struct RegistrationGuard {
    registry: Arc<dyn ServiceRegistry>,
    info: ServiceInfo,
    registered: bool,
}

impl RegistrationGuard {
    /// 注册服务实例，注册失败时直接返回错误
    pub async fn register(registry: Arc<dyn ServiceRegistry>, info: ServiceInfo) -> Result<Self> {
        registry.register(info.clone()).await?;
        info!(service_id = %info.id, service_name = %info.name, "Service registered with registry");
        Ok(Self {
            registry,
            info,
            registered: true,
        })
    }

    pub fn info(&self) -> &ServiceInfo {
        &self.info
    }

    /// 注销服务
    ///
    /// 幂等；注销失败只记录日志并把错误作为值返回
    pub async fn shutdown(&mut self) -> Result<()> {
        if !self.registered {
            return Ok(());
        }
        self.registered = false;

        match self.registry.deregister(&self.info.id).await {
            Ok(()) => {
                info!(service_id = %self.info.id, "Service deregistered on shutdown");
                Ok(())
            }
            Err(e) => {
                warn!(service_id = %self.info.id, error = %e, "Failed to deregister service on shutdown");
                Err(e)
            }
        }
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if !self.registered {
            return;
        }

        // 没有显式 shutdown：runtime 仍可用时尽力注销
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let registry = self.registry.clone();
                let service_id = self.info.id.clone();
                handle.spawn(async move {
                    if let Err(e) = registry.deregister(&service_id).await {
                        warn!(service_id = %service_id, error = %e, "Failed to deregister service (from Drop)");
                    }
                });
            }
            Err(_) => {
                warn!(
                    service_id = %self.info.id,
                    "Cannot deregister service: tokio runtime not available"
                );
            }
        }
    }
}
