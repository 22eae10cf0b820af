//! Meshgate 统一错误类型

use super::code::ErrorCode;
use std::time::Duration;
use thiserror::Error;

/// 注册中心、连接池和熔断器共用的错误类型
///
/// 所有错误都以值的形式返回给调用方，本库不做任何自动重试
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// 注册失败（注册中心不可达或拒绝了注册内容）
    #[error("failed to register service {service_id}: {reason}")]
    Registration { service_id: String, reason: String },

    /// 注销失败（非致命，调用方通常只记录日志）
    #[error("failed to deregister service {service_id}: {reason}")]
    Deregistration { service_id: String, reason: String },

    /// 服务发现失败（注册中心不可达），与“没有实例”不同
    #[error("failed to discover service {service_name}: {reason}")]
    Discovery { service_name: String, reason: String },

    /// 没有健康实例
    #[error("service unavailable: no healthy instance of {service_name}")]
    ServiceUnavailable { service_name: String },

    /// 建立连接失败
    #[error("failed to connect to {service_name} at {address}: {reason}")]
    Connection {
        service_name: String,
        address: String,
        reason: String,
    },

    /// 熔断器打开，调用被直接拒绝
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen {
        name: String,
        retry_after: Option<Duration>,
    },

    /// 配置错误
    #[error("configuration error: {0}")]
    Config(String),
}

impl MeshError {
    pub fn registration(service_id: impl Into<String>, reason: impl ToString) -> Self {
        MeshError::Registration {
            service_id: service_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn deregistration(service_id: impl Into<String>, reason: impl ToString) -> Self {
        MeshError::Deregistration {
            service_id: service_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn discovery(service_name: impl Into<String>, reason: impl ToString) -> Self {
        MeshError::Discovery {
            service_name: service_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unavailable(service_name: impl Into<String>) -> Self {
        MeshError::ServiceUnavailable {
            service_name: service_name.into(),
        }
    }

    pub fn connection(
        service_name: impl Into<String>,
        address: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        MeshError::Connection {
            service_name: service_name.into(),
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    pub fn circuit_open(name: impl Into<String>, retry_after: Option<Duration>) -> Self {
        MeshError::CircuitOpen {
            name: name.into(),
            retry_after,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        MeshError::Config(msg.into())
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            MeshError::Registration { .. } => ErrorCode::RegistrationFailed,
            MeshError::Deregistration { .. } => ErrorCode::DeregistrationFailed,
            MeshError::Discovery { .. } => ErrorCode::DiscoveryFailed,
            MeshError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            MeshError::Connection { .. } => ErrorCode::ConnectionFailed,
            MeshError::CircuitOpen { .. } => ErrorCode::CircuitOpen,
            MeshError::Config(_) => ErrorCode::ConfigurationError,
        }
    }

    /// 调用方是否值得重试（重试策略由调用方自行决定）
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, MeshError>;
