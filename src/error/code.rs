//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 连接相关错误
/// - 2000-2999: 注册中心相关错误
/// - 3000-3999: 可用性相关错误（无实例、熔断）
/// - 9000-9999: 配置与通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 连接相关错误 (1000-1999)
    // ============================================================
    ConnectionFailed = 1000,

    // ============================================================
    // 注册中心相关错误 (2000-2999)
    // ============================================================
    RegistrationFailed = 2000,
    DeregistrationFailed = 2001,
    DiscoveryFailed = 2002,

    // ============================================================
    // 可用性相关错误 (3000-3999)
    // ============================================================
    ServiceUnavailable = 3000,
    CircuitOpen = 3001,

    // ============================================================
    // 配置与通用错误 (9000-9999)
    // ============================================================
    ConfigurationError = 9000,
    UnknownError = 9999,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 从数字值创建错误代码
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1000 => Some(ErrorCode::ConnectionFailed),
            2000 => Some(ErrorCode::RegistrationFailed),
            2001 => Some(ErrorCode::DeregistrationFailed),
            2002 => Some(ErrorCode::DiscoveryFailed),
            3000 => Some(ErrorCode::ServiceUnavailable),
            3001 => Some(ErrorCode::CircuitOpen),
            9000 => Some(ErrorCode::ConfigurationError),
            9999 => Some(ErrorCode::UnknownError),
            _ => None,
        }
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::RegistrationFailed => "REGISTRATION_FAILED",
            ErrorCode::DeregistrationFailed => "DEREGISTRATION_FAILED",
            ErrorCode::DiscoveryFailed => "DISCOVERY_FAILED",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// 获取错误代码的类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Connection,
            2000..=2999 => ErrorCategory::Registry,
            3000..=3999 => ErrorCategory::Availability,
            _ => ErrorCategory::General,
        }
    }

    /// 判断是否为可重试的错误
    ///
    /// 本库自身从不重试，该判断仅供调用方的重试策略参考
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionFailed
                | ErrorCode::DiscoveryFailed
                | ErrorCode::ServiceUnavailable
                | ErrorCode::CircuitOpen
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Connection,
    Registry,
    Availability,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Connection => write!(f, "CONNECTION"),
            ErrorCategory::Registry => write!(f, "REGISTRY"),
            ErrorCategory::Availability => write!(f, "AVAILABILITY"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}
