//! 日志初始化

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LogConfig;
use crate::error::{MeshError, Result};

/// 安装全局 tracing subscriber
///
/// `RUST_LOG` 优先于 `LogConfig.level`。重复调用返回错误但不会 panic
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| MeshError::config(format!("invalid log level {:?}: {}", config.level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format.as_str() {
        "json" => registry.with(fmt::layer().json()).try_init(),
        "pretty" | "" => registry.with(fmt::layer()).try_init(),
        other => {
            return Err(MeshError::config(format!(
                "unknown log format: {} (expected pretty or json)",
                other
            )));
        }
    };

    result.map_err(|e| MeshError::config(format!("failed to install tracing subscriber: {}", e)))
}
