use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::discovery::{BackendType, SelectionStrategy};
use crate::error::{MeshError, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub registry: RegistryConfig,
    pub pool: PoolConfig,
    pub breaker: BreakerConfig,
    pub log: LogConfig,
}

/// Consul 注册中心配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// consul | memory
    pub backend: BackendType,
    /// Consul HTTP 地址，如 `http://127.0.0.1:8500`
    pub address: String,
    pub datacenter: Option<String>,
    /// ACL token，以 `X-Consul-Token` 头透传
    pub token: Option<String>,
    /// 普通请求超时（秒）
    pub request_timeout_secs: u64,
    /// 阻塞查询的最长等待时间（秒）
    pub watch_wait_secs: u64,
    /// watch 出错后的初始退避（毫秒）
    pub watch_backoff_initial_ms: u64,
    /// watch 出错后的最大退避（毫秒）
    pub watch_backoff_max_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Consul,
            address: "http://127.0.0.1:8500".to_string(),
            datacenter: None,
            token: None,
            request_timeout_secs: 10,
            watch_wait_secs: 300,
            watch_backoff_initial_ms: 1_000,
            watch_backoff_max_ms: 30_000,
        }
    }
}

impl RegistryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn watch_wait(&self) -> Duration {
        Duration::from_secs(self.watch_wait_secs)
    }

    pub fn watch_backoff(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.watch_backoff_initial_ms),
            Duration::from_millis(self.watch_backoff_max_ms),
        )
    }
}

/// 连接池配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub selection: SelectionStrategy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
            selection: SelectionStrategy::First,
        }
    }
}

/// 熔断器配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// 连续失败多少次后打开
    pub max_failures: u32,
    /// 打开后多久允许一次探测（毫秒）
    pub cool_down_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            cool_down_ms: 30_000,
        }
    }
}

impl BreakerConfig {
    pub fn new(max_failures: u32, cool_down: Duration) -> Self {
        Self {
            max_failures,
            cool_down_ms: cool_down.as_millis() as u64,
        }
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_millis(self.cool_down_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// 默认过滤级别，`RUST_LOG` 优先
    pub level: String,
    /// pretty | json
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MeshError::config(format!("failed to read {}: {}", path, e)))?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// 只解析 TOML，不读取环境变量
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| MeshError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 环境变量覆盖
    ///
    /// - `CONSUL_HTTP_ADDR`：注册中心地址
    /// - `MESH_WATCH_WAIT_SECS`：阻塞查询等待时间
    /// - `MESH_BREAKER_MAX_FAILURES` / `MESH_BREAKER_COOLDOWN_SECS`
    /// - `MESH_LOG_LEVEL` / `MESH_LOG_FORMAT`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("CONSUL_HTTP_ADDR") {
            self.registry.address = if addr.starts_with("http://") || addr.starts_with("https://")
            {
                addr
            } else {
                format!("http://{}", addr)
            };
        }
        if let Some(secs) = env_number("MESH_WATCH_WAIT_SECS")? {
            self.registry.watch_wait_secs = secs;
        }
        if let Some(max) = env_number("MESH_BREAKER_MAX_FAILURES")? {
            self.breaker.max_failures = u32::try_from(max).map_err(|_| {
                MeshError::config(format!("MESH_BREAKER_MAX_FAILURES={} is out of range", max))
            })?;
        }
        if let Some(secs) = env_number("MESH_BREAKER_COOLDOWN_SECS")? {
            self.breaker.cool_down_ms = secs.checked_mul(1_000).ok_or_else(|| {
                MeshError::config(format!("MESH_BREAKER_COOLDOWN_SECS={} is out of range", secs))
            })?;
        }
        if let Ok(level) = std::env::var("MESH_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Ok(format) = std::env::var("MESH_LOG_FORMAT") {
            self.log.format = format;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.registry.address.trim().is_empty() {
            return Err(MeshError::config("registry.address must not be empty"));
        }
        if self.breaker.max_failures == 0 {
            return Err(MeshError::config("breaker.max_failures must be at least 1"));
        }
        if self.registry.watch_backoff_initial_ms > self.registry.watch_backoff_max_ms {
            return Err(MeshError::config(
                "registry.watch_backoff_initial_ms exceeds watch_backoff_max_ms",
            ));
        }
        Ok(())
    }
}

fn env_number(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| MeshError::config(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}
