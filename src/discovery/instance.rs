//! 服务实例定义

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// 服务实例
///
/// `id` 在所有运行中的实例之间唯一；`name` 是逻辑服务名，同名的多个实例提供相同能力
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceInfo {
    /// 实例 ID（唯一标识）
    pub id: String,

    /// 逻辑服务名（如 "upload", "auth"）
    pub name: String,

    /// 服务地址（主机名或 IP）
    pub address: String,

    /// 服务端口
    pub port: u16,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// 健康检查配置，原样交给注册中心
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
}

/// 健康检查配置
///
/// 时间使用注册中心原生的字符串格式（如 `"10s"`），本库不解析，只透传
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheck {
    /// 健康检查地址（如 `http://10.0.0.5:9091/health`）
    pub endpoint: String,
    pub interval: String,
    pub timeout: String,
}

impl HealthCheck {
    pub fn new(
        endpoint: impl Into<String>,
        interval: impl Into<String>,
        timeout: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            interval: interval.into(),
            timeout: timeout.into(),
        }
    }

    /// 以实例地址为基础的 HTTP `/health` 检查，间隔 10s，超时 5s
    pub fn http(address: &str, port: u16) -> Self {
        Self::new(format!("http://{}:{}/health", address, port), "10s", "5s")
    }
}

impl ServiceInfo {
    /// 创建新的服务实例
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            tags: BTreeSet::new(),
            metadata: HashMap::new(),
            health_check: None,
        }
    }

    /// 以 `<name>-<uuid>` 作为实例 ID 创建
    pub fn with_generated_id(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        let name = name.into();
        let id = format!("{}-{}", name, uuid::Uuid::new_v4());
        Self::new(id, name, address, port)
    }

    /// 添加标签
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// 添加元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 设置健康检查
    pub fn with_health_check(mut self, check: HealthCheck) -> Self {
        self.health_check = Some(check);
        self
    }

    /// `host:port`，IPv6 地址自动加方括号
    pub fn host_port(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    /// 转换为 gRPC URI
    pub fn to_grpc_uri(&self) -> String {
        format!("http://{}", self.host_port())
    }
}
