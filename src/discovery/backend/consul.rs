//! Consul 服务注册发现后端
//!
//! 直接使用 Consul HTTP API：
//! - 注册：`PUT /v1/agent/service/register`
//! - 注销：`PUT /v1/agent/service/deregister/:id`
//! - 发现：`GET /v1/health/service/:name?passing=true`
//! - 监听：同一接口的阻塞查询（`index` + `wait`，读取 `X-Consul-Index`）
//! - 自检：`GET /v1/status/leader`

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::discovery::instance::ServiceInfo;
use crate::discovery::registry::ServiceRegistry;
use crate::discovery::watch::{Backoff, WatchSender, WatchStream};
use crate::error::{MeshError, Result};

const CONSUL_INDEX_HEADER: &str = "X-Consul-Index";
const CONSUL_TOKEN_HEADER: &str = "X-Consul-Token";

/// Consul 服务注册发现
pub struct ConsulRegistry {
    client: ConsulClient,
    watch_wait: Duration,
    watch_backoff: (Duration, Duration),
}

/// 可在后台任务间克隆的 HTTP 客户端
#[derive(Clone)]
struct ConsulClient {
    http: HttpClient,
    base: Url,
    base_url: String,
    datacenter: Option<String>,
    token: Option<String>,
}

#[allow(non_snake_case)]
#[derive(Serialize)]
struct ConsulRegistration<'a> {
    ID: &'a str,
    Name: &'a str,
    Address: &'a str,
    Port: u16,
    Tags: Vec<&'a str>,
    Meta: &'a HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    Check: Option<ConsulCheck<'a>>,
}

#[allow(non_snake_case)]
#[derive(Serialize)]
struct ConsulCheck<'a> {
    HTTP: &'a str,
    Interval: &'a str,
    Timeout: &'a str,
}

#[allow(non_snake_case)]
#[derive(Deserialize)]
struct ConsulHealthEntry {
    #[serde(default)]
    Node: Option<ConsulNode>,
    Service: ConsulServiceEntry,
}

#[allow(non_snake_case)]
#[derive(Deserialize)]
struct ConsulNode {
    #[serde(default)]
    Address: String,
}

#[allow(non_snake_case)]
#[derive(Deserialize)]
struct ConsulServiceEntry {
    ID: String,
    Service: String,
    #[serde(default)]
    Address: String,
    Port: u16,
    #[serde(default)]
    Tags: Option<Vec<String>>,
    #[serde(default)]
    Meta: Option<HashMap<String, String>>,
}

impl ConsulHealthEntry {
    fn into_service_info(self) -> ServiceInfo {
        let service = self.Service;
        // 服务未单独设置地址时使用节点地址（Consul 语义）
        let address = if service.Address.is_empty() {
            self.Node.map(|n| n.Address).unwrap_or_default()
        } else {
            service.Address
        };

        ServiceInfo {
            id: service.ID,
            name: service.Service,
            address,
            port: service.Port,
            tags: service.Tags.unwrap_or_default().into_iter().collect(),
            metadata: service.Meta.unwrap_or_default(),
            health_check: None,
        }
    }
}

impl ConsulRegistry {
    /// 创建新的 Consul 注册中心客户端（不发起网络请求）
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| MeshError::config(format!("failed to build Consul HTTP client: {}", e)))?;

        let base_url = config.address.trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)
            .map_err(|e| MeshError::config(format!("invalid Consul address {}: {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(MeshError::config(format!("invalid Consul address: {}", base_url)));
        }

        info!(address = %config.address, "Initializing Consul registry");

        Ok(Self {
            client: ConsulClient {
                http,
                base,
                base_url,
                datacenter: config.datacenter.clone(),
                token: config.token.clone(),
            },
            watch_wait: config.watch_wait(),
            watch_backoff: config.watch_backoff(),
        })
    }

    /// 创建并确认 Consul 可达
    pub async fn connect(config: &RegistryConfig) -> Result<Self> {
        let registry = Self::new(config)?;
        registry.health().await?;
        info!(address = %config.address, "Connected to Consul");
        Ok(registry)
    }

    pub fn base_url(&self) -> &str {
        &self.client.base_url
    }
}

impl ConsulClient {
    /// 拼接 API 路径，每一段单独做百分号编码
    fn url(&self, segments: &[&str]) -> std::result::Result<Url, String> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| format!("invalid Consul address: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn with_common(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = match &self.token {
            Some(token) => builder.header(CONSUL_TOKEN_HEADER, token),
            None => builder,
        };
        match &self.datacenter {
            Some(dc) => builder.query(&[("dc", dc.as_str())]),
            None => builder,
        }
    }

    /// 健康实例查询；`blocking` 为 `Some((index, wait))` 时发起阻塞查询
    async fn health_service(
        &self,
        service_name: &str,
        blocking: Option<(u64, Duration)>,
    ) -> std::result::Result<(u64, Vec<ServiceInfo>), String> {
        let url = self.url(&["v1", "health", "service", service_name])?;
        let mut request = self
            .with_common(self.http.get(url))
            .query(&[("passing", "true")]);

        if let Some((index, wait)) = blocking {
            // Consul 会在 wait 基础上附加最多 wait/16 的随机抖动
            let timeout = wait + wait / 16 + Duration::from_secs(5);
            request = request
                .query(&[
                    ("index", index.to_string()),
                    ("wait", format!("{}s", wait.as_secs().max(1))),
                ])
                .timeout(timeout);
        }

        let resp = request.send().await.map_err(|e| e.to_string())?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("Consul returned {}: {}", status, body.trim()));
        }

        let index = resp
            .headers()
            .get(CONSUL_INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        let entries: Vec<ConsulHealthEntry> = resp
            .json()
            .await
            .map_err(|e| format!("failed to parse Consul response: {}", e))?;

        let services = entries
            .into_iter()
            .map(ConsulHealthEntry::into_service_info)
            .collect();
        Ok((index, services))
    }
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
    async fn register(&self, info: ServiceInfo) -> Result<()> {
        info!(service_id = %info.id, service_name = %info.name, "Registering service");

        let payload = ConsulRegistration {
            ID: &info.id,
            Name: &info.name,
            Address: &info.address,
            Port: info.port,
            Tags: info.tags.iter().map(String::as_str).collect(),
            Meta: &info.metadata,
            Check: info.health_check.as_ref().map(|check| ConsulCheck {
                HTTP: &check.endpoint,
                Interval: &check.interval,
                Timeout: &check.timeout,
            }),
        };

        let url = self
            .client
            .url(&["v1", "agent", "service", "register"])
            .map_err(|e| MeshError::registration(&info.id, e))?;
        let resp = self
            .client
            .with_common(self.client.http.put(url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                warn!(service_id = %info.id, error = %e, "Failed to register service");
                MeshError::registration(&info.id, e)
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(service_id = %info.id, status = %status, "Consul rejected service registration");
            return Err(MeshError::registration(
                &info.id,
                format!("Consul returned {}: {}", status, body.trim()),
            ));
        }

        info!(
            service_id = %info.id,
            service_name = %info.name,
            address = %info.host_port(),
            "Service registered successfully"
        );
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        info!(service_id = %service_id, "Deregistering service");

        let path = ["v1", "agent", "service", "deregister", service_id];
        let err = match self.client.url(&path) {
            Ok(url) => match self.client.with_common(self.client.http.put(url)).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(service_id = %service_id, "Service deregistered successfully");
                    return Ok(());
                }
                Ok(resp) => format!("Consul returned {}", resp.status()),
                Err(e) => e.to_string(),
            },
            Err(e) => e,
        };

        warn!(service_id = %service_id, error = %err, "Failed to deregister service");
        Err(MeshError::deregistration(service_id, err))
    }

    async fn discover(&self, service_name: &str) -> Result<Vec<ServiceInfo>> {
        let (_, services) = self
            .client
            .health_service(service_name, None)
            .await
            .map_err(|e| {
                warn!(service_name = %service_name, error = %e, "Failed to discover services");
                MeshError::discovery(service_name, e)
            })?;

        debug!(service_name = %service_name, count = services.len(), "Services discovered");
        Ok(services)
    }

    fn watch(&self, service_name: &str, cancel: CancellationToken) -> WatchStream {
        let (sender, stream) = WatchStream::channel(&cancel);
        let client = self.client.clone();
        let name = service_name.to_string();
        let wait = self.watch_wait;
        let (initial, max) = self.watch_backoff;

        info!(service_name = %service_name, "Watching services");
        stream.spawn(service_name, async move {
            watch_loop(client, name, wait, Backoff::new(initial, max), sender).await;
        });

        stream
    }

    async fn health(&self) -> Result<()> {
        let url = self
            .client
            .url(&["v1", "status", "leader"])
            .map_err(|e| MeshError::discovery("consul", e))?;
        let resp = self
            .client
            .with_common(self.client.http.get(url))
            .send()
            .await
            .map_err(|e| MeshError::discovery("consul", format!("health check failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(MeshError::discovery(
                "consul",
                format!("health check returned {}", resp.status()),
            ));
        }

        let leader: String = resp
            .json()
            .await
            .map_err(|e| MeshError::discovery("consul", format!("invalid leader response: {}", e)))?;
        if leader.is_empty() {
            return Err(MeshError::discovery("consul", "cluster has no leader"));
        }

        debug!(leader = %leader, "Consul health check passed");
        Ok(())
    }
}

/// 阻塞查询循环
///
/// 索引前进且健康实例列表变化时才推送快照（第一次响应总是推送）；索引回退时重置为 0。
/// 查询出错按指数退避重试，不会终止流
async fn watch_loop(
    client: ConsulClient,
    service_name: String,
    wait: Duration,
    mut backoff: Backoff,
    sender: WatchSender,
) {
    let mut index = 0u64;
    let mut last: Option<Vec<ServiceInfo>> = None;

    loop {
        let result = tokio::select! {
            biased;
            _ = sender.cancelled() => break,
            r = client.health_service(&service_name, Some((index, wait))) => r,
        };

        match result {
            Ok((new_index, services)) => {
                backoff.reset();
                // 索引至少为 1，避免 index=0 的查询不阻塞
                let new_index = new_index.max(1);

                if new_index < index {
                    debug!(service_name = %service_name, old = index, new = new_index, "Consul index went backwards, resetting");
                    index = 0;
                    continue;
                }
                if last.is_some() && new_index == index {
                    continue;
                }

                index = new_index;
                // 健康检查输出变化也会推进索引，实例列表不变时不推送
                if last.as_ref() == Some(&services) {
                    debug!(service_name = %service_name, index, "Consul index advanced without instance changes");
                    continue;
                }
                last = Some(services.clone());
                if !sender.send(services).await {
                    break;
                }
            }
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    service_name = %service_name,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Error watching services"
                );
                if !sender.sleep(delay).await {
                    break;
                }
            }
        }
    }

    info!(service_name = %service_name, "Stopped watching services");
}
