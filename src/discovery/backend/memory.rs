//! 进程内服务注册中心
//!
//! 单体模式下各插件共享同一个进程，不需要外部注册中心；测试中也用它替代 Consul。
//! 每次变更都会推进全局索引并记录到对应服务上，watch 按服务索引判断是否推送

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::discovery::instance::ServiceInfo;
use crate::discovery::registry::ServiceRegistry;
use crate::discovery::watch::WatchStream;
use crate::error::{MeshError, Result};

struct Entry {
    info: ServiceInfo,
    healthy: bool,
    /// 首次注册顺序，保证发现结果稳定
    seq: u64,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// 服务名 -> 最近一次变更的索引
    service_index: HashMap<String, u64>,
    index: u64,
    next_seq: u64,
}

impl State {
    fn touch(&mut self, service_name: &str) {
        self.index += 1;
        self.service_index.insert(service_name.to_string(), self.index);
    }

    fn healthy(&self, service_name: &str) -> Vec<ServiceInfo> {
        let mut found: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| e.healthy && e.info.name == service_name)
            .collect();
        found.sort_by_key(|e| e.seq);
        found.into_iter().map(|e| e.info.clone()).collect()
    }

    fn snapshot(&self, service_name: &str) -> (u64, Vec<ServiceInfo>) {
        let index = self.service_index.get(service_name).copied().unwrap_or(0);
        (index, self.healthy(service_name))
    }
}

struct Inner {
    state: RwLock<State>,
    notify: watch::Sender<u64>,
    available: AtomicBool,
}

/// 进程内服务注册中心
#[derive(Clone)]
pub struct MemoryRegistry {
    inner: Arc<Inner>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                notify,
                available: AtomicBool::new(true),
            }),
        }
    }

    /// 更新实例健康状态（模拟注册中心的健康检查结果）
    ///
    /// 实例不存在时返回 `false`
    pub fn set_health(&self, service_id: &str, healthy: bool) -> bool {
        let index = {
            let mut state = self.inner.state.write();
            let Some(entry) = state.entries.get_mut(service_id) else {
                return false;
            };
            if entry.healthy == healthy {
                return true;
            }
            entry.healthy = healthy;
            let name = entry.info.name.clone();
            state.touch(&name);
            state.index
        };

        info!(service_id = %service_id, healthy, "Service health changed");
        self.inner.notify.send_replace(index);
        true
    }

    /// 模拟注册中心整体不可达：发现与自检返回错误
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// 当前全局变更索引
    pub fn index(&self) -> u64 {
        self.inner.state.read().index
    }

    fn ensure_available(&self, service_name: &str) -> Result<()> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MeshError::discovery(service_name, "registry unreachable"))
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceRegistry for MemoryRegistry {
    async fn register(&self, info: ServiceInfo) -> Result<()> {
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(MeshError::registration(&info.id, "registry unreachable"));
        }
        if info.id.is_empty() || info.name.is_empty() {
            return Err(MeshError::registration(
                &info.id,
                "service id and name must not be empty",
            ));
        }

        let index = {
            let mut state = self.inner.state.write();
            let previous = state.entries.remove(&info.id);
            let seq = match &previous {
                Some(prev) => prev.seq,
                None => {
                    state.next_seq += 1;
                    state.next_seq
                }
            };
            // 同一 ID 换了服务名时，旧服务也需要通知
            if let Some(prev) = &previous {
                if prev.info.name != info.name {
                    let old_name = prev.info.name.clone();
                    state.touch(&old_name);
                }
            }
            let name = info.name.clone();
            state.entries.insert(
                info.id.clone(),
                Entry {
                    info: info.clone(),
                    healthy: previous.map(|p| p.healthy).unwrap_or(true),
                    seq,
                },
            );
            state.touch(&name);
            state.index
        };

        info!(
            service_id = %info.id,
            service_name = %info.name,
            address = %info.host_port(),
            "Service registered"
        );
        self.inner.notify.send_replace(index);
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        let removed = {
            let mut state = self.inner.state.write();
            match state.entries.remove(service_id) {
                Some(entry) => {
                    state.touch(&entry.info.name);
                    Some(state.index)
                }
                None => None,
            }
        };

        match removed {
            Some(index) => {
                info!(service_id = %service_id, "Service deregistered");
                self.inner.notify.send_replace(index);
                Ok(())
            }
            None => {
                warn!(service_id = %service_id, "Failed to deregister service: not found");
                Err(MeshError::deregistration(service_id, "service not found"))
            }
        }
    }

    async fn discover(&self, service_name: &str) -> Result<Vec<ServiceInfo>> {
        self.ensure_available(service_name)?;
        let services = self.inner.state.read().healthy(service_name);
        debug!(service_name = %service_name, count = services.len(), "Services discovered");
        Ok(services)
    }

    fn watch(&self, service_name: &str, cancel: CancellationToken) -> WatchStream {
        let (sender, stream) = WatchStream::channel(&cancel);
        let inner = self.inner.clone();
        let name = service_name.to_string();
        let mut changes = inner.notify.subscribe();

        stream.spawn(service_name, async move {
            let mut last: Option<u64> = None;
            loop {
                changes.borrow_and_update();
                let (index, services) = inner.state.read().snapshot(&name);

                if last.is_none_or(|prev| index > prev) {
                    last = Some(index);
                    if !sender.send(services).await {
                        break;
                    }
                }

                tokio::select! {
                    biased;
                    _ = sender.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(service_name = %name, "Stopped watching services");
        });

        stream
    }

    async fn health(&self) -> Result<()> {
        self.ensure_available("memory")
    }
}
