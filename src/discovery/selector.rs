//! 实例选择策略
//!
//! 从多个健康实例中挑选一个。默认 `First` 总是取注册中心返回的第一个实例，
//! 需要分摊负载时改用 `RoundRobin` 或 `Random`

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::discovery::instance::ServiceInfo;

/// 选择策略
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// 第一个实例（确定性）
    #[default]
    First,
    /// 随机
    Random,
    /// 轮询（按服务名分别计数）
    RoundRobin,
}

impl std::str::FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "first" => Ok(SelectionStrategy::First),
            "random" => Ok(SelectionStrategy::Random),
            "round_robin" | "roundrobin" => Ok(SelectionStrategy::RoundRobin),
            _ => Err(format!("Unknown selection strategy: {}", s)),
        }
    }
}

/// 实例选择器
pub struct InstanceSelector {
    strategy: SelectionStrategy,
    counters: DashMap<String, AtomicUsize>,
}

impl InstanceSelector {
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self {
            strategy,
            counters: DashMap::new(),
        }
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// 选择服务实例，列表为空时返回 `None`
    pub fn select<'a>(
        &self,
        service_name: &str,
        instances: &'a [ServiceInfo],
    ) -> Option<&'a ServiceInfo> {
        if instances.is_empty() {
            return None;
        }

        match self.strategy {
            SelectionStrategy::First => instances.first(),
            SelectionStrategy::Random => {
                let index = rand::thread_rng().gen_range(0..instances.len());
                instances.get(index)
            }
            SelectionStrategy::RoundRobin => {
                let index = self
                    .counters
                    .entry(service_name.to_string())
                    .or_insert_with(|| AtomicUsize::new(0))
                    .fetch_add(1, Ordering::Relaxed);
                instances.get(index % instances.len())
            }
        }
    }
}

impl Default for InstanceSelector {
    fn default() -> Self {
        Self::new(SelectionStrategy::First)
    }
}
