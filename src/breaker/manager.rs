//! 熔断器管理器，按名称共享熔断器

use dashmap::DashMap;
use std::sync::Arc;

use crate::breaker::{BreakerStats, CircuitBreaker};
use crate::config::BreakerConfig;

pub struct CircuitBreakerManager {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerManager {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// 获取或创建熔断器，同名的调用方拿到同一个实例
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, &self.config)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.value().clone())
    }

    pub fn all_stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<_> = self.breakers.iter().map(|b| b.value().stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.value().reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
