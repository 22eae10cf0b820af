//! 服务变化监听流

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::warn;

use crate::discovery::instance::ServiceInfo;

const WATCH_BUFFER: usize = 16;

/// 健康实例快照流
///
/// 快照按注册中心索引非递减的顺序送达；两次唤醒之间的中间状态不保证逐一可见。
/// 丢弃该流会取消后台任务
pub struct WatchStream {
    rx: mpsc::Receiver<Vec<ServiceInfo>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

/// 后台任务一侧的发送端
pub struct WatchSender {
    tx: mpsc::Sender<Vec<ServiceInfo>>,
    cancel: CancellationToken,
}

impl WatchStream {
    /// 创建一对发送端/流，取消令牌派生自调用方传入的 `parent`
    pub fn channel(parent: &CancellationToken) -> (WatchSender, WatchStream) {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let cancel = parent.child_token();
        (
            WatchSender {
                tx,
                cancel: cancel.clone(),
            },
            WatchStream {
                rx,
                _guard: cancel.clone().drop_guard(),
                cancel,
            },
        )
    }

    /// 接收下一个快照，流关闭后返回 `None`
    pub async fn recv(&mut self) -> Option<Vec<ServiceInfo>> {
        self.rx.recv().await
    }

    /// 停止监听
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 在当前 tokio 运行时上启动产生快照的后台任务
    ///
    /// 没有运行时则丢弃任务（连同其中的发送端）并取消流，`recv` 立即返回 `None`
    pub(crate) fn spawn<F>(&self, service_name: &str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
            }
            Err(e) => {
                warn!(service_name = %service_name, error = %e, "No tokio runtime, watch stream closed");
                self.cancel();
            }
        }
    }
}

impl Stream for WatchStream {
    type Item = Vec<ServiceInfo>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl WatchSender {
    /// 发送快照
    ///
    /// 已取消或接收端已关闭时返回 `false`，取消之后不会再有任何快照送出
    pub async fn send(&self, snapshot: Vec<ServiceInfo>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            res = self.tx.send(snapshot) => res.is_ok(),
        }
    }

    /// 等待取消（包括接收端被丢弃的情况）
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// 可被取消的休眠，返回 `false` 表示休眠期间被取消
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

/// 指数退避
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// 返回本次等待时间，并把下一次翻倍（不超过上限）
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
