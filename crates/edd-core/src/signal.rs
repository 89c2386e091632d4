//! 线程间信号
//!
//! - `CloseEvent`：手动复位。置位即丢弃发送端，之后所有接收都立刻返回。
//! - `AutoEvent`：自动复位。容量为 1 的通道，多次置位合并为一次唤醒。
//! - `wait_any`：在关闭事件与另一个事件之间等待，返回带标签的 `Wake`。

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::trace;

/// 唤醒原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Close,
    RefreshRequested,
    ResyncRequested,
    Ready,
    UiReady,
}

/// 手动复位的关闭事件
#[derive(Debug)]
pub struct CloseEvent {
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl Default for CloseEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl CloseEvent {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    /// 置位；重复调用无副作用
    pub fn set(&self) {
        self.sender.lock().take();
    }

    pub fn is_set(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }

    /// 阻塞直到置位
    pub fn wait(&self) {
        // 发送端从不发送，只会因断开而返回
        let _ = self.receiver.recv();
    }

    /// 超时返回 false
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        !matches!(
            self.receiver.recv_timeout(timeout),
            Err(crossbeam_channel::RecvTimeoutError::Timeout)
        )
    }
}

/// 自动复位事件
#[derive(Debug)]
pub struct AutoEvent {
    sender: Sender<()>,
    receiver: Receiver<()>,
}

impl Default for AutoEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoEvent {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(1);
        Self { sender, receiver }
    }

    /// 置位；已置位时合并
    pub fn set(&self) {
        // 接收端与发送端同生命周期，只可能是 Full
        if let Err(TrySendError::Full(())) = self.sender.try_send(()) {
            trace!("event already set");
        }
    }

    /// 非阻塞地消费一次置位
    pub fn try_take(&self) -> bool {
        self.receiver.try_recv().is_ok()
    }

    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

/// 等待关闭或 `other` 之一。两者同时就绪时关闭优先，且不会消费 `other`。
pub fn wait_any(close: &CloseEvent, other: &AutoEvent, tag: Wake) -> Wake {
    if close.is_set() {
        return Wake::Close;
    }

    select! {
        recv(close.receiver()) -> _ => Wake::Close,
        recv(other.receiver()) -> _ => {
            if close.is_set() {
                // 已消费的一次置位还回去，交给下一个等待者
                other.set();
                Wake::Close
            } else {
                tag
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_close_event_is_manual_reset() {
        let close = CloseEvent::new();
        assert!(!close.is_set());
        assert!(!close.wait_timeout(Duration::from_millis(10)));

        close.set();
        close.set();
        assert!(close.is_set());
        // 多次等待都立即返回
        close.wait();
        close.wait();
        assert!(close.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_auto_event_merges() {
        let event = AutoEvent::new();
        event.set();
        event.set();
        event.set();
        assert!(event.try_take());
        assert!(!event.try_take());
    }

    #[test]
    fn test_wait_any_returns_tag() {
        let close = CloseEvent::new();
        let refresh = AutoEvent::new();
        refresh.set();
        assert_eq!(wait_any(&close, &refresh, Wake::RefreshRequested), Wake::RefreshRequested);
        assert!(!refresh.try_take());
    }

    #[test]
    fn test_close_wins_over_other() {
        let close = CloseEvent::new();
        let refresh = AutoEvent::new();
        refresh.set();
        close.set();

        for _ in 0..10 {
            assert_eq!(wait_any(&close, &refresh, Wake::RefreshRequested), Wake::Close);
        }
        // 未被消费
        assert!(refresh.try_take());
    }

    #[test]
    fn test_wait_any_wakes_on_close_from_other_thread() {
        let close = Arc::new(CloseEvent::new());
        let refresh = AutoEvent::new();
        let setter = {
            let close = close.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                close.set();
            })
        };

        assert_eq!(wait_any(&close, &refresh, Wake::ResyncRequested), Wake::Close);
        setter.join().unwrap();
    }
}
