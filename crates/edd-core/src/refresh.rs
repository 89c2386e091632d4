//! 刷新请求合并
//!
//! 三态寄存器 `Idle → Requested → Running → Idle` 保证同一时刻最多一次刷新。
//! 待处理参数放在无锁队列中，工作线程取出时只保留最新的一份：
//! 一串请求最终只执行一次，使用最后提交的参数。

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, info};

use crate::signal::AutoEvent;

/// 刷新参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshRequest {
    /// 旧版 netlog 目录
    pub netlog_path: Option<PathBuf>,
    pub force_netlog_reload: bool,
    pub force_journal_reload: bool,
    /// 是否需要与远端对账
    pub check_remote: bool,
    /// 目标指挥官；None 表示当前显示的指挥官
    pub commander: Option<i64>,
}

impl RefreshRequest {
    pub fn for_commander(commander_id: i64) -> Self {
        Self {
            commander: Some(commander_id),
            ..Default::default()
        }
    }

    pub fn force_journal_reload(mut self, value: bool) -> Self {
        self.force_journal_reload = value;
        self
    }

    pub fn check_remote(mut self, value: bool) -> Self {
        self.check_remote = value;
        self
    }
}

/// 刷新阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RefreshPhase {
    Idle = 0,
    Requested = 1,
    Running = 2,
}

impl RefreshPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RefreshPhase::Requested,
            2 => RefreshPhase::Running,
            _ => RefreshPhase::Idle,
        }
    }
}

impl std::fmt::Display for RefreshPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshPhase::Idle => write!(f, "Idle"),
            RefreshPhase::Requested => write!(f, "Requested"),
            RefreshPhase::Running => write!(f, "Running"),
        }
    }
}

#[derive(Debug)]
pub struct RefreshCoalescer {
    phase: AtomicU8,
    pending_tx: Sender<RefreshRequest>,
    pending_rx: Receiver<RefreshRequest>,
    /// 最近一次被接受的参数，用于去重
    last_armed: RwLock<Option<RefreshRequest>>,
    wake: AutoEvent,
}

impl Default for RefreshCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshCoalescer {
    pub fn new() -> Self {
        let (pending_tx, pending_rx) = unbounded();
        Self {
            phase: AtomicU8::new(RefreshPhase::Idle as u8),
            pending_tx,
            pending_rx,
            last_armed: RwLock::new(None),
            wake: AutoEvent::new(),
        }
    }

    pub fn phase(&self) -> RefreshPhase {
        RefreshPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// 工作线程等待的事件
    pub fn wake_event(&self) -> &AutoEvent {
        &self.wake
    }

    /// 提交刷新请求。返回 true 表示开启了新一轮或并入了待处理请求，
    /// false 表示与已接受的参数相同被去重。
    pub fn request(&self, params: RefreshRequest) -> bool {
        loop {
            match self.phase() {
                RefreshPhase::Idle => {
                    if self
                        .phase
                        .compare_exchange(
                            RefreshPhase::Idle as u8,
                            RefreshPhase::Requested as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        info!("🔄 刷新请求已排队: {:?}", params);
                        self.arm(params);
                        return true;
                    }
                    // 被其他请求方抢先，重新读取阶段
                }
                phase => {
                    if self.last_armed.read().as_ref() == Some(&params) {
                        debug!("刷新请求重复（{}），忽略", phase);
                        return false;
                    }
                    info!("🔄 刷新请求已合并（{}）: {:?}", phase, params);
                    self.arm(params);
                    return true;
                }
            }
        }
    }

    fn arm(&self, params: RefreshRequest) {
        *self.last_armed.write() = Some(params.clone());
        // 接收端由自身持有，发送不会失败
        if self.pending_tx.send(params).is_err() {
            debug!("pending queue disconnected");
        }
        self.wake.set();
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_rx.is_empty()
    }

    /// 取出最新参数并进入 Running；较早的参数被丢弃
    pub fn take_latest(&self) -> Option<RefreshRequest> {
        let mut latest = None;
        let mut discarded = 0usize;
        while let Ok(params) = self.pending_rx.try_recv() {
            if latest.replace(params).is_some() {
                discarded += 1;
            }
        }
        if discarded > 0 {
            debug!("丢弃 {} 个过期刷新请求", discarded);
        }
        if latest.is_some() {
            self.phase.store(RefreshPhase::Running as u8, Ordering::Release);
        }
        latest
    }

    /// 完成通知投递后调用。运行期间有新请求时直接回到 Requested。
    pub fn complete(&self) {
        self.phase.store(RefreshPhase::Idle as u8, Ordering::Release);
        if self.has_pending()
            && self
                .phase
                .compare_exchange(
                    RefreshPhase::Idle as u8,
                    RefreshPhase::Requested as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            debug!("刷新期间有新请求，保持 Requested");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn commander(id: i64) -> RefreshRequest {
        RefreshRequest::for_commander(id)
    }

    #[test]
    fn test_first_request_arms() {
        let coalescer = RefreshCoalescer::new();
        assert_eq!(coalescer.phase(), RefreshPhase::Idle);

        assert!(coalescer.request(commander(1)));
        assert_eq!(coalescer.phase(), RefreshPhase::Requested);
        assert!(coalescer.has_pending());
        assert!(coalescer.wake_event().try_take());
    }

    #[test]
    fn test_duplicate_suppressed() {
        let coalescer = RefreshCoalescer::new();
        assert!(coalescer.request(commander(1)));
        assert!(!coalescer.request(commander(1)));
        assert!(!coalescer.request(commander(1)));

        assert_eq!(coalescer.take_latest(), Some(commander(1)));
        assert_eq!(coalescer.take_latest(), None);

        // 运行中的参数同样参与去重
        assert!(!coalescer.request(commander(1)));
        assert!(!coalescer.has_pending());
    }

    #[test]
    fn test_latest_params_win() {
        let coalescer = RefreshCoalescer::new();
        assert!(coalescer.request(commander(1)));
        assert!(coalescer.request(commander(1).force_journal_reload(true)));
        assert!(coalescer.request(commander(2)));
        assert!(coalescer.request(commander(2).check_remote(true)));

        assert_eq!(coalescer.take_latest(), Some(commander(2).check_remote(true)));
        assert_eq!(coalescer.phase(), RefreshPhase::Running);
        assert!(!coalescer.has_pending());
    }

    #[test]
    fn test_request_during_running_leaves_one_more() {
        let coalescer = RefreshCoalescer::new();
        coalescer.request(commander(1));
        coalescer.take_latest();
        assert_eq!(coalescer.phase(), RefreshPhase::Running);

        assert!(coalescer.request(commander(1).force_journal_reload(true)));
        // 仍在运行
        assert_eq!(coalescer.phase(), RefreshPhase::Running);

        coalescer.complete();
        assert_eq!(coalescer.phase(), RefreshPhase::Requested);
        assert_eq!(
            coalescer.take_latest(),
            Some(commander(1).force_journal_reload(true))
        );

        coalescer.complete();
        assert_eq!(coalescer.phase(), RefreshPhase::Idle);
    }

    #[test]
    fn test_same_params_after_complete_arms_again() {
        let coalescer = RefreshCoalescer::new();
        coalescer.request(commander(3));
        coalescer.take_latest();
        coalescer.complete();

        assert!(coalescer.request(commander(3)));
        assert_eq!(coalescer.phase(), RefreshPhase::Requested);
    }

    #[test]
    fn test_concurrent_requesters() {
        let coalescer = Arc::new(RefreshCoalescer::new());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let coalescer = coalescer.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        coalescer.request(commander(n * 100 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(coalescer.phase(), RefreshPhase::Requested);
        assert!(coalescer.take_latest().is_some());
        assert!(coalescer.take_latest().is_none());
    }
}
