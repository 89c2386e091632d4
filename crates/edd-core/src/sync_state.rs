//! 同步请求合并
//!
//! 请求的同步类型按位 OR 累积；`requested` 由 CAS 保护，只有把它从 false
//! 置为 true 的请求方唤醒主工作线程。运行中到达的请求被并入紧随其后的下一轮。

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tracing::{debug, info};

use crate::signal::AutoEvent;

const CATALOG_SYNC: u8 = 0b0001;
const REFDB_SYNC: u8 = 0b0010;

/// 一轮同步的状态，由同步引擎填写结果标志
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    /// 需要同步星系目录
    pub catalog_sync: bool,
    /// 需要同步参考事件库
    pub refdb_sync: bool,
    /// 首次运行（下载了全量数据）
    pub was_first_run: bool,
    /// 本轮确实更新了目录或参考库
    pub was_catalog_or_refdb: bool,
    /// 同步结束后需要刷新历史
    pub history_refresh_required: bool,
}

impl SyncState {
    fn from_flags(flags: u8) -> Self {
        Self {
            catalog_sync: flags & CATALOG_SYNC != 0,
            refdb_sync: flags & REFDB_SYNC != 0,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.catalog_sync && !self.refdb_sync
    }
}

fn to_flags(catalog: bool, refdb: bool) -> u8 {
    (if catalog { CATALOG_SYNC } else { 0 }) | (if refdb { REFDB_SYNC } else { 0 })
}

#[derive(Debug, Default)]
pub struct SyncCoalescer {
    requested: AtomicBool,
    flags: AtomicU8,
    wake: AutoEvent,
}

impl SyncCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wake_event(&self) -> &AutoEvent {
        &self.wake
    }

    /// 请求同步。返回 true 表示本次请求唤醒了工作线程。
    pub fn request(&self, catalog: bool, refdb: bool) -> bool {
        self.flags.fetch_or(to_flags(catalog, refdb), Ordering::AcqRel);
        if self
            .requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!("🔄 同步已请求: catalog={} refdb={}", catalog, refdb);
            self.wake.set();
            true
        } else {
            debug!("同步已在进行，请求并入下一轮: catalog={} refdb={}", catalog, refdb);
            false
        }
    }

    /// 仅累积标志，不唤醒（启动检查期间使用）
    pub fn accumulate(&self, catalog: bool, refdb: bool) {
        self.flags.fetch_or(to_flags(catalog, refdb), Ordering::AcqRel);
    }

    /// 主线程直接执行首轮同步前占住 requested，避免外部请求重复唤醒
    pub fn arm_silently(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn pending(&self) -> SyncState {
        SyncState::from_flags(self.flags.load(Ordering::Acquire))
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// 取走已累积的标志
    pub fn take(&self) -> SyncState {
        SyncState::from_flags(self.flags.swap(0, Ordering::AcqRel))
    }

    /// 一轮同步完成通知投递后调用；期间又累积了标志则立即再唤醒一次
    pub fn complete(&self) {
        self.requested.store(false, Ordering::Release);
        if self.flags.load(Ordering::Acquire) != 0
            && self
                .requested
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            debug!("同步期间有新请求，再次唤醒");
            self.wake.set();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_wakes() {
        let sync = SyncCoalescer::new();
        assert!(sync.request(true, false));
        assert!(sync.wake_event().try_take());
        assert!(!sync.request(false, true));
        assert!(!sync.wake_event().try_take());

        let state = sync.take();
        assert!(state.catalog_sync && state.refdb_sync);
        assert!(sync.pending().is_empty());
    }

    #[test]
    fn test_union_while_running() {
        let sync = SyncCoalescer::new();
        sync.arm_silently();
        assert!(sync.take().is_empty());

        // 运行期间的请求都不唤醒
        assert!(!sync.request(true, false));
        assert!(!sync.request(false, true));

        sync.complete();
        assert!(sync.is_requested());
        assert!(sync.wake_event().try_take());

        let next = sync.take();
        assert_eq!(
            next,
            SyncState {
                catalog_sync: true,
                refdb_sync: true,
                ..Default::default()
            }
        );

        sync.complete();
        assert!(!sync.is_requested());
        assert!(!sync.wake_event().try_take());
    }

    #[test]
    fn test_accumulate_does_not_wake() {
        let sync = SyncCoalescer::new();
        sync.accumulate(false, true);
        assert!(!sync.is_requested());
        assert!(!sync.wake_event().try_take());
        assert!(sync.pending().refdb_sync);
    }
}
