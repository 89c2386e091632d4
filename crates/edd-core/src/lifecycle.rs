//! 生命周期管理
//!
//! 关闭流程只执行一次：置 closing 标志 → 依次通知各 Hook 停止 → 触发关闭事件。
//! 所有长任务在每个安全点检查 closing 标志，关闭开始后不再重试任何操作。
//! 重启协作方的动作经 `unless_closing` 执行，与关闭流程互斥。

use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::signal::CloseEvent;

/// 关闭回调 Hook
///
/// 持有长时间运行协作方的模块通过实现此 trait 响应关闭
pub trait LifecycleHook: Send + Sync {
    fn name(&self) -> &str;

    fn on_shutdown(&self) -> Result<()>;
}

pub struct Lifecycle {
    shutdown_requested: AtomicBool,
    closing: AtomicBool,
    close: CloseEvent,
    ready_for_final_close: AtomicBool,
    hooks: RwLock<Vec<Arc<dyn LifecycleHook>>>,
    /// 关闭流程与 `unless_closing` 互斥
    transition: Mutex<()>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            shutdown_requested: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            close: CloseEvent::new(),
            ready_for_final_close: AtomicBool::new(false),
            hooks: RwLock::new(Vec::new()),
            transition: Mutex::new(()),
        }
    }

    pub fn register_hook(&self, hook: Arc<dyn LifecycleHook>) {
        let mut hooks = self.hooks.write();
        hooks.push(hook);
        info!("✅ 生命周期 Hook 已注册: 当前共 {} 个", hooks.len());
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub fn close_event(&self) -> &CloseEvent {
        &self.close
    }

    /// 请求关闭。只有第一次调用生效并返回 true。
    ///
    /// 按注册顺序执行 Hook，某个 Hook 失败会记录错误但继续执行其他 Hook
    pub fn request_shutdown(&self) -> bool {
        if self
            .shutdown_requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        info!("🔄 请求关闭，通知所有模块停止");
        {
            let _transition = self.transition.lock();
            self.closing.store(true, Ordering::SeqCst);

            let hooks: Vec<_> = self.hooks.read().clone();
            for hook in hooks {
                match catch_unwind(AssertUnwindSafe(|| hook.on_shutdown())) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("⚠️ Hook {} 停止失败: {}", hook.name(), e),
                    Err(_) => warn!("⚠️ Hook {} 停止时 panic", hook.name()),
                }
            }
        }

        self.close.set();
        info!("✅ 关闭事件已触发");
        true
    }

    /// 关闭尚未开始时执行 `f`，否则跳过并返回 None
    ///
    /// `f` 执行期间关闭流程等待；Hook 的停止动作总在 `f` 之后
    pub fn unless_closing<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> T,
    {
        let _transition = self.transition.lock();
        if self.closing.load(Ordering::SeqCst) {
            return None;
        }
        Some(f())
    }

    /// 后台线程全部退出后调用；只有第一次返回 true
    pub fn mark_ready_for_final_close(&self) -> bool {
        self.ready_for_final_close
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn ready_for_final_close(&self) -> bool {
        self.ready_for_final_close.load(Ordering::Acquire)
    }
}
