//! 通知总线 - 把后台线程产生的通知投递到 UI 线程
//!
//! 功能包括：
//! - 日志行、进度、刷新/同步开始与完成、新日志条目等通知
//! - 按类型或通配符 "*" 订阅 / 取消订阅
//! - 单一投递路径：全部通知经 `UiDispatcher` 在 UI 线程按提交顺序执行
//! - 尽力投递：监听器 panic 或投递失败只记录日志，不会影响后台线程

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{CoreError, Result};
use crate::history::{History, HistoryEntry};
use crate::journal::JournalEntry;

// ========== 颜色与主题 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// UI 提供的主题色访问器
pub trait Theme: Send + Sync {
    fn normal_text(&self) -> Color;
    fn highlight_text(&self) -> Color;
    fn success_text(&self) -> Color;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTheme;

impl Theme for DefaultTheme {
    fn normal_text(&self) -> Color {
        Color::rgb(0xff, 0x80, 0x00)
    }

    fn highlight_text(&self) -> Color {
        Color::rgb(0xff, 0x00, 0x00)
    }

    fn success_text(&self) -> Color {
        Color::rgb(0x00, 0xc0, 0x00)
    }
}

/// 日志级别（决定颜色）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Normal,
    Highlight,
    Success,
}

impl LogLevel {
    pub fn color(&self, theme: &dyn Theme) -> Color {
        match self {
            LogLevel::Normal => theme.normal_text(),
            LogLevel::Highlight => theme.highlight_text(),
            LogLevel::Success => theme.success_text(),
        }
    }
}

// ========== 通知 ==========

#[derive(Debug, Clone)]
pub enum Notification {
    Log {
        text: String,
        color: Color,
        level: LogLevel,
    },
    /// percent 为 None 表示进度未知
    Progress {
        percent: Option<u8>,
        message: String,
    },
    RefreshStarting,
    /// 指挥官列表可能变化
    RefreshCommanders,
    HistoryChanged(Arc<History>),
    RefreshComplete,
    NewEntry {
        entry: HistoryEntry,
        history: Arc<History>,
    },
    /// 第二阶段处理（在所有 NewEntry 监听器之后）
    NewEntrySecond {
        entry: HistoryEntry,
        history: Arc<History>,
    },
    /// 任何指挥官的原始日志条目
    NewJournalEntry(JournalEntry),
    SyncStarting,
    SyncComplete,
    InitialSyncComplete,
    /// 后台线程全部退出
    BgSafeClose,
    FinalClose,
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Log { .. } => "log",
            Notification::Progress { .. } => "progress",
            Notification::RefreshStarting => "refresh_starting",
            Notification::RefreshCommanders => "refresh_commanders",
            Notification::HistoryChanged(_) => "history_changed",
            Notification::RefreshComplete => "refresh_complete",
            Notification::NewEntry { .. } => "new_entry",
            Notification::NewEntrySecond { .. } => "new_entry_second",
            Notification::NewJournalEntry(_) => "new_journal_entry",
            Notification::SyncStarting => "sync_starting",
            Notification::SyncComplete => "sync_complete",
            Notification::InitialSyncComplete => "initial_sync_complete",
            Notification::BgSafeClose => "bg_safe_close",
            Notification::FinalClose => "final_close",
        }
    }
}

// ========== UI 调度 ==========

pub type UiAction = Box<dyn FnOnce() + Send + 'static>;

/// 把动作放到 UI 线程执行。实现必须按提交顺序执行。
pub trait UiDispatcher: Send + Sync {
    fn invoke(&self, action: UiAction) -> Result<()>;
}

/// 在调用线程上立即执行
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl UiDispatcher for InlineDispatcher {
    fn invoke(&self, action: UiAction) -> Result<()> {
        action();
        Ok(())
    }
}

/// 通道实现的调度器：任意线程提交，UI 线程用 `UiPump` 执行
#[derive(Clone)]
pub struct UiQueue {
    sender: Sender<UiAction>,
}

pub struct UiPump {
    receiver: Receiver<UiAction>,
}

pub fn ui_queue() -> (UiQueue, UiPump) {
    let (sender, receiver) = unbounded();
    (UiQueue { sender }, UiPump { receiver })
}

impl UiDispatcher for UiQueue {
    fn invoke(&self, action: UiAction) -> Result<()> {
        self.sender
            .send(action)
            .map_err(|_| CoreError::ShuttingDown("UI queue closed".to_string()))
    }
}

const PUMP_POLL: Duration = Duration::from_millis(10);

impl UiPump {
    /// 执行当前已排队的动作
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while let Ok(action) = self.receiver.try_recv() {
            action();
            count += 1;
        }
        count
    }

    /// 持续执行一段时间
    pub fn run_for(&self, duration: Duration) -> usize {
        let deadline = Instant::now() + duration;
        let mut count = 0;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return count;
            }
            match self.receiver.recv_timeout(deadline - now) {
                Ok(action) => {
                    action();
                    count += 1;
                }
                Err(RecvTimeoutError::Timeout) => return count,
                Err(RecvTimeoutError::Disconnected) => return count,
            }
        }
    }

    /// 执行直到条件成立；超时返回 false
    pub fn run_until<F: FnMut() -> bool>(&self, mut done: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            match self.receiver.recv_timeout(PUMP_POLL) {
                Ok(action) => action(),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return done(),
            }
        }
    }
}

// ========== 总线 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub type Listener = Arc<dyn Fn(&Notification) + Send + Sync>;

/// 通配订阅
pub const ALL_KINDS: &str = "*";

/// 投递统计
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    pub total_notifications: u64,
    pub notifications_by_kind: HashMap<String, u64>,
    pub listener_count: usize,
    pub listener_panics: u64,
    /// UI 线程上执行的动作 panic 次数
    pub action_panics: u64,
    pub dispatch_failures: u64,
}

struct Subscription {
    id: SubscriptionId,
    kind: String,
    listener: Listener,
}

struct BusInner {
    dispatcher: Arc<dyn UiDispatcher>,
    theme: Arc<dyn Theme>,
    listeners: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
    stats: Mutex<EventStats>,
    log_text: Mutex<String>,
}

#[derive(Clone)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl NotificationBus {
    pub fn new(dispatcher: Arc<dyn UiDispatcher>, theme: Arc<dyn Theme>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                dispatcher,
                theme,
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                stats: Mutex::new(EventStats::default()),
                log_text: Mutex::new(String::new()),
            }),
        }
    }

    pub fn theme(&self) -> &dyn Theme {
        self.inner.theme.as_ref()
    }

    /// 订阅某一类通知（`kind` 为 `Notification::kind()` 或 "*"）
    pub fn subscribe<F>(&self, kind: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.inner.listeners.write();
        listeners.push(Subscription {
            id,
            kind: kind.to_string(),
            listener: Arc::new(listener),
        });
        self.inner.stats.lock().listener_count = listeners.len();
        debug!("Added listener {:?} for notification kind: {}", id, kind);
        id
    }

    pub fn subscribe_all<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.subscribe(ALL_KINDS, listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|s| s.id != id);
        self.inner.stats.lock().listener_count = listeners.len();
        before != listeners.len()
    }

    pub fn clear_listeners(&self) {
        self.inner.listeners.write().clear();
        self.inner.stats.lock().listener_count = 0;
        info!("Cleared all notification listeners");
    }

    /// 在 UI 线程执行任意动作；失败只记录
    ///
    /// 动作内的 panic 在 UI 线程上被捕获并计数，不会展开到调度器
    pub fn invoke(&self, action: UiAction) -> bool {
        let inner = Arc::downgrade(&self.inner);
        let action: UiAction = Box::new(move || {
            if catch_unwind(AssertUnwindSafe(action)).is_err() {
                if let Some(inner) = inner.upgrade() {
                    inner.stats.lock().action_panics += 1;
                }
                error!("❌ UI 动作 panic");
            }
        });
        match self.inner.dispatcher.invoke(action) {
            Ok(()) => true,
            Err(e) => {
                self.inner.stats.lock().dispatch_failures += 1;
                warn!("⚠️ UI 调度失败: {}", e);
                false
            }
        }
    }

    /// 从任意线程投递通知
    pub fn post(&self, notification: Notification) -> bool {
        let bus = self.clone();
        self.invoke(Box::new(move || bus.deliver(&notification)))
    }

    /// 在 UI 线程上同步投递
    pub fn deliver(&self, notification: &Notification) {
        {
            let mut stats = self.inner.stats.lock();
            stats.total_notifications += 1;
            *stats
                .notifications_by_kind
                .entry(notification.kind().to_string())
                .or_insert(0) += 1;
        }

        if let Notification::Log { text, .. } = notification {
            let mut log_text = self.inner.log_text.lock();
            log_text.push_str(text);
            log_text.push('\n');
        }

        // 快照后释放锁，监听器内可以再订阅或投递
        let targets: Vec<Listener> = self
            .inner
            .listeners
            .read()
            .iter()
            .filter(|s| s.kind == ALL_KINDS || s.kind == notification.kind())
            .map(|s| s.listener.clone())
            .collect();

        for listener in targets {
            if catch_unwind(AssertUnwindSafe(|| listener(notification))).is_err() {
                self.inner.stats.lock().listener_panics += 1;
                error!("❌ 通知监听器 panic: {}", notification.kind());
            }
        }
    }

    pub fn log_notification(&self, text: impl Into<String>, level: LogLevel) -> Notification {
        Notification::Log {
            text: text.into(),
            color: level.color(self.theme()),
            level,
        }
    }

    pub fn post_log(&self, text: impl Into<String>, level: LogLevel) -> bool {
        self.post(self.log_notification(text, level))
    }

    pub fn deliver_log(&self, text: impl Into<String>, level: LogLevel) {
        self.deliver(&self.log_notification(text, level));
    }

    /// 累积的日志文本
    pub fn log_text(&self) -> String {
        self.inner.log_text.lock().clone()
    }

    pub fn stats(&self) -> EventStats {
        self.inner.stats.lock().clone()
    }
}
