//! 外部协作方接口
//!
//! 核心只通过这些 trait 驱动日志监视器、远端拉取器、事件上传器、同步引擎、
//! 历史构建器以及启动初始化任务。所有实现都必须是线程安全的：
//! 它们会在 UI 线程和两个后台线程上被调用。

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::history::History;
use crate::journal::JournalEntry;
use crate::refresh::RefreshRequest;
use crate::sync_state::SyncState;

/// 监视器发现新日志条目时调用（监视器线程上）
pub type EntrySink = Arc<dyn Fn(JournalEntry) + Send + Sync>;

/// 日志文件监视器
pub trait JournalMonitor: Send + Sync {
    /// 注册新条目回调
    fn attach(&self, sink: EntrySink);

    fn start_monitor(&self);

    /// 返回后到下一次 `start_monitor` 之前不得再投递条目
    fn stop_monitor(&self);

    /// 扫描日志目录并入库（历史构建时调用）
    fn parse_journal_files(&self, force_reload: bool) -> Result<()> {
        let _ = force_reload;
        Ok(())
    }
}

/// 远端拉取器下载到新数据时调用
pub type DownloadedCallback = Arc<dyn Fn() + Send + Sync>;

/// 远端日志拉取器（按指挥官）
pub trait RemoteFetcher: Send + Sync {
    fn commander_id(&self) -> i64;
    fn start(&self);
    /// 请求停止，不等待
    fn async_stop(&self);
    /// 被替换前调用，等待后台任务退出
    fn stop_check(&self);
}

pub trait FetcherFactory: Send + Sync {
    fn create(&self, commander_id: i64, downloaded: DownloadedCallback) -> Arc<dyn RemoteFetcher>;
}

impl<F> FetcherFactory for F
where
    F: Fn(i64, DownloadedCallback) -> Arc<dyn RemoteFetcher> + Send + Sync,
{
    fn create(&self, commander_id: i64, downloaded: DownloadedCallback) -> Arc<dyn RemoteFetcher> {
        self(commander_id, downloaded)
    }
}

/// 日志事件上传客户端
pub trait EventUploader: Send + Sync {
    fn name(&self) -> &str;
    fn stop_sync(&self);
}

pub type CancelledFn = Arc<dyn Fn() -> bool + Send + Sync>;
pub type ProgressFn = Arc<dyn Fn(Option<u8>, &str) + Send + Sync>;
pub type LogFn = Arc<dyn Fn(&str) + Send + Sync>;

/// 长任务上下文：取消判定、进度、普通日志与高亮日志回调
#[derive(Clone)]
pub struct TaskContext {
    cancelled: CancelledFn,
    progress: ProgressFn,
    log: LogFn,
    log_highlight: LogFn,
}

impl TaskContext {
    pub fn new(cancelled: CancelledFn, progress: ProgressFn, log: LogFn, log_highlight: LogFn) -> Self {
        Self {
            cancelled,
            progress,
            log,
            log_highlight,
        }
    }

    /// 不连接任何输出的上下文
    pub fn detached() -> Self {
        Self {
            cancelled: Arc::new(|| false),
            progress: Arc::new(|_: Option<u8>, _: &str| {}),
            log: Arc::new(|_: &str| {}),
            log_highlight: Arc::new(|_: &str| {}),
        }
    }

    pub fn with_cancelled<F>(mut self, cancelled: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.cancelled = Arc::new(cancelled);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        (self.cancelled)()
    }

    /// 已取消时返回 `CoreError::Cancelled`
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn report_progress(&self, percent: Option<u8>, message: &str) {
        (self.progress)(percent, message)
    }

    pub fn log(&self, text: &str) {
        (self.log)(text)
    }

    pub fn log_highlight(&self, text: &str) {
        (self.log_highlight)(text)
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// 远端参考库全量同步
pub trait SyncEngine: Send + Sync {
    /// 阻塞执行；须自行轮询 `ctx.is_cancelled()`，取消时返回 `CoreError::Cancelled`。
    /// 按实际结果填写 `state` 的 was_* / history_refresh_required。
    fn perform_sync(&self, ctx: &TaskContext, state: &mut SyncState) -> Result<()>;

    /// 本地星系目录的最后修改时间
    fn last_catalog_update(&self) -> Option<DateTime<Utc>>;

    fn total_systems(&self) -> u64;
}

/// 历史构建
pub trait HistoryBuilder: Send + Sync {
    fn load_history(
        &self,
        monitor: &dyn JournalMonitor,
        ctx: &TaskContext,
        request: &RefreshRequest,
    ) -> Result<History>;
}

/// 主工作线程一次性初始化的各个步骤，默认均为空操作
pub trait InitTasks: Send + Sync {
    /// 加载参考数据（星系别名、永久锁定的星系等）
    fn load_reference_data(&self, ctx: &TaskContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// 开始后台下载星图
    fn start_map_download(&self, ctx: &TaskContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    fn download_galactic_mapping(&self, ctx: &TaskContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// 准备星系目录（索引、缓存）
    fn prepare_catalog(&self, ctx: &TaskContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// 笔记、书签等用户数据
    fn load_user_data(&self, ctx: &TaskContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// 检测到会与本程序冲突的其他上传工具时返回其名称
    fn conflicting_uploader(&self) -> Option<String> {
        None
    }
}

// ========== 空实现 ==========

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl JournalMonitor for NoopMonitor {
    fn attach(&self, _sink: EntrySink) {}
    fn start_monitor(&self) {}
    fn stop_monitor(&self) {}
}

#[derive(Debug, Clone, Copy)]
pub struct NoopFetcher {
    commander_id: i64,
}

impl NoopFetcher {
    pub fn new(commander_id: i64) -> Self {
        Self { commander_id }
    }
}

impl RemoteFetcher for NoopFetcher {
    fn commander_id(&self) -> i64 {
        self.commander_id
    }
    fn start(&self) {}
    fn async_stop(&self) {}
    fn stop_check(&self) {}
}

/// 总是返回 `NoopFetcher`
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFetcherFactory;

impl FetcherFactory for NoopFetcherFactory {
    fn create(&self, commander_id: i64, _downloaded: DownloadedCallback) -> Arc<dyn RemoteFetcher> {
        Arc::new(NoopFetcher::new(commander_id))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSyncEngine;

impl SyncEngine for NoopSyncEngine {
    fn perform_sync(&self, _ctx: &TaskContext, _state: &mut SyncState) -> Result<()> {
        Ok(())
    }

    fn last_catalog_update(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn total_systems(&self) -> u64 {
        0
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInitTasks;

impl InitTasks for NoopInitTasks {}

/// 控制器使用的全部协作方
pub struct Collaborators {
    pub monitor: Arc<dyn JournalMonitor>,
    pub fetcher_factory: Arc<dyn FetcherFactory>,
    pub uploaders: Vec<Arc<dyn EventUploader>>,
    pub sync_engine: Arc<dyn SyncEngine>,
    pub history_builder: Arc<dyn HistoryBuilder>,
    pub init_tasks: Arc<dyn InitTasks>,
}

impl Collaborators {
    /// 历史构建器之外全部为空实现
    pub fn new(history_builder: Arc<dyn HistoryBuilder>) -> Self {
        Self {
            monitor: Arc::new(NoopMonitor),
            fetcher_factory: Arc::new(NoopFetcherFactory),
            uploaders: Vec::new(),
            sync_engine: Arc::new(NoopSyncEngine),
            history_builder,
            init_tasks: Arc::new(NoopInitTasks),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn JournalMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_fetcher_factory(mut self, factory: Arc<dyn FetcherFactory>) -> Self {
        self.fetcher_factory = factory;
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn EventUploader>) -> Self {
        self.uploaders.push(uploader);
        self
    }

    pub fn with_sync_engine(mut self, engine: Arc<dyn SyncEngine>) -> Self {
        self.sync_engine = engine;
        self
    }

    pub fn with_init_tasks(mut self, tasks: Arc<dyn InitTasks>) -> Self {
        self.init_tasks = tasks;
        self
    }
}
