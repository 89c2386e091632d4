//! 控制器 - 刷新 / 同步编排的入口
//!
//! 启动顺序：
//! 1. `Controller::initialize`：检查配置 → 日志 → 打开存储（失败则中止）
//! 2. `Controller::new`：构造共享上下文与协作方
//! 3. `init`：挂接日志监视器，启动主工作线程
//! 4. `post_init_shown`：UI 就绪，主线程开始初始化与首轮同步
//!
//! 全部状态放在 `Shared` 中，由控制器持有并克隆给两个后台线程。

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::collaborators::{
    Collaborators, DownloadedCallback, EventUploader, FetcherFactory, HistoryBuilder, InitTasks,
    JournalMonitor, RemoteFetcher, SyncEngine, TaskContext,
};
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::events::{
    EventStats, LogLevel, Notification, NotificationBus, SubscriptionId, Theme, UiDispatcher,
};
use crate::history::{History, SharedHistory};
use crate::journal::JournalEntry;
use crate::lifecycle::{Lifecycle, LifecycleHook};
use crate::logging;
use crate::refresh::{RefreshCoalescer, RefreshPhase, RefreshRequest};
use crate::signal::AutoEvent;
use crate::storage::Storage;
use crate::sync_state::{SyncCoalescer, SyncState};
use crate::version;
use crate::workers::{main_worker, MainWorkerState, RefreshWorkerState};

/// 两个后台线程与 UI 线程共享的上下文
pub(crate) struct Shared {
    pub(crate) config: CoreConfig,
    pub(crate) storage: Arc<Storage>,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) bus: NotificationBus,
    pub(crate) history: SharedHistory,
    pub(crate) refresh: RefreshCoalescer,
    pub(crate) sync: SyncCoalescer,
    /// UI 可以接收通知
    pub(crate) ui_ready: AutoEvent,
    /// 一次刷新的完成通知已投递
    pub(crate) ready_for_new_refresh: AutoEvent,
    pub(crate) monitor: Arc<dyn JournalMonitor>,
    pub(crate) fetcher: RwLock<Arc<dyn RemoteFetcher>>,
    pub(crate) fetcher_factory: Arc<dyn FetcherFactory>,
    pub(crate) uploaders: Vec<Arc<dyn EventUploader>>,
    pub(crate) sync_engine: Arc<dyn SyncEngine>,
    pub(crate) history_builder: Arc<dyn HistoryBuilder>,
    pub(crate) init_tasks: Arc<dyn InitTasks>,
    /// 同步后触发的刷新完成时输出的提示
    pub(crate) post_refresh_note: Mutex<Option<SyncState>>,
    main_state: AtomicU8,
    refresh_state: AtomicU8,
    weak_self: Weak<Shared>,
}

impl Shared {
    pub(crate) fn is_closing(&self) -> bool {
        self.lifecycle.is_closing()
    }

    pub(crate) fn set_main_state(&self, state: MainWorkerState) {
        debug!("main worker → {:?}", state);
        self.main_state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn set_refresh_state(&self, state: RefreshWorkerState) {
        debug!("refresh worker → {:?}", state);
        self.refresh_state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn main_state(&self) -> MainWorkerState {
        MainWorkerState::from_u8(self.main_state.load(Ordering::Acquire))
    }

    pub(crate) fn refresh_state(&self) -> RefreshWorkerState {
        RefreshWorkerState::from_u8(self.refresh_state.load(Ordering::Acquire))
    }

    // ========== 日志与进度（任意线程） ==========

    pub(crate) fn log(&self, text: &str, level: LogLevel) {
        match level {
            LogLevel::Highlight => warn!("{}", text),
            _ => info!("{}", text),
        }
        self.bus.post_log(text, level);
    }

    pub(crate) fn log_line(&self, text: &str) {
        self.log(text, LogLevel::Normal);
    }

    pub(crate) fn log_highlight(&self, text: &str) {
        self.log(text, LogLevel::Highlight);
    }

    pub(crate) fn log_success(&self, text: &str) {
        self.log(text, LogLevel::Success);
    }

    pub(crate) fn report_progress(&self, percent: Option<u8>, message: &str) {
        self.bus.post(Notification::Progress {
            percent,
            message: message.to_string(),
        });
    }

    /// UI 线程上同步输出日志
    pub(crate) fn deliver_log(&self, text: &str, level: LogLevel) {
        match level {
            LogLevel::Highlight => warn!("{}", text),
            _ => info!("{}", text),
        }
        self.bus.deliver_log(text, level);
    }

    pub(crate) fn deliver_progress(&self, percent: Option<u8>, message: &str) {
        self.bus.deliver(&Notification::Progress {
            percent,
            message: message.to_string(),
        });
    }

    /// 在 UI 线程执行
    pub(crate) fn invoke_ui<F>(&self, f: F) -> bool
    where
        F: FnOnce(&Arc<Shared>) + Send + 'static,
    {
        let weak = self.weak_self.clone();
        self.bus.invoke(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                f(&shared);
            }
        }))
    }

    /// 交给协作方的长任务上下文
    pub(crate) fn task_context(&self, progress_prefix: &'static str) -> TaskContext {
        let cancelled = self.weak_self.clone();
        let progress = self.weak_self.clone();
        let log = self.weak_self.clone();
        let highlight = self.weak_self.clone();
        TaskContext::new(
            Arc::new(move || cancelled.upgrade().map_or(true, |s| s.is_closing())),
            Arc::new(move |percent: Option<u8>, message: &str| {
                if let Some(s) = progress.upgrade() {
                    if progress_prefix.is_empty() || message.is_empty() {
                        s.report_progress(percent, message);
                    } else {
                        s.report_progress(percent, &format!("{} {}", progress_prefix, message));
                    }
                }
            }),
            Arc::new(move |text: &str| {
                if let Some(s) = log.upgrade() {
                    s.log_line(text);
                }
            }),
            Arc::new(move |text: &str| {
                if let Some(s) = highlight.upgrade() {
                    s.log_highlight(text);
                }
            }),
        )
    }

    // ========== 请求入口 ==========

    pub(crate) fn request_refresh(&self, mut params: RefreshRequest) -> bool {
        if self.is_closing() {
            debug!("关闭中，拒绝刷新请求");
            return false;
        }
        if params.commander.is_none() {
            params.commander = Some(self.history.commander_id());
        }
        self.refresh.request(params)
    }

    pub(crate) fn request_sync(&self, catalog: bool, refdb: bool) -> bool {
        if self.is_closing() {
            debug!("关闭中，拒绝同步请求");
            return false;
        }
        self.sync.request(catalog, refdb)
    }

    /// 远端拉取器下载到新数据后请求一次默认刷新
    pub(crate) fn downloaded_callback(&self) -> DownloadedCallback {
        downloaded_callback(self.weak_self.clone())
    }

    // ========== UI 线程 ==========

    /// 新日志条目（UI 线程）
    pub(crate) fn new_entry(&self, entry: JournalEntry) {
        if entry.commander_id == self.history.commander_id() {
            let (added, history) = self.history.append(entry.clone());
            for he in added {
                self.bus.deliver(&Notification::NewEntry {
                    entry: he.clone(),
                    history: history.clone(),
                });
                self.bus.deliver(&Notification::NewEntrySecond {
                    entry: he,
                    history: history.clone(),
                });
            }
        }

        let load_game = entry.is_load_game();
        self.bus.deliver(&Notification::NewJournalEntry(entry));

        if load_game {
            self.bus.deliver(&Notification::RefreshCommanders);
        }
    }

    pub(crate) fn refresh_displays(&self) {
        self.bus.deliver(&Notification::HistoryChanged(self.history.snapshot()));
    }
}

fn downloaded_callback(weak: Weak<Shared>) -> DownloadedCallback {
    Arc::new(move || {
        if let Some(shared) = weak.upgrade() {
            shared.request_refresh(RefreshRequest::default());
        }
    })
}

/// 关闭时停止所有长时间运行的协作方
struct CollaboratorStopHook {
    shared: Weak<Shared>,
}

impl LifecycleHook for CollaboratorStopHook {
    fn name(&self) -> &str {
        "collaborators"
    }

    fn on_shutdown(&self) -> Result<()> {
        let shared = self
            .shared
            .upgrade()
            .ok_or_else(|| CoreError::ShuttingDown("controller dropped".to_string()))?;

        for uploader in &shared.uploaders {
            debug!("停止上传: {}", uploader.name());
            uploader.stop_sync();
        }
        shared.fetcher.read().async_stop();
        shared.monitor.stop_monitor();
        shared.log_highlight("Closing down, please wait..");
        Ok(())
    }
}

pub struct Controller {
    shared: Arc<Shared>,
    main_worker: Mutex<Option<JoinHandle<()>>>,
}

impl Controller {
    /// 进程级初始化。`progress_msg` 用于启动画面显示当前步骤。
    ///
    /// 日志初始化失败不影响启动，存储打开失败直接返回错误。
    pub fn initialize<F>(config: &CoreConfig, progress_msg: F) -> Result<Arc<Storage>>
    where
        F: Fn(&str),
    {
        progress_msg("Checking Config");
        config.validate()?;
        logging::init_logging(config);
        info!("🚀 edd-core {}", version::version_display());

        if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
            warn!("⚠️ 无法创建数据目录 {}: {}", config.data_dir.display(), e);
        }

        progress_msg("Scanning Memory Banks");
        let storage = Storage::open(config.database_path())?;

        progress_msg("Locating Crew Members");
        let commanders = storage.commanders()?;
        info!("👥 已知指挥官: {:?}", commanders);

        Ok(Arc::new(storage))
    }

    pub fn new(
        config: CoreConfig,
        storage: Arc<Storage>,
        theme: Arc<dyn Theme>,
        dispatcher: Arc<dyn UiDispatcher>,
        collaborators: Collaborators,
    ) -> Self {
        let Collaborators {
            monitor,
            fetcher_factory,
            uploaders,
            sync_engine,
            history_builder,
            init_tasks,
        } = collaborators;

        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let fetcher =
                fetcher_factory.create(config.initial_commander, downloaded_callback(weak.clone()));
            Shared {
                bus: NotificationBus::new(dispatcher, theme),
                config,
                storage,
                lifecycle: Lifecycle::new(),
                history: SharedHistory::default(),
                refresh: RefreshCoalescer::new(),
                sync: SyncCoalescer::new(),
                ui_ready: AutoEvent::new(),
                ready_for_new_refresh: AutoEvent::new(),
                monitor,
                fetcher: RwLock::new(fetcher),
                fetcher_factory,
                uploaders,
                sync_engine,
                history_builder,
                init_tasks,
                post_refresh_note: Mutex::new(None),
                main_state: AtomicU8::new(MainWorkerState::NotStarted as u8),
                refresh_state: AtomicU8::new(RefreshWorkerState::NotStarted as u8),
                weak_self: weak.clone(),
            }
        });

        shared.lifecycle.register_hook(Arc::new(CollaboratorStopHook {
            shared: Arc::downgrade(&shared),
        }));

        Self {
            shared,
            main_worker: Mutex::new(None),
        }
    }

    /// 挂接日志监视器并启动主工作线程
    pub fn init(&self) -> Result<()> {
        let mut main_worker = self.main_worker.lock();
        if main_worker.is_some() {
            return Err(CoreError::Runtime("controller already initialised".to_string()));
        }

        let weak = Arc::downgrade(&self.shared);
        self.shared.monitor.attach(Arc::new(move |entry: JournalEntry| {
            if let Some(shared) = weak.upgrade() {
                shared.invoke_ui(move |s| s.new_entry(entry));
            }
        }));

        let shared = self.shared.clone();
        shared.set_main_state(MainWorkerState::WaitingForUiReady);
        let handle = thread::Builder::new()
            .name("edd-main-worker".to_string())
            .spawn(move || main_worker::run(shared))?;
        *main_worker = Some(handle);

        info!("✅ 主工作线程已启动");
        Ok(())
    }

    /// UI 构造完成
    pub fn post_init_loaded(&self) {
        let config = &self.shared.config;
        info!(
            "⚙️ data_dir={} no_systems_load={} no_load={} commander={}",
            config.data_dir.display(),
            config.no_systems_load,
            config.no_load,
            config.initial_commander
        );
    }

    /// UI 已显示，可以开始初始加载
    pub fn post_init_shown(&self) {
        self.shared.ui_ready.set();
    }

    /// 请求刷新历史。关闭中或与已排队参数相同时返回 false。
    pub fn request_refresh(&self, params: RefreshRequest) -> bool {
        self.shared.request_refresh(params)
    }

    /// 请求同步，返回本次请求是否唤醒了同步
    pub fn request_sync(&self, catalog: bool, refdb: bool) -> bool {
        self.shared.request_sync(catalog, refdb)
    }

    /// 请求关闭；重复调用无效果
    pub fn request_shutdown(&self) -> bool {
        self.shared.lifecycle.request_shutdown()
    }

    /// 新日志条目，须在 UI 线程调用
    pub fn new_entry(&self, entry: JournalEntry) {
        self.shared.new_entry(entry);
    }

    /// 重新发出 HistoryChanged（UI 线程）
    pub fn refresh_displays(&self) {
        self.shared.refresh_displays();
    }

    /// 重新计算序号并刷新显示（UI 线程）
    pub fn recalculate_history(&self) {
        self.shared.history.recalculate();
        self.shared.refresh_displays();
    }

    pub fn history(&self) -> Arc<History> {
        self.shared.history.snapshot()
    }

    pub fn log_text(&self) -> String {
        self.shared.bus.log_text()
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.shared.bus
    }

    pub fn subscribe<F>(&self, kind: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(kind, listener)
    }

    /// 输出日志（任意线程）
    pub fn log_line(&self, text: &str) {
        self.shared.log_line(text);
    }

    pub fn log_highlight(&self, text: &str) {
        self.shared.log_highlight(text);
    }

    pub fn log_success(&self, text: &str) {
        self.shared.log_success(text);
    }

    pub fn report_progress(&self, percent: Option<u8>, message: &str) {
        self.shared.report_progress(percent, message);
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.shared.storage
    }

    pub fn config(&self) -> &CoreConfig {
        &self.shared.config
    }

    pub fn current_fetcher(&self) -> Arc<dyn RemoteFetcher> {
        self.shared.fetcher.read().clone()
    }

    pub fn is_closing(&self) -> bool {
        self.shared.is_closing()
    }

    pub fn ready_for_final_close(&self) -> bool {
        self.shared.lifecycle.ready_for_final_close()
    }

    pub fn refresh_phase(&self) -> RefreshPhase {
        self.shared.refresh.phase()
    }

    pub fn pending_sync(&self) -> SyncState {
        self.shared.sync.pending()
    }

    /// 通知总线统计
    pub fn stats(&self) -> EventStats {
        self.shared.bus.stats()
    }

    pub fn main_worker_state(&self) -> MainWorkerState {
        self.shared.main_state()
    }

    pub fn refresh_worker_state(&self) -> RefreshWorkerState {
        self.shared.refresh_state()
    }

    /// 等待主工作线程退出（刷新线程由主线程回收）
    pub fn join(&self) -> Result<()> {
        let handle = self.main_worker.lock().take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| CoreError::Runtime("main worker panicked".to_string())),
            None => Ok(()),
        }
    }
}
