//! 测试用协作方与控制器脚手架
//!
//! 测试线程充当 UI 线程：所有通知经 `UiPump` 在测试线程上执行。

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::{
    Collaborators, DownloadedCallback, EntrySink, EventUploader, FetcherFactory, HistoryBuilder,
    InitTasks, JournalMonitor, RemoteFetcher, SyncEngine, TaskContext,
};
use crate::config::CoreConfig;
use crate::controller::Controller;
use crate::error::{CoreError, Result};
use crate::events::{ui_queue, DefaultTheme, Notification, UiPump};
use crate::history::History;
use crate::journal::JournalEntry;
use crate::refresh::RefreshRequest;
use crate::storage::Storage;
use crate::sync_state::SyncState;

pub const WAIT: Duration = Duration::from_secs(10);

// ========== 闸门 ==========

/// 让协作方在调用中途停住，直到测试放行
pub struct Gate {
    entered: Sender<()>,
    release: Receiver<()>,
}

pub struct GateHandle {
    entered: Receiver<()>,
    release: Sender<()>,
}

pub fn gate() -> (Gate, GateHandle) {
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    (
        Gate {
            entered: entered_tx,
            release: release_rx,
        },
        GateHandle {
            entered: entered_rx,
            release: release_tx,
        },
    )
}

impl Gate {
    fn pass(self) {
        let _ = self.entered.send(());
        let _ = self.release.recv_timeout(WAIT);
    }
}

impl GateHandle {
    /// 等待协作方进入闸门
    pub fn wait_entered(&self) {
        self.entered
            .recv_timeout(WAIT)
            .expect("collaborator never reached the gate");
    }

    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

type GateSlot = Mutex<Option<Gate>>;

fn pass_gate(slot: &GateSlot) {
    let gate = slot.lock().take();
    if let Some(gate) = gate {
        gate.pass();
    }
}

// ========== 日志监视器 ==========

type StopHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct RecordingMonitor {
    sink: Mutex<Option<EntrySink>>,
    pub events: Mutex<Vec<&'static str>>,
    /// 下一次 start_monitor 时 panic
    pub panic_on_start: AtomicBool,
    /// 下一次 stop_monitor 记录之后执行
    on_next_stop: Mutex<Option<StopHook>>,
}

impl RecordingMonitor {
    /// 模拟监视器线程发现新条目
    pub fn emit(&self, entry: JournalEntry) {
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink(entry);
        }
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| **e == event).count()
    }

    pub fn on_next_stop<F: FnOnce() + Send + 'static>(&self, f: F) {
        *self.on_next_stop.lock() = Some(Box::new(f));
    }

    pub fn last_event(&self) -> Option<&'static str> {
        self.events.lock().last().copied()
    }
}

impl JournalMonitor for RecordingMonitor {
    fn attach(&self, sink: EntrySink) {
        *self.sink.lock() = Some(sink);
    }

    fn start_monitor(&self) {
        self.events.lock().push("start");
        if self.panic_on_start.swap(false, Ordering::SeqCst) {
            panic!("journal monitor failed to attach");
        }
    }

    fn stop_monitor(&self) {
        self.events.lock().push("stop");
        let hook = self.on_next_stop.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn parse_journal_files(&self, _force_reload: bool) -> Result<()> {
        self.events.lock().push("parse");
        Ok(())
    }
}

// ========== 远端拉取器 ==========

pub struct RecordingFetcher {
    commander_id: i64,
    log: Arc<Mutex<Vec<(i64, &'static str)>>>,
}

impl RemoteFetcher for RecordingFetcher {
    fn commander_id(&self) -> i64 {
        self.commander_id
    }

    fn start(&self) {
        self.log.lock().push((self.commander_id, "start"));
    }

    fn async_stop(&self) {
        self.log.lock().push((self.commander_id, "async_stop"));
    }

    fn stop_check(&self) {
        self.log.lock().push((self.commander_id, "stop_check"));
    }
}

#[derive(Default)]
pub struct RecordingFactory {
    pub created: Mutex<Vec<i64>>,
    pub callbacks: Mutex<Vec<DownloadedCallback>>,
    pub log: Arc<Mutex<Vec<(i64, &'static str)>>>,
}

impl RecordingFactory {
    /// 触发最近一个拉取器的“已下载”回调
    pub fn fire_downloaded(&self) {
        let callback = self.callbacks.lock().last().cloned();
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl FetcherFactory for RecordingFactory {
    fn create(&self, commander_id: i64, downloaded: DownloadedCallback) -> Arc<dyn RemoteFetcher> {
        self.created.lock().push(commander_id);
        self.callbacks.lock().push(downloaded);
        Arc::new(RecordingFetcher {
            commander_id,
            log: self.log.clone(),
        })
    }
}

#[derive(Default)]
pub struct RecordingUploader {
    pub stopped: AtomicBool,
}

impl EventUploader for RecordingUploader {
    fn name(&self) -> &str {
        "recording"
    }

    fn stop_sync(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

// ========== 历史构建器 ==========

#[derive(Default)]
pub struct ScriptedHistoryBuilder {
    pub calls: Mutex<Vec<RefreshRequest>>,
    /// 每个指挥官的日志
    pub journals: Mutex<Vec<JournalEntry>>,
    pub fail_next: AtomicBool,
    pub panic_next: AtomicBool,
    gate: GateSlot,
}

impl ScriptedHistoryBuilder {
    /// 下一次调用停在闸门处
    pub fn gate_next(&self) -> GateHandle {
        let (gate, handle) = gate();
        *self.gate.lock() = Some(gate);
        handle
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn last_call(&self) -> Option<RefreshRequest> {
        self.calls.lock().last().cloned()
    }
}

impl HistoryBuilder for ScriptedHistoryBuilder {
    fn load_history(
        &self,
        _monitor: &dyn JournalMonitor,
        ctx: &TaskContext,
        request: &RefreshRequest,
    ) -> Result<History> {
        self.calls.lock().push(request.clone());
        ctx.report_progress(Some(50), "scripted");
        pass_gate(&self.gate);

        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("history builder blew up");
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CoreError::collaborator("journal directory missing"));
        }

        let commander_id = request.commander.unwrap_or(-1);
        let journal = self
            .journals
            .lock()
            .iter()
            .filter(|e| e.commander_id == commander_id)
            .cloned()
            .collect();
        Ok(History::from_entries(commander_id, journal))
    }
}

// ========== 同步引擎 ==========

#[derive(Default)]
pub struct ScriptedSyncEngine {
    pub calls: Mutex<Vec<SyncState>>,
    pub history_refresh_required: AtomicBool,
    pub was_first_run: AtomicBool,
    pub fail_next: AtomicBool,
    pub total: AtomicU64,
    gate: GateSlot,
}

impl ScriptedSyncEngine {
    pub fn gate_next(&self) -> GateHandle {
        let (gate, handle) = gate();
        *self.gate.lock() = Some(gate);
        handle
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl SyncEngine for ScriptedSyncEngine {
    fn perform_sync(&self, ctx: &TaskContext, state: &mut SyncState) -> Result<()> {
        self.calls.lock().push(state.clone());
        pass_gate(&self.gate);
        ctx.check_cancelled()?;

        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CoreError::collaborator("remote unavailable"));
        }
        state.was_first_run = self.was_first_run.load(Ordering::SeqCst);
        state.was_catalog_or_refdb = state.catalog_sync || state.refdb_sync;
        state.history_refresh_required = self.history_refresh_required.load(Ordering::SeqCst);
        Ok(())
    }

    fn last_catalog_update(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        Some(chrono::Utc::now())
    }

    fn total_systems(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct ScriptedInitTasks {
    pub conflicting: Option<String>,
    pub fail_reference_data: bool,
}

impl InitTasks for ScriptedInitTasks {
    fn load_reference_data(&self, _ctx: &TaskContext) -> Result<()> {
        if self.fail_reference_data {
            Err(CoreError::collaborator("body designation map missing"))
        } else {
            Ok(())
        }
    }

    fn conflicting_uploader(&self) -> Option<String> {
        self.conflicting.clone()
    }
}

// ========== 控制器脚手架 ==========

/// 记录 UI 线程收到的全部通知
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Notification>>>,
}

impl Recorder {
    pub fn kinds(&self) -> Vec<&'static str> {
        self.seen.lock().iter().map(|n| n.kind()).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.seen.lock().iter().filter(|n| n.kind() == kind).count()
    }

    pub fn logs(&self) -> Vec<String> {
        self.seen
            .lock()
            .iter()
            .filter_map(|n| match n {
                Notification::Log { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn has_log(&self, needle: &str) -> bool {
        self.logs().iter().any(|l| l.contains(needle))
    }
}

pub fn test_config() -> CoreConfig {
    CoreConfig::builder()
        .data_dir(std::env::temp_dir().join("edd-core-tests"))
        .trace_log(false)
        .no_systems_load(true)
        .initial_commander(1)
        .build()
}

pub struct Harness {
    pub controller: Controller,
    pub pump: UiPump,
    pub recorder: Recorder,
    pub storage: Arc<Storage>,
    pub monitor: Arc<RecordingMonitor>,
    pub factory: Arc<RecordingFactory>,
    pub uploader: Arc<RecordingUploader>,
    pub builder: Arc<ScriptedHistoryBuilder>,
    pub engine: Arc<ScriptedSyncEngine>,
}

impl Harness {
    pub fn new(config: CoreConfig) -> Self {
        Self::with_init_tasks(config, ScriptedInitTasks::default())
    }

    pub fn with_init_tasks(config: CoreConfig, init_tasks: ScriptedInitTasks) -> Self {
        let storage = Arc::new(Storage::open_in_memory().expect("in-memory storage"));
        let monitor = Arc::new(RecordingMonitor::default());
        let factory = Arc::new(RecordingFactory::default());
        let uploader = Arc::new(RecordingUploader::default());
        let builder = Arc::new(ScriptedHistoryBuilder::default());
        let engine = Arc::new(ScriptedSyncEngine::default());

        let collaborators = Collaborators::new(builder.clone())
            .with_monitor(monitor.clone())
            .with_fetcher_factory(factory.clone())
            .with_uploader(uploader.clone())
            .with_sync_engine(engine.clone())
            .with_init_tasks(Arc::new(init_tasks));

        let (queue, pump) = ui_queue();
        let controller = Controller::new(
            config,
            storage.clone(),
            Arc::new(DefaultTheme),
            Arc::new(queue),
            collaborators,
        );

        let recorder = Recorder::default();
        let seen = recorder.seen.clone();
        controller.subscribe("*", move |n| seen.lock().push(n.clone()));

        Self {
            controller,
            pump,
            recorder,
            storage,
            monitor,
            factory,
            uploader,
            builder,
            engine,
        }
    }

    /// init + post_init_shown
    pub fn start(&self) {
        self.controller.init().expect("init");
        self.controller.post_init_loaded();
        self.controller.post_init_shown();
    }

    /// 在测试线程上执行 UI 动作直到条件成立
    pub fn pump_until<F: FnMut() -> bool>(&self, what: &str, done: F) {
        assert!(self.pump.run_until(done, WAIT), "timed out waiting for {}", what);
    }

    /// 不执行 UI 动作，只等待后台线程到达某个状态
    pub fn wait_without_pumping<F: Fn() -> bool>(&self, what: &str, done: F) {
        let deadline = std::time::Instant::now() + WAIT;
        while !done() {
            assert!(
                std::time::Instant::now() < deadline,
                "timed out waiting for {}",
                what
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn wait_for_count(&self, kind: &str, count: usize) {
        let recorder = self.recorder.clone();
        self.pump_until(kind, || recorder.count(kind) >= count);
    }

    /// 让已排队的动作跑完，并给后台线程一点时间产生更多动作
    pub fn settle(&self) {
        self.pump.run_for(Duration::from_millis(150));
    }

    pub fn shutdown_and_join(&self) {
        self.controller.request_shutdown();
        let recorder = self.recorder.clone();
        self.pump_until("final close", || recorder.count("final_close") == 1);
        self.controller.join().expect("main worker joined");
        self.pump.run_pending();
    }
}
