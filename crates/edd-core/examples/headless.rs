//! 无界面运行演示
//!
//! 用法：`cargo run --example headless -- <日志目录> [运行秒数]`
//!
//! 主线程充当 UI 线程，不断执行 `UiPump` 中排队的动作；
//! 日志目录下的 `*.log` 文件按行解析为日志条目，新增行实时推送给控制器。

use edd_core::{
    ui_queue, Collaborators, Controller, CoreConfig, DefaultTheme, EntrySink, JournalEntry,
    JournalMonitor, Notification, RefreshRequest, Result, Storage, StoredHistoryBuilder,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const COMMANDER: i64 = 1;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 轮询目录的简单日志监视器
struct DirectoryMonitor {
    dir: PathBuf,
    storage: Arc<Storage>,
    /// 每个文件已读取的行数
    offsets: Arc<Mutex<HashMap<PathBuf, usize>>>,
    sink: Arc<Mutex<Option<EntrySink>>>,
    running: Arc<AtomicBool>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl DirectoryMonitor {
    fn new(dir: PathBuf, storage: Arc<Storage>) -> Self {
        Self {
            dir,
            storage,
            offsets: Arc::new(Mutex::new(HashMap::new())),
            sink: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            poller: Mutex::new(None),
        }
    }
}

/// 读取新增的行并入库，返回新条目
fn scan(
    dir: &Path,
    storage: &Storage,
    offsets: &Mutex<HashMap<PathBuf, usize>>,
) -> Result<Vec<JournalEntry>> {
    let mut found = Vec::new();
    for item in std::fs::read_dir(dir)? {
        let path = item?.path();
        if path.extension().map_or(true, |ext| ext != "log") {
            continue;
        }

        let text = std::fs::read_to_string(&path)?;
        let mut offsets = offsets.lock();
        let seen = offsets.entry(path.clone()).or_insert(0);
        for line in text.lines().skip(*seen) {
            *seen += 1;
            if line.trim().is_empty() {
                continue;
            }
            match JournalEntry::parse_line(COMMANDER, line) {
                Ok(entry) => {
                    let id = storage.insert_journal_entry(&entry)?;
                    found.push(entry.with_id(id));
                }
                Err(e) => println!("⚠️ 跳过无法解析的行 {}: {}", path.display(), e),
            }
        }
    }
    Ok(found)
}

impl JournalMonitor for DirectoryMonitor {
    fn attach(&self, sink: EntrySink) {
        *self.sink.lock() = Some(sink);
    }

    fn start_monitor(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let dir = self.dir.clone();
        let storage = self.storage.clone();
        let offsets = self.offsets.clone();
        let sink = self.sink.clone();
        let running = self.running.clone();
        let handle = thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                match scan(&dir, &storage, &offsets) {
                    Ok(entries) => {
                        let sink = sink.lock().clone();
                        if let Some(sink) = sink {
                            entries.into_iter().for_each(|e| sink(e));
                        }
                    }
                    Err(e) => println!("⚠️ 扫描日志目录失败: {}", e),
                }
                thread::sleep(POLL_INTERVAL);
            }
        });
        *self.poller.lock() = Some(handle);
    }

    fn stop_monitor(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.poller.lock().take() {
            let _ = handle.join();
        }
    }

    fn parse_journal_files(&self, force_reload: bool) -> Result<()> {
        if force_reload {
            println!("🔁 强制重新扫描日志目录");
        }
        let entries = scan(&self.dir, &self.storage, &self.offsets)?;
        println!("📂 读取到 {} 条新日志", entries.len());
        Ok(())
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut args = std::env::args().skip(1);
    let journal_dir = PathBuf::from(args.next().unwrap_or_else(|| ".".to_string()));
    let run_for = Duration::from_secs(args.next().and_then(|s| s.parse().ok()).unwrap_or(10));

    println!("\n==============================================");
    println!("🛰️ EDD 无界面运行: {}", journal_dir.display());
    println!("==============================================\n");

    let data_dir = std::env::temp_dir().join("edd-headless");
    let config = CoreConfig::builder()
        .data_dir(&data_dir)
        .no_systems_load(true)
        .trace_log(false)
        .initial_commander(COMMANDER)
        .build();

    let storage = Controller::initialize(&config, |step| println!("⏳ {}", step))?;

    let monitor = Arc::new(DirectoryMonitor::new(journal_dir, storage.clone()));
    let builder = Arc::new(StoredHistoryBuilder::new(storage.clone()));
    let collaborators = Collaborators::new(builder).with_monitor(monitor);

    let (queue, pump) = ui_queue();
    let controller = Controller::new(
        config,
        storage,
        Arc::new(DefaultTheme),
        Arc::new(queue),
        collaborators,
    );

    controller.subscribe("*", |n| match n {
        Notification::Log { text, color, .. } => println!("[{}] {}", color, text),
        Notification::HistoryChanged(history) => {
            println!("📚 历史已更新: {} 条", history.len())
        }
        Notification::NewEntry { entry, .. } => {
            println!("🆕 #{} {}", entry.index, entry.journal.event)
        }
        other => println!("📣 {}", other.kind()),
    });

    controller.init()?;
    controller.post_init_loaded();
    controller.post_init_shown();

    // UI 循环
    let deadline = Instant::now() + run_for;
    let mut reloaded = false;
    while Instant::now() < deadline {
        pump.run_for(Duration::from_millis(100));
        if !reloaded && deadline.saturating_duration_since(Instant::now()) < run_for / 2 {
            reloaded = true;
            controller.request_refresh(
                RefreshRequest::for_commander(COMMANDER).force_journal_reload(true),
            );
        }
    }

    controller.request_shutdown();
    pump.run_until(|| controller.ready_for_final_close(), Duration::from_secs(10));
    pump.run_pending();
    controller.join()?;

    println!("\n✅ 已退出，共 {} 条历史", controller.history().len());
    Ok(())
}
