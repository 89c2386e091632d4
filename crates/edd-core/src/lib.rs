//! EDD Core - 日志伴侣程序的刷新 / 同步编排核心
//!
//! 本库负责：
//! - 🔄 合并刷新请求：一串请求只执行一次，使用最新参数
//! - 🚀 多阶段启动：配置 → 数据库 → 首轮同步 → 历史加载 → 实时监视
//! - 🌐 全量同步与实时日志监视并发进行，同步请求按类型合并
//! - 📣 通知总线：所有通知按顺序投递到 UI 线程
//! - 🛑 确定性关闭：不留孤儿线程，不丢请求
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use edd_core::{ui_queue, Collaborators, Controller, CoreConfig, DefaultTheme, StoredHistoryBuilder};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoreConfig::builder().data_dir("/tmp/edd").no_systems_load(true).build();
//!     let storage = Controller::initialize(&config, |step| println!("{}", step))?;
//!
//!     let (queue, pump) = ui_queue();
//!     let builder = Arc::new(StoredHistoryBuilder::new(storage.clone()));
//!     let controller = Controller::new(
//!         config,
//!         storage,
//!         Arc::new(DefaultTheme),
//!         Arc::new(queue),
//!         Collaborators::new(builder),
//!     );
//!
//!     controller.init()?;
//!     controller.post_init_loaded();
//!     controller.post_init_shown();
//!     pump.run_for(Duration::from_secs(1));
//!
//!     controller.request_shutdown();
//!     pump.run_until(|| controller.ready_for_final_close(), Duration::from_secs(5));
//!     controller.join()?;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod collaborators;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod history;
pub mod journal;
pub mod lifecycle;
pub mod logging;
pub mod refresh;
pub mod signal;
pub mod storage;
pub mod sync_state;
pub mod version;
pub mod workers;

#[cfg(test)]
pub(crate) mod test_helpers;


// 重新导出核心类型，方便使用
pub use collaborators::{
    Collaborators, DownloadedCallback, EntrySink, EventUploader, FetcherFactory, HistoryBuilder,
    InitTasks, JournalMonitor, RemoteFetcher, SyncEngine, TaskContext,
};
pub use config::{CoreConfig, CoreConfigBuilder, SyncThresholds};
pub use controller::Controller;
pub use error::{CoreError, Result};
pub use events::{
    ui_queue, Color, DefaultTheme, EventStats, InlineDispatcher, LogLevel, Notification,
    NotificationBus, SubscriptionId, Theme, UiAction, UiDispatcher, UiPump, UiQueue,
};
pub use history::{History, HistoryEntry, StoredHistoryBuilder};
pub use journal::{JournalEntry, JournalEventType};
pub use refresh::{RefreshPhase, RefreshRequest};
pub use storage::Storage;
pub use sync_state::SyncState;
pub use version::{CORE_DB_VERSION, CORE_VERSION};
pub use workers::{MainWorkerState, RefreshWorkerState};
