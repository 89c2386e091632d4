//! 主工作线程
//!
//! 等待 UI 就绪 → 一次性初始化 → 首轮同步 → 等待重新同步 → 回收刷新线程 → 结束。

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

use super::{guarded, refresh_worker, MainWorkerState};
use crate::collaborators::TaskContext;
use crate::controller::Shared;
use crate::error::Result;
use crate::events::{LogLevel, Notification};
use crate::refresh::RefreshRequest;
use crate::signal::{wait_any, Wake};
use crate::sync_state::SyncState;

/// 上次星表同步时间
pub const CATALOG_LAST_SYNC: &str = "catalog_last_sync";
/// 上次参考库同步时间
pub const REFDB_LAST_SYNC: &str = "refdb_last_sync";

/// 从未同步时的默认时间 2000-01-01
const NEVER_SYNCED_SECS: i64 = 946_684_800;

const SECONDS_PER_DAY: f64 = 86_400.0;

pub(crate) fn run(shared: Arc<Shared>) {
    info!("🔄 主工作线程开始，等待 UI 就绪");
    shared.set_main_state(MainWorkerState::WaitingForUiReady);

    let close = shared.lifecycle.close_event();
    if wait_any(close, &shared.ui_ready, Wake::UiReady) == Wake::UiReady {
        shared.set_main_state(MainWorkerState::Initializing);
        background_init(&shared);

        if !shared.is_closing() {
            run_sync_loop(&shared);
        }
    }

    shared.set_main_state(MainWorkerState::Draining);
    close.wait();

    shared.bus.post(Notification::BgSafeClose);
    if shared.lifecycle.mark_ready_for_final_close() {
        shared.bus.post(Notification::FinalClose);
    }
    shared.set_main_state(MainWorkerState::Terminated);
    info!("✅ 主工作线程退出");
}

fn run_sync_loop(shared: &Arc<Shared>) {
    let refresh_worker = {
        let shared = shared.clone();
        thread::Builder::new()
            .name("edd-refresh-worker".to_string())
            .spawn(move || refresh_worker::run(shared))
    };
    let refresh_worker = match refresh_worker {
        Ok(handle) => Some(handle),
        Err(e) => {
            shared.log_highlight(&format!("Unable to start the refresh worker: {}", e));
            None
        }
    };

    if !shared.config.no_systems_load {
        shared.sync.arm_silently();
        // 初始化期间的请求已并入首轮
        shared.sync.wake_event().try_take();
        do_perform_sync(shared);
    }

    let close = shared.lifecycle.close_event();
    while !shared.is_closing() {
        shared.set_main_state(MainWorkerState::WaitingForResync);
        match wait_any(close, shared.sync.wake_event(), Wake::ResyncRequested) {
            Wake::ResyncRequested => do_perform_sync(shared),
            _ => break,
        }
    }

    shared.set_main_state(MainWorkerState::Draining);
    if let Some(handle) = refresh_worker {
        if handle.join().is_err() {
            error!("❌ 刷新线程异常退出");
        }
    }
}

/// 初始化步骤失败只记录，不终止启动
fn run_step<F>(shared: &Shared, name: &str, f: F)
where
    F: FnOnce() -> Result<()>,
{
    match guarded(f) {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => info!("{} cancelled", name),
        Err(e) => shared.log_highlight(&format!("{} failed: {}", name, e)),
    }
}

fn background_init(shared: &Arc<Shared>) {
    let ctx = shared.task_context("");
    let tasks = shared.init_tasks.clone();

    run_step(shared, "Loading reference data", || tasks.load_reference_data(&ctx));

    if !shared.config.no_systems_load && !shared.is_closing() {
        run_step(shared, "Map download", || tasks.start_map_download(&ctx));
        run_step(shared, "Check systems", || check_systems(shared, &ctx));
    }

    if !shared.is_closing() {
        run_step(shared, "Loading notes and bookmarks", || tasks.load_user_data(&ctx));
    }

    shared.report_progress(None, "");
    shared.bus.post(Notification::InitialSyncComplete);

    if shared.is_closing() {
        return;
    }

    if let Ok(Some(uploader)) = guarded(|| Ok(tasks.conflicting_uploader())) {
        shared.log_highlight(&format!(
            "EDD and {} should not both upload the same journal events. Stop {} or disable uploading in settings!",
            uploader, uploader
        ));
    }

    if shared.is_closing() {
        return;
    }
    shared.log_line("Reading travel history");

    if shared.config.no_load {
        // 没有初始加载，刷新线程直接就绪
        shared.ready_for_new_refresh.set();
    } else {
        refresh_worker::do_refresh_history(
            shared,
            RefreshRequest::for_commander(shared.config.initial_commander),
        );
    }

    if shared.is_closing() {
        return;
    }

    let pending = shared.sync.pending();
    if !pending.is_empty() {
        let databases = match (pending.catalog_sync, pending.refdb_sync) {
            (true, true) => "EDSM and EDDB",
            (true, false) => "EDSM",
            _ => "EDDB",
        };
        shared.log_line(&format!(
            "EDD will now synchronise to the {} databases to obtain star information.\n\
             This will take a while, up to 15 minutes, please be patient.\n\
             Please continue running EDD until refresh is complete.",
            databases
        ));
    }
}

fn last_sync(shared: &Shared, key: &str) -> DateTime<Utc> {
    let never = Utc
        .timestamp_opt(NEVER_SYNCED_SECS, 0)
        .single()
        .unwrap_or_default();
    match shared.storage.get_datetime(key, never) {
        Ok(when) => when,
        Err(e) => {
            warn!("⚠️ 设置 {} 无法解析，视为从未同步: {}", key, e);
            never
        }
    }
}

fn days_since(when: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - when).num_seconds() as f64 / SECONDS_PER_DAY
}

/// 启动时检查星表与参考库是否过期，过期则累积同步标志
fn check_systems(shared: &Shared, ctx: &TaskContext) -> Result<()> {
    shared.report_progress(None, "");
    let thresholds = &shared.config.sync_thresholds;
    let now = Utc::now();

    let catalog_last = last_sync(shared, CATALOG_LAST_SYNC);
    if days_since(catalog_last, now) > thresholds.catalog_check_days {
        shared.log_line("Get galactic mapping from EDSM.");
        shared.init_tasks.download_galactic_mapping(ctx)?;

        let last_modified = shared
            .sync_engine
            .last_catalog_update()
            .unwrap_or(catalog_last);
        if days_since(last_modified, now) > thresholds.catalog_modified_days
            || days_since(catalog_last, now) > thresholds.catalog_full_days
        {
            shared.sync.accumulate(true, false);
        } else {
            shared.storage.put_datetime(CATALOG_LAST_SYNC, now)?;
        }
    }

    if !ctx.is_cancelled() {
        shared.init_tasks.prepare_catalog(ctx)?;
        shared.log_line("Loaded Notes, Bookmarks and Galactic mapping.");

        let refdb_last = last_sync(shared, REFDB_LAST_SYNC);
        if days_since(refdb_last, now) > thresholds.refdb_sync_days {
            shared.sync.accumulate(false, true);
        }
    }
    Ok(())
}

/// 执行一轮同步，完成处理交给 UI 线程
pub(crate) fn do_perform_sync(shared: &Arc<Shared>) {
    shared.set_main_state(MainWorkerState::RunningSync);
    shared.bus.post(Notification::SyncStarting);

    let mut state = shared.sync.take();
    info!(
        "🔄 开始同步: catalog={} refdb={}",
        state.catalog_sync, state.refdb_sync
    );

    let ctx = shared.task_context("");
    let engine = shared.sync_engine.clone();
    match guarded(|| engine.perform_sync(&ctx, &mut state)) {
        Ok(()) => stamp_sync_times(shared, &state),
        Err(e) if e.is_cancelled() => info!("同步被取消"),
        Err(e) => shared.log_highlight(&format!(
            "Check Systems exception: {}\nDetail: {:?}",
            e, e
        )),
    }

    shared.invoke_ui(move |s| sync_completed(s, state));
}

fn stamp_sync_times(shared: &Shared, state: &SyncState) {
    let now = Utc::now();
    let stamp = |key: &str| {
        if let Err(e) = shared.storage.put_datetime(key, now) {
            warn!("⚠️ 写入 {} 失败: {}", key, e);
        }
    };
    if state.catalog_sync {
        stamp(CATALOG_LAST_SYNC);
    }
    if state.refdb_sync {
        stamp(REFDB_LAST_SYNC);
    }
}

/// UI 线程：一轮同步结束
fn sync_completed(shared: &Arc<Shared>, state: SyncState) {
    shared.deliver_progress(None, "");

    if shared.is_closing() {
        // 不再发起新的刷新或同步
        return;
    }

    let engine = shared.sync_engine.clone();
    let total = guarded(|| Ok(engine.total_systems())).unwrap_or_else(|e| {
        warn!("⚠️ 无法读取星系总数: {}", e);
        0
    });
    shared.deliver_log(
        &format!("Loading completed, total of {} systems", total),
        LogLevel::Success,
    );

    if state.history_refresh_required {
        shared.deliver_log("Refresh due to updating systems", LogLevel::Normal);
        *shared.post_refresh_note.lock() = Some(state);
        shared.request_refresh(RefreshRequest::default());
    }

    shared.bus.deliver(&Notification::SyncComplete);
    shared.sync.complete();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_days_since() {
        let now = Utc::now();
        assert!((days_since(now - Duration::hours(36), now) - 1.5).abs() < 1e-6);
        assert!(days_since(now, now).abs() < 1e-6);
    }
}
