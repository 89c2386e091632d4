//! 刷新工作线程
//!
//! 首次刷新前等待初始加载完成；之后每轮等待 {关闭, 刷新请求}，
//! 停止监视器与拉取器 → 通知开始 → 取最新参数 → 重建历史 → UI 线程完成处理。
//! 关闭优先：两者同时就绪时直接退出，正在进行的刷新允许跑完。

use std::sync::Arc;
use tracing::{debug, info};

use super::{guarded, RefreshWorkerState};
use crate::controller::Shared;
use crate::error::Result;
use crate::events::{LogLevel, Notification};
use crate::history::History;
use crate::refresh::RefreshRequest;
use crate::signal::{wait_any, Wake};

pub(crate) fn run(shared: Arc<Shared>) {
    let close = shared.lifecycle.close_event();

    shared.set_refresh_state(RefreshWorkerState::WaitingForFirstReady);
    wait_any(close, &shared.ready_for_new_refresh, Wake::Ready);

    while !shared.is_closing() {
        shared.set_refresh_state(RefreshWorkerState::WaitingForSignal);
        if wait_any(close, shared.refresh.wake_event(), Wake::RefreshRequested) == Wake::Close {
            break;
        }

        if !shared.refresh.has_pending() {
            debug!("刷新唤醒但没有待处理请求，忽略");
            continue;
        }

        shared.set_refresh_state(RefreshWorkerState::StoppingCollaborators);
        let fetcher = shared.fetcher.read().clone();
        if let Err(e) = guarded(|| {
            shared.monitor.stop_monitor();
            fetcher.async_stop();
            Ok(())
        }) {
            shared.log_highlight(&format!("Stopping monitor and fetcher failed: {}", e));
        }
        shared.bus.post(Notification::RefreshStarting);

        let Some(request) = shared.refresh.take_latest() else {
            continue;
        };

        // 上一轮的就绪信号已在等待时消费
        shared.ready_for_new_refresh.try_take();
        shared.set_refresh_state(RefreshWorkerState::RunningRefresh);
        do_refresh_history(&shared, request);

        shared.set_refresh_state(RefreshWorkerState::RearmingAndWaiting);
        wait_any(close, &shared.ready_for_new_refresh, Wake::Ready);
    }

    shared.set_refresh_state(RefreshWorkerState::Terminated);
    info!("✅ 刷新线程退出");
}

/// 在当前线程重建历史，完成处理交给 UI 线程
pub(crate) fn do_refresh_history(shared: &Arc<Shared>, request: RefreshRequest) {
    info!("🔄 刷新历史: {:?}", request);

    let ctx = shared.task_context("Processing log file");
    let builder = shared.history_builder.clone();
    let monitor = shared.monitor.clone();
    let history = match guarded(|| builder.load_history(monitor.as_ref(), &ctx, &request)) {
        Ok(history) => Some(history),
        Err(e) if e.is_cancelled() => {
            debug!("历史刷新被取消");
            None
        }
        Err(e) => {
            shared.log_highlight(&format!("History Refresh Error: {}\nDetail: {:?}", e, e));
            None
        }
    };

    shared.invoke_ui(move |s| refresh_completed(s, history));
}

/// UI 线程：一次刷新结束
fn refresh_completed(shared: &Arc<Shared>, history: Option<History>) {
    if shared.is_closing() {
        // 不重启协作方，不再排队
        shared.bus.deliver(&Notification::RefreshComplete);
        shared.ready_for_new_refresh.set();
        return;
    }

    if let Some(history) = history {
        let commander_id = history.commander_id();
        shared.history.replace(history);
        shared.bus.deliver(&Notification::RefreshCommanders);

        if let Err(e) = guarded(|| switch_fetcher(shared, commander_id)) {
            shared.deliver_log(
                &format!("Unable to switch remote fetcher to commander {}: {}", commander_id, e),
                LogLevel::Highlight,
            );
        }

        shared.deliver_progress(None, "");
        shared.deliver_log("Refresh Complete.", LogLevel::Normal);
        shared.refresh_displays();
    }

    let note = shared.post_refresh_note.lock().take();
    if let Some(state) = note {
        shared.deliver_log("Refreshing complete.", LogLevel::Normal);
        if state.was_first_run {
            shared.deliver_log(
                "EDSM and EDDB update complete. Please restart EDD to complete the synchronisation",
                LogLevel::Normal,
            );
        } else if state.was_catalog_or_refdb {
            shared.deliver_log("EDSM and/or EDDB update complete.", LogLevel::Normal);
        }
    }

    // 与关闭流程互斥：要么在停止之前重启，要么不再重启
    let restarted = shared
        .lifecycle
        .unless_closing(|| restart_collaborators(shared));
    match &restarted {
        Some(failures) => {
            for failure in failures {
                shared.deliver_log(failure, LogLevel::Highlight);
            }
        }
        None => debug!("关闭已开始，不再重启协作方"),
    }

    shared.bus.deliver(&Notification::RefreshComplete);
    if restarted.is_some() {
        shared.refresh.complete();
    }
    shared.ready_for_new_refresh.set();
}

/// 指挥官变化时替换远端拉取器
fn switch_fetcher(shared: &Shared, commander_id: i64) -> Result<()> {
    let current = shared.fetcher.read().clone();
    if commander_id < 0 || commander_id == current.commander_id() {
        return Ok(());
    }

    current.stop_check();
    let fetcher = shared
        .fetcher_factory
        .create(commander_id, shared.downloaded_callback());
    *shared.fetcher.write() = fetcher;
    info!("🔁 拉取器切换到指挥官 {}", commander_id);
    Ok(())
}

/// 返回失败信息，由调用方在互斥区外输出
fn restart_collaborators(shared: &Shared) -> Vec<String> {
    let mut failures = Vec::new();
    if let Err(e) = guarded(|| {
        shared.monitor.start_monitor();
        Ok(())
    }) {
        failures.push(format!("Journal monitor failed to start: {}", e));
    }

    let fetcher = shared.fetcher.read().clone();
    if let Err(e) = guarded(|| {
        fetcher.start();
        Ok(())
    }) {
        failures.push(format!("Remote fetcher failed to start: {}", e));
    }
    failures
}
