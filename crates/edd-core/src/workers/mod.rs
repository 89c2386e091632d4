//! 后台工作线程
//!
//! - `main_worker`：一次性初始化、首轮同步、等待重新同步
//! - `refresh_worker`：等待合并后的刷新请求并执行
//!
//! 两个线程都是显式的状态机，状态保存在 `Shared` 的原子变量中供外部观察。

pub(crate) mod main_worker;
pub(crate) mod refresh_worker;

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{CoreError, Result};

/// 主工作线程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MainWorkerState {
    NotStarted = 0,
    WaitingForUiReady = 1,
    Initializing = 2,
    RunningSync = 3,
    WaitingForResync = 4,
    Draining = 5,
    Terminated = 6,
}

impl MainWorkerState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => MainWorkerState::WaitingForUiReady,
            2 => MainWorkerState::Initializing,
            3 => MainWorkerState::RunningSync,
            4 => MainWorkerState::WaitingForResync,
            5 => MainWorkerState::Draining,
            6 => MainWorkerState::Terminated,
            _ => MainWorkerState::NotStarted,
        }
    }
}

/// 刷新工作线程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RefreshWorkerState {
    NotStarted = 0,
    WaitingForFirstReady = 1,
    WaitingForSignal = 2,
    StoppingCollaborators = 3,
    RunningRefresh = 4,
    RearmingAndWaiting = 5,
    Terminated = 6,
}

impl RefreshWorkerState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => RefreshWorkerState::WaitingForFirstReady,
            2 => RefreshWorkerState::WaitingForSignal,
            3 => RefreshWorkerState::StoppingCollaborators,
            4 => RefreshWorkerState::RunningRefresh,
            5 => RefreshWorkerState::RearmingAndWaiting,
            6 => RefreshWorkerState::Terminated,
            _ => RefreshWorkerState::NotStarted,
        }
    }
}

/// 执行协作方调用，panic 转为 `CoreError::Runtime`
pub(crate) fn guarded<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(CoreError::Runtime(format!("panic: {}", panic_message(&*payload)))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarded_passes_through() {
        assert_eq!(guarded(|| Ok(3)).unwrap(), 3);
        assert!(guarded::<(), _>(|| Err(CoreError::Cancelled)).unwrap_err().is_cancelled());
    }

    #[test]
    fn test_guarded_catches_panic() {
        let err = guarded::<(), _>(|| panic!("sync engine exploded")).unwrap_err();
        match err {
            CoreError::Runtime(msg) => assert!(msg.contains("sync engine exploded")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_state_round_trip() {
        for state in [MainWorkerState::Initializing, MainWorkerState::Terminated] {
            assert_eq!(MainWorkerState::from_u8(state as u8), state);
        }
        assert_eq!(
            RefreshWorkerState::from_u8(RefreshWorkerState::RunningRefresh as u8),
            RefreshWorkerState::RunningRefresh
        );
    }
}
