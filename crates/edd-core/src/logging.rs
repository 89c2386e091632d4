//! trace 日志初始化
//!
//! 在 `<data_dir>/<log_dir_name>/trace.log` 安装 fmt 订阅器。任何失败都只记录
//! warn 并继续启动：日志降级可以接受。

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, warn, Level};

use crate::config::CoreConfig;

pub const TRACE_LOG_FILE: &str = "trace.log";

/// 返回日志文件路径；未启用或安装失败时返回 None
pub fn init_logging(config: &CoreConfig) -> Option<PathBuf> {
    if !config.trace_log {
        return None;
    }

    let log_dir = config.log_dir();
    if let Err(e) = fs::create_dir_all(&log_dir) {
        warn!("⚠️ 无法创建日志目录 {}: {}", log_dir.display(), e);
        return None;
    }

    let log_path = log_dir.join(TRACE_LOG_FILE);
    let file = match File::create(&log_path) {
        Ok(file) => file,
        Err(e) => {
            warn!("⚠️ 无法创建日志文件 {}: {}", log_path.display(), e);
            return None;
        }
    };

    let level = if config.debug_mode { Level::DEBUG } else { Level::INFO };
    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_thread_names(true)
        .with_writer(Mutex::new(file))
        .try_init();

    match installed {
        Ok(()) => {
            info!("📝 trace 日志: {}", log_path.display());
            Some(log_path)
        }
        Err(e) => {
            // 进程内已有订阅器（宿主或测试已安装）
            warn!("⚠️ 日志订阅器安装失败: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_disabled_does_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let config = CoreConfig::builder()
            .data_dir(temp_dir.path())
            .trace_log(false)
            .build();

        assert!(init_logging(&config).is_none());
        assert!(!config.log_dir().exists());
    }

    #[test]
    fn test_creates_log_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config = CoreConfig::builder().data_dir(temp_dir.path()).build();

        // 订阅器是否安装取决于同进程的其他测试，目录一定会创建
        let _ = init_logging(&config);
        assert!(config.log_dir().is_dir());
        assert!(config.log_dir().join(TRACE_LOG_FILE).exists());
    }

    #[test]
    fn test_unwritable_log_dir_is_not_fatal() {
        let temp_dir = TempDir::new().unwrap();
        // 日志目录位置被一个普通文件占用
        std::fs::write(temp_dir.path().join("Log"), b"").unwrap();
        let config = CoreConfig::builder().data_dir(temp_dir.path()).build();

        assert!(init_logging(&config).is_none());
    }
}
