//! 核心配置
//!
//! 对应原程序的启动选项：数据目录、数据库文件、是否跳过星系数据加载 /
//! 历史加载、日志选项，以及启动检查使用的同步阈值。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// 启动检查的同步阈值（单位：天）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncThresholds {
    /// 上次星表同步超过多少天后检查一次
    pub catalog_check_days: f64,
    /// 星表最后修改时间超过多少天则需要全量同步
    pub catalog_modified_days: f64,
    /// 上次星表同步超过多少天则无条件全量同步
    pub catalog_full_days: f64,
    /// 参考数据库同步间隔
    pub refdb_sync_days: f64,
}

impl Default for SyncThresholds {
    fn default() -> Self {
        Self {
            catalog_check_days: 7.0,
            catalog_modified_days: 4.0,
            catalog_full_days: 28.0,
            refdb_sync_days: 6.5,
        }
    }
}

/// 核心配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// 数据存储目录
    pub data_dir: PathBuf,
    /// 数据库文件名（相对 data_dir）
    pub database_file: String,
    /// 日志目录名（相对 data_dir）
    pub log_dir_name: String,
    /// 跳过星系数据加载与全量同步
    pub no_systems_load: bool,
    /// 跳过启动时的历史加载
    pub no_load: bool,
    /// 写入 trace 日志文件
    pub trace_log: bool,
    /// 调试模式（DEBUG 级别日志）
    pub debug_mode: bool,
    /// 启动时加载的指挥官
    pub initial_commander: i64,
    /// 同步阈值
    pub sync_thresholds: SyncThresholds,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            database_file: "edd.sqlite".to_string(),
            log_dir_name: "Log".to_string(),
            no_systems_load: false,
            no_load: false,
            trace_log: true,
            debug_mode: false,
            initial_commander: 0,
            sync_thresholds: SyncThresholds::default(),
        }
    }
}

/// 获取默认数据目录 ~/.edd/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".edd")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        // Windows 支持
        home_dir.join(".edd")
    } else {
        PathBuf::from("./edd_data")
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::new()
    }

    /// 从 JSON 文件读取配置，缺失字段使用默认值
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("读取配置文件 {} 失败: {}", path.display(), e)))?;
        let config: CoreConfig = serde_json::from_str(&text)
            .map_err(|e| CoreError::Config(format!("解析配置文件 {} 失败: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 保存为 JSON 文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_file.trim().is_empty() {
            return Err(CoreError::Config("database_file 不能为空".to_string()));
        }
        let t = &self.sync_thresholds;
        for (name, value) in [
            ("catalog_check_days", t.catalog_check_days),
            ("catalog_modified_days", t.catalog_modified_days),
            ("catalog_full_days", t.catalog_full_days),
            ("refdb_sync_days", t.refdb_sync_days),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::Config(format!("{} 必须是非负数: {}", name, value)));
            }
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join(&self.log_dir_name)
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CoreConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn database_file<S: Into<String>>(mut self, name: S) -> Self {
        self.config.database_file = name.into();
        self
    }

    pub fn no_systems_load(mut self, value: bool) -> Self {
        self.config.no_systems_load = value;
        self
    }

    pub fn no_load(mut self, value: bool) -> Self {
        self.config.no_load = value;
        self
    }

    pub fn trace_log(mut self, value: bool) -> Self {
        self.config.trace_log = value;
        self
    }

    pub fn debug_mode(mut self, value: bool) -> Self {
        self.config.debug_mode = value;
        self
    }

    pub fn initial_commander(mut self, commander_id: i64) -> Self {
        self.config.initial_commander = commander_id;
        self
    }

    pub fn sync_thresholds(mut self, thresholds: SyncThresholds) -> Self {
        self.config.sync_thresholds = thresholds;
        self
    }

    pub fn build(self) -> CoreConfig {
        self.config
    }
}
