use thiserror::Error;

/// 核心库错误类型
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Config error: {0}")]
    Config(String),

    /// 协作方在关闭期间主动放弃（不视为错误，静默退出）
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Shutting down: {0}")]
    ShuttingDown(String),

    /// 外部协作方（同步引擎、历史构建器等）报告的失败
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl CoreError {
    /// 是否为取消类信号
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }

    pub fn collaborator<T: std::fmt::Display>(msg: T) -> Self {
        CoreError::Collaborator(msg.to_string())
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(error: rusqlite::Error) -> Self {
        CoreError::Database(error.to_string())
    }
}

impl From<refinery::Error> for CoreError {
    fn from(error: refinery::Error) -> Self {
        CoreError::Migration(error.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(error: serde_json::Error) -> Self {
        CoreError::Json(error.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(error: std::io::Error) -> Self {
        CoreError::Io(error.to_string())
    }
}

impl From<chrono::ParseError> for CoreError {
    fn from(error: chrono::ParseError) -> Self {
        CoreError::InvalidData(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
