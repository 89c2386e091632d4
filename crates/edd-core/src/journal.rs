//! 游戏日志条目
//!
//! 日志文件每行一个 JSON 对象，至少带 `timestamp` 与 `event` 两个字段。
//! 这里只解析编排层关心的部分，其余字段原样保留在 payload 中。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// 日志事件类型（只列出编排层需要区分的几种）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JournalEventType {
    Fileheader,
    LoadGame,
    Location,
    FsdJump,
    Docked,
    Undocked,
    Scan,
    Unknown,
}

impl JournalEventType {
    pub fn from_name(name: &str) -> Self {
        match name {
            "Fileheader" => JournalEventType::Fileheader,
            "LoadGame" => JournalEventType::LoadGame,
            "Location" => JournalEventType::Location,
            "FSDJump" => JournalEventType::FsdJump,
            "Docked" => JournalEventType::Docked,
            "Undocked" => JournalEventType::Undocked,
            "Scan" => JournalEventType::Scan,
            _ => JournalEventType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JournalEventType::Fileheader => "Fileheader",
            JournalEventType::LoadGame => "LoadGame",
            JournalEventType::Location => "Location",
            JournalEventType::FsdJump => "FSDJump",
            JournalEventType::Docked => "Docked",
            JournalEventType::Undocked => "Undocked",
            JournalEventType::Scan => "Scan",
            JournalEventType::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for JournalEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条日志记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// 存储中的行 ID，尚未入库时为 0
    pub id: i64,
    pub commander_id: i64,
    pub event: JournalEventType,
    pub timestamp: DateTime<Utc>,
    /// 原始 JSON
    pub payload: serde_json::Value,
}

#[derive(Deserialize)]
struct JournalLineHeader {
    timestamp: DateTime<Utc>,
    event: String,
}

impl JournalEntry {
    pub fn new(
        commander_id: i64,
        event: JournalEventType,
        timestamp: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: 0,
            commander_id,
            event,
            timestamp,
            payload,
        }
    }

    /// 解析日志文件中的一行
    pub fn parse_line(commander_id: i64, line: &str) -> Result<Self> {
        let payload: serde_json::Value = serde_json::from_str(line.trim())?;
        let header: JournalLineHeader = serde_json::from_value(payload.clone())
            .map_err(|e| CoreError::InvalidData(format!("日志行缺少 timestamp/event: {}", e)))?;

        Ok(Self::new(
            commander_id,
            JournalEventType::from_name(&header.event),
            header.timestamp,
            payload,
        ))
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    /// 进入游戏事件（会触发指挥官列表刷新）
    pub fn is_load_game(&self) -> bool {
        self.event == JournalEventType::LoadGame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fsd_jump() {
        let line = r#"{ "timestamp":"3302-10-14T18:02:11Z", "event":"FSDJump", "StarSystem":"Sol" }"#;
        let entry = JournalEntry::parse_line(1, line).unwrap();

        assert_eq!(entry.event, JournalEventType::FsdJump);
        assert_eq!(entry.commander_id, 1);
        assert_eq!(entry.id, 0);
        assert_eq!(entry.payload["StarSystem"], "Sol");
        assert!(!entry.is_load_game());
    }

    #[test]
    fn test_unknown_event_kept() {
        let line = r#"{"timestamp":"2016-06-10T14:32:03Z","event":"MarketSell","Count":4}"#;
        let entry = JournalEntry::parse_line(2, line).unwrap();
        assert_eq!(entry.event, JournalEventType::Unknown);
        assert_eq!(entry.payload["Count"], 4);
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        assert!(matches!(
            JournalEntry::parse_line(1, r#"{"event":"LoadGame"}"#),
            Err(CoreError::InvalidData(_))
        ));
        assert!(matches!(
            JournalEntry::parse_line(1, "not json"),
            Err(CoreError::Json(_))
        ));
    }

    #[test]
    fn test_event_names() {
        for event in [
            JournalEventType::Fileheader,
            JournalEventType::LoadGame,
            JournalEventType::Location,
            JournalEventType::FsdJump,
            JournalEventType::Docked,
            JournalEventType::Undocked,
            JournalEventType::Scan,
        ] {
            assert_eq!(JournalEventType::from_name(event.as_str()), event);
        }
    }
}
