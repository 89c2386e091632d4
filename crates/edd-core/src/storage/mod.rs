//! 本地存储 - SQLite
//!
//! 只承载编排层需要的两类数据：
//! - settings：启动检查使用的同步时间戳等键值
//! - journal_entries：监视器写入、历史构建器读取的日志条目
//!
//! 连接由 `parking_lot::Mutex` 串行化，后台线程与 UI 线程都可以直接调用。

mod schema;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{CoreError, Result};
use crate::journal::{JournalEntry, JournalEventType};

pub struct Storage {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("path", &self.path).finish()
    }
}

impl Storage {
    /// 打开（或创建）数据库文件并完成迁移
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(path)
            .map_err(|e| CoreError::Database(format!("打开数据库 {} 失败: {}", path.display(), e)))?;
        let version = schema::prepare(&mut conn)?;
        info!("✅ 数据库就绪: {} (schema V{})", path.display(), version);

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// 内存数据库（测试、无盘运行）
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        schema::prepare(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ========== settings ==========

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        debug!("setting {} = {}", key, value);
        Ok(())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(match self.get_setting(key)?.as_deref() {
            Some("1") | Some("true") => true,
            Some("0") | Some("false") => false,
            _ => default,
        })
    }

    pub fn put_bool(&self, key: &str, value: bool) -> Result<()> {
        self.put_setting(key, if value { "1" } else { "0" })
    }

    /// 读取 RFC3339 时间；缺失时返回 default，格式损坏时报错
    pub fn get_datetime(&self, key: &str, default: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self.get_setting(key)? {
            Some(text) => Ok(DateTime::parse_from_rfc3339(&text)?.with_timezone(&Utc)),
            None => Ok(default),
        }
    }

    pub fn put_datetime(&self, key: &str, value: DateTime<Utc>) -> Result<()> {
        self.put_setting(key, &value.to_rfc3339())
    }

    // ========== journal entries ==========

    /// 写入一条日志，返回行 ID
    pub fn insert_journal_entry(&self, entry: &JournalEntry) -> Result<i64> {
        let payload = serde_json::to_string(&entry.payload)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO journal_entries (commander_id, event_type, event_time, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.commander_id,
                entry.event.as_str(),
                entry.timestamp.to_rfc3339(),
                payload
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 某个指挥官的全部日志，按日志顺序
    pub fn journal_entries(&self, commander_id: i64) -> Result<Vec<JournalEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, commander_id, event_type, event_time, payload
             FROM journal_entries WHERE commander_id = ?1
             ORDER BY event_time ASC, id ASC",
        )?;

        let rows = stmt.query_map([commander_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, commander_id, event_type, event_time, payload) = row?;
            entries.push(JournalEntry {
                id,
                commander_id,
                event: JournalEventType::from_name(&event_type),
                timestamp: DateTime::parse_from_rfc3339(&event_time)?.with_timezone(&Utc),
                payload: serde_json::from_str(&payload)?,
            });
        }
        Ok(entries)
    }

    /// 出现过的指挥官 ID
    pub fn commanders(&self) -> Result<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT commander_id FROM journal_entries ORDER BY commander_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn journal_entry_count(&self, commander_id: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM journal_entries WHERE commander_id = ?1",
            [commander_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn entry(commander_id: i64, event: &str, secs: i64) -> JournalEntry {
        JournalEntry::new(
            commander_id,
            JournalEventType::from_name(event),
            Utc.timestamp_opt(1_500_000_000 + secs, 0).unwrap(),
            serde_json::json!({ "event": event }),
        )
    }

    #[test]
    fn test_open_file_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("edd.sqlite");

        {
            let storage = Storage::open(&db_path).unwrap();
            storage.put_setting("catalog_last_sync", "x").unwrap();
            assert_eq!(storage.path(), Some(db_path.as_path()));
        }

        // 重新打开后数据仍在
        let storage = Storage::open(&db_path).unwrap();
        assert_eq!(storage.get_setting("catalog_last_sync").unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn test_settings() {
        let storage = Storage::open_in_memory().unwrap();
        assert_eq!(storage.get_setting("missing").unwrap(), None);
        assert!(storage.get_bool("missing", true).unwrap());

        storage.put_bool("flag", false).unwrap();
        assert!(!storage.get_bool("flag", true).unwrap());

        let default = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(storage.get_datetime("refdb_last_sync", default).unwrap(), default);

        let when = Utc.with_ymd_and_hms(2026, 10, 1, 12, 30, 0).unwrap();
        storage.put_datetime("refdb_last_sync", when).unwrap();
        storage.put_datetime("refdb_last_sync", when).unwrap();
        assert_eq!(storage.get_datetime("refdb_last_sync", default).unwrap(), when);

        storage.put_setting("broken", "yesterday").unwrap();
        assert!(matches!(
            storage.get_datetime("broken", default),
            Err(CoreError::InvalidData(_))
        ));
    }

    #[test]
    fn test_journal_entries_in_journal_order() {
        let storage = Storage::open_in_memory().unwrap();
        storage.insert_journal_entry(&entry(1, "FSDJump", 20)).unwrap();
        storage.insert_journal_entry(&entry(1, "LoadGame", 10)).unwrap();
        storage.insert_journal_entry(&entry(2, "Docked", 5)).unwrap();
        storage.insert_journal_entry(&entry(1, "Docked", 20)).unwrap();

        let entries = storage.journal_entries(1).unwrap();
        let events: Vec<_> = entries.iter().map(|e| e.event).collect();
        assert_eq!(
            events,
            vec![
                JournalEventType::LoadGame,
                JournalEventType::FsdJump,
                JournalEventType::Docked
            ]
        );
        assert!(entries.iter().all(|e| e.id > 0 && e.commander_id == 1));

        assert_eq!(storage.commanders().unwrap(), vec![1, 2]);
        assert_eq!(storage.journal_entry_count(2).unwrap(), 1);
        assert_eq!(storage.journal_entry_count(9).unwrap(), 0);
    }
}
