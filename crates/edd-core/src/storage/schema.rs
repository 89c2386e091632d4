//! 数据库结构：pragma、内嵌迁移与版本保护
//!
//! 迁移文件位于 migrations/，编译期由 refinery 嵌入。
//! 数据库版本高于本库所知的最高版本时，直接拒绝，不做任何迁移。

mod embedded {
    refinery::embed_migrations!("./migrations");
}

use rusqlite::Connection;
use tracing::info;

use crate::error::{CoreError, Result};
use crate::version::CORE_DB_VERSION;

const HISTORY_TABLE: &str = "refinery_schema_history";

const PRAGMAS: &[(&str, &str)] = &[
    ("journal_mode", "WAL"),
    ("synchronous", "NORMAL"),
    ("foreign_keys", "ON"),
    ("temp_store", "MEMORY"),
];

fn apply_pragmas(conn: &Connection) -> Result<()> {
    for (name, value) in PRAGMAS {
        conn.execute_batch(&format!("PRAGMA {}={};", name, value))
            .map_err(|e| CoreError::Database(format!("PRAGMA {} 失败: {}", name, e)))?;
    }
    Ok(())
}

/// 已应用的最高迁移版本；全新数据库为 0
pub(crate) fn applied_version(conn: &Connection) -> Result<i64> {
    let has_history = {
        let mut stmt =
            conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
        stmt.exists([HISTORY_TABLE])?
    };
    if !has_history {
        return Ok(0);
    }

    let version: Option<i64> = conn.query_row(
        &format!("SELECT MAX(version) FROM {}", HISTORY_TABLE),
        [],
        |row| row.get(0),
    )?;
    Ok(version.unwrap_or(0))
}

/// 准备连接：pragma → 版本保护 → 迁移，返回迁移后的版本
pub(crate) fn prepare(conn: &mut Connection) -> Result<i64> {
    apply_pragmas(conn)?;

    let found = applied_version(conn)?;
    if found > CORE_DB_VERSION {
        return Err(CoreError::Migration(format!(
            "数据库版本 {} 高于本库支持的 {}，请升级程序后再打开",
            found, CORE_DB_VERSION
        )));
    }

    let report = embedded::migrations::runner()
        .run(conn)
        .map_err(|e| CoreError::Migration(format!("迁移失败: {}", e)))?;
    for migration in report.applied_migrations() {
        info!("📦 已应用迁移 V{} {}", migration.version(), migration.name());
    }

    applied_version(conn)
}
