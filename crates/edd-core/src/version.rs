//! 版本与构建元信息
//!
//! - **Core Version** → Cargo.toml（唯一权威源）
//! - **Migration Version** → migrations 文件（文件即版本，由 refinery 管理）

/// 核心库 semver，来自 Cargo.toml
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// git commit（由 vergen 在 build.rs 中生成）
pub const GIT_SHA: &str = env!("VERGEN_GIT_SHA");

/// build time（由 vergen 在 build.rs 中生成）
pub const BUILD_TIME: &str = env!("VERGEN_BUILD_TIMESTAMP");

// 当前支持的最高数据库 migration 版本 `CORE_DB_VERSION`，由 build.rs 扫描 migrations/ 生成。
// 数据库版本高于此值时拒绝打开。
include!(concat!(env!("OUT_DIR"), "/schema_version.rs"));

/// 启动日志中显示的版本串
pub fn version_display() -> String {
    format!("{} ({}, built {})", CORE_VERSION, GIT_SHA, BUILD_TIME)
}
