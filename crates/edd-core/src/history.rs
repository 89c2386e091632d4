//! 历史记录
//!
//! `History` 是当前指挥官日志的有序投影。共享槽 `SharedHistory` 内部保存
//! `Arc<History>`：刷新在槽外构建完整的新历史后一次性替换，读者拿到的快照
//! 要么是旧的完整历史，要么是新的完整历史。

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::collaborators::{HistoryBuilder, JournalMonitor, TaskContext};
use crate::error::Result;
use crate::journal::JournalEntry;
use crate::refresh::RefreshRequest;
use crate::storage::Storage;

/// 历史中的一项
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// 在历史中的位置（从 0 开始）
    pub index: usize,
    pub journal: JournalEntry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct History {
    commander_id: i64,
    entries: Vec<HistoryEntry>,
    /// 已入库条目的 id，用于去重
    stored_ids: HashSet<i64>,
}

impl Default for History {
    fn default() -> Self {
        Self::new(-1)
    }
}

impl History {
    pub fn new(commander_id: i64) -> Self {
        Self {
            commander_id,
            entries: Vec::new(),
            stored_ids: HashSet::new(),
        }
    }

    /// 由按日志顺序排列的条目构建
    pub fn from_entries(commander_id: i64, journal: Vec<JournalEntry>) -> Self {
        let mut history = Self::new(commander_id);
        for entry in journal {
            history.add_journal_entry(entry);
        }
        history
    }

    pub fn commander_id(&self) -> i64 {
        self.commander_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// 追加一条日志，返回新增的历史项。
    /// 已入库（id != 0）且已存在的条目会被跳过。
    pub fn add_journal_entry(&mut self, journal: JournalEntry) -> Vec<HistoryEntry> {
        if journal.id != 0 && !self.stored_ids.insert(journal.id) {
            debug!("跳过重复日志条目 id={}", journal.id);
            return Vec::new();
        }

        let entry = HistoryEntry {
            index: self.entries.len(),
            journal,
        };
        self.entries.push(entry.clone());
        vec![entry]
    }

    /// 重新计算序号
    pub fn reindex(&mut self) {
        for (index, entry) in self.entries.iter_mut().enumerate() {
            entry.index = index;
        }
    }
}

/// 共享历史槽
#[derive(Debug, Default)]
pub struct SharedHistory {
    slot: RwLock<Arc<History>>,
}

impl SharedHistory {
    pub fn new(history: History) -> Self {
        Self {
            slot: RwLock::new(Arc::new(history)),
        }
    }

    pub fn snapshot(&self) -> Arc<History> {
        self.slot.read().clone()
    }

    /// 整体替换，返回旧历史
    pub fn replace(&self, history: History) -> Arc<History> {
        std::mem::replace(&mut *self.slot.write(), Arc::new(history))
    }

    /// 追加日志；已有快照的读者不受影响（写时复制）
    pub fn append(&self, journal: JournalEntry) -> (Vec<HistoryEntry>, Arc<History>) {
        let mut slot = self.slot.write();
        let added = Arc::make_mut(&mut *slot).add_journal_entry(journal);
        (added, slot.clone())
    }

    pub fn commander_id(&self) -> i64 {
        self.slot.read().commander_id()
    }

    pub fn recalculate(&self) -> Arc<History> {
        let mut slot = self.slot.write();
        Arc::make_mut(&mut *slot).reindex();
        slot.clone()
    }
}

/// 从本地存储重建历史
pub struct StoredHistoryBuilder {
    storage: Arc<Storage>,
}

/// 每读取多少条报告一次进度
const PROGRESS_STEP: usize = 500;

impl StoredHistoryBuilder {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl HistoryBuilder for StoredHistoryBuilder {
    fn load_history(
        &self,
        monitor: &dyn JournalMonitor,
        ctx: &TaskContext,
        request: &RefreshRequest,
    ) -> Result<History> {
        let commander_id = request.commander.unwrap_or(-1);
        if commander_id < 0 {
            return Ok(History::new(commander_id));
        }

        ctx.report_progress(None, "Reading journal files");
        monitor.parse_journal_files(request.force_journal_reload)?;
        ctx.check_cancelled()?;

        let journal = self.storage.journal_entries(commander_id)?;
        let total = journal.len();
        let mut history = History::new(commander_id);

        for (n, entry) in journal.into_iter().enumerate() {
            if n % PROGRESS_STEP == 0 {
                ctx.check_cancelled()?;
                let percent = (n * 100 / total.max(1)) as u8;
                ctx.report_progress(Some(percent), "Creating History");
            }
            history.add_journal_entry(entry);
        }

        info!("📚 指挥官 {} 历史加载完成: {} 条", commander_id, history.len());
        Ok(history)
    }
}
