//! 备份事件通知
//!
//! 引擎只调用 `record`，不等待、不关心结果。

use crate::models::RecordKind;
use std::fmt::Debug;
use tracing::{error, info, warn};

/// 引擎产生的事件
#[derive(Debug, Clone)]
pub enum BackupEvent {
    /// 服务器备份的 project_id 为服务器 id
    BackupCompleted {
        kind: RecordKind,
        id: i64,
        project_id: String,
        size_bytes: u64,
        duration_ms: i64,
    },
    BackupFailed {
        kind: RecordKind,
        id: i64,
        project_id: String,
        error: String,
    },
    VerificationFailed {
        kind: RecordKind,
        id: i64,
        project_id: String,
    },
    CascadeDeleted {
        kind: RecordKind,
        parent_id: i64,
        count: usize,
    },
    RestoreCompleted {
        kind: RecordKind,
        id: i64,
        target: String,
    },
    CleanupFinished {
        schedule_id: Option<i64>,
        deleted: usize,
        dry_run: bool,
    },
}

pub trait EventSink: Send + Sync + Debug {
    fn record(&self, event: &BackupEvent);
}

/// 写入 tracing 日志的默认实现
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &BackupEvent) {
        match event {
            BackupEvent::BackupCompleted {
                kind,
                id,
                project_id,
                size_bytes,
                duration_ms,
            } => info!(
                kind = %kind,
                backup_id = id,
                project = %project_id,
                size_bytes,
                duration_ms,
                "✅ 备份完成"
            ),
            BackupEvent::BackupFailed {
                kind,
                id,
                project_id,
                error: message,
            } => error!(
                kind = %kind,
                backup_id = id,
                project = %project_id,
                error = %message,
                "❌ 备份失败"
            ),
            BackupEvent::VerificationFailed {
                kind,
                id,
                project_id,
            } => error!(
                kind = %kind,
                backup_id = id,
                project = %project_id,
                "🚨 校验和不匹配，备份可能已损坏或被篡改"
            ),
            BackupEvent::CascadeDeleted {
                kind,
                parent_id,
                count,
            } => warn!(
                kind = %kind,
                parent_id,
                count,
                "⚠️ 删除备份时级联删除了依赖它的增量备份"
            ),
            BackupEvent::RestoreCompleted { kind, id, target } => info!(
                kind = %kind,
                backup_id = id,
                target = %target,
                "♻️ 恢复完成"
            ),
            BackupEvent::CleanupFinished {
                schedule_id,
                deleted,
                dry_run,
            } => info!(?schedule_id, deleted, dry_run, "🧹 保留策略清理完成"),
        }
    }
}
