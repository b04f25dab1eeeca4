use crate::Result;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::models::{
    DatabaseBackupRow, FileBackupRow, RecordQuery, ScheduleRow, ServerBackupRow,
};

/// DuckDB数据库操作消息
#[derive(Debug)]
pub enum DbMessage {
    /// 初始化数据库表
    InitTables {
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 备份计划 ==========
    /// 创建备份计划（忽略 row.id）
    CreateSchedule {
        row: ScheduleRow,
        respond_to: oneshot::Sender<Result<i64>>,
    },
    GetSchedule {
        id: i64,
        respond_to: oneshot::Sender<Result<Option<ScheduleRow>>>,
    },
    ListSchedules {
        active_only: bool,
        respond_to: oneshot::Sender<Result<Vec<ScheduleRow>>>,
    },
    /// 记录一次执行并推进下次执行时间
    UpdateScheduleRun {
        id: i64,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    SetScheduleActive {
        id: i64,
        active: bool,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    DeleteSchedule {
        id: i64,
        respond_to: oneshot::Sender<Result<bool>>,
    },

    // ========== 数据库备份记录 ==========
    InsertDatabaseBackup {
        row: DatabaseBackupRow,
        respond_to: oneshot::Sender<Result<i64>>,
    },
    UpdateDatabaseBackup {
        row: DatabaseBackupRow,
        respond_to: oneshot::Sender<Result<()>>,
    },
    GetDatabaseBackup {
        id: i64,
        respond_to: oneshot::Sender<Result<Option<DatabaseBackupRow>>>,
    },
    QueryDatabaseBackups {
        query: RecordQuery,
        respond_to: oneshot::Sender<Result<Vec<DatabaseBackupRow>>>,
    },
    DeleteDatabaseBackup {
        id: i64,
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 文件备份记录 ==========
    InsertFileBackup {
        row: FileBackupRow,
        respond_to: oneshot::Sender<Result<i64>>,
    },
    UpdateFileBackup {
        row: FileBackupRow,
        respond_to: oneshot::Sender<Result<()>>,
    },
    GetFileBackup {
        id: i64,
        respond_to: oneshot::Sender<Result<Option<FileBackupRow>>>,
    },
    QueryFileBackups {
        query: RecordQuery,
        respond_to: oneshot::Sender<Result<Vec<FileBackupRow>>>,
    },
    /// 直接依赖某个备份的增量备份
    GetFileBackupChildren {
        parent_id: i64,
        respond_to: oneshot::Sender<Result<Vec<FileBackupRow>>>,
    },
    DeleteFileBackup {
        id: i64,
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 服务器备份记录 ==========
    InsertServerBackup {
        row: ServerBackupRow,
        respond_to: oneshot::Sender<Result<i64>>,
    },
    UpdateServerBackup {
        row: ServerBackupRow,
        respond_to: oneshot::Sender<Result<()>>,
    },
    GetServerBackup {
        id: i64,
        respond_to: oneshot::Sender<Result<Option<ServerBackupRow>>>,
    },
    QueryServerBackups {
        query: RecordQuery,
        respond_to: oneshot::Sender<Result<Vec<ServerBackupRow>>>,
    },
    DeleteServerBackup {
        id: i64,
        respond_to: oneshot::Sender<Result<()>>,
    },
}
