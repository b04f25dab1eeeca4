use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

use super::actor::DuckDbActor;
use super::messages::DbMessage;
use super::models::{
    DatabaseBackupRow, FileBackupRow, RecordQuery, ScheduleRow, ServerBackupRow,
};

/// DuckDB数据库管理器
#[derive(Debug, Clone)]
pub struct DuckDbManager {
    sender: mpsc::Sender<DbMessage>,
}

impl DuckDbManager {
    /// 创建新的DuckDB管理器
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        // 确保数据库文件的父目录存在
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (sender, receiver) = mpsc::channel(100);

        // 启动DuckDB Actor
        let actor = DuckDbActor::new(db_path)?;
        tokio::spawn(actor.run(receiver));

        let manager = Self { sender };

        // 初始化数据库表
        manager.init_tables().await?;

        Ok(manager)
    }

    /// 创建内存数据库管理器
    pub async fn new_memory() -> Result<Self> {
        let (sender, receiver) = mpsc::channel(100);

        // 启动DuckDB Actor（内存模式）
        let actor = DuckDbActor::new_memory()?;
        tokio::spawn(actor.run(receiver));

        let manager = Self { sender };
        manager.init_tables().await?;

        Ok(manager)
    }

    /// 发送消息并等待 Actor 响应
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> DbMessage,
    ) -> Result<T> {
        let (respond_to, receiver) = oneshot::channel();

        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| BackupError::custom("数据库Actor已关闭"))?;

        receiver
            .await
            .map_err(|_| BackupError::custom("等待数据库响应超时"))?
    }

    /// 初始化数据库表
    async fn init_tables(&self) -> Result<()> {
        self.request(|respond_to| DbMessage::InitTables { respond_to })
            .await
    }

    // ========== 备份计划 ==========

    pub async fn create_schedule(&self, row: ScheduleRow) -> Result<i64> {
        self.request(|respond_to| DbMessage::CreateSchedule { row, respond_to })
            .await
    }

    pub async fn get_schedule(&self, id: i64) -> Result<Option<ScheduleRow>> {
        self.request(|respond_to| DbMessage::GetSchedule { id, respond_to })
            .await
    }

    pub async fn list_schedules(&self, active_only: bool) -> Result<Vec<ScheduleRow>> {
        self.request(|respond_to| DbMessage::ListSchedules {
            active_only,
            respond_to,
        })
        .await
    }

    pub async fn update_schedule_run(
        &self,
        id: i64,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        self.request(|respond_to| DbMessage::UpdateScheduleRun {
            id,
            last_run_at,
            next_run_at,
            respond_to,
        })
        .await
    }

    pub async fn set_schedule_active(&self, id: i64, active: bool) -> Result<bool> {
        self.request(|respond_to| DbMessage::SetScheduleActive {
            id,
            active,
            respond_to,
        })
        .await
    }

    pub async fn delete_schedule(&self, id: i64) -> Result<bool> {
        self.request(|respond_to| DbMessage::DeleteSchedule { id, respond_to })
            .await
    }

    // ========== 数据库备份记录 ==========

    pub async fn insert_database_backup(&self, row: DatabaseBackupRow) -> Result<i64> {
        self.request(|respond_to| DbMessage::InsertDatabaseBackup { row, respond_to })
            .await
    }

    pub async fn update_database_backup(&self, row: DatabaseBackupRow) -> Result<()> {
        self.request(|respond_to| DbMessage::UpdateDatabaseBackup { row, respond_to })
            .await
    }

    pub async fn get_database_backup(&self, id: i64) -> Result<Option<DatabaseBackupRow>> {
        self.request(|respond_to| DbMessage::GetDatabaseBackup { id, respond_to })
            .await
    }

    pub async fn query_database_backups(
        &self,
        query: RecordQuery,
    ) -> Result<Vec<DatabaseBackupRow>> {
        self.request(|respond_to| DbMessage::QueryDatabaseBackups { query, respond_to })
            .await
    }

    pub async fn delete_database_backup(&self, id: i64) -> Result<()> {
        self.request(|respond_to| DbMessage::DeleteDatabaseBackup { id, respond_to })
            .await
    }

    // ========== 文件备份记录 ==========

    pub async fn insert_file_backup(&self, row: FileBackupRow) -> Result<i64> {
        self.request(|respond_to| DbMessage::InsertFileBackup { row, respond_to })
            .await
    }

    pub async fn update_file_backup(&self, row: FileBackupRow) -> Result<()> {
        self.request(|respond_to| DbMessage::UpdateFileBackup { row, respond_to })
            .await
    }

    pub async fn get_file_backup(&self, id: i64) -> Result<Option<FileBackupRow>> {
        self.request(|respond_to| DbMessage::GetFileBackup { id, respond_to })
            .await
    }

    pub async fn query_file_backups(&self, query: RecordQuery) -> Result<Vec<FileBackupRow>> {
        self.request(|respond_to| DbMessage::QueryFileBackups { query, respond_to })
            .await
    }

    pub async fn get_file_backup_children(&self, parent_id: i64) -> Result<Vec<FileBackupRow>> {
        self.request(|respond_to| DbMessage::GetFileBackupChildren {
            parent_id,
            respond_to,
        })
        .await
    }

    pub async fn delete_file_backup(&self, id: i64) -> Result<()> {
        self.request(|respond_to| DbMessage::DeleteFileBackup { id, respond_to })
            .await
    }

    // ========== 服务器备份记录 ==========

    pub async fn insert_server_backup(&self, row: ServerBackupRow) -> Result<i64> {
        self.request(|respond_to| DbMessage::InsertServerBackup { row, respond_to })
            .await
    }

    pub async fn update_server_backup(&self, row: ServerBackupRow) -> Result<()> {
        self.request(|respond_to| DbMessage::UpdateServerBackup { row, respond_to })
            .await
    }

    pub async fn get_server_backup(&self, id: i64) -> Result<Option<ServerBackupRow>> {
        self.request(|respond_to| DbMessage::GetServerBackup { id, respond_to })
            .await
    }

    pub async fn query_server_backups(&self, query: RecordQuery) -> Result<Vec<ServerBackupRow>> {
        self.request(|respond_to| DbMessage::QueryServerBackups { query, respond_to })
            .await
    }

    pub async fn delete_server_backup(&self, id: i64) -> Result<()> {
        self.request(|respond_to| DbMessage::DeleteServerBackup { id, respond_to })
            .await
    }
}
