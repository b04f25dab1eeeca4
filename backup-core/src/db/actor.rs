use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use duckdb::types::Value;
use duckdb::{Connection, Row, params, params_from_iter};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::messages::DbMessage;
use super::models::{
    DatabaseBackupRow, FileBackupRow, RecordQuery, ScheduleRow, ServerBackupRow,
};

const SCHEDULE_COLUMNS: &str = "id, project_id, server_id, backup_kind, target_name, frequency, \
     time_of_day, day_of_week, day_of_month, retention_daily, retention_weekly, \
     retention_monthly, retention_days, storage, incremental, is_active, next_run_at, \
     last_run_at, created_at";

const DATABASE_BACKUP_COLUMNS: &str = "id, project_id, server_id, schedule_id, engine, \
     database_name, trigger_type, status, filename, storage, storage_key, size_bytes, checksum, \
     metadata, started_at, completed_at, duration_ms, error_message, verified_at, created_at";

const FILE_BACKUP_COLUMNS: &str = "id, project_id, schedule_id, backup_kind, trigger_type, \
     status, filename, storage, storage_key, size_bytes, checksum, files_count, manifest, \
     parent_backup_id, started_at, completed_at, duration_ms, error_message, verified_at, \
     created_at";

const SERVER_BACKUP_COLUMNS: &str = "id, server_id, schedule_id, trigger_type, status, \
     filename, storage, storage_key, size_bytes, checksum, metadata, started_at, completed_at, \
     duration_ms, error_message, verified_at, created_at";

/// DuckDB Actor - 确保单线程访问DuckDB
pub struct DuckDbActor {
    connection: Connection,
}

impl DuckDbActor {
    /// 创建新的DuckDB Actor
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let connection = Connection::open(db_path)?;
        Ok(Self { connection })
    }

    /// 创建内存DuckDB Actor
    pub fn new_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        Ok(Self { connection })
    }

    /// 运行Actor消息循环
    pub async fn run(mut self, mut receiver: mpsc::Receiver<DbMessage>) {
        info!("DuckDB Actor 已启动");

        while let Some(message) = receiver.recv().await {
            self.handle_message(message);
        }

        info!("DuckDB Actor 已关闭");
    }

    /// 处理数据库消息
    fn handle_message(&mut self, message: DbMessage) {
        match message {
            DbMessage::InitTables { respond_to } => {
                let _ = respond_to.send(self.init_tables());
            }
            DbMessage::CreateSchedule { row, respond_to } => {
                let _ = respond_to.send(self.create_schedule(&row));
            }
            DbMessage::GetSchedule { id, respond_to } => {
                let _ = respond_to.send(self.get_schedule(id));
            }
            DbMessage::ListSchedules {
                active_only,
                respond_to,
            } => {
                let _ = respond_to.send(self.list_schedules(active_only));
            }
            DbMessage::UpdateScheduleRun {
                id,
                last_run_at,
                next_run_at,
                respond_to,
            } => {
                let _ = respond_to.send(self.update_schedule_run(id, last_run_at, next_run_at));
            }
            DbMessage::SetScheduleActive {
                id,
                active,
                respond_to,
            } => {
                let _ = respond_to.send(self.set_schedule_active(id, active));
            }
            DbMessage::DeleteSchedule { id, respond_to } => {
                let _ = respond_to.send(self.delete_schedule(id));
            }
            DbMessage::InsertDatabaseBackup { row, respond_to } => {
                let _ = respond_to.send(self.insert_database_backup(&row));
            }
            DbMessage::UpdateDatabaseBackup { row, respond_to } => {
                let _ = respond_to.send(self.update_database_backup(&row));
            }
            DbMessage::GetDatabaseBackup { id, respond_to } => {
                let _ = respond_to.send(self.get_database_backup(id));
            }
            DbMessage::QueryDatabaseBackups { query, respond_to } => {
                let _ = respond_to.send(self.query_database_backups(&query));
            }
            DbMessage::DeleteDatabaseBackup { id, respond_to } => {
                let _ = respond_to.send(self.delete_database_backup(id));
            }
            DbMessage::InsertFileBackup { row, respond_to } => {
                let _ = respond_to.send(self.insert_file_backup(&row));
            }
            DbMessage::UpdateFileBackup { row, respond_to } => {
                let _ = respond_to.send(self.update_file_backup(&row));
            }
            DbMessage::GetFileBackup { id, respond_to } => {
                let _ = respond_to.send(self.get_file_backup(id));
            }
            DbMessage::QueryFileBackups { query, respond_to } => {
                let _ = respond_to.send(self.query_file_backups(&query));
            }
            DbMessage::GetFileBackupChildren {
                parent_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.get_file_backup_children(parent_id));
            }
            DbMessage::DeleteFileBackup { id, respond_to } => {
                let _ = respond_to.send(self.delete_file_backup(id));
            }
            DbMessage::InsertServerBackup { row, respond_to } => {
                let _ = respond_to.send(self.insert_server_backup(&row));
            }
            DbMessage::UpdateServerBackup { row, respond_to } => {
                let _ = respond_to.send(self.update_server_backup(&row));
            }
            DbMessage::GetServerBackup { id, respond_to } => {
                let _ = respond_to.send(self.get_server_backup(id));
            }
            DbMessage::QueryServerBackups { query, respond_to } => {
                let _ = respond_to.send(self.query_server_backups(&query));
            }
            DbMessage::DeleteServerBackup { id, respond_to } => {
                let _ = respond_to.send(self.delete_server_backup(id));
            }
        }
    }

    /// 初始化数据库表
    fn init_tables(&mut self) -> Result<()> {
        debug!("正在初始化DuckDB表...");

        // 读取并执行SQL初始化脚本
        let sql_content = include_str!("../../migrations/init_duckdb.sql");

        // 按分号分割SQL语句并执行
        for statement in sql_content.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                self.connection.execute(trimmed, [])?;
            }
        }

        info!("DuckDB表初始化完成");
        Ok(())
    }

    // ========== 备份计划 ==========

    fn create_schedule(&mut self, row: &ScheduleRow) -> Result<i64> {
        self.connection.execute(
            "INSERT INTO backup_schedules (project_id, server_id, backup_kind, target_name, \
             frequency, time_of_day, day_of_week, day_of_month, retention_daily, \
             retention_weekly, retention_monthly, retention_days, storage, incremental, \
             is_active, next_run_at, last_run_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                row.project_id,
                row.server_id,
                row.backup_kind,
                row.target_name,
                row.frequency,
                row.time_of_day,
                row.day_of_week,
                row.day_of_month,
                row.retention_daily,
                row.retention_weekly,
                row.retention_monthly,
                row.retention_days,
                row.storage,
                row.incremental,
                row.is_active,
                row.next_run_at,
                row.last_run_at,
                row.created_at,
            ],
        )?;

        // 获取最后插入的ID
        let id: i64 = self
            .connection
            .query_row("SELECT currval('schedule_id_seq')", [], |row| row.get(0))?;

        Ok(id)
    }

    fn get_schedule(&mut self, id: i64) -> Result<Option<ScheduleRow>> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM backup_schedules WHERE id = ?");
        let mut stmt = self.connection.prepare(&sql)?;
        let mut rows = stmt.query(params![id])?;

        match rows.next()? {
            Some(row) => Ok(Some(map_schedule(row)?)),
            None => Ok(None),
        }
    }

    fn list_schedules(&mut self, active_only: bool) -> Result<Vec<ScheduleRow>> {
        let filter = if active_only {
            "WHERE is_active = TRUE"
        } else {
            ""
        };
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM backup_schedules {filter} ORDER BY id");
        let mut stmt = self.connection.prepare(&sql)?;

        let schedules = stmt
            .query_map([], map_schedule)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(schedules)
    }

    fn update_schedule_run(
        &mut self,
        id: i64,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        self.connection.execute(
            "UPDATE backup_schedules SET last_run_at = ?, next_run_at = ? WHERE id = ?",
            params![last_run_at, next_run_at, id],
        )?;
        Ok(())
    }

    fn set_schedule_active(&mut self, id: i64, active: bool) -> Result<bool> {
        let updated = self.connection.execute(
            "UPDATE backup_schedules SET is_active = ? WHERE id = ?",
            params![active, id],
        )?;
        Ok(updated > 0)
    }

    fn delete_schedule(&mut self, id: i64) -> Result<bool> {
        let deleted = self
            .connection
            .execute("DELETE FROM backup_schedules WHERE id = ?", params![id])?;
        Ok(deleted > 0)
    }

    // ========== 数据库备份记录 ==========

    fn insert_database_backup(&mut self, row: &DatabaseBackupRow) -> Result<i64> {
        self.connection.execute(
            "INSERT INTO database_backups (project_id, server_id, schedule_id, engine, \
             database_name, trigger_type, status, filename, storage, storage_key, size_bytes, \
             checksum, metadata, started_at, completed_at, duration_ms, error_message, \
             verified_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                row.project_id,
                row.server_id,
                row.schedule_id,
                row.engine,
                row.database_name,
                row.trigger_type,
                row.status,
                row.filename,
                row.storage,
                row.storage_key,
                row.size_bytes,
                row.checksum,
                row.metadata,
                row.started_at,
                row.completed_at,
                row.duration_ms,
                row.error_message,
                row.verified_at,
                row.created_at,
            ],
        )?;

        let id: i64 = self.connection.query_row(
            "SELECT currval('database_backup_id_seq')",
            [],
            |row| row.get(0),
        )?;

        Ok(id)
    }

    fn update_database_backup(&mut self, row: &DatabaseBackupRow) -> Result<()> {
        let updated = self.connection.execute(
            "UPDATE database_backups SET status = ?, size_bytes = ?, checksum = ?, metadata = ?, \
             started_at = ?, completed_at = ?, duration_ms = ?, error_message = ?, \
             verified_at = ? WHERE id = ?",
            params![
                row.status,
                row.size_bytes,
                row.checksum,
                row.metadata,
                row.started_at,
                row.completed_at,
                row.duration_ms,
                row.error_message,
                row.verified_at,
                row.id,
            ],
        )?;
        ensure_updated(updated, row.id)
    }

    fn get_database_backup(&mut self, id: i64) -> Result<Option<DatabaseBackupRow>> {
        let sql = format!("SELECT {DATABASE_BACKUP_COLUMNS} FROM database_backups WHERE id = ?");
        let mut stmt = self.connection.prepare(&sql)?;
        let mut rows = stmt.query(params![id])?;

        match rows.next()? {
            Some(row) => Ok(Some(map_database_backup(row)?)),
            None => Ok(None),
        }
    }

    fn query_database_backups(&mut self, query: &RecordQuery) -> Result<Vec<DatabaseBackupRow>> {
        let (filter, values) = build_filter(query, "database_name");
        let sql = format!(
            "SELECT {DATABASE_BACKUP_COLUMNS} FROM database_backups {filter} \
             ORDER BY created_at DESC, id DESC"
        );
        let mut stmt = self.connection.prepare(&sql)?;

        let backups = stmt
            .query_map(params_from_iter(values), map_database_backup)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(backups)
    }

    fn delete_database_backup(&mut self, id: i64) -> Result<()> {
        self.connection
            .execute("DELETE FROM database_backups WHERE id = ?", params![id])?;
        Ok(())
    }

    // ========== 文件备份记录 ==========

    fn insert_file_backup(&mut self, row: &FileBackupRow) -> Result<i64> {
        self.connection.execute(
            "INSERT INTO file_backups (project_id, schedule_id, backup_kind, trigger_type, \
             status, filename, storage, storage_key, size_bytes, checksum, files_count, \
             manifest, parent_backup_id, started_at, completed_at, duration_ms, \
             error_message, verified_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                row.project_id,
                row.schedule_id,
                row.backup_kind,
                row.trigger_type,
                row.status,
                row.filename,
                row.storage,
                row.storage_key,
                row.size_bytes,
                row.checksum,
                row.files_count,
                row.manifest,
                row.parent_backup_id,
                row.started_at,
                row.completed_at,
                row.duration_ms,
                row.error_message,
                row.verified_at,
                row.created_at,
            ],
        )?;

        let id: i64 =
            self.connection
                .query_row("SELECT currval('file_backup_id_seq')", [], |row| row.get(0))?;

        Ok(id)
    }

    fn update_file_backup(&mut self, row: &FileBackupRow) -> Result<()> {
        let updated = self.connection.execute(
            "UPDATE file_backups SET status = ?, size_bytes = ?, checksum = ?, files_count = ?, \
             manifest = ?, started_at = ?, completed_at = ?, duration_ms = ?, \
             error_message = ?, verified_at = ? WHERE id = ?",
            params![
                row.status,
                row.size_bytes,
                row.checksum,
                row.files_count,
                row.manifest,
                row.started_at,
                row.completed_at,
                row.duration_ms,
                row.error_message,
                row.verified_at,
                row.id,
            ],
        )?;
        ensure_updated(updated, row.id)
    }

    fn get_file_backup(&mut self, id: i64) -> Result<Option<FileBackupRow>> {
        let sql = format!("SELECT {FILE_BACKUP_COLUMNS} FROM file_backups WHERE id = ?");
        let mut stmt = self.connection.prepare(&sql)?;
        let mut rows = stmt.query(params![id])?;

        match rows.next()? {
            Some(row) => Ok(Some(map_file_backup(row)?)),
            None => Ok(None),
        }
    }

    fn query_file_backups(&mut self, query: &RecordQuery) -> Result<Vec<FileBackupRow>> {
        let (filter, values) = build_filter(query, "backup_kind");
        let sql = format!(
            "SELECT {FILE_BACKUP_COLUMNS} FROM file_backups {filter} \
             ORDER BY created_at DESC, id DESC"
        );
        let mut stmt = self.connection.prepare(&sql)?;

        let backups = stmt
            .query_map(params_from_iter(values), map_file_backup)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(backups)
    }

    fn get_file_backup_children(&mut self, parent_id: i64) -> Result<Vec<FileBackupRow>> {
        let sql = format!(
            "SELECT {FILE_BACKUP_COLUMNS} FROM file_backups WHERE parent_backup_id = ? \
             ORDER BY created_at, id"
        );
        let mut stmt = self.connection.prepare(&sql)?;

        let children = stmt
            .query_map(params![parent_id], map_file_backup)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(children)
    }

    fn delete_file_backup(&mut self, id: i64) -> Result<()> {
        self.connection
            .execute("DELETE FROM file_backups WHERE id = ?", params![id])?;
        Ok(())
    }

    // ========== 服务器备份记录 ==========

    fn insert_server_backup(&mut self, row: &ServerBackupRow) -> Result<i64> {
        self.connection.execute(
            "INSERT INTO server_backups (server_id, schedule_id, trigger_type, status, filename, \
             storage, storage_key, size_bytes, checksum, metadata, started_at, completed_at, \
             duration_ms, error_message, verified_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                row.server_id,
                row.schedule_id,
                row.trigger_type,
                row.status,
                row.filename,
                row.storage,
                row.storage_key,
                row.size_bytes,
                row.checksum,
                row.metadata,
                row.started_at,
                row.completed_at,
                row.duration_ms,
                row.error_message,
                row.verified_at,
                row.created_at,
            ],
        )?;

        let id: i64 = self.connection.query_row(
            "SELECT currval('server_backup_id_seq')",
            [],
            |row| row.get(0),
        )?;

        Ok(id)
    }

    fn update_server_backup(&mut self, row: &ServerBackupRow) -> Result<()> {
        let updated = self.connection.execute(
            "UPDATE server_backups SET status = ?, size_bytes = ?, checksum = ?, metadata = ?, \
             started_at = ?, completed_at = ?, duration_ms = ?, error_message = ?, \
             verified_at = ? WHERE id = ?",
            params![
                row.status,
                row.size_bytes,
                row.checksum,
                row.metadata,
                row.started_at,
                row.completed_at,
                row.duration_ms,
                row.error_message,
                row.verified_at,
                row.id,
            ],
        )?;
        ensure_updated(updated, row.id)
    }

    fn get_server_backup(&mut self, id: i64) -> Result<Option<ServerBackupRow>> {
        let sql = format!("SELECT {SERVER_BACKUP_COLUMNS} FROM server_backups WHERE id = ?");
        let mut stmt = self.connection.prepare(&sql)?;
        let mut rows = stmt.query(params![id])?;

        match rows.next()? {
            Some(row) => Ok(Some(map_server_backup(row)?)),
            None => Ok(None),
        }
    }

    fn query_server_backups(&mut self, query: &RecordQuery) -> Result<Vec<ServerBackupRow>> {
        let (filter, values) = build_filter(query, "");
        let sql = format!(
            "SELECT {SERVER_BACKUP_COLUMNS} FROM server_backups {filter} \
             ORDER BY created_at DESC, id DESC"
        );
        let mut stmt = self.connection.prepare(&sql)?;

        let backups = stmt
            .query_map(params_from_iter(values), map_server_backup)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(backups)
    }

    fn delete_server_backup(&mut self, id: i64) -> Result<()> {
        self.connection
            .execute("DELETE FROM server_backups WHERE id = ?", params![id])?;
        Ok(())
    }
}

/// 更新语句没有命中任何行时，记录已被删除
fn ensure_updated(updated: usize, id: i64) -> Result<()> {
    if updated == 0 {
        return Err(BackupError::RecordNotFound(id));
    }
    Ok(())
}

/// 生成 WHERE 子句；`extra_column` 为表特有的过滤列
/// (数据库备份为 database_name，文件备份为 backup_kind，服务器备份为空)
fn build_filter(query: &RecordQuery, extra_column: &str) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(project_id) = &query.project_id {
        clauses.push("project_id = ?".to_string());
        values.push(Value::Text(project_id.clone()));
    }
    if let Some(server_id) = &query.server_id {
        clauses.push("server_id = ?".to_string());
        values.push(Value::Text(server_id.clone()));
    }
    if let Some(schedule_id) = query.schedule_id {
        clauses.push("schedule_id = ?".to_string());
        values.push(Value::BigInt(schedule_id));
    }
    if let Some(status) = &query.status {
        clauses.push("status = ?".to_string());
        values.push(Value::Text(status.clone()));
    }
    let extra = match extra_column {
        "database_name" => query.database_name.as_ref(),
        "backup_kind" => query.backup_kind.as_ref(),
        _ => None,
    };
    if let Some(value) = extra {
        clauses.push(format!("{extra_column} = ?"));
        values.push(Value::Text(value.clone()));
    }
    if query.unverified_only {
        clauses.push("verified_at IS NULL".to_string());
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), values)
    }
}

fn map_schedule(row: &Row<'_>) -> duckdb::Result<ScheduleRow> {
    Ok(ScheduleRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        server_id: row.get(2)?,
        backup_kind: row.get(3)?,
        target_name: row.get(4)?,
        frequency: row.get(5)?,
        time_of_day: row.get(6)?,
        day_of_week: row.get(7)?,
        day_of_month: row.get(8)?,
        retention_daily: row.get(9)?,
        retention_weekly: row.get(10)?,
        retention_monthly: row.get(11)?,
        retention_days: row.get(12)?,
        storage: row.get(13)?,
        incremental: row.get(14)?,
        is_active: row.get(15)?,
        next_run_at: row.get(16)?,
        last_run_at: row.get(17)?,
        created_at: row.get(18)?,
    })
}

fn map_database_backup(row: &Row<'_>) -> duckdb::Result<DatabaseBackupRow> {
    Ok(DatabaseBackupRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        server_id: row.get(2)?,
        schedule_id: row.get(3)?,
        engine: row.get(4)?,
        database_name: row.get(5)?,
        trigger_type: row.get(6)?,
        status: row.get(7)?,
        filename: row.get(8)?,
        storage: row.get(9)?,
        storage_key: row.get(10)?,
        size_bytes: row.get(11)?,
        checksum: row.get(12)?,
        metadata: row.get(13)?,
        started_at: row.get(14)?,
        completed_at: row.get(15)?,
        duration_ms: row.get(16)?,
        error_message: row.get(17)?,
        verified_at: row.get(18)?,
        created_at: row.get(19)?,
    })
}

fn map_file_backup(row: &Row<'_>) -> duckdb::Result<FileBackupRow> {
    Ok(FileBackupRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        schedule_id: row.get(2)?,
        backup_kind: row.get(3)?,
        trigger_type: row.get(4)?,
        status: row.get(5)?,
        filename: row.get(6)?,
        storage: row.get(7)?,
        storage_key: row.get(8)?,
        size_bytes: row.get(9)?,
        checksum: row.get(10)?,
        files_count: row.get(11)?,
        manifest: row.get(12)?,
        parent_backup_id: row.get(13)?,
        started_at: row.get(14)?,
        completed_at: row.get(15)?,
        duration_ms: row.get(16)?,
        error_message: row.get(17)?,
        verified_at: row.get(18)?,
        created_at: row.get(19)?,
    })
}

fn map_server_backup(row: &Row<'_>) -> duckdb::Result<ServerBackupRow> {
    Ok(ServerBackupRow {
        id: row.get(0)?,
        server_id: row.get(1)?,
        schedule_id: row.get(2)?,
        trigger_type: row.get(3)?,
        status: row.get(4)?,
        filename: row.get(5)?,
        storage: row.get(6)?,
        storage_key: row.get(7)?,
        size_bytes: row.get(8)?,
        checksum: row.get(9)?,
        metadata: row.get(10)?,
        started_at: row.get(11)?,
        completed_at: row.get(12)?,
        duration_ms: row.get(13)?,
        error_message: row.get(14)?,
        verified_at: row.get(15)?,
        created_at: row.get(16)?,
    })
}
