use crate::db::{
    DatabaseBackupRow, DuckDbManager, FileBackupRow, RecordQuery, ScheduleRow, ServerBackupRow,
};
use crate::manifest::Manifest;
use crate::models::{
    BackupFilter, BackupSchedule, DatabaseBackup, FileBackup, NewSchedule, RetentionPolicy,
    ServerBackup,
};
use crate::{BackupError, Result};
use chrono::{DateTime, NaiveTime, Utc};
use std::path::Path;

/// 数据库管理器 - DuckDB适配器
///
/// 负责行模型与领域类型之间的转换，其余模块只接触领域类型。
#[derive(Debug, Clone)]
pub struct Database {
    manager: DuckDbManager,
}

impl Database {
    /// 连接到数据库
    pub async fn connect<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let manager = DuckDbManager::new(db_path).await?;
        Ok(Database { manager })
    }

    /// 连接到内存数据库 (主要用于测试，生产环境建议使用connect()以确保数据持久化)
    pub async fn connect_memory() -> Result<Self> {
        let manager = DuckDbManager::new_memory().await?;
        Ok(Database { manager })
    }

    // ========== 备份计划 ==========

    /// 创建备份计划
    pub async fn create_schedule(
        &self,
        new: &NewSchedule,
        next_run_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<BackupSchedule> {
        let schedule = BackupSchedule {
            id: 0,
            project_id: new.project_id.clone(),
            server_id: new.server_id.clone(),
            target: new.target,
            target_name: new.target_name.clone(),
            frequency: new.frequency,
            time_of_day: new.time_of_day,
            day_of_week: new.day_of_week,
            day_of_month: new.day_of_month,
            retention: new.retention,
            storage: new.storage.clone(),
            incremental: new.incremental,
            is_active: true,
            next_run_at: Some(next_run_at),
            last_run_at: None,
            created_at,
        };

        let id = self.manager.create_schedule(schedule_to_row(&schedule)).await?;
        self.get_schedule(id)
            .await?
            .ok_or_else(|| BackupError::custom("无法获取刚创建的备份计划"))
    }

    pub async fn get_schedule(&self, id: i64) -> Result<Option<BackupSchedule>> {
        self.manager
            .get_schedule(id)
            .await?
            .map(schedule_from_row)
            .transpose()
    }

    pub async fn list_schedules(&self, active_only: bool) -> Result<Vec<BackupSchedule>> {
        self.manager
            .list_schedules(active_only)
            .await?
            .into_iter()
            .map(schedule_from_row)
            .collect()
    }

    /// 记录计划执行并推进下次执行时间
    pub async fn record_schedule_run(
        &self,
        id: i64,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        self.manager
            .update_schedule_run(id, last_run_at, next_run_at)
            .await
    }

    pub async fn set_schedule_active(&self, id: i64, active: bool) -> Result<bool> {
        self.manager.set_schedule_active(id, active).await
    }

    pub async fn delete_schedule(&self, id: i64) -> Result<bool> {
        self.manager.delete_schedule(id).await
    }

    // ========== 数据库备份记录 ==========

    /// 插入数据库备份记录 (忽略 backup.id)，返回带 id 的记录
    pub async fn insert_database_backup(&self, backup: &DatabaseBackup) -> Result<DatabaseBackup> {
        let id = self
            .manager
            .insert_database_backup(database_backup_to_row(backup)?)
            .await?;
        self.get_database_backup(id)
            .await?
            .ok_or(BackupError::RecordNotFound(id))
    }

    pub async fn update_database_backup(&self, backup: &DatabaseBackup) -> Result<()> {
        self.manager
            .update_database_backup(database_backup_to_row(backup)?)
            .await
    }

    pub async fn get_database_backup(&self, id: i64) -> Result<Option<DatabaseBackup>> {
        self.manager
            .get_database_backup(id)
            .await?
            .map(database_backup_from_row)
            .transpose()
    }

    /// 按条件查询，按创建时间倒序
    pub async fn list_database_backups(
        &self,
        filter: &BackupFilter,
    ) -> Result<Vec<DatabaseBackup>> {
        self.manager
            .query_database_backups(filter_to_query(filter))
            .await?
            .into_iter()
            .map(database_backup_from_row)
            .collect()
    }

    /// 删除数据库备份记录 (不处理存储中的产物)
    pub async fn delete_database_backup_record(&self, id: i64) -> Result<()> {
        self.manager.delete_database_backup(id).await
    }

    // ========== 文件备份记录 ==========

    pub async fn insert_file_backup(&self, backup: &FileBackup) -> Result<FileBackup> {
        let id = self
            .manager
            .insert_file_backup(file_backup_to_row(backup)?)
            .await?;
        self.get_file_backup(id)
            .await?
            .ok_or(BackupError::RecordNotFound(id))
    }

    pub async fn update_file_backup(&self, backup: &FileBackup) -> Result<()> {
        self.manager
            .update_file_backup(file_backup_to_row(backup)?)
            .await
    }

    pub async fn get_file_backup(&self, id: i64) -> Result<Option<FileBackup>> {
        self.manager
            .get_file_backup(id)
            .await?
            .map(file_backup_from_row)
            .transpose()
    }

    pub async fn list_file_backups(&self, filter: &BackupFilter) -> Result<Vec<FileBackup>> {
        self.manager
            .query_file_backups(filter_to_query(filter))
            .await?
            .into_iter()
            .map(file_backup_from_row)
            .collect()
    }

    /// 直接以 parent_id 为基础的增量备份
    pub async fn file_backup_children(&self, parent_id: i64) -> Result<Vec<FileBackup>> {
        self.manager
            .get_file_backup_children(parent_id)
            .await?
            .into_iter()
            .map(file_backup_from_row)
            .collect()
    }

    /// 删除文件备份记录 (不处理存储中的产物)
    pub async fn delete_file_backup_record(&self, id: i64) -> Result<()> {
        self.manager.delete_file_backup(id).await
    }

    // ========== 服务器备份记录 ==========

    pub async fn insert_server_backup(&self, backup: &ServerBackup) -> Result<ServerBackup> {
        let id = self
            .manager
            .insert_server_backup(server_backup_to_row(backup)?)
            .await?;
        self.get_server_backup(id)
            .await?
            .ok_or(BackupError::RecordNotFound(id))
    }

    pub async fn update_server_backup(&self, backup: &ServerBackup) -> Result<()> {
        self.manager
            .update_server_backup(server_backup_to_row(backup)?)
            .await
    }

    pub async fn get_server_backup(&self, id: i64) -> Result<Option<ServerBackup>> {
        self.manager
            .get_server_backup(id)
            .await?
            .map(server_backup_from_row)
            .transpose()
    }

    /// 按服务器 / 计划 / 状态过滤，忽略 project_id
    pub async fn list_server_backups(&self, filter: &BackupFilter) -> Result<Vec<ServerBackup>> {
        let query = RecordQuery {
            project_id: None,
            ..filter_to_query(filter)
        };
        self.manager
            .query_server_backups(query)
            .await?
            .into_iter()
            .map(server_backup_from_row)
            .collect()
    }

    pub async fn delete_server_backup_record(&self, id: i64) -> Result<()> {
        self.manager.delete_server_backup(id).await
    }
}

fn filter_to_query(filter: &BackupFilter) -> RecordQuery {
    RecordQuery {
        project_id: filter.project_id.clone(),
        server_id: filter.server_id.clone(),
        schedule_id: filter.schedule_id,
        status: filter.status.map(|s| s.as_str().to_string()),
        backup_kind: filter.kind.map(|k| k.as_str().to_string()),
        database_name: filter.database_name.clone(),
        unverified_only: filter.unverified_only,
    }
}

fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|e| BackupError::custom(format!("无效的执行时间 {value}: {e}")))
}

fn to_u32(value: Option<i32>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

fn schedule_from_row(row: ScheduleRow) -> Result<BackupSchedule> {
    let retention = match row.retention_days {
        Some(days) if days > 0 => RetentionPolicy::Days(days as u32),
        _ => RetentionPolicy::Tiered {
            daily: to_u32(row.retention_daily).unwrap_or(0),
            weekly: to_u32(row.retention_weekly).unwrap_or(0),
            monthly: to_u32(row.retention_monthly).unwrap_or(0),
        },
    };

    Ok(BackupSchedule {
        id: row.id,
        project_id: row.project_id,
        server_id: row.server_id,
        target: row.backup_kind.parse()?,
        target_name: row.target_name,
        frequency: row.frequency.parse()?,
        time_of_day: parse_time_of_day(&row.time_of_day)?,
        day_of_week: to_u32(row.day_of_week),
        day_of_month: to_u32(row.day_of_month),
        retention,
        storage: row.storage,
        incremental: row.incremental,
        is_active: row.is_active,
        next_run_at: row.next_run_at,
        last_run_at: row.last_run_at,
        created_at: row.created_at,
    })
}

fn schedule_to_row(schedule: &BackupSchedule) -> ScheduleRow {
    let (daily, weekly, monthly, days) = match schedule.retention {
        RetentionPolicy::Tiered {
            daily,
            weekly,
            monthly,
        } => (
            Some(daily as i32),
            Some(weekly as i32),
            Some(monthly as i32),
            None,
        ),
        RetentionPolicy::Days(days) => (None, None, None, Some(days as i32)),
    };

    ScheduleRow {
        id: schedule.id,
        project_id: schedule.project_id.clone(),
        server_id: schedule.server_id.clone(),
        backup_kind: schedule.target.as_str().to_string(),
        target_name: schedule.target_name.clone(),
        frequency: schedule.frequency.as_str().to_string(),
        time_of_day: schedule.time_of_day.format("%H:%M").to_string(),
        day_of_week: schedule.day_of_week.map(|d| d as i32),
        day_of_month: schedule.day_of_month.map(|d| d as i32),
        retention_daily: daily,
        retention_weekly: weekly,
        retention_monthly: monthly,
        retention_days: days,
        storage: schedule.storage.clone(),
        incremental: schedule.incremental,
        is_active: schedule.is_active,
        next_run_at: schedule.next_run_at,
        last_run_at: schedule.last_run_at,
        created_at: schedule.created_at,
    }
}

fn database_backup_from_row(row: DatabaseBackupRow) -> Result<DatabaseBackup> {
    let metadata = row
        .metadata
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    Ok(DatabaseBackup {
        id: row.id,
        project_id: row.project_id,
        server_id: row.server_id,
        schedule_id: row.schedule_id,
        engine: row.engine.parse()?,
        database_name: row.database_name,
        trigger: row.trigger_type.parse()?,
        status: row.status.parse()?,
        filename: row.filename,
        storage: row.storage,
        storage_key: row.storage_key,
        size_bytes: row.size_bytes.max(0) as u64,
        checksum: row.checksum,
        metadata,
        started_at: row.started_at,
        completed_at: row.completed_at,
        duration_ms: row.duration_ms,
        error_message: row.error_message,
        verified_at: row.verified_at,
        created_at: row.created_at,
    })
}

fn database_backup_to_row(backup: &DatabaseBackup) -> Result<DatabaseBackupRow> {
    let metadata = backup
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    Ok(DatabaseBackupRow {
        id: backup.id,
        project_id: backup.project_id.clone(),
        server_id: backup.server_id.clone(),
        schedule_id: backup.schedule_id,
        engine: backup.engine.as_str().to_string(),
        database_name: backup.database_name.clone(),
        trigger_type: backup.trigger.as_str().to_string(),
        status: backup.status.as_str().to_string(),
        filename: backup.filename.clone(),
        storage: backup.storage.clone(),
        storage_key: backup.storage_key.clone(),
        size_bytes: backup.size_bytes as i64,
        checksum: backup.checksum.clone(),
        metadata,
        started_at: backup.started_at,
        completed_at: backup.completed_at,
        duration_ms: backup.duration_ms,
        error_message: backup.error_message.clone(),
        verified_at: backup.verified_at,
        created_at: backup.created_at,
    })
}

fn file_backup_from_row(row: FileBackupRow) -> Result<FileBackup> {
    let manifest: Manifest = match row.manifest.as_deref() {
        Some(json) if !json.is_empty() => serde_json::from_str(json)?,
        _ => Manifest::default(),
    };

    Ok(FileBackup {
        id: row.id,
        project_id: row.project_id,
        schedule_id: row.schedule_id,
        kind: row.backup_kind.parse()?,
        trigger: row.trigger_type.parse()?,
        status: row.status.parse()?,
        filename: row.filename,
        storage: row.storage,
        storage_key: row.storage_key,
        size_bytes: row.size_bytes.max(0) as u64,
        checksum: row.checksum,
        files_count: row.files_count.max(0) as u64,
        manifest,
        parent_backup_id: row.parent_backup_id,
        started_at: row.started_at,
        completed_at: row.completed_at,
        duration_ms: row.duration_ms,
        error_message: row.error_message,
        verified_at: row.verified_at,
        created_at: row.created_at,
    })
}

fn file_backup_to_row(backup: &FileBackup) -> Result<FileBackupRow> {
    Ok(FileBackupRow {
        id: backup.id,
        project_id: backup.project_id.clone(),
        schedule_id: backup.schedule_id,
        backup_kind: backup.kind.as_str().to_string(),
        trigger_type: backup.trigger.as_str().to_string(),
        status: backup.status.as_str().to_string(),
        filename: backup.filename.clone(),
        storage: backup.storage.clone(),
        storage_key: backup.storage_key.clone(),
        size_bytes: backup.size_bytes as i64,
        checksum: backup.checksum.clone(),
        files_count: backup.files_count as i64,
        manifest: Some(serde_json::to_string(&backup.manifest)?),
        parent_backup_id: backup.parent_backup_id,
        started_at: backup.started_at,
        completed_at: backup.completed_at,
        duration_ms: backup.duration_ms,
        error_message: backup.error_message.clone(),
        verified_at: backup.verified_at,
        created_at: backup.created_at,
    })
}

fn server_backup_from_row(row: ServerBackupRow) -> Result<ServerBackup> {
    let metadata = row
        .metadata
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    Ok(ServerBackup {
        id: row.id,
        server_id: row.server_id,
        schedule_id: row.schedule_id,
        trigger: row.trigger_type.parse()?,
        status: row.status.parse()?,
        filename: row.filename,
        storage: row.storage,
        storage_key: row.storage_key,
        size_bytes: row.size_bytes.max(0) as u64,
        checksum: row.checksum,
        metadata,
        started_at: row.started_at,
        completed_at: row.completed_at,
        duration_ms: row.duration_ms,
        error_message: row.error_message,
        verified_at: row.verified_at,
        created_at: row.created_at,
    })
}

fn server_backup_to_row(backup: &ServerBackup) -> Result<ServerBackupRow> {
    let metadata = backup
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    Ok(ServerBackupRow {
        id: backup.id,
        server_id: backup.server_id.clone(),
        schedule_id: backup.schedule_id,
        trigger_type: backup.trigger.as_str().to_string(),
        status: backup.status.as_str().to_string(),
        filename: backup.filename.clone(),
        storage: backup.storage.clone(),
        storage_key: backup.storage_key.clone(),
        size_bytes: backup.size_bytes as i64,
        checksum: backup.checksum.clone(),
        metadata,
        started_at: backup.started_at,
        completed_at: backup.completed_at,
        duration_ms: backup.duration_ms,
        error_message: backup.error_message.clone(),
        verified_at: backup.verified_at,
        created_at: backup.created_at,
    })
}
