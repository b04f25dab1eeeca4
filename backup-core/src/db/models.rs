use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 备份计划行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub id: i64,
    pub project_id: String,
    pub server_id: String,
    pub backup_kind: String,
    pub target_name: Option<String>,
    pub frequency: String,
    pub time_of_day: String,
    pub day_of_week: Option<i32>,
    pub day_of_month: Option<i32>,
    pub retention_daily: Option<i32>,
    pub retention_weekly: Option<i32>,
    pub retention_monthly: Option<i32>,
    pub retention_days: Option<i32>,
    pub storage: String,
    pub incremental: bool,
    pub is_active: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 数据库备份行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseBackupRow {
    pub id: i64,
    pub project_id: String,
    pub server_id: String,
    pub schedule_id: Option<i64>,
    pub engine: String,
    pub database_name: String,
    pub trigger_type: String,
    pub status: String,
    pub filename: String,
    pub storage: String,
    pub storage_key: String,
    pub size_bytes: i64,
    pub checksum: Option<String>,
    pub metadata: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 文件备份行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBackupRow {
    pub id: i64,
    pub project_id: String,
    pub schedule_id: Option<i64>,
    pub backup_kind: String,
    pub trigger_type: String,
    pub status: String,
    pub filename: String,
    pub storage: String,
    pub storage_key: String,
    pub size_bytes: i64,
    pub checksum: Option<String>,
    pub files_count: i64,
    pub manifest: Option<String>,
    pub parent_backup_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 服务器备份行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerBackupRow {
    pub id: i64,
    pub server_id: String,
    pub schedule_id: Option<i64>,
    pub trigger_type: String,
    pub status: String,
    pub filename: String,
    pub storage: String,
    pub storage_key: String,
    pub size_bytes: i64,
    pub checksum: Option<String>,
    pub metadata: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 备份记录查询条件
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub project_id: Option<String>,
    pub server_id: Option<String>,
    pub schedule_id: Option<i64>,
    pub status: Option<String>,
    pub backup_kind: Option<String>,
    pub database_name: Option<String>,
    pub unverified_only: bool,
}
