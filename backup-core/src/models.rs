//! 备份计划与备份记录的领域类型

use crate::manifest::Manifest;
use crate::{BackupError, Result};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 备份状态: pending -> running -> completed | failed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Running => "running",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }

    /// 是否已进入终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, BackupStatus::Completed | BackupStatus::Failed)
    }
}

impl FromStr for BackupStatus {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(BackupStatus::Pending),
            "running" => Ok(BackupStatus::Running),
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(BackupError::custom(format!("未知的备份状态: {other}"))),
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 备份触发方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Scheduled,
    PreDeploy,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Manual => "manual",
            TriggerType::Scheduled => "scheduled",
            TriggerType::PreDeploy => "pre_deploy",
        }
    }
}

impl FromStr for TriggerType {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(TriggerType::Manual),
            "scheduled" => Ok(TriggerType::Scheduled),
            "pre_deploy" | "pre-deploy" => Ok(TriggerType::PreDeploy),
            other => Err(BackupError::invalid_config(format!(
                "未知的备份类型: {other} (可选 manual / scheduled / pre_deploy)"
            ))),
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 文件备份类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileBackupKind {
    Full,
    Incremental,
}

impl FileBackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileBackupKind::Full => "full",
            FileBackupKind::Incremental => "incremental",
        }
    }
}

impl FromStr for FileBackupKind {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(FileBackupKind::Full),
            "incremental" => Ok(FileBackupKind::Incremental),
            other => Err(BackupError::invalid_config(format!(
                "未知的文件备份类型: {other} (可选 full / incremental)"
            ))),
        }
    }
}

impl fmt::Display for FileBackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 数据库引擎
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    Mysql,
    Postgresql,
    Sqlite,
}

impl DatabaseEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseEngine::Mysql => "mysql",
            DatabaseEngine::Postgresql => "postgresql",
            DatabaseEngine::Sqlite => "sqlite",
        }
    }
}

impl FromStr for DatabaseEngine {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mysql" | "mariadb" => Ok(DatabaseEngine::Mysql),
            "postgresql" | "postgres" | "pgsql" => Ok(DatabaseEngine::Postgresql),
            "sqlite" => Ok(DatabaseEngine::Sqlite),
            other => Err(BackupError::invalid_config(format!(
                "不支持的数据库类型: {other}"
            ))),
        }
    }
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 计划备份的目标: 某种数据库、项目文件或整台服务器
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackupTarget {
    Database(DatabaseEngine),
    Files,
    Server,
}

impl BackupTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupTarget::Database(engine) => engine.as_str(),
            BackupTarget::Files => "files",
            BackupTarget::Server => "server",
        }
    }
}

impl FromStr for BackupTarget {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "files" => Ok(BackupTarget::Files),
            "server" => Ok(BackupTarget::Server),
            _ => s.parse().map(BackupTarget::Database),
        }
    }
}

impl fmt::Display for BackupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 执行频率
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl FromStr for Frequency {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hourly" => Ok(Frequency::Hourly),
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(BackupError::invalid_config(format!(
                "未知的执行频率: {other} (可选 hourly / daily / weekly / monthly)"
            ))),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 保留策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// 按天 / ISO 周 / 月分层保留
    Tiered { daily: u32, weekly: u32, monthly: u32 },
    /// 保留最近 N 天
    Days(u32),
}

impl RetentionPolicy {
    pub fn validate(&self) -> Result<()> {
        match self {
            RetentionPolicy::Tiered {
                daily,
                weekly,
                monthly,
            } if *daily == 0 && *weekly == 0 && *monthly == 0 => Err(
                BackupError::invalid_config("分层保留策略至少需要一个大于 0 的数量"),
            ),
            RetentionPolicy::Days(0) => {
                Err(BackupError::invalid_config("retention_days 必须大于 0"))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionPolicy::Tiered {
                daily,
                weekly,
                monthly,
            } => write!(f, "{daily}d/{weekly}w/{monthly}m"),
            RetentionPolicy::Days(days) => write!(f, "{days} days"),
        }
    }
}

/// 备份计划
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSchedule {
    pub id: i64,
    /// 服务器计划不属于任何项目，为空字符串
    pub project_id: String,
    pub server_id: String,
    pub target: BackupTarget,
    /// 数据库名 (文件备份时为空)
    pub target_name: Option<String>,
    pub frequency: Frequency,
    pub time_of_day: NaiveTime,
    /// 0 = 周日 ... 6 = 周六，仅 weekly 使用
    pub day_of_week: Option<u32>,
    /// 1-31，仅 monthly 使用
    pub day_of_month: Option<u32>,
    pub retention: RetentionPolicy,
    pub storage: String,
    /// 文件计划是否执行增量备份
    pub incremental: bool,
    pub is_active: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 新建备份计划的参数
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub project_id: String,
    pub server_id: String,
    pub target: BackupTarget,
    pub target_name: Option<String>,
    pub frequency: Frequency,
    pub time_of_day: NaiveTime,
    pub day_of_week: Option<u32>,
    pub day_of_month: Option<u32>,
    pub retention: RetentionPolicy,
    pub storage: String,
    pub incremental: bool,
}

impl NewSchedule {
    /// 校验计划字段，只校验当前频率会用到的字段
    pub fn validate(&self) -> Result<()> {
        self.retention.validate()?;

        match self.frequency {
            Frequency::Weekly => match self.day_of_week {
                Some(day) if day <= 6 => {}
                Some(day) => {
                    return Err(BackupError::invalid_config(format!(
                        "day_of_week 必须在 0-6 之间，当前为 {day}"
                    )));
                }
                None => return Err(BackupError::invalid_config("weekly 计划需要 day_of_week")),
            },
            Frequency::Monthly => match self.day_of_month {
                Some(day) if (1..=31).contains(&day) => {}
                Some(day) => {
                    return Err(BackupError::invalid_config(format!(
                        "day_of_month 必须在 1-31 之间，当前为 {day}"
                    )));
                }
                None => {
                    return Err(BackupError::invalid_config("monthly 计划需要 day_of_month"));
                }
            },
            Frequency::Hourly | Frequency::Daily => {}
        }

        match self.target {
            BackupTarget::Database(_) => {
                if self.target_name.as_deref().is_none_or(str::is_empty) {
                    return Err(BackupError::invalid_config("数据库计划需要指定数据库名"));
                }
                if self.incremental {
                    return Err(BackupError::invalid_config("数据库备份不支持增量"));
                }
            }
            BackupTarget::Files => {}
            BackupTarget::Server => {
                if self.incremental {
                    return Err(BackupError::invalid_config("服务器备份只支持全量"));
                }
                if !matches!(self.retention, RetentionPolicy::Days(_)) {
                    return Err(BackupError::invalid_config(
                        "服务器计划只支持按天保留 (retention_days)",
                    ));
                }
            }
        }

        if self.server_id.trim().is_empty() {
            return Err(BackupError::invalid_config("服务器不能为空"));
        }
        if self.storage.trim().is_empty() {
            return Err(BackupError::invalid_config("存储目标不能为空"));
        }

        Ok(())
    }
}

/// 一次备份请求；手动备份不需要持久化的计划
#[derive(Debug, Clone)]
pub struct DatabaseBackupRequest {
    pub project_id: String,
    pub server_id: String,
    pub engine: DatabaseEngine,
    pub database_name: String,
    pub storage: String,
    pub trigger: TriggerType,
    pub schedule_id: Option<i64>,
}

impl DatabaseBackupRequest {
    /// 从计划生成请求
    pub fn from_schedule(schedule: &BackupSchedule, trigger: TriggerType) -> Result<Self> {
        let BackupTarget::Database(engine) = schedule.target else {
            return Err(BackupError::invalid_config(format!(
                "计划 {} 不是数据库备份计划",
                schedule.id
            )));
        };
        let database_name = schedule.target_name.clone().ok_or_else(|| {
            BackupError::invalid_config(format!("计划 {} 缺少数据库名", schedule.id))
        })?;

        Ok(Self {
            project_id: schedule.project_id.clone(),
            server_id: schedule.server_id.clone(),
            engine,
            database_name,
            storage: schedule.storage.clone(),
            trigger,
            schedule_id: Some(schedule.id),
        })
    }
}

/// 文件备份请求
#[derive(Debug, Clone)]
pub struct FileBackupRequest {
    pub project_id: String,
    pub kind: FileBackupKind,
    /// 增量备份时显式指定的基础备份
    pub base_backup_id: Option<i64>,
    pub storage: String,
    pub trigger: TriggerType,
    pub schedule_id: Option<i64>,
    /// 在项目与默认排除规则之外追加的规则
    pub extra_excludes: Vec<String>,
}

/// 服务器备份请求
#[derive(Debug, Clone)]
pub struct ServerBackupRequest {
    pub server_id: String,
    pub storage: String,
    pub trigger: TriggerType,
    pub schedule_id: Option<i64>,
}

impl ServerBackupRequest {
    pub fn from_schedule(schedule: &BackupSchedule, trigger: TriggerType) -> Result<Self> {
        if schedule.target != BackupTarget::Server {
            return Err(BackupError::invalid_config(format!(
                "计划 {} 不是服务器备份计划",
                schedule.id
            )));
        }
        Ok(Self {
            server_id: schedule.server_id.clone(),
            storage: schedule.storage.clone(),
            trigger,
            schedule_id: Some(schedule.id),
        })
    }
}

/// 记录的种类，用于跨表引用同一份产物
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Database,
    Files,
    Server,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Database => "database",
            RecordKind::Files => "files",
            RecordKind::Server => "server",
        }
    }
}

impl FromStr for RecordKind {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "database" | "db" => Ok(RecordKind::Database),
            "files" | "file" => Ok(RecordKind::Files),
            "server" => Ok(RecordKind::Server),
            other => Err(BackupError::invalid_config(format!(
                "未知的备份种类: {other} (可选 database / files / server)"
            ))),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 存储中的一份备份产物
#[derive(Debug, Clone)]
pub struct ArtifactRef {
    pub kind: RecordKind,
    pub id: i64,
    pub status: BackupStatus,
    pub storage: String,
    pub storage_key: String,
    pub checksum: Option<String>,
    pub size_bytes: u64,
}

/// 数据库备份记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseBackup {
    pub id: i64,
    pub project_id: String,
    pub server_id: String,
    pub schedule_id: Option<i64>,
    pub engine: DatabaseEngine,
    pub database_name: String,
    pub trigger: TriggerType,
    pub status: BackupStatus,
    pub filename: String,
    pub storage: String,
    pub storage_key: String,
    pub size_bytes: u64,
    pub checksum: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DatabaseBackup {
    pub fn artifact(&self) -> ArtifactRef {
        ArtifactRef {
            kind: RecordKind::Database,
            id: self.id,
            status: self.status,
            storage: self.storage.clone(),
            storage_key: self.storage_key.clone(),
            checksum: self.checksum.clone(),
            size_bytes: self.size_bytes,
        }
    }
}

/// 文件备份记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBackup {
    pub id: i64,
    pub project_id: String,
    pub schedule_id: Option<i64>,
    pub kind: FileBackupKind,
    pub trigger: TriggerType,
    pub status: BackupStatus,
    pub filename: String,
    pub storage: String,
    pub storage_key: String,
    pub size_bytes: u64,
    pub checksum: Option<String>,
    pub files_count: u64,
    pub manifest: Manifest,
    pub parent_backup_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl FileBackup {
    pub fn artifact(&self) -> ArtifactRef {
        ArtifactRef {
            kind: RecordKind::Files,
            id: self.id,
            status: self.status,
            storage: self.storage.clone(),
            storage_key: self.storage_key.clone(),
            checksum: self.checksum.clone(),
            size_bytes: self.size_bytes,
        }
    }
}

/// 服务器备份记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerBackup {
    pub id: i64,
    pub server_id: String,
    pub schedule_id: Option<i64>,
    pub trigger: TriggerType,
    pub status: BackupStatus,
    pub filename: String,
    pub storage: String,
    pub storage_key: String,
    pub size_bytes: u64,
    pub checksum: Option<String>,
    /// 打包的目录与方式
    pub metadata: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ServerBackup {
    pub fn artifact(&self) -> ArtifactRef {
        ArtifactRef {
            kind: RecordKind::Server,
            id: self.id,
            status: self.status,
            storage: self.storage.clone(),
            storage_key: self.storage_key.clone(),
            checksum: self.checksum.clone(),
            size_bytes: self.size_bytes,
        }
    }
}

/// 备份记录查询条件
#[derive(Debug, Clone, Default)]
pub struct BackupFilter {
    /// 对服务器备份无效
    pub project_id: Option<String>,
    pub server_id: Option<String>,
    pub schedule_id: Option<i64>,
    pub status: Option<BackupStatus>,
    /// 仅对文件备份生效
    pub kind: Option<FileBackupKind>,
    /// 仅对数据库备份生效
    pub database_name: Option<String>,
    pub unverified_only: bool,
}

impl BackupFilter {
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Default::default()
        }
    }

    pub fn completed(mut self) -> Self {
        self.status = Some(BackupStatus::Completed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(frequency: Frequency) -> NewSchedule {
        NewSchedule {
            project_id: "shop".to_string(),
            server_id: "web-1".to_string(),
            target: BackupTarget::Database(DatabaseEngine::Mysql),
            target_name: Some("shop".to_string()),
            frequency,
            time_of_day: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
            day_of_week: None,
            day_of_month: None,
            retention: RetentionPolicy::Tiered {
                daily: 7,
                weekly: 4,
                monthly: 3,
            },
            storage: "local".to_string(),
            incremental: false,
        }
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!(
            "postgres".parse::<BackupTarget>().unwrap(),
            BackupTarget::Database(DatabaseEngine::Postgresql)
        );
        assert_eq!("files".parse::<BackupTarget>().unwrap(), BackupTarget::Files);
        assert_eq!("server".parse::<BackupTarget>().unwrap(), BackupTarget::Server);
        assert!("oracle".parse::<BackupTarget>().is_err());
    }

    #[test]
    fn test_validate_weekly_requires_day() {
        let mut new = schedule(Frequency::Weekly);
        assert!(new.validate().is_err());
        new.day_of_week = Some(7);
        assert!(new.validate().is_err());
        new.day_of_week = Some(0);
        assert!(new.validate().is_ok());
        // 月计划字段在周计划中被忽略
        new.day_of_month = Some(99);
        assert!(new.validate().is_ok());
    }

    #[test]
    fn test_validate_retention() {
        let mut new = schedule(Frequency::Daily);
        new.retention = RetentionPolicy::Tiered {
            daily: 0,
            weekly: 0,
            monthly: 0,
        };
        let err = new.validate().unwrap_err();
        assert!(err.is_configuration_error());

        new.retention = RetentionPolicy::Days(0);
        assert!(new.validate().is_err());
        new.retention = RetentionPolicy::Days(30);
        assert!(new.validate().is_ok());
    }

    #[test]
    fn test_database_schedule_rejects_incremental() {
        let mut new = schedule(Frequency::Daily);
        new.incremental = true;
        assert!(new.validate().is_err());
    }

    #[test]
    fn test_server_schedule_requires_day_retention() {
        let mut new = schedule(Frequency::Daily);
        new.project_id = String::new();
        new.target = BackupTarget::Server;
        new.target_name = None;
        assert!(new.validate().is_err());

        new.retention = RetentionPolicy::Days(14);
        assert!(new.validate().is_ok());

        new.incremental = true;
        assert!(new.validate().is_err());
    }

    #[test]
    fn test_record_kind_parsing() {
        assert_eq!("db".parse::<RecordKind>().unwrap(), RecordKind::Database);
        assert_eq!("server".parse::<RecordKind>().unwrap(), RecordKind::Server);
        assert!("vm".parse::<RecordKind>().is_err());
    }
}
