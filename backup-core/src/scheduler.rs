//! 计划调度
//!
//! 每次 tick 找出到期的计划逐个执行，执行后无论成败都推进下次执行时间，
//! 成功的计划随后按保留策略清理旧备份。

use crate::backup::BackupManager;
use crate::models::{
    BackupSchedule, BackupTarget, DatabaseBackupRequest, FileBackupKind, FileBackupRequest,
    NewSchedule, ServerBackupRequest, TriggerType,
};
use crate::retention::RetentionEngine;
use crate::schedule::{Recurrence, is_due};
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// 单个计划的执行结果
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    pub schedule_id: i64,
    pub success: bool,
    pub pruned: usize,
    pub error: Option<String>,
}

/// 一次 tick 的汇总
#[derive(Debug, Clone)]
pub struct TickReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub pruned: usize,
    pub outcomes: Vec<ScheduleOutcome>,
}

impl TickReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started_at,
            processed: 0,
            succeeded: 0,
            failed: 0,
            pruned: 0,
            outcomes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    manager: BackupManager,
    retention: RetentionEngine,
}

impl Scheduler {
    pub fn new(manager: BackupManager) -> Self {
        Self {
            retention: RetentionEngine::new(manager.clone()),
            manager,
        }
    }

    pub fn retention(&self) -> &RetentionEngine {
        &self.retention
    }

    /// 创建计划，首次执行时间为严格晚于当前时刻的下一个执行点
    pub async fn create_schedule(&self, new: &NewSchedule) -> Result<BackupSchedule> {
        new.validate()?;
        let config = self.manager.config();
        if new.target != BackupTarget::Server {
            config.project(&new.project_id)?;
        }
        config.server(&new.server_id)?;
        self.manager.storage().get(&new.storage)?;

        let now = self.manager.now();
        let next_run_at = Recurrence::from(new).next_after(now)?;
        let schedule = self
            .manager
            .database()
            .create_schedule(new, next_run_at, now)
            .await?;

        info!(
            schedule_id = schedule.id,
            next_run_at = %next_run_at,
            "📅 已创建备份计划: {} {}",
            schedule.project_id,
            Recurrence::from(&schedule).label()
        );
        Ok(schedule)
    }

    /// 当前到期的启用计划
    pub async fn find_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<BackupSchedule>> {
        let schedules = self.manager.database().list_schedules(true).await?;
        Ok(schedules
            .into_iter()
            .filter(|schedule| is_due(schedule, now))
            .collect())
    }

    /// 执行一轮调度
    ///
    /// 单个计划失败不会中断本轮；只有存储不可用或数据库读取失败才返回错误。
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<TickReport> {
        self.manager.storage().ensure_available()?;

        let now = self.manager.now();
        let mut report = TickReport::new(now);
        let due = self.find_due_schedules(now).await?;

        if due.is_empty() {
            info!(run_id = %report.run_id, "没有到期的备份计划");
            return Ok(report);
        }
        info!(run_id = %report.run_id, count = due.len(), "⏰ 发现 {} 个到期计划", due.len());

        let parallel = self.manager.config().scheduler.max_parallel.max(1);
        let outcomes: Vec<ScheduleOutcome> =
            stream::iter(due.iter().map(|s| self.run_schedule(s, now)))
                .buffer_unordered(parallel)
                .collect()
                .await;

        for outcome in outcomes {
            report.processed += 1;
            report.pruned += outcome.pruned;
            if outcome.success {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
            report.outcomes.push(outcome);
        }
        report.outcomes.sort_by_key(|o| o.schedule_id);

        info!(
            run_id = %report.run_id,
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            pruned = report.pruned,
            "调度完成"
        );
        Ok(report)
    }

    /// 执行单个计划: 备份、推进时间、清理
    async fn run_schedule(&self, schedule: &BackupSchedule, now: DateTime<Utc>) -> ScheduleOutcome {
        let result = self.execute(schedule).await;

        match Recurrence::from(schedule).next_after(now) {
            Ok(next) => {
                if let Err(e) = self
                    .manager
                    .database()
                    .record_schedule_run(schedule.id, now, next)
                    .await
                {
                    error!(schedule_id = schedule.id, "更新下次执行时间失败: {}", e);
                }
            }
            Err(e) => error!(schedule_id = schedule.id, "无法计算下次执行时间: {}", e),
        }

        match result {
            Ok(()) => {
                let pruned = match self.retention.cleanup_schedule(schedule, false).await {
                    Ok(report) => report.deleted,
                    Err(e) => {
                        warn!(schedule_id = schedule.id, "备份成功但清理失败: {}", e);
                        0
                    }
                };
                ScheduleOutcome {
                    schedule_id: schedule.id,
                    success: true,
                    pruned,
                    error: None,
                }
            }
            Err(e) => {
                error!(schedule_id = schedule.id, "❌ 计划执行失败: {}", e);
                ScheduleOutcome {
                    schedule_id: schedule.id,
                    success: false,
                    pruned: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn execute(&self, schedule: &BackupSchedule) -> Result<()> {
        match schedule.target {
            BackupTarget::Database(_) => {
                let request =
                    DatabaseBackupRequest::from_schedule(schedule, TriggerType::Scheduled)?;
                self.manager.create_database_backup(&request).await?;
            }
            BackupTarget::Server => {
                let request = ServerBackupRequest::from_schedule(schedule, TriggerType::Scheduled)?;
                self.manager.create_server_backup(&request).await?;
            }
            BackupTarget::Files => {
                let request = FileBackupRequest {
                    project_id: schedule.project_id.clone(),
                    kind: self.file_kind(schedule).await?,
                    base_backup_id: None,
                    storage: schedule.storage.clone(),
                    trigger: TriggerType::Scheduled,
                    schedule_id: Some(schedule.id),
                    extra_excludes: Vec::new(),
                };
                self.manager.create_file_backup(&request).await?;
            }
        }
        Ok(())
    }

    /// 增量计划以最近的全量备份为基础，项目还没有全量备份时改做全量
    async fn file_kind(&self, schedule: &BackupSchedule) -> Result<FileBackupKind> {
        if !schedule.incremental {
            return Ok(FileBackupKind::Full);
        }

        match self.manager.chain().resolve_base(&schedule.project_id, None).await {
            Ok(_) => Ok(FileBackupKind::Incremental),
            Err(BackupError::NoCompletedFullBackup { .. }) => {
                info!(schedule_id = schedule.id, "项目还没有全量备份，本次执行全量备份");
                Ok(FileBackupKind::Full)
            }
            Err(e) => Err(e),
        }
    }
}
