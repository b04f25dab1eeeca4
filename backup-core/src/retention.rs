//! 保留策略
//!
//! 分层策略按天、ISO 周、月三个层级依次挑选要保留的备份；按天数的策略删除过期备份。
//! 试运行与实际清理使用同一份清理计划。

use crate::backup::BackupManager;
use crate::models::{BackupFilter, BackupSchedule, BackupTarget, RecordKind, RetentionPolicy};
use crate::notify::BackupEvent;
use crate::{BackupError, Result};
use chrono::{DateTime, Datelike, Duration, Utc};
use std::collections::HashSet;
use tracing::{error, info, instrument, warn};

/// 参与保留计算的备份
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

/// 分桶键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Bucket {
    Day(i32, u32),
    Week(i32, u32),
    Month(i32, u32),
}

impl Bucket {
    fn day(at: DateTime<Utc>) -> Self {
        Bucket::Day(at.year(), at.ordinal())
    }

    fn week(at: DateTime<Utc>) -> Self {
        let week = at.iso_week();
        Bucket::Week(week.year(), week.week())
    }

    fn month(at: DateTime<Utc>) -> Self {
        Bucket::Month(at.year(), at.month())
    }
}

/// 按层级挑选: 每个新桶保留最新的一个，同桶的较旧备份直接删除，
/// 桶数用尽后剩余的备份交给下一层级
fn select_tier(
    candidates: Vec<Candidate>,
    slots: u32,
    bucket_of: fn(DateTime<Utc>) -> Bucket,
    keep: &mut Vec<i64>,
    delete: &mut Vec<i64>,
) -> Vec<Candidate> {
    let mut consumed = HashSet::new();
    let mut remaining = Vec::new();

    for candidate in candidates {
        let bucket = bucket_of(candidate.created_at);
        if consumed.contains(&bucket) {
            delete.push(candidate.id);
        } else if consumed.len() < slots as usize {
            consumed.insert(bucket);
            keep.push(candidate.id);
        } else {
            remaining.push(candidate);
        }
    }

    remaining
}

/// 分层保留，返回 (保留, 删除)
pub fn plan_tiered(
    candidates: &[Candidate],
    daily: u32,
    weekly: u32,
    monthly: u32,
) -> (Vec<i64>, Vec<i64>) {
    let mut sorted = candidates.to_vec();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    let mut keep = Vec::new();
    let mut delete = Vec::new();

    let rest = select_tier(sorted, daily, Bucket::day, &mut keep, &mut delete);
    let rest = select_tier(rest, weekly, Bucket::week, &mut keep, &mut delete);
    let rest = select_tier(rest, monthly, Bucket::month, &mut keep, &mut delete);
    delete.extend(rest.into_iter().map(|c| c.id));

    (keep, delete)
}

/// 按天数保留，返回 (保留, 删除)
pub fn plan_days(candidates: &[Candidate], days: u32, now: DateTime<Utc>) -> (Vec<i64>, Vec<i64>) {
    let cutoff = now - Duration::days(i64::from(days));
    let mut sorted = candidates.to_vec();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    let mut keep = Vec::new();
    let mut delete = Vec::new();
    for candidate in sorted {
        if candidate.created_at < cutoff {
            delete.push(candidate.id);
        } else {
            keep.push(candidate.id);
        }
    }
    (keep, delete)
}

pub fn plan_ids(
    policy: &RetentionPolicy,
    candidates: &[Candidate],
    now: DateTime<Utc>,
) -> (Vec<i64>, Vec<i64>) {
    match *policy {
        RetentionPolicy::Tiered {
            daily,
            weekly,
            monthly,
        } => plan_tiered(candidates, daily, weekly, monthly),
        RetentionPolicy::Days(days) => plan_days(candidates, days, now),
    }
}

/// 一个计划的清理方案
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPlan {
    pub schedule_id: i64,
    pub kind: RecordKind,
    pub keep: Vec<i64>,
    pub delete: Vec<i64>,
    /// 因删除基础备份而被级联删除的增量备份
    pub cascaded: Vec<i64>,
    /// 仍有进行中的子孙备份，本轮跳过
    pub skipped: Vec<i64>,
}

impl RetentionPlan {
    /// 将被删除的记录总数 (含级联)
    pub fn delete_count(&self) -> usize {
        self.delete.len() + self.cascaded.len()
    }
}

/// 清理结果
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub plans: Vec<RetentionPlan>,
    pub dry_run: bool,
    /// 实际删除 (或试运行时计划删除) 的记录数
    pub deleted: usize,
    pub cascaded: usize,
    pub errors: usize,
}

impl CleanupReport {
    fn merge(&mut self, other: CleanupReport) {
        self.plans.extend(other.plans);
        self.deleted += other.deleted;
        self.cascaded += other.cascaded;
        self.errors += other.errors;
    }
}

/// 保留策略引擎
#[derive(Debug, Clone)]
pub struct RetentionEngine {
    manager: BackupManager,
}

impl RetentionEngine {
    pub fn new(manager: BackupManager) -> Self {
        Self { manager }
    }

    /// 计算计划的清理方案，不做任何删除
    ///
    /// 数据库计划针对同一项目同一数据库的已完成备份；文件计划针对项目的已完成文件备份；
    /// 服务器计划针对该服务器的已完成服务器备份。
    pub async fn plan(&self, schedule: &BackupSchedule) -> Result<RetentionPlan> {
        schedule.retention.validate()?;
        let now = self.manager.now();
        let filter = BackupFilter::for_project(&schedule.project_id).completed();
        let database = self.manager.database();

        match schedule.target {
            BackupTarget::Database(_) => {
                let filter = BackupFilter {
                    database_name: schedule.target_name.clone(),
                    ..filter
                };
                let candidates: Vec<Candidate> = database
                    .list_database_backups(&filter)
                    .await?
                    .iter()
                    .map(|b| Candidate {
                        id: b.id,
                        created_at: b.created_at,
                    })
                    .collect();
                let (keep, delete) = plan_ids(&schedule.retention, &candidates, now);

                Ok(RetentionPlan {
                    schedule_id: schedule.id,
                    kind: RecordKind::Database,
                    keep,
                    delete,
                    cascaded: Vec::new(),
                    skipped: Vec::new(),
                })
            }
            BackupTarget::Files => {
                let candidates: Vec<Candidate> = database
                    .list_file_backups(&filter)
                    .await?
                    .iter()
                    .map(|b| Candidate {
                        id: b.id,
                        created_at: b.created_at,
                    })
                    .collect();
                let (keep, planned) = plan_ids(&schedule.retention, &candidates, now);
                self.expand_cascade(schedule.id, keep, planned).await
            }
            BackupTarget::Server => {
                let filter = BackupFilter {
                    server_id: Some(schedule.server_id.clone()),
                    ..BackupFilter::default().completed()
                };
                let candidates: Vec<Candidate> = database
                    .list_server_backups(&filter)
                    .await?
                    .iter()
                    .map(|b| Candidate {
                        id: b.id,
                        created_at: b.created_at,
                    })
                    .collect();
                let (keep, delete) = plan_ids(&schedule.retention, &candidates, now);

                Ok(RetentionPlan {
                    schedule_id: schedule.id,
                    kind: RecordKind::Server,
                    keep,
                    delete,
                    cascaded: Vec::new(),
                    skipped: Vec::new(),
                })
            }
        }
    }

    /// 展开级联: 删除的文件备份连带其子孙，子孙仍在进行中时跳过该备份
    async fn expand_cascade(
        &self,
        schedule_id: i64,
        keep: Vec<i64>,
        planned: Vec<i64>,
    ) -> Result<RetentionPlan> {
        let planned_set: HashSet<i64> = planned.iter().copied().collect();
        let mut delete = Vec::new();
        let mut cascaded: Vec<i64> = Vec::new();
        let mut skipped = Vec::new();

        for id in planned {
            let descendants = self.manager.file_descendants(id).await?;
            if descendants.iter().any(|d| !d.status.is_terminal()) {
                warn!(backup_id = id, "仍有进行中的增量备份依赖该备份，本轮跳过");
                skipped.push(id);
                continue;
            }

            for descendant in &descendants {
                if !planned_set.contains(&descendant.id) && !cascaded.contains(&descendant.id) {
                    cascaded.push(descendant.id);
                }
            }
            delete.push(id);
        }

        let keep = keep
            .into_iter()
            .filter(|id| !cascaded.contains(id))
            .collect();

        Ok(RetentionPlan {
            schedule_id,
            kind: RecordKind::Files,
            keep,
            delete,
            cascaded,
            skipped,
        })
    }

    /// 对单个计划执行 (或试运行) 清理
    #[instrument(skip(self, schedule), fields(schedule_id = schedule.id))]
    pub async fn cleanup_schedule(
        &self,
        schedule: &BackupSchedule,
        dry_run: bool,
    ) -> Result<CleanupReport> {
        let plan = self.plan(schedule).await?;
        let mut report = CleanupReport {
            dry_run,
            ..Default::default()
        };

        if plan.kind == RecordKind::Files && !plan.cascaded.is_empty() {
            warn!(
                count = plan.cascaded.len(),
                "⚠️ 清理将级联删除 {} 个增量备份",
                plan.cascaded.len()
            );
        }

        if dry_run {
            report.deleted = plan.delete_count();
            report.cascaded = plan.cascaded.len();
            info!(
                keep = plan.keep.len(),
                delete = plan.delete_count(),
                "🔍 试运行: 保留 {} 个，删除 {} 个",
                plan.keep.len(),
                plan.delete_count()
            );
        } else {
            let (deleted, cascaded, errors) = self.execute(&plan).await;
            report.deleted = deleted;
            report.cascaded = cascaded;
            report.errors = errors;
        }

        self.manager.emit(BackupEvent::CleanupFinished {
            schedule_id: Some(schedule.id),
            deleted: report.deleted,
            dry_run,
        });
        report.plans.push(plan);
        Ok(report)
    }

    /// 执行删除，单个失败不影响其他备份，返回 (删除数, 级联数, 失败数)
    async fn execute(&self, plan: &RetentionPlan) -> (usize, usize, usize) {
        let mut removed: HashSet<i64> = HashSet::new();
        let mut cascaded = 0;
        let mut errors = 0;

        for &id in &plan.delete {
            if removed.contains(&id) {
                continue;
            }
            let result = match plan.kind {
                RecordKind::Database => self
                    .manager
                    .delete_database_backup(id)
                    .await
                    .map(|_| vec![id]),
                RecordKind::Server => self
                    .manager
                    .delete_server_backup(id)
                    .await
                    .map(|_| vec![id]),
                RecordKind::Files => match self.manager.delete_file_backup(id).await {
                    Ok(outcome) => Ok(outcome.deleted),
                    // 已被前面的级联删除
                    Err(BackupError::RecordNotFound(_)) => Ok(Vec::new()),
                    Err(e) => Err(e),
                },
            };

            match result {
                Ok(ids) => {
                    for deleted_id in ids {
                        if removed.insert(deleted_id) && !plan.delete.contains(&deleted_id) {
                            cascaded += 1;
                        }
                    }
                }
                Err(e) => {
                    errors += 1;
                    error!(backup_id = id, "删除过期备份失败: {}", e);
                }
            }
        }

        info!(deleted = removed.len(), cascaded, errors, "🧹 清理完成");
        (removed.len(), cascaded, errors)
    }

    /// 清理某个项目所有启用计划
    pub async fn cleanup_project(&self, project_id: &str, dry_run: bool) -> Result<CleanupReport> {
        let schedules: Vec<BackupSchedule> = self
            .manager
            .database()
            .list_schedules(true)
            .await?
            .into_iter()
            .filter(|s| s.project_id == project_id)
            .collect();
        self.cleanup_many(&schedules, dry_run).await
    }

    /// 清理所有启用计划
    pub async fn cleanup_all(&self, dry_run: bool) -> Result<CleanupReport> {
        let schedules = self.manager.database().list_schedules(true).await?;
        self.cleanup_many(&schedules, dry_run).await
    }

    async fn cleanup_many(
        &self,
        schedules: &[BackupSchedule],
        dry_run: bool,
    ) -> Result<CleanupReport> {
        let mut total = CleanupReport {
            dry_run,
            ..Default::default()
        };

        for schedule in schedules {
            match self.cleanup_schedule(schedule, dry_run).await {
                Ok(report) => total.merge(report),
                Err(e) => {
                    total.errors += 1;
                    error!(schedule_id = schedule.id, "计划清理失败: {}", e);
                }
            }
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests;
