use super::*;
use crate::backup::tests::{harness, start_time};
use crate::manifest::Manifest;
use crate::models::{
    BackupStatus, DatabaseBackup, DatabaseEngine, FileBackup, FileBackupKind, Frequency,
    ServerBackup, TriggerType,
};
use chrono::{NaiveTime, TimeZone};

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn candidates(times: &[DateTime<Utc>]) -> Vec<Candidate> {
    times
        .iter()
        .enumerate()
        .map(|(i, t)| Candidate {
            id: i as i64 + 1,
            created_at: *t,
        })
        .collect()
}

fn db_backup(created_at: DateTime<Utc>) -> DatabaseBackup {
    DatabaseBackup {
        id: 0,
        project_id: "shop".to_string(),
        server_id: "web-1".to_string(),
        schedule_id: None,
        engine: DatabaseEngine::Mysql,
        database_name: "shop".to_string(),
        trigger: TriggerType::Scheduled,
        status: BackupStatus::Completed,
        filename: format!("shop_{}.sql.gz", created_at.format("%Y-%m-%d_%H%M%S")),
        storage: "local".to_string(),
        storage_key: format!("backups/shop_{}.sql.gz", created_at.timestamp()),
        size_bytes: 10,
        checksum: Some("abc".to_string()),
        metadata: None,
        started_at: Some(created_at),
        completed_at: Some(created_at),
        duration_ms: Some(0),
        error_message: None,
        verified_at: None,
        created_at,
    }
}

fn file_backup(
    kind: FileBackupKind,
    parent: Option<i64>,
    status: BackupStatus,
    created_at: DateTime<Utc>,
) -> FileBackup {
    FileBackup {
        id: 0,
        project_id: "shop".to_string(),
        schedule_id: None,
        kind,
        trigger: TriggerType::Scheduled,
        status,
        filename: format!("shop_{kind}.tar.gz"),
        storage: "local".to_string(),
        storage_key: format!("file-backups/shop_{}.tar.gz", created_at.timestamp()),
        size_bytes: 10,
        checksum: Some("abc".to_string()),
        files_count: 0,
        manifest: Manifest::default(),
        parent_backup_id: parent,
        started_at: Some(created_at),
        completed_at: None,
        duration_ms: None,
        error_message: None,
        verified_at: None,
        created_at,
    }
}

fn server_backup(server_id: &str, created_at: DateTime<Utc>) -> ServerBackup {
    ServerBackup {
        id: 0,
        server_id: server_id.to_string(),
        schedule_id: None,
        trigger: TriggerType::Scheduled,
        status: BackupStatus::Completed,
        filename: format!("server_{server_id}_full.tar.gz"),
        storage: "local".to_string(),
        storage_key: format!("server-backups/{server_id}/{}.tar.gz", created_at.timestamp()),
        size_bytes: 10,
        checksum: Some("abc".to_string()),
        metadata: None,
        started_at: Some(created_at),
        completed_at: Some(created_at),
        duration_ms: Some(0),
        error_message: None,
        verified_at: None,
        created_at,
    }
}

fn schedule(target: BackupTarget, retention: RetentionPolicy) -> BackupSchedule {
    BackupSchedule {
        id: 1,
        project_id: "shop".to_string(),
        server_id: "web-1".to_string(),
        target,
        target_name: match target {
            BackupTarget::Database(_) => Some("shop".to_string()),
            BackupTarget::Files | BackupTarget::Server => None,
        },
        frequency: Frequency::Daily,
        time_of_day: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
        day_of_week: None,
        day_of_month: None,
        retention,
        storage: "local".to_string(),
        incremental: false,
        is_active: true,
        next_run_at: None,
        last_run_at: None,
        created_at: at(2025, 1, 1, 0),
    }
}

#[test]
fn test_tiered_twenty_daily_backups() {
    // 2025-03-20 到 2025-03-01，每天一个
    let times: Vec<_> = (0..20).map(|i| at(2025, 3, 20 - i, 2)).collect();
    let (keep, delete) = plan_tiered(&candidates(&times), 7, 4, 12);

    // 7 天 + 剩余 3 个 ISO 周 (W11, W10, W09)
    assert_eq!(keep, vec![1, 2, 3, 4, 5, 6, 7, 8, 12, 19]);
    assert_eq!(delete.len(), 10);
    assert_eq!(keep.len() + delete.len(), 20);
}

#[test]
fn test_distinct_buckets_are_all_kept() {
    let times = [at(2025, 3, 15, 2), at(2025, 2, 15, 2), at(2025, 1, 15, 2)];
    let (keep, delete) = plan_tiered(&candidates(&times), 1, 1, 1);
    assert_eq!(keep, vec![1, 2, 3]);
    assert!(delete.is_empty());
}

#[test]
fn test_same_day_siblings_do_not_fall_through() {
    let times = [at(2025, 3, 15, 20), at(2025, 3, 15, 10), at(2025, 3, 15, 2)];
    let (keep, delete) = plan_tiered(&candidates(&times), 7, 4, 12);
    assert_eq!(keep, vec![1]);
    assert_eq!(delete, vec![2, 3]);
}

#[test]
fn test_bucket_uniqueness_per_tier() {
    // 每 8 小时一个备份，跨越约 120 天
    let start = at(2025, 6, 30, 23);
    let times: Vec<_> = (0..360).map(|i| start - Duration::hours(8 * i)).collect();
    let all = candidates(&times);
    let (keep, delete) = plan_tiered(&all, 7, 4, 3);
    assert_eq!(keep.len() + delete.len(), all.len());

    let kept: Vec<&Candidate> = keep
        .iter()
        .map(|id| all.iter().find(|c| c.id == *id).unwrap())
        .collect();

    let daily = &kept[..7];
    let weekly = &kept[7..11];
    let monthly = &kept[11..];
    assert_eq!(monthly.len(), 3);

    let days: HashSet<_> = daily.iter().map(|c| Bucket::day(c.created_at)).collect();
    let weeks: HashSet<_> = weekly.iter().map(|c| Bucket::week(c.created_at)).collect();
    let months: HashSet<_> = monthly.iter().map(|c| Bucket::month(c.created_at)).collect();
    assert_eq!(days.len(), 7);
    assert_eq!(weeks.len(), 4);
    assert_eq!(months.len(), 3);

    // 每个桶保留的是桶内最新的备份
    for kept in daily {
        assert!(
            all.iter()
                .filter(|c| Bucket::day(c.created_at) == Bucket::day(kept.created_at))
                .all(|c| c.created_at <= kept.created_at)
        );
    }
}

#[test]
fn test_flat_policy_deletes_older_than_cutoff() {
    let now = at(2025, 3, 31, 12);
    let times = [at(2025, 3, 30, 2), at(2025, 3, 24, 13), at(2025, 3, 24, 11), at(2025, 1, 1, 2)];
    let (keep, delete) = plan_days(&candidates(&times), 7, now);
    assert_eq!(keep, vec![1, 2]);
    assert_eq!(delete, vec![3, 4]);
}

#[tokio::test]
async fn test_dry_run_matches_real_run() {
    let h = harness().await;
    let database = h.manager.database();

    let mut times: Vec<_> = (0..15).map(|i| at(2025, 2, 28, 2) - Duration::days(i)).collect();
    // 同一天的额外备份与更早月份的备份
    times.push(at(2025, 2, 28, 1));
    times.push(at(2025, 2, 27, 1));
    times.push(at(2024, 12, 10, 2));
    times.push(at(2024, 11, 10, 2));
    times.push(at(2024, 6, 10, 2));
    assert_eq!(times.len(), 20);

    for time in &times {
        database.insert_database_backup(&db_backup(*time)).await.unwrap();
    }
    // 其他数据库的备份不参与
    let mut other = db_backup(at(2020, 1, 1, 0));
    other.database_name = "blog".to_string();
    database.insert_database_backup(&other).await.unwrap();

    let engine = RetentionEngine::new(h.manager.clone());
    let schedule = schedule(
        BackupTarget::Database(DatabaseEngine::Mysql),
        RetentionPolicy::Tiered {
            daily: 7,
            weekly: 4,
            monthly: 12,
        },
    );

    let preview = engine.cleanup_schedule(&schedule, true).await.unwrap();
    assert!(preview.dry_run);
    assert!(preview.deleted > 0);
    let remaining = database
        .list_database_backups(&BackupFilter::for_project("shop"))
        .await
        .unwrap();
    assert_eq!(remaining.len(), 21);

    let real = engine.cleanup_schedule(&schedule, false).await.unwrap();
    assert_eq!(real.deleted, preview.deleted);
    assert_eq!(real.errors, 0);

    let remaining = database
        .list_database_backups(&BackupFilter {
            database_name: Some("shop".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(remaining.len(), 20 - real.deleted);
    assert_eq!(remaining.len(), preview.plans[0].keep.len());

    // 再次清理没有可删除的备份
    let again = engine.cleanup_schedule(&schedule, true).await.unwrap();
    assert_eq!(again.deleted, 0);
}

#[tokio::test]
async fn test_file_cleanup_cascades_to_recent_incrementals() {
    let h = harness().await;
    let database = h.manager.database();
    let now = start_time();

    let old_full = database
        .insert_file_backup(&file_backup(
            FileBackupKind::Full,
            None,
            BackupStatus::Completed,
            now - Duration::days(20),
        ))
        .await
        .unwrap();
    let recent_inc = database
        .insert_file_backup(&file_backup(
            FileBackupKind::Incremental,
            Some(old_full.id),
            BackupStatus::Completed,
            now - Duration::days(1),
        ))
        .await
        .unwrap();
    let recent_full = database
        .insert_file_backup(&file_backup(
            FileBackupKind::Full,
            None,
            BackupStatus::Completed,
            now - Duration::hours(2),
        ))
        .await
        .unwrap();

    let engine = RetentionEngine::new(h.manager.clone());
    let schedule = schedule(BackupTarget::Files, RetentionPolicy::Days(7));

    let plan = engine.plan(&schedule).await.unwrap();
    assert_eq!(plan.delete, vec![old_full.id]);
    assert_eq!(plan.cascaded, vec![recent_inc.id]);
    assert_eq!(plan.keep, vec![recent_full.id]);
    assert_eq!(plan.delete_count(), 2);

    let preview = engine.cleanup_schedule(&schedule, true).await.unwrap();
    let real = engine.cleanup_schedule(&schedule, false).await.unwrap();
    assert_eq!(preview.deleted, 2);
    assert_eq!(real.deleted, 2);
    assert_eq!(real.cascaded, 1);

    let remaining = database
        .list_file_backups(&BackupFilter::for_project("shop"))
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, recent_full.id);
}

#[tokio::test]
async fn test_backup_with_running_descendant_is_skipped() {
    let h = harness().await;
    let database = h.manager.database();
    let now = start_time();

    let old_full = database
        .insert_file_backup(&file_backup(
            FileBackupKind::Full,
            None,
            BackupStatus::Completed,
            now - Duration::days(30),
        ))
        .await
        .unwrap();
    database
        .insert_file_backup(&file_backup(
            FileBackupKind::Incremental,
            Some(old_full.id),
            BackupStatus::Running,
            now - Duration::minutes(5),
        ))
        .await
        .unwrap();

    let engine = RetentionEngine::new(h.manager.clone());
    let schedule = schedule(BackupTarget::Files, RetentionPolicy::Days(7));

    let plan = engine.plan(&schedule).await.unwrap();
    assert!(plan.delete.is_empty());
    assert_eq!(plan.skipped, vec![old_full.id]);

    let report = engine.cleanup_schedule(&schedule, false).await.unwrap();
    assert_eq!(report.deleted, 0);
    assert!(database.get_file_backup(old_full.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_invalid_policy_is_rejected() {
    let h = harness().await;
    let engine = RetentionEngine::new(h.manager.clone());
    let schedule = schedule(
        BackupTarget::Files,
        RetentionPolicy::Tiered {
            daily: 0,
            weekly: 0,
            monthly: 0,
        },
    );

    let err = engine.plan(&schedule).await.unwrap_err();
    assert!(err.is_configuration_error());
}

#[tokio::test]
async fn test_server_cleanup_uses_flat_days() {
    let h = harness().await;
    let database = h.manager.database();
    let now = start_time();

    let recent = database
        .insert_server_backup(&server_backup("web-1", now - Duration::days(1)))
        .await
        .unwrap();
    let old = database
        .insert_server_backup(&server_backup("web-1", now - Duration::days(10)))
        .await
        .unwrap();
    let mut failed = server_backup("web-1", now - Duration::days(30));
    failed.status = BackupStatus::Failed;
    let failed = database.insert_server_backup(&failed).await.unwrap();
    let other = database
        .insert_server_backup(&server_backup("db-1", now - Duration::days(30)))
        .await
        .unwrap();

    let engine = RetentionEngine::new(h.manager.clone());
    let mut schedule = schedule(BackupTarget::Server, RetentionPolicy::Days(7));
    schedule.project_id = String::new();

    let plan = engine.plan(&schedule).await.unwrap();
    assert_eq!(plan.kind, RecordKind::Server);
    assert_eq!(plan.keep, vec![recent.id]);
    assert_eq!(plan.delete, vec![old.id]);

    let report = engine.cleanup_schedule(&schedule, false).await.unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.errors, 0);
    assert!(database.get_server_backup(old.id).await.unwrap().is_none());
    for id in [recent.id, failed.id, other.id] {
        assert!(database.get_server_backup(id).await.unwrap().is_some());
    }
}
