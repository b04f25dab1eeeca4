//! 备份完整性校验
//!
//! 重新读取存储中的产物并计算 SHA-256，与记录中的校验和比对。

use crate::backup::BackupManager;
use crate::checksum::checksums_match;
use crate::models::{ArtifactRef, BackupFilter, BackupStatus, RecordKind};
use crate::notify::BackupEvent;
use crate::{BackupError, Result};
use tracing::{error, info, instrument, warn};

/// 批量校验的范围
#[derive(Debug, Clone)]
pub enum VerifyScope {
    /// 所有未校验过的已完成备份
    Unverified,
    /// 某个项目的全部已完成备份
    Project(String),
}

/// 批量校验结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifySummary {
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
}

impl VerifySummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errors
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }
}

#[derive(Debug, Clone)]
pub struct Verifier {
    manager: BackupManager,
}

impl Verifier {
    pub fn new(manager: BackupManager) -> Self {
        Self { manager }
    }

    async fn load(&self, kind: RecordKind, id: i64) -> Result<(ArtifactRef, String)> {
        let database = self.manager.database();
        match kind {
            RecordKind::Database => database
                .get_database_backup(id)
                .await?
                .map(|b| (b.artifact(), b.project_id))
                .ok_or(BackupError::RecordNotFound(id)),
            RecordKind::Files => database
                .get_file_backup(id)
                .await?
                .map(|b| (b.artifact(), b.project_id))
                .ok_or(BackupError::RecordNotFound(id)),
            RecordKind::Server => database
                .get_server_backup(id)
                .await?
                .map(|b| (b.artifact(), b.server_id))
                .ok_or(BackupError::RecordNotFound(id)),
        }
    }

    /// 校验单个备份
    ///
    /// 未完成的备份与配置错误 (如存储目标已从配置中移除) 返回错误；
    /// 产物缺失或校验和不一致返回 `false`，不修改 `verified_at`。
    #[instrument(skip(self))]
    pub async fn verify(&self, kind: RecordKind, id: i64) -> Result<bool> {
        let _guard = self.manager.locks().acquire(kind, id).await;

        // 持锁后重新读取，记录可能已被删除
        let (artifact, project_id) = self.load(kind, id).await?;
        if artifact.status != BackupStatus::Completed {
            return Err(BackupError::NotCompleted {
                id,
                status: artifact.status.to_string(),
            });
        }

        let actual = match self.manager.fetch_artifact(&artifact).await {
            Ok((_staged, actual)) => actual,
            Err(e) if e.is_configuration_error() => return Err(e),
            Err(e) => {
                warn!(backup_id = id, "读取备份产物失败: {}", e);
                self.manager.emit(BackupEvent::VerificationFailed {
                    kind,
                    id,
                    project_id,
                });
                return Ok(false);
            }
        };

        let expected = artifact.checksum.as_deref().unwrap_or_default();
        if !checksums_match(expected, &actual) {
            self.manager.emit(BackupEvent::VerificationFailed {
                kind,
                id,
                project_id,
            });
            return Ok(false);
        }

        let now = self.manager.now();
        let database = self.manager.database();
        match kind {
            RecordKind::Database => {
                if let Some(mut record) = database.get_database_backup(id).await? {
                    record.verified_at = Some(now);
                    database.update_database_backup(&record).await?;
                }
            }
            RecordKind::Files => {
                if let Some(mut record) = database.get_file_backup(id).await? {
                    record.verified_at = Some(now);
                    database.update_file_backup(&record).await?;
                }
            }
            RecordKind::Server => {
                if let Some(mut record) = database.get_server_backup(id).await? {
                    record.verified_at = Some(now);
                    database.update_server_backup(&record).await?;
                }
            }
        }

        info!(backup_id = id, kind = %kind, "✅ 校验通过");
        Ok(true)
    }

    /// 批量校验，单个失败不影响其他备份
    ///
    /// 服务器备份不属于任何项目，只在校验全部未校验备份时参与。
    pub async fn verify_batch(&self, scope: &VerifyScope) -> Result<VerifySummary> {
        let filter = match scope {
            VerifyScope::Unverified => BackupFilter {
                unverified_only: true,
                ..BackupFilter::default().completed()
            },
            VerifyScope::Project(project_id) => BackupFilter::for_project(project_id).completed(),
        };

        let database = self.manager.database();
        let mut targets: Vec<(RecordKind, i64)> = database
            .list_database_backups(&filter)
            .await?
            .iter()
            .map(|b| (RecordKind::Database, b.id))
            .collect();
        targets.extend(
            database
                .list_file_backups(&filter)
                .await?
                .iter()
                .map(|b| (RecordKind::Files, b.id)),
        );
        if matches!(scope, VerifyScope::Unverified) {
            targets.extend(
                database
                    .list_server_backups(&filter)
                    .await?
                    .iter()
                    .map(|b| (RecordKind::Server, b.id)),
            );
        }

        let mut summary = VerifySummary::default();
        for (kind, id) in targets {
            match self.verify(kind, id).await {
                Ok(true) => summary.passed += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    summary.errors += 1;
                    error!(backup_id = id, kind = %kind, "校验出错: {}", e);
                }
            }
        }

        info!(
            passed = summary.passed,
            failed = summary.failed,
            errors = summary.errors,
            "批量校验完成"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::tests::{db_request, file_request, harness};
    use crate::models::{FileBackupKind, ServerBackup, TriggerType};
    use crate::notify::tests::RecordingSink;
    use crate::storage::{StorageBackend, StorageRegistry};
    use std::fs;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fresh_backup_verifies() {
        let h = harness().await;
        let record = h.manager.create_database_backup(&db_request()).await.unwrap();
        let verifier = Verifier::new(h.manager.clone());

        assert!(verifier.verify(RecordKind::Database, record.id).await.unwrap());

        let reloaded = h
            .manager
            .database()
            .get_database_backup(record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.verified_at, Some(h.manager.now()));
    }

    #[tokio::test]
    async fn test_tampered_artifact_fails() {
        let h = harness().await;
        fs::write(h.source.path().join("a.txt"), "a").unwrap();
        let record = h
            .manager
            .create_file_backup(&file_request(FileBackupKind::Full))
            .await
            .unwrap();

        fs::write(h.storage_root.path().join(&record.storage_key), b"tampered").unwrap();

        let sink = RecordingSink::default();
        let verifier = Verifier::new(h.manager.clone().with_event_sink(Arc::new(sink.clone())));
        assert!(!verifier.verify(RecordKind::Files, record.id).await.unwrap());
        assert!(matches!(
            sink.events.lock().unwrap().as_slice(),
            [BackupEvent::VerificationFailed { id, .. }] if *id == record.id
        ));

        let reloaded = h
            .manager
            .database()
            .get_file_backup(record.id)
            .await
            .unwrap()
            .unwrap();
        assert!(reloaded.verified_at.is_none());
    }

    #[tokio::test]
    async fn test_missing_artifact_is_false() {
        let h = harness().await;
        let record = h.manager.create_database_backup(&db_request()).await.unwrap();
        fs::remove_file(h.storage_root.path().join(&record.storage_key)).unwrap();

        let verifier = Verifier::new(h.manager.clone());
        assert!(!verifier.verify(RecordKind::Database, record.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_storage_is_an_error() {
        let h = harness().await;
        let record = h.manager.create_database_backup(&db_request()).await.unwrap();

        // 存储目标从配置中移除后，记录仍指向它
        let manager = BackupManager::new(
            h.manager.database().clone(),
            StorageRegistry::new(),
            Arc::new(crate::remote::SshExecutor::new()),
            Arc::new(h.manager.config().clone()),
        );
        let sink = RecordingSink::default();
        let verifier = Verifier::new(manager.with_event_sink(Arc::new(sink.clone())));

        let err = verifier
            .verify(RecordKind::Database, record.id)
            .await
            .unwrap_err();
        assert!(err.is_configuration_error());
        assert!(sink.events.lock().unwrap().is_empty());

        let summary = verifier.verify_batch(&VerifyScope::Unverified).await.unwrap();
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_server_backup_verifies() {
        let h = harness().await;
        let staged = h.source.path().join("server.tar.gz");
        fs::write(&staged, b"archive").unwrap();
        let key = "server-backups/web-1/a.tar.gz";
        h.manager
            .storage()
            .get("local")
            .unwrap()
            .put(key, &staged)
            .await
            .unwrap();

        let record = ServerBackup {
            id: 0,
            server_id: "web-1".to_string(),
            schedule_id: None,
            trigger: TriggerType::Manual,
            status: BackupStatus::Completed,
            filename: "a.tar.gz".to_string(),
            storage: "local".to_string(),
            storage_key: key.to_string(),
            size_bytes: 7,
            checksum: Some(crate::checksum::sha256_bytes(b"archive")),
            metadata: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error_message: None,
            verified_at: None,
            created_at: h.manager.now(),
        };
        let record = h.manager.database().insert_server_backup(&record).await.unwrap();

        let verifier = Verifier::new(h.manager.clone());
        let summary = verifier.verify_batch(&VerifyScope::Unverified).await.unwrap();
        assert_eq!(summary.passed, 1);

        let reloaded = h
            .manager
            .database()
            .get_server_backup(record.id)
            .await
            .unwrap()
            .unwrap();
        assert!(reloaded.verified_at.is_some());
    }

    #[tokio::test]
    async fn test_verify_rejects_incomplete_and_unknown() {
        let h = harness().await;
        let verifier = Verifier::new(h.manager.clone());

        let err = verifier.verify(RecordKind::Database, 999).await.unwrap_err();
        assert!(matches!(err, BackupError::RecordNotFound(999)));

        let mut pending = h.manager.create_database_backup(&db_request()).await.unwrap();
        pending.status = BackupStatus::Running;
        h.manager
            .database()
            .update_database_backup(&pending)
            .await
            .unwrap();

        let err = verifier
            .verify(RecordKind::Database, pending.id)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::NotCompleted { .. }));
    }

    #[tokio::test]
    async fn test_batch_continues_past_failures() {
        let h = harness().await;
        let good = h.manager.create_database_backup(&db_request()).await.unwrap();
        h.clock.advance(chrono::Duration::seconds(1));
        let bad = h.manager.create_database_backup(&db_request()).await.unwrap();
        assert_ne!(good.storage_key, bad.storage_key);
        fs::write(h.storage_root.path().join(&bad.storage_key), b"corrupt").unwrap();

        let verifier = Verifier::new(h.manager.clone());
        let summary = verifier.verify_batch(&VerifyScope::Unverified).await.unwrap();
        assert_eq!(
            summary,
            VerifySummary {
                passed: 1,
                failed: 1,
                errors: 0
            }
        );
        assert!(!summary.all_passed());

        // 通过的备份不再出现在未校验列表中
        let summary = verifier.verify_batch(&VerifyScope::Unverified).await.unwrap();
        assert_eq!(summary.passed, 0);
        assert_eq!(summary.failed, 1);

        let summary = verifier
            .verify_batch(&VerifyScope::Project("shop".to_string()))
            .await
            .unwrap();
        assert_eq!(summary.total(), 2);
    }
}
