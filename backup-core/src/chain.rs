//! 增量备份链解析
//!
//! 每个增量备份通过 `parent_backup_id` 指向其基础备份，整条链以一个全量备份为根。

use crate::constants::backup::MAX_CHAIN_DEPTH;
use crate::database::Database;
use crate::manifest::ManifestMap;
use crate::models::{BackupFilter, BackupStatus, FileBackup, FileBackupKind};
use crate::{BackupError, Result};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ChainResolver {
    database: Database,
}

impl ChainResolver {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// 确定增量备份的基础备份
    ///
    /// 显式指定时必须存在、属于同一项目且已完成；否则取该项目最近一次已完成的全量备份。
    pub async fn resolve_base(
        &self,
        project_id: &str,
        explicit: Option<i64>,
    ) -> Result<FileBackup> {
        let Some(base_id) = explicit else {
            let filter = BackupFilter {
                kind: Some(FileBackupKind::Full),
                ..BackupFilter::for_project(project_id).completed()
            };
            return self
                .database
                .list_file_backups(&filter)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| BackupError::NoCompletedFullBackup {
                    project: project_id.to_string(),
                });
        };

        let base = self
            .database
            .get_file_backup(base_id)
            .await?
            .ok_or_else(|| BackupError::BaseUnavailable {
                base_id,
                reason: "记录不存在".to_string(),
            })?;

        if base.project_id != project_id {
            return Err(BackupError::BaseProjectMismatch {
                base_id,
                expected: project_id.to_string(),
                actual: base.project_id,
            });
        }
        if base.status != BackupStatus::Completed {
            return Err(BackupError::BaseUnavailable {
                base_id,
                reason: format!("状态为 {}", base.status),
            });
        }

        Ok(base)
    }

    /// 从 backup 回溯到全量根备份，返回 [backup, parent, ..., root]
    async fn ancestors(&self, backup: &FileBackup) -> Result<Vec<FileBackup>> {
        let mut chain = Vec::new();
        let mut current = backup.clone();
        let mut visited = HashSet::from([backup.id]);

        loop {
            if current.kind == FileBackupKind::Full {
                chain.push(current);
                return Ok(chain);
            }
            if chain.len() >= MAX_CHAIN_DEPTH {
                return Err(BackupError::ChainTooDeep {
                    depth: chain.len() + 1,
                    max: MAX_CHAIN_DEPTH,
                });
            }

            let parent_id = current.parent_backup_id.ok_or_else(|| BackupError::BaseUnavailable {
                base_id: current.id,
                reason: "增量备份缺少父备份".to_string(),
            })?;
            if !visited.insert(parent_id) {
                return Err(BackupError::BaseUnavailable {
                    base_id: parent_id,
                    reason: "增量链存在循环引用".to_string(),
                });
            }

            let parent = self
                .database
                .get_file_backup(parent_id)
                .await?
                .ok_or_else(|| BackupError::BaseUnavailable {
                    base_id: parent_id,
                    reason: "父备份已不存在".to_string(),
                })?;
            if parent.status != BackupStatus::Completed {
                return Err(BackupError::BaseUnavailable {
                    base_id: parent_id,
                    reason: format!("父备份状态为 {}", parent.status),
                });
            }
            chain.push(std::mem::replace(&mut current, parent));
        }
    }

    /// 从全量根开始的完整链 [root, ..., backup]，用于恢复
    pub async fn chain_from_root(&self, backup: &FileBackup) -> Result<Vec<FileBackup>> {
        let mut chain = self.ancestors(backup).await?;
        chain.reverse();
        Ok(chain)
    }

    /// 到最近全量祖先的跳数，全量备份为 0
    pub async fn incremental_depth(&self, backup: &FileBackup) -> Result<usize> {
        Ok(self.ancestors(backup).await?.len() - 1)
    }

    /// 备份在该时刻的完整文件视图
    ///
    /// 全量备份即自身清单；增量备份为父备份的有效清单叠加自身条目并移除墓碑。
    pub async fn effective_manifest(&self, backup: &FileBackup) -> Result<ManifestMap> {
        let chain = self.chain_from_root(backup).await?;

        let mut map = ManifestMap::new();
        for link in &chain {
            link.manifest.apply_to(&mut map);
        }

        debug!(
            backup_id = backup.id,
            depth = chain.len() - 1,
            files = map.len(),
            "计算有效清单完成"
        );
        Ok(map)
    }

    /// 以 base 为基础新建增量时的深度，超过上限为配置错误
    pub async fn check_new_incremental(&self, base: &FileBackup) -> Result<usize> {
        let depth = self.incremental_depth(base).await? + 1;
        if depth > MAX_CHAIN_DEPTH {
            return Err(BackupError::ChainTooDeep {
                depth,
                max: MAX_CHAIN_DEPTH,
            });
        }
        Ok(depth)
    }
}
