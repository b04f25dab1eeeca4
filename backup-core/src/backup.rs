use crate::chain::ChainResolver;
use crate::checksum::{checksums_match, sha256_file, sha256_file_blocking};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::constants::backup::{
    COMPRESSION_LEVEL, DATABASE_KEY_PREFIX, FILENAME_TIMESTAMP_FORMAT, FILES_KEY_PREFIX,
    SERVER_KEY_PREFIX,
};
use crate::database::Database;
use crate::dump::{ServerArchive, strategy_for};
use crate::locks::RecordLocks;
use crate::manifest::{
    ExcludeSet, Manifest, ManifestMap, ScannedFile, build_full, build_incremental, scan_tree,
};
use crate::models::{
    ArtifactRef, BackupStatus, DatabaseBackup, DatabaseBackupRequest, FileBackup,
    FileBackupKind, FileBackupRequest, RecordKind, ServerBackup, ServerBackupRequest,
};
use crate::notify::{BackupEvent, EventSink, TracingSink};
use crate::remote::RemoteExecutor;
use crate::storage::{StorageBackend, StorageRegistry};
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, instrument, warn};

/// 备份管理器
///
/// 负责创建数据库、文件与服务器备份，删除 (含级联) 以及恢复。
#[derive(Debug, Clone)]
pub struct BackupManager {
    database: Database,
    storage: Arc<StorageRegistry>,
    executor: Arc<dyn RemoteExecutor>,
    config: Arc<AppConfig>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    chain: ChainResolver,
    locks: RecordLocks,
}

/// 恢复选项
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// 目标目录
    pub target_dir: PathBuf,
    /// 目标目录非空时是否清空后覆盖
    pub force_overwrite: bool,
}

/// 恢复结果
#[derive(Debug, Clone)]
pub struct RestoreReport {
    /// 依次解压的备份 id，从全量根开始
    pub applied: Vec<i64>,
    /// 恢复后的文件数
    pub files_count: usize,
}

/// 数据库恢复选项，未指定的字段沿用备份记录中的值
#[derive(Debug, Clone, Default)]
pub struct DatabaseRestoreOptions {
    /// 恢复到另一台服务器
    pub server_id: Option<String>,
    /// 恢复到另一个库名 (SQLite 为文件路径)
    pub database: Option<String>,
}

/// 删除结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// 被删除的记录 id (含级联)，子孙在前
    pub deleted: Vec<i64>,
    /// 级联删除的增量备份数
    pub cascaded: usize,
}

/// 文件备份执行前已确定的参数
struct FilePlan {
    root: PathBuf,
    excludes: ExcludeSet,
    base: Option<(FileBackup, ManifestMap)>,
}

impl BackupManager {
    /// 创建新的备份管理器
    pub fn new(
        database: Database,
        storage: StorageRegistry,
        executor: Arc<dyn RemoteExecutor>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            chain: ChainResolver::new(database.clone()),
            database,
            storage: Arc::new(storage),
            executor,
            config,
            clock: Arc::new(SystemClock),
            sink: Arc::new(TracingSink),
            locks: RecordLocks::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn storage(&self) -> &StorageRegistry {
        &self.storage
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn chain(&self) -> &ChainResolver {
        &self.chain
    }

    pub fn locks(&self) -> &RecordLocks {
        &self.locks
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn emit(&self, event: BackupEvent) {
        self.sink.record(&event);
    }

    // ========== 数据库备份 ==========

    /// 创建数据库备份
    ///
    /// 记录经历 pending -> running -> completed | failed，返回前一定处于终态。
    #[instrument(
        skip(self, request),
        fields(project = %request.project_id, database = %request.database_name)
    )]
    pub async fn create_database_backup(
        &self,
        request: &DatabaseBackupRequest,
    ) -> Result<DatabaseBackup> {
        // 配置检查，失败时不创建记录
        let server = self.config.server(&request.server_id)?.clone();
        let storage_name = self.resolve_storage(&request.storage)?;
        let backend = self.storage.get(&storage_name)?;
        let strategy = strategy_for(request.engine);

        let now = self.clock.now();
        let filename = format!(
            "{}_{}.sql.gz",
            name_component(&request.database_name),
            now.format(FILENAME_TIMESTAMP_FORMAT)
        );
        let storage_key = storage_key(DATABASE_KEY_PREFIX, now, &filename);

        let pending = DatabaseBackup {
            id: 0,
            project_id: request.project_id.clone(),
            server_id: request.server_id.clone(),
            schedule_id: request.schedule_id,
            engine: request.engine,
            database_name: request.database_name.clone(),
            trigger: request.trigger,
            status: BackupStatus::Pending,
            filename,
            storage: storage_name,
            storage_key,
            size_bytes: 0,
            checksum: None,
            metadata: Some(strategy.metadata()),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error_message: None,
            verified_at: None,
            created_at: now,
        };
        let mut record = self.database.insert_database_backup(&pending).await?;

        record.status = BackupStatus::Running;
        record.started_at = Some(self.clock.now());
        self.database.update_database_backup(&record).await?;

        info!("开始创建数据库备份: {}", record.filename);

        let outcome = async {
            let staged = tempfile::Builder::new()
                .prefix("dump-")
                .suffix(".sql.gz")
                .tempfile()?;
            strategy
                .dump_to_file(
                    self.executor.as_ref(),
                    &server,
                    &request.database_name,
                    staged.path(),
                )
                .await?;
            let checksum = sha256_file(staged.path()).await?;
            let size = self
                .upload(backend.as_ref(), &record.storage_key, staged.path())
                .await?;
            Ok::<_, BackupError>((size, checksum))
        }
        .await;

        match outcome {
            Ok((size, checksum)) => {
                let completed_at = self.clock.now();
                record.status = BackupStatus::Completed;
                record.size_bytes = size;
                record.checksum = Some(checksum);
                record.completed_at = Some(completed_at);
                record.duration_ms = record
                    .started_at
                    .map(|started| (completed_at - started).num_milliseconds());
                if let Err(e) = self.database.update_database_backup(&record).await {
                    error!(backup_id = record.id, "备份已上传但无法更新记录: {}", e);
                    self.discard_upload(backend.as_ref(), &record.storage_key).await;
                    return Err(e);
                }

                self.emit(BackupEvent::BackupCompleted {
                    kind: RecordKind::Database,
                    id: record.id,
                    project_id: record.project_id.clone(),
                    size_bytes: record.size_bytes,
                    duration_ms: record.duration_ms.unwrap_or(0),
                });
                Ok(record)
            }
            Err(e) => {
                record.status = BackupStatus::Failed;
                record.error_message = Some(e.to_string());
                record.completed_at = Some(self.clock.now());
                if let Err(update) = self.database.update_database_backup(&record).await {
                    error!(backup_id = record.id, "无法将备份记录标记为失败: {}", update);
                }

                self.emit(BackupEvent::BackupFailed {
                    kind: RecordKind::Database,
                    id: record.id,
                    project_id: record.project_id.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    // ========== 文件备份 ==========

    /// 创建文件备份 (全量或增量)
    #[instrument(
        skip(self, request),
        fields(project = %request.project_id, kind = %request.kind)
    )]
    pub async fn create_file_backup(&self, request: &FileBackupRequest) -> Result<FileBackup> {
        let plan = self.plan_file_backup(request).await?;
        let project = self.config.project(&request.project_id)?;
        let storage_name = self.resolve_storage(&request.storage)?;
        let backend = self.storage.get(&storage_name)?;

        let now = self.clock.now();
        let filename = format!(
            "{}_{}_{}.tar.gz",
            name_component(project.slug()),
            request.kind,
            now.format(FILENAME_TIMESTAMP_FORMAT)
        );
        let storage_key = storage_key(FILES_KEY_PREFIX, now, &filename);

        let pending = FileBackup {
            id: 0,
            project_id: request.project_id.clone(),
            schedule_id: request.schedule_id,
            kind: request.kind,
            trigger: request.trigger,
            status: BackupStatus::Pending,
            filename,
            storage: storage_name,
            storage_key,
            size_bytes: 0,
            checksum: None,
            files_count: 0,
            manifest: Manifest::default(),
            parent_backup_id: plan.base.as_ref().map(|(base, _)| base.id),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error_message: None,
            verified_at: None,
            created_at: now,
        };
        let mut record = self.database.insert_file_backup(&pending).await?;

        record.status = BackupStatus::Running;
        record.started_at = Some(self.clock.now());
        self.database.update_file_backup(&record).await?;

        info!(
            "开始创建{}文件备份: {} (源目录 {})",
            record.kind,
            record.filename,
            plan.root.display()
        );

        let outcome = async {
            let (manifest, staged, checksum) = perform_backup(plan).await?;
            let size = self
                .upload(backend.as_ref(), &record.storage_key, staged.path())
                .await?;
            Ok::<_, BackupError>((manifest, size, checksum))
        }
        .await;

        match outcome {
            Ok((manifest, size, checksum)) => {
                let completed_at = self.clock.now();
                record.status = BackupStatus::Completed;
                record.files_count = manifest.files_count();
                record.manifest = manifest;
                record.size_bytes = size;
                record.checksum = Some(checksum);
                record.completed_at = Some(completed_at);
                record.duration_ms = record
                    .started_at
                    .map(|started| (completed_at - started).num_milliseconds());
                if let Err(e) = self.database.update_file_backup(&record).await {
                    error!(backup_id = record.id, "备份已上传但无法更新记录: {}", e);
                    self.discard_upload(backend.as_ref(), &record.storage_key).await;
                    return Err(e);
                }

                self.emit(BackupEvent::BackupCompleted {
                    kind: RecordKind::Files,
                    id: record.id,
                    project_id: record.project_id.clone(),
                    size_bytes: record.size_bytes,
                    duration_ms: record.duration_ms.unwrap_or(0),
                });
                Ok(record)
            }
            Err(e) => {
                record.status = BackupStatus::Failed;
                record.error_message = Some(e.to_string());
                record.completed_at = Some(self.clock.now());
                if let Err(update) = self.database.update_file_backup(&record).await {
                    error!(backup_id = record.id, "无法将备份记录标记为失败: {}", update);
                }

                self.emit(BackupEvent::BackupFailed {
                    kind: RecordKind::Files,
                    id: record.id,
                    project_id: record.project_id.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// 解析源目录、排除规则与基础备份，全部在创建记录之前完成
    async fn plan_file_backup(&self, request: &FileBackupRequest) -> Result<FilePlan> {
        let project = self.config.project(&request.project_id)?;
        let root = project
            .source_path
            .as_deref()
            .map(PathBuf::from)
            .ok_or_else(|| {
                BackupError::invalid_config(format!("项目 {} 未配置 source_path", project.id))
            })?;
        if !root.is_dir() {
            return Err(BackupError::invalid_config(format!(
                "源目录不存在: {}",
                root.display()
            )));
        }

        let extra: Vec<&String> = self
            .config
            .files
            .extra_excludes
            .iter()
            .chain(&project.excludes)
            .chain(&request.extra_excludes)
            .collect();
        let excludes = ExcludeSet::with_defaults(&extra)?;

        let base = match request.kind {
            FileBackupKind::Full => None,
            FileBackupKind::Incremental => {
                let base = self
                    .chain
                    .resolve_base(&request.project_id, request.base_backup_id)
                    .await?;
                self.chain.check_new_incremental(&base).await?;
                let map = self.chain.effective_manifest(&base).await?;
                Some((base, map))
            }
        };

        Ok(FilePlan {
            root,
            excludes,
            base,
        })
    }

    // ========== 服务器备份 ==========

    /// 把服务器上配置的目录打包为 tar.gz
    #[instrument(skip(self, request), fields(server = %request.server_id))]
    pub async fn create_server_backup(
        &self,
        request: &ServerBackupRequest,
    ) -> Result<ServerBackup> {
        let server = self.config.server(&request.server_id)?.clone();
        let archive = ServerArchive::new(&server.backup_paths)?;
        let storage_name = self.resolve_storage(&request.storage)?;
        let backend = self.storage.get(&storage_name)?;

        let now = self.clock.now();
        let server_name = name_component(&server.id);
        let filename = format!(
            "server_{}_full_{}.tar.gz",
            server_name,
            now.format(FILENAME_TIMESTAMP_FORMAT)
        );
        let prefix = format!("{SERVER_KEY_PREFIX}/{server_name}");
        let storage_key = storage_key(&prefix, now, &filename);

        let pending = ServerBackup {
            id: 0,
            server_id: server.id.clone(),
            schedule_id: request.schedule_id,
            trigger: request.trigger,
            status: BackupStatus::Pending,
            filename,
            storage: storage_name,
            storage_key,
            size_bytes: 0,
            checksum: None,
            metadata: Some(archive.metadata()),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error_message: None,
            verified_at: None,
            created_at: now,
        };
        let mut record = self.database.insert_server_backup(&pending).await?;

        record.status = BackupStatus::Running;
        record.started_at = Some(self.clock.now());
        self.database.update_server_backup(&record).await?;

        info!(
            "开始创建服务器备份: {} ({})",
            record.filename,
            server.backup_paths.join(" ")
        );

        let outcome = async {
            let staged = tempfile::Builder::new()
                .prefix("server-")
                .suffix(".tar.gz")
                .tempfile()?;
            let output = self
                .executor
                .run_to_file(
                    &server,
                    &archive.command(),
                    staged.path(),
                    ServerArchive::timeout(),
                )
                .await?
                .into_result()?;
            if !output.stderr.trim().is_empty() {
                warn!(server = %server.id, "打包时出现警告: {}", output.stderr.trim());
            }
            let checksum = sha256_file(staged.path()).await?;
            let size = self
                .upload(backend.as_ref(), &record.storage_key, staged.path())
                .await?;
            Ok::<_, BackupError>((size, checksum))
        }
        .await;

        match outcome {
            Ok((size, checksum)) => {
                let completed_at = self.clock.now();
                record.status = BackupStatus::Completed;
                record.size_bytes = size;
                record.checksum = Some(checksum);
                record.completed_at = Some(completed_at);
                record.duration_ms = record
                    .started_at
                    .map(|started| (completed_at - started).num_milliseconds());
                if let Err(e) = self.database.update_server_backup(&record).await {
                    error!(backup_id = record.id, "备份已上传但无法更新记录: {}", e);
                    self.discard_upload(backend.as_ref(), &record.storage_key).await;
                    return Err(e);
                }

                self.emit(BackupEvent::BackupCompleted {
                    kind: RecordKind::Server,
                    id: record.id,
                    project_id: record.server_id.clone(),
                    size_bytes: record.size_bytes,
                    duration_ms: record.duration_ms.unwrap_or(0),
                });
                Ok(record)
            }
            Err(e) => {
                record.status = BackupStatus::Failed;
                record.error_message = Some(e.to_string());
                record.completed_at = Some(self.clock.now());
                if let Err(update) = self.database.update_server_backup(&record).await {
                    error!(backup_id = record.id, "无法将备份记录标记为失败: {}", update);
                }

                self.emit(BackupEvent::BackupFailed {
                    kind: RecordKind::Server,
                    id: record.id,
                    project_id: record.server_id.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    // ========== 存储 ==========

    fn resolve_storage(&self, name: &str) -> Result<String> {
        let name = Some(name.trim()).filter(|n| !n.is_empty());
        self.storage.resolve_name(name)
    }

    /// 上传暂存文件，失败时清理目标 key
    async fn upload(&self, backend: &dyn StorageBackend, key: &str, staged: &Path) -> Result<u64> {
        match backend.put(key, staged).await {
            Ok(size) => Ok(size),
            Err(e) => {
                self.discard_upload(backend, key).await;
                Err(e)
            }
        }
    }

    /// 尽力删除已写入的产物，失败只记录日志
    async fn discard_upload(&self, backend: &dyn StorageBackend, key: &str) {
        if let Err(cleanup) = backend.delete(key).await {
            warn!("清理产物 {} 出错: {}", key, cleanup);
        }
    }

    /// 下载产物到临时文件并校验哈希
    ///
    /// 返回临时文件与实际哈希，由调用方决定如何处理不匹配。
    pub async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<(NamedTempFile, String)> {
        let backend = self.storage.get(&artifact.storage)?;
        let mut reader = backend.get(&artifact.storage_key).await?;

        let staged = NamedTempFile::new()?;
        let mut file = tokio::fs::File::create(staged.path()).await?;
        tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        drop(file);

        let actual = sha256_file(staged.path()).await?;
        Ok((staged, actual))
    }

    /// 恢复前的完整性检查: 校验和一致，且 gzip 流能完整解压
    async fn fetch_verified(&self, artifact: &ArtifactRef) -> Result<NamedTempFile> {
        let (staged, actual) = self.fetch_artifact(artifact).await?;
        let expected = artifact.checksum.as_deref().unwrap_or_default();
        if !checksums_match(expected, &actual) {
            return Err(BackupError::restore(format!(
                "备份 {} 校验和不匹配，停止恢复",
                artifact.id
            )));
        }

        let path = staged.path().to_path_buf();
        tokio::task::spawn_blocking(move || check_gzip_stream(&path)).await??;
        info!(backup_id = artifact.id, kind = %artifact.kind, "🔍 完整性检查通过");
        Ok(staged)
    }

    // ========== 删除 ==========

    /// 删除数据库备份: 先删除产物，再删除记录
    pub async fn delete_database_backup(&self, id: i64) -> Result<()> {
        let guard = self.locks.acquire(RecordKind::Database, id).await;

        let record = self
            .database
            .get_database_backup(id)
            .await?
            .ok_or(BackupError::RecordNotFound(id))?;

        self.storage
            .get(&record.storage)?
            .delete(&record.storage_key)
            .await?;
        self.database.delete_database_backup_record(id).await?;

        drop(guard);
        self.locks.forget(RecordKind::Database, id);
        info!("删除数据库备份 {}: {}", id, record.filename);
        Ok(())
    }

    /// 删除服务器备份: 先删除产物，再删除记录
    pub async fn delete_server_backup(&self, id: i64) -> Result<()> {
        let guard = self.locks.acquire(RecordKind::Server, id).await;

        let record = self
            .database
            .get_server_backup(id)
            .await?
            .ok_or(BackupError::RecordNotFound(id))?;

        self.storage
            .get(&record.storage)?
            .delete(&record.storage_key)
            .await?;
        self.database.delete_server_backup_record(id).await?;

        drop(guard);
        self.locks.forget(RecordKind::Server, id);
        info!("删除服务器备份 {}: {}", id, record.filename);
        Ok(())
    }

    /// 所有依赖该备份的增量备份，按层级顺序 (子在前，孙在后)
    pub async fn file_descendants(&self, id: i64) -> Result<Vec<FileBackup>> {
        let mut descendants = Vec::new();
        let mut queue = VecDeque::from([id]);

        while let Some(parent_id) = queue.pop_front() {
            for child in self.database.file_backup_children(parent_id).await? {
                if descendants.iter().any(|d: &FileBackup| d.id == child.id) {
                    continue;
                }
                queue.push_back(child.id);
                descendants.push(child);
            }
        }

        Ok(descendants)
    }

    /// 删除文件备份，并级联删除依赖它的增量备份
    ///
    /// 仍有进行中的子孙备份时拒绝删除。
    pub async fn delete_file_backup(&self, id: i64) -> Result<DeleteOutcome> {
        let record = self
            .database
            .get_file_backup(id)
            .await?
            .ok_or(BackupError::RecordNotFound(id))?;

        let descendants = self.file_descendants(id).await?;
        if let Some(busy) = descendants.iter().find(|d| !d.status.is_terminal()) {
            return Err(BackupError::backup(format!(
                "备份 {} 的增量备份 {} 仍在进行中 ({})，暂不删除",
                id, busy.id, busy.status
            )));
        }

        let mut outcome = DeleteOutcome::default();
        for victim in descendants.iter().rev().chain(std::iter::once(&record)) {
            self.delete_file_artifact(victim).await?;
            outcome.deleted.push(victim.id);
        }
        outcome.cascaded = descendants.len();

        if outcome.cascaded > 0 {
            self.emit(BackupEvent::CascadeDeleted {
                kind: RecordKind::Files,
                parent_id: id,
                count: outcome.cascaded,
            });
        }
        info!(
            "删除文件备份 {}: {} (级联 {} 个)",
            id, record.filename, outcome.cascaded
        );
        Ok(outcome)
    }

    async fn delete_file_artifact(&self, record: &FileBackup) -> Result<()> {
        let guard = self.locks.acquire(RecordKind::Files, record.id).await;

        self.storage
            .get(&record.storage)?
            .delete(&record.storage_key)
            .await?;
        self.database.delete_file_backup_record(record.id).await?;

        drop(guard);
        self.locks.forget(RecordKind::Files, record.id);
        Ok(())
    }

    // ========== 恢复 ==========

    /// 恢复文件备份
    ///
    /// 从全量根开始依次校验并解压链上的每个归档，再应用各自的墓碑。
    #[instrument(skip(self, options), fields(target = %options.target_dir.display()))]
    pub async fn restore_file_backup(
        &self,
        backup_id: i64,
        options: &RestoreOptions,
    ) -> Result<RestoreReport> {
        let record = self
            .database
            .get_file_backup(backup_id)
            .await?
            .ok_or(BackupError::RecordNotFound(backup_id))?;
        if record.status != BackupStatus::Completed {
            return Err(BackupError::NotCompleted {
                id: backup_id,
                status: record.status.to_string(),
            });
        }

        let chain = self.chain.chain_from_root(&record).await?;
        let target_dir = options.target_dir.clone();

        if target_dir.exists() && !is_empty_dir(&target_dir).await? {
            if options.force_overwrite {
                warn!("目标目录 {} 非空，将被清空和覆盖", target_dir.display());
                tokio::fs::remove_dir_all(&target_dir).await?;
            } else {
                return Err(BackupError::restore(format!(
                    "目标目录 {} 非空，请使用 --force 覆盖",
                    target_dir.display()
                )));
            }
        }
        tokio::fs::create_dir_all(&target_dir).await?;

        let mut applied = Vec::with_capacity(chain.len());
        for link in &chain {
            let staged = self.fetch_verified(&link.artifact()).await?;

            info!("解压备份 {} ({})", link.id, link.kind);
            let target = target_dir.clone();
            let deleted = link.manifest.deleted.clone();
            tokio::task::spawn_blocking(move || {
                extract_archive(staged.path(), &target)?;
                apply_tombstones(&target, &deleted)
            })
            .await??;
            applied.push(link.id);
        }

        let files_count = self.chain.effective_manifest(&record).await?.len();
        info!(
            "恢复完成: {} 个备份，{} 个文件",
            applied.len(),
            files_count
        );
        self.emit(BackupEvent::RestoreCompleted {
            kind: RecordKind::Files,
            id: backup_id,
            target: target_dir.display().to_string(),
        });
        Ok(RestoreReport {
            applied,
            files_count,
        })
    }

    /// 恢复数据库备份
    ///
    /// 产物通过完整性检查后才会送入目标库；恢复期间持有记录锁，备份不会被并发删除。
    #[instrument(skip(self, options))]
    pub async fn restore_database_backup(
        &self,
        id: i64,
        options: &DatabaseRestoreOptions,
    ) -> Result<DatabaseBackup> {
        let _guard = self.locks.acquire(RecordKind::Database, id).await;

        let record = self
            .database
            .get_database_backup(id)
            .await?
            .ok_or(BackupError::RecordNotFound(id))?;
        if record.status != BackupStatus::Completed {
            return Err(BackupError::NotCompleted {
                id,
                status: record.status.to_string(),
            });
        }

        let server_id = options.server_id.as_deref().unwrap_or(&record.server_id);
        let server = self.config.server(server_id)?.clone();
        let database = options
            .database
            .clone()
            .unwrap_or_else(|| record.database_name.clone());

        let staged = self.fetch_verified(&record.artifact()).await?;
        info!(
            "开始恢复数据库备份 {} -> {}/{} ({})",
            id, server.id, database, record.engine
        );
        strategy_for(record.engine)
            .restore_from_file(self.executor.as_ref(), &server, &database, staged.path())
            .await?;

        self.emit(BackupEvent::RestoreCompleted {
            kind: RecordKind::Database,
            id,
            target: format!("{}/{}", server.id, database),
        });
        Ok(record)
    }

    /// 恢复服务器备份，把归档解压到 target_root (默认 `/`)
    #[instrument(skip(self))]
    pub async fn restore_server_backup(&self, id: i64, target_root: &str) -> Result<ServerBackup> {
        if !target_root.starts_with('/') {
            return Err(BackupError::invalid_config(format!(
                "恢复目录必须是绝对路径: {target_root}"
            )));
        }
        let _guard = self.locks.acquire(RecordKind::Server, id).await;

        let record = self
            .database
            .get_server_backup(id)
            .await?
            .ok_or(BackupError::RecordNotFound(id))?;
        if record.status != BackupStatus::Completed {
            return Err(BackupError::NotCompleted {
                id,
                status: record.status.to_string(),
            });
        }
        let server = self.config.server(&record.server_id)?.clone();

        let staged = self.fetch_verified(&record.artifact()).await?;
        info!("开始恢复服务器备份 {} -> {}:{}", id, server.id, target_root);
        self.executor
            .run_with_input(
                &server,
                &ServerArchive::restore_command(target_root),
                staged.path(),
                ServerArchive::timeout(),
            )
            .await?
            .into_result()?;

        self.emit(BackupEvent::RestoreCompleted {
            kind: RecordKind::Server,
            id,
            target: format!("{}:{}", server.id, target_root),
        });
        Ok(record)
    }
}

/// 存储 key: `<prefix>/Y/m/d/<filename>`
fn storage_key(prefix: &str, at: DateTime<Utc>, filename: &str) -> String {
    format!("{}/{}/{}", prefix, at.format("%Y/%m/%d"), filename)
}

/// 文件名中使用的名称部分: 取路径最后一段，非常规字符替换为 `_`
fn name_component(name: &str) -> String {
    let last = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "backup".to_string()
    } else {
        cleaned
    }
}

async fn is_empty_dir(path: &Path) -> Result<bool> {
    let mut entries = tokio::fs::read_dir(path).await?;
    Ok(entries.next_entry().await?.is_none())
}

/// 执行实际的文件备份: 扫描、对比、打包、计算校验和
async fn perform_backup(plan: FilePlan) -> Result<(Manifest, NamedTempFile, String)> {
    // 在后台线程中执行扫描与压缩，避免阻塞异步运行时
    tokio::task::spawn_blocking(move || {
        let files = scan_tree(&plan.root, &plan.excludes)?;
        let diff = match &plan.base {
            None => build_full(files)?,
            Some((_, base_map)) => build_incremental(files, base_map)?,
        };

        let staged = tempfile::Builder::new()
            .prefix("backup-")
            .suffix(".tar.gz")
            .tempfile()?;
        write_archive(staged.path(), &diff.changed)?;
        let checksum = sha256_file_blocking(staged.path())?;

        Ok::<_, BackupError>((diff.manifest, staged, checksum))
    })
    .await?
}

fn write_archive(path: &Path, files: &[ScannedFile]) -> Result<()> {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::fs::File;
    use tar::Builder;

    let file = File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::new(COMPRESSION_LEVEL));
    let mut archive = Builder::new(encoder);

    for scanned in files {
        archive
            .append_path_with_name(&scanned.absolute_path, &scanned.relative_path)
            .map_err(|e| BackupError::backup(format!("添加文件到归档失败: {e}")))?;
    }

    let encoder = archive
        .into_inner()
        .map_err(|e| BackupError::backup(format!("完成归档失败: {e}")))?;
    encoder.finish()?;
    Ok(())
}

/// 完整读一遍 gzip 流，截断或损坏的数据会在这里报错
fn check_gzip_stream(path: &Path) -> Result<()> {
    use flate2::read::GzDecoder;
    use std::fs::File;

    let mut decoder = GzDecoder::new(File::open(path)?);
    std::io::copy(&mut decoder, &mut std::io::sink())
        .map_err(|e| BackupError::restore(format!("压缩数据已损坏: {e}")))?;
    Ok(())
}

fn extract_archive(archive_path: &Path, target_dir: &Path) -> Result<()> {
    use flate2::read::GzDecoder;
    use std::fs::File;
    use tar::Archive;

    let file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive
        .unpack(target_dir)
        .map_err(|e| BackupError::restore(format!("解压归档失败: {e}")))?;
    Ok(())
}

fn apply_tombstones(target_dir: &Path, deleted: &[String]) -> Result<()> {
    for path in deleted {
        if path.split('/').any(|part| part == "..") {
            warn!("忽略非法墓碑路径: {}", path);
            continue;
        }
        match std::fs::remove_file(target_dir.join(path)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checksum::sha256_bytes;
    use crate::clock::FixedClock;
    use crate::config::{ProjectConfig, ServerConfig, StorageDestination};
    use crate::models::{BackupFilter, DatabaseEngine, TriggerType};
    use crate::remote::{CommandOutput, SshExecutor};
    use crate::storage::{ArtifactReader, LocalStorage};
    use crate::notify::tests::RecordingSink;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    /// 返回预设输出并记录命令的执行器
    #[derive(Debug)]
    pub(crate) struct MockExecutor {
        pub(crate) result: Mutex<CommandOutput>,
        pub(crate) commands: Mutex<Vec<String>>,
    }

    impl MockExecutor {
        fn with_output(output: CommandOutput) -> Self {
            Self {
                result: Mutex::new(output),
                commands: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn succeeding(stdout: &[u8]) -> Self {
            Self::with_output(CommandOutput {
                exit_code: 0,
                stdout: stdout.to_vec(),
                stderr: String::new(),
            })
        }

        pub(crate) fn failing(exit_code: i32, stderr: &str) -> Self {
            Self::with_output(CommandOutput {
                exit_code,
                stdout: Vec::new(),
                stderr: stderr.to_string(),
            })
        }
    }

    #[async_trait]
    impl RemoteExecutor for MockExecutor {
        async fn run(
            &self,
            _server: &ServerConfig,
            command: &str,
            _timeout: Duration,
        ) -> Result<CommandOutput> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(self.result.lock().unwrap().clone())
        }

        async fn run_with_input(
            &self,
            server: &ServerConfig,
            command: &str,
            _input: &Path,
            timeout: Duration,
        ) -> Result<CommandOutput> {
            self.run(server, command, timeout).await
        }
    }

    /// 写入产物后删掉所有备份记录，模拟上传期间记录被并发删除
    #[derive(Debug)]
    struct VanishingStorage {
        inner: LocalStorage,
        database: Database,
        fail_put: bool,
    }

    #[async_trait]
    impl StorageBackend for VanishingStorage {
        fn name(&self) -> &str {
            "local"
        }

        async fn put(&self, key: &str, source: &Path) -> Result<u64> {
            let size = self.inner.put(key, source).await?;
            for record in self
                .database
                .list_database_backups(&BackupFilter::default())
                .await?
            {
                self.database.delete_database_backup_record(record.id).await?;
            }
            if self.fail_put {
                return Err(BackupError::storage("磁盘已满"));
            }
            Ok(size)
        }

        async fn get(&self, key: &str) -> Result<ArtifactReader> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            self.inner.exists(key).await
        }

        async fn size(&self, key: &str) -> Result<u64> {
            self.inner.size(key).await
        }
    }

    /// 写入总是失败的存储
    #[derive(Debug)]
    struct BrokenStorage;

    #[async_trait]
    impl StorageBackend for BrokenStorage {
        fn name(&self) -> &str {
            "broken"
        }

        async fn put(&self, _key: &str, _source: &Path) -> Result<u64> {
            Err(BackupError::storage("磁盘已满"))
        }

        async fn get(&self, key: &str) -> Result<ArtifactReader> {
            Err(BackupError::storage(format!("产物不存在: {key}")))
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            Ok(())
        }

        async fn exists(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }

        async fn size(&self, _key: &str) -> Result<u64> {
            Ok(0)
        }
    }

    pub(crate) struct Harness {
        pub(crate) manager: BackupManager,
        pub(crate) clock: FixedClock,
        pub(crate) source: TempDir,
        pub(crate) storage_root: TempDir,
    }

    pub(crate) fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 2, 0, 0).unwrap()
    }

    pub(crate) fn test_config(source: &Path, storage_root: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.destinations = vec![StorageDestination {
            name: "local".to_string(),
            root: storage_root.to_string_lossy().to_string(),
            ..Default::default()
        }];
        config.servers = vec![
            ServerConfig {
                id: "web-1".to_string(),
                host: "10.0.0.5".to_string(),
                port: 22,
                user: "root".to_string(),
                ssh_key: None,
                ..Default::default()
            },
            ServerConfig {
                id: "local".to_string(),
                host: "localhost".to_string(),
                backup_paths: vec![source.to_string_lossy().to_string()],
                ..Default::default()
            },
        ];
        config.projects = vec![ProjectConfig {
            id: "shop".to_string(),
            slug: Some("shop".to_string()),
            server: "web-1".to_string(),
            source_path: Some(source.to_string_lossy().to_string()),
            excludes: vec!["cache/*".to_string()],
            databases: Vec::new(),
        }];
        config
    }

    pub(crate) async fn harness_with(executor: MockExecutor) -> Harness {
        harness_on(Arc::new(executor)).await
    }

    pub(crate) async fn harness_on(executor: Arc<dyn RemoteExecutor>) -> Harness {
        let source = tempdir().unwrap();
        let storage_root = tempdir().unwrap();
        let config = test_config(source.path(), storage_root.path());
        let registry = StorageRegistry::from_config(&config.storage).unwrap();
        let database = Database::connect_memory().await.unwrap();
        let clock = FixedClock::new(start_time());

        let manager = BackupManager::new(database, registry, executor, Arc::new(config))
            .with_clock(Arc::new(clock.clone()));

        Harness {
            manager,
            clock,
            source,
            storage_root,
        }
    }

    pub(crate) async fn harness() -> Harness {
        harness_with(MockExecutor::succeeding(b"\x1f\x8bdump")).await
    }

    pub(crate) fn db_request() -> DatabaseBackupRequest {
        DatabaseBackupRequest {
            project_id: "shop".to_string(),
            server_id: "web-1".to_string(),
            engine: DatabaseEngine::Mysql,
            database_name: "shop".to_string(),
            storage: "local".to_string(),
            trigger: TriggerType::Manual,
            schedule_id: None,
        }
    }

    /// 本机上的 SQLite 库，走真实的 shell 管道
    fn local_sqlite_request(database_name: &str) -> DatabaseBackupRequest {
        DatabaseBackupRequest {
            server_id: "local".to_string(),
            engine: DatabaseEngine::Sqlite,
            database_name: database_name.to_string(),
            ..db_request()
        }
    }

    pub(crate) fn file_request(kind: FileBackupKind) -> FileBackupRequest {
        FileBackupRequest {
            project_id: "shop".to_string(),
            kind,
            base_backup_id: None,
            storage: String::new(),
            trigger: TriggerType::Manual,
            schedule_id: None,
            extra_excludes: Vec::new(),
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_database_backup_success() {
        let h = harness().await;

        let record = h.manager.create_database_backup(&db_request()).await.unwrap();
        assert_eq!(record.status, BackupStatus::Completed);
        assert_eq!(record.filename, "shop_2025-03-01_020000.sql.gz");
        assert_eq!(
            record.storage_key,
            "backups/2025/03/01/shop_2025-03-01_020000.sql.gz"
        );
        assert_eq!(
            record.checksum.as_deref(),
            Some(sha256_bytes(b"\x1f\x8bdump").as_str())
        );
        assert_eq!(record.size_bytes, 6);
        assert_eq!(record.metadata.as_ref().unwrap()["method"], "mysqldump");

        let stored = h.storage_root.path().join(&record.storage_key);
        assert_eq!(fs::read(stored).unwrap(), b"\x1f\x8bdump");

        let reloaded = h
            .manager
            .database()
            .get_database_backup(record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.status, BackupStatus::Completed);
    }

    #[tokio::test]
    async fn test_database_backup_failure_marks_record() {
        let h = harness_with(MockExecutor::failing(2, "Access denied for user")).await;

        let err = h.manager.create_database_backup(&db_request()).await.unwrap_err();
        assert!(matches!(err, BackupError::CommandFailed { exit_code: 2, .. }));

        let records = h
            .manager
            .database()
            .list_database_backups(&BackupFilter::for_project("shop"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, BackupStatus::Failed);
        assert!(records[0].checksum.is_none());
        assert!(
            records[0]
                .error_message
                .as_deref()
                .unwrap()
                .contains("Access denied")
        );
    }

    #[tokio::test]
    async fn test_unknown_server_creates_no_record() {
        let h = harness().await;
        let mut request = db_request();
        request.server_id = "nowhere".to_string();

        let err = h.manager.create_database_backup(&request).await.unwrap_err();
        assert!(err.is_configuration_error());

        let records = h
            .manager
            .database()
            .list_database_backups(&BackupFilter::default())
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_marks_record_failed() {
        let source = tempdir().unwrap();
        let storage_root = tempdir().unwrap();
        let config = test_config(source.path(), storage_root.path());
        let mut registry = StorageRegistry::new();
        registry.register(Arc::new(BrokenStorage));
        let manager = BackupManager::new(
            Database::connect_memory().await.unwrap(),
            registry,
            Arc::new(MockExecutor::succeeding(b"data")),
            Arc::new(config),
        );

        let mut request = db_request();
        request.storage = String::new();
        assert!(manager.create_database_backup(&request).await.is_err());
        let records = manager
            .database()
            .list_database_backups(&BackupFilter::default())
            .await
            .unwrap();
        assert_eq!(records[0].status, BackupStatus::Failed);
        assert!(records[0].error_message.as_deref().unwrap().contains("磁盘已满"));
    }

    #[tokio::test]
    async fn test_full_then_incremental_and_restore() {
        let h = harness().await;
        let root = h.source.path();
        write(root, "index.php", "<?php echo 1;");
        write(root, "src/app.php", "app v1");
        write(root, "src/old.php", "old");
        write(root, "cache/tmp.bin", "ignored");
        write(root, "debug.log", "ignored");

        let full = h
            .manager
            .create_file_backup(&file_request(FileBackupKind::Full))
            .await
            .unwrap();
        assert_eq!(full.status, BackupStatus::Completed);
        assert_eq!(full.files_count, 3);
        assert_eq!(full.filename, "shop_full_2025-03-01_020000.tar.gz");
        assert!(full.storage_key.starts_with("file-backups/2025/03/01/"));

        // 修改一个文件、新增一个文件、删除一个文件
        write(root, "src/app.php", "app version 2");
        write(root, "src/new.php", "new");
        fs::remove_file(root.join("src/old.php")).unwrap();
        h.clock.advance(chrono::Duration::hours(1));

        let inc = h
            .manager
            .create_file_backup(&file_request(FileBackupKind::Incremental))
            .await
            .unwrap();
        assert_eq!(inc.parent_backup_id, Some(full.id));
        assert_eq!(inc.files_count, 2);
        let paths: Vec<&str> = inc.manifest.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["src/app.php", "src/new.php"]);
        assert_eq!(inc.manifest.deleted, vec!["src/old.php".to_string()]);
        assert_eq!(h.manager.chain().incremental_depth(&inc).await.unwrap(), 1);

        let target = tempdir().unwrap();
        let restore_dir = target.path().join("restored");
        let report = h
            .manager
            .restore_file_backup(
                inc.id,
                &RestoreOptions {
                    target_dir: restore_dir.clone(),
                    force_overwrite: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(report.applied, vec![full.id, inc.id]);
        assert_eq!(report.files_count, 3);
        assert_eq!(
            fs::read_to_string(restore_dir.join("src/app.php")).unwrap(),
            "app version 2"
        );
        assert!(restore_dir.join("src/new.php").exists());
        assert!(!restore_dir.join("src/old.php").exists());
        assert!(!restore_dir.join("debug.log").exists());

        // 目标目录非空时需要 force
        let err = h
            .manager
            .restore_file_backup(
                full.id,
                &RestoreOptions {
                    target_dir: restore_dir.clone(),
                    force_overwrite: false,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Restore(_)));
    }

    #[tokio::test]
    async fn test_incremental_without_full_is_rejected() {
        let h = harness().await;
        write(h.source.path(), "a.txt", "a");

        let err = h
            .manager
            .create_file_backup(&file_request(FileBackupKind::Incremental))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::NoCompletedFullBackup { .. }));
        assert!(err.to_string().contains("no completed full backup found"));

        let records = h
            .manager
            .database()
            .list_file_backups(&BackupFilter::default())
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_delete_full_cascades_to_incrementals() {
        let h = harness().await;
        write(h.source.path(), "a.txt", "a");

        let full = h
            .manager
            .create_file_backup(&file_request(FileBackupKind::Full))
            .await
            .unwrap();
        h.clock.advance(chrono::Duration::minutes(5));
        write(h.source.path(), "b.txt", "b");
        let inc1 = h
            .manager
            .create_file_backup(&file_request(FileBackupKind::Incremental))
            .await
            .unwrap();
        h.clock.advance(chrono::Duration::minutes(5));
        write(h.source.path(), "c.txt", "c");
        let mut request = file_request(FileBackupKind::Incremental);
        request.base_backup_id = Some(inc1.id);
        let inc2 = h.manager.create_file_backup(&request).await.unwrap();
        assert_eq!(inc2.parent_backup_id, Some(inc1.id));

        let outcome = h.manager.delete_file_backup(full.id).await.unwrap();
        assert_eq!(outcome.cascaded, 2);
        assert_eq!(outcome.deleted, vec![inc2.id, inc1.id, full.id]);

        let remaining = h
            .manager
            .database()
            .list_file_backups(&BackupFilter::default())
            .await
            .unwrap();
        assert!(remaining.is_empty());
        assert!(!h.storage_root.path().join(&full.storage_key).exists());
        assert!(!h.storage_root.path().join(&inc2.storage_key).exists());
    }

    #[tokio::test]
    async fn test_failing_local_dump_marks_record_failed() {
        let h = harness_on(Arc::new(SshExecutor::new())).await;
        let missing = h.source.path().join("missing.sqlite");

        let err = h
            .manager
            .create_database_backup(&local_sqlite_request(&missing.to_string_lossy()))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::CommandFailed { .. }));

        let records = h
            .manager
            .database()
            .list_database_backups(&BackupFilter::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, BackupStatus::Failed);
        assert_eq!(records[0].size_bytes, 0);
    }

    #[tokio::test]
    async fn test_sqlite_backup_and_restore() {
        let h = harness_on(Arc::new(SshExecutor::new())).await;
        let sink = RecordingSink::default();
        let manager = h.manager.clone().with_event_sink(Arc::new(sink.clone()));
        let db_path = h.source.path().join("app.sqlite");
        fs::write(&db_path, b"SQLite format 3\0v1").unwrap();
        let db_name = db_path.to_string_lossy().to_string();

        let record = manager
            .create_database_backup(&local_sqlite_request(&db_name))
            .await
            .unwrap();
        assert_eq!(record.status, BackupStatus::Completed);
        let stored = fs::read(h.storage_root.path().join(&record.storage_key)).unwrap();
        assert_eq!(record.checksum.as_deref(), Some(sha256_bytes(&stored).as_str()));

        fs::write(&db_path, b"broken").unwrap();
        manager
            .restore_database_backup(record.id, &DatabaseRestoreOptions::default())
            .await
            .unwrap();
        assert_eq!(fs::read(&db_path).unwrap(), b"SQLite format 3\0v1");

        // 恢复到另一个文件
        let copy = h.source.path().join("copy.sqlite");
        let options = DatabaseRestoreOptions {
            server_id: None,
            database: Some(copy.to_string_lossy().to_string()),
        };
        manager
            .restore_database_backup(record.id, &options)
            .await
            .unwrap();
        assert_eq!(fs::read(&copy).unwrap(), b"SQLite format 3\0v1");
        assert!(sink.events.lock().unwrap().iter().any(|event| matches!(
            event,
            BackupEvent::RestoreCompleted { kind: RecordKind::Database, .. }
        )));
    }

    #[tokio::test]
    async fn test_database_restore_checks_integrity_first() {
        let h = harness().await;
        let record = h.manager.create_database_backup(&db_request()).await.unwrap();

        fs::write(h.storage_root.path().join(&record.storage_key), b"tampered").unwrap();
        let err = h
            .manager
            .restore_database_backup(record.id, &DatabaseRestoreOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Restore(_)));
        assert!(err.to_string().contains("校验和不匹配"));
    }

    #[tokio::test]
    async fn test_database_restore_rejects_corrupt_gzip() {
        let executor = Arc::new(MockExecutor::succeeding(b"\x1f\x8bnot really gzip"));
        let h = harness_on(executor.clone()).await;
        let record = h.manager.create_database_backup(&db_request()).await.unwrap();

        let err = h
            .manager
            .restore_database_backup(record.id, &DatabaseRestoreOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Restore(_)));
        // 只有导出命令，恢复命令从未执行
        assert_eq!(executor.commands.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_server_backup_and_restore_locally() {
        let h = harness_on(Arc::new(SshExecutor::new())).await;
        write(h.source.path(), "etc/app.conf", "port = 80");

        let request = ServerBackupRequest {
            server_id: "local".to_string(),
            storage: String::new(),
            trigger: TriggerType::Manual,
            schedule_id: None,
        };
        let record = h.manager.create_server_backup(&request).await.unwrap();
        assert_eq!(record.status, BackupStatus::Completed);
        assert_eq!(record.filename, "server_local_full_2025-03-01_020000.tar.gz");
        assert!(
            record
                .storage_key
                .starts_with("server-backups/local/2025/03/01/")
        );
        assert!(record.size_bytes > 0);

        let target = tempdir().unwrap();
        let root = target.path().to_string_lossy().to_string();
        h.manager.restore_server_backup(record.id, &root).await.unwrap();

        // tar 去掉了开头的 `/`，归档内容落在 root 下的同名路径
        let relative = h.source.path().strip_prefix("/").unwrap();
        let restored = target.path().join(relative).join("etc/app.conf");
        assert_eq!(fs::read_to_string(restored).unwrap(), "port = 80");

        let err = h
            .manager
            .restore_server_backup(record.id, "relative/dir")
            .await
            .unwrap_err();
        assert!(err.is_configuration_error());

        h.manager.delete_server_backup(record.id).await.unwrap();
        assert!(!h.storage_root.path().join(&record.storage_key).exists());
    }

    #[tokio::test]
    async fn test_server_backup_failure_marks_record() {
        let h = harness_with(MockExecutor::failing(2, "tar: Cannot open")).await;
        let request = ServerBackupRequest {
            server_id: "local".to_string(),
            storage: String::new(),
            trigger: TriggerType::Scheduled,
            schedule_id: None,
        };

        assert!(h.manager.create_server_backup(&request).await.is_err());
        let records = h
            .manager
            .database()
            .list_server_backups(&BackupFilter::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, BackupStatus::Failed);
        assert!(records[0].error_message.as_deref().unwrap().contains("Cannot open"));
    }

    async fn vanishing_manager(h: &Harness, fail_put: bool) -> BackupManager {
        let mut registry = StorageRegistry::new();
        registry.register(Arc::new(VanishingStorage {
            inner: LocalStorage::new("local", h.storage_root.path(), None).unwrap(),
            database: h.manager.database().clone(),
            fail_put,
        }));
        BackupManager::new(
            h.manager.database().clone(),
            registry,
            Arc::new(MockExecutor::succeeding(b"\x1f\x8bdump")),
            Arc::new(test_config(h.source.path(), h.storage_root.path())),
        )
    }

    #[tokio::test]
    async fn test_lost_record_after_upload_removes_artifact() {
        let h = harness().await;
        let manager = vanishing_manager(&h, false).await;

        let err = manager.create_database_backup(&db_request()).await.unwrap_err();
        assert!(matches!(err, BackupError::RecordNotFound(_)));

        let leftovers: Vec<_> = walkdir::WalkDir::new(h.storage_root.path())
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_lost_record_keeps_original_failure() {
        let h = harness().await;
        let manager = vanishing_manager(&h, true).await;

        let err = manager.create_database_backup(&db_request()).await.unwrap_err();
        assert!(matches!(err, BackupError::Storage(_)));
        assert!(err.to_string().contains("磁盘已满"));
    }

    #[tokio::test]
    async fn test_foreign_base_backup_creates_no_record() {
        let h = harness().await;
        write(h.source.path(), "a.txt", "a");
        let full = h
            .manager
            .create_file_backup(&file_request(FileBackupKind::Full))
            .await
            .unwrap();

        // 另一个项目的全量备份
        let mut foreign = full.clone();
        foreign.project_id = "blog".to_string();
        let foreign = h.manager.database().insert_file_backup(&foreign).await.unwrap();

        let mut request = file_request(FileBackupKind::Incremental);
        request.base_backup_id = Some(foreign.id);
        let err = h.manager.create_file_backup(&request).await.unwrap_err();
        assert!(matches!(err, BackupError::BaseProjectMismatch { .. }));

        let records = h
            .manager
            .database()
            .list_file_backups(&BackupFilter::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.kind == FileBackupKind::Full));
    }

    #[test]
    fn test_name_component() {
        assert_eq!(name_component("shop"), "shop");
        assert_eq!(name_component("/srv/app/data.sqlite"), "data.sqlite");
        assert_eq!(name_component("my db"), "my_db");
    }
}
