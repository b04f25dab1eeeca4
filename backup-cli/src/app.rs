use anyhow::{Context, Result};
use backup_core::{
    backup::BackupManager, config::AppConfig, database::Database, remote::SshExecutor,
    scheduler::Scheduler, storage::StorageRegistry, verify::Verifier,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cli::Commands;
use crate::commands;

#[derive(Clone)]
pub struct CliApp {
    pub config: Arc<AppConfig>,
    pub database: Database,
    pub backup_manager: BackupManager,
    pub scheduler: Scheduler,
    pub verifier: Verifier,
}

impl CliApp {
    /// 加载配置并初始化。未指定路径时按默认顺序查找配置文件
    pub async fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => AppConfig::load_from_file(path)?,
            None => AppConfig::find_and_load_config()?,
        };
        Self::from_config(config).await
    }

    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let db_path = config.get_database_path();
        let database = Database::connect(&db_path)
            .await
            .with_context(|| format!("无法打开记录库 {}", db_path.display()))?;
        debug!("记录库: {}", db_path.display());

        let storage = StorageRegistry::from_config(&config.storage)?;

        let executor = SshExecutor::new();
        if !config.servers.iter().all(|s| s.is_local()) {
            if let Err(e) = executor.check_prerequisites() {
                warn!("⚠️  {}，远程数据库备份将失败", e);
            }
        }

        let config = Arc::new(config);
        let backup_manager =
            BackupManager::new(database.clone(), storage, Arc::new(executor), config.clone());
        let scheduler = Scheduler::new(backup_manager.clone());
        let verifier = Verifier::new(backup_manager.clone());

        Ok(Self {
            config,
            database,
            backup_manager,
            scheduler,
            verifier,
        })
    }

    /// 运行应用命令
    pub async fn run_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Init { .. } => unreachable!(), // 已经在 main.rs 中处理
            Commands::Database {
                project,
                trigger,
                database,
            } => {
                commands::run_database_backup(
                    self,
                    project.as_deref(),
                    &trigger,
                    database.as_deref(),
                )
                .await
            }
            Commands::Files {
                project,
                all,
                kind,
                base_backup,
                storage,
            } => {
                commands::run_file_backup(
                    self,
                    project.as_deref(),
                    all,
                    &kind,
                    base_backup,
                    storage.as_deref(),
                )
                .await
            }
            Commands::Server {
                server,
                all,
                storage,
            } => {
                commands::run_server_backup(self, server.as_deref(), all, storage.as_deref()).await
            }
            Commands::Cleanup { project, dry_run } => {
                commands::run_cleanup(self, project.as_deref(), dry_run).await
            }
            Commands::Verify {
                backup,
                kind,
                all,
                project,
            } => commands::run_verify(self, backup, &kind, all, project.as_deref()).await,
            Commands::Run => commands::run_scheduler_tick(self).await,
            Commands::List { project } => {
                commands::run_list_backups(self, project.as_deref()).await
            }
            Commands::Schedule(cmd) => commands::handle_schedule_command(self, cmd).await,
            Commands::Restore(args) => commands::run_restore(self, &args).await,
        }
    }
}
