use crate::app::CliApp;
use crate::cli::RestoreArgs;
use crate::utils::format_size;
use anyhow::{Context, Result, bail};
use backup_core::{
    backup::{DatabaseRestoreOptions, RestoreOptions},
    config::{ProjectConfig, ServerConfig},
    models::{
        DatabaseBackupRequest, FileBackupKind, FileBackupRequest, RecordKind,
        ServerBackupRequest, TriggerType,
    },
};
use tracing::{error, info, warn};

/// 按 --project 选择项目，未指定时返回全部
fn select_projects<'a>(app: &'a CliApp, project: Option<&str>) -> Result<Vec<&'a ProjectConfig>> {
    match project {
        Some(id) => Ok(vec![app.config.project(id)?]),
        None => Ok(app.config.projects.iter().collect()),
    }
}

/// 备份项目数据库
pub async fn run_database_backup(
    app: &CliApp,
    project: Option<&str>,
    trigger: &str,
    database: Option<&str>,
) -> Result<()> {
    let trigger: TriggerType = trigger.parse()?;

    let mut requests = Vec::new();
    for project in select_projects(app, project)? {
        for db in &project.databases {
            if database.is_some_and(|name| name != db.name) {
                continue;
            }
            requests.push(DatabaseBackupRequest {
                project_id: project.id.clone(),
                server_id: project.server.clone(),
                engine: db.engine,
                database_name: db.name.clone(),
                storage: String::new(),
                trigger,
                schedule_id: None,
            });
        }
    }

    if requests.is_empty() {
        if let Some(name) = database {
            bail!("未在项目配置中找到数据库: {name}");
        }
        warn!("⚠️  没有配置任何数据库");
        return Ok(());
    }

    app.backup_manager.storage().ensure_available()?;

    info!("💾 创建数据库备份 ({} 个)", requests.len());
    let mut failed = 0;
    for request in &requests {
        match app.backup_manager.create_database_backup(request).await {
            Ok(backup) => info!(
                "   ✅ {}/{}: {} ({})",
                request.project_id,
                request.database_name,
                backup.filename,
                format_size(backup.size_bytes)
            ),
            Err(e) => {
                failed += 1;
                error!(
                    "   ❌ {}/{}: {}",
                    request.project_id, request.database_name, e
                );
            }
        }
    }

    if failed > 0 {
        bail!("{failed}/{} 个数据库备份失败", requests.len());
    }
    info!("🎉 数据库备份完成");
    Ok(())
}

/// 备份项目文件
pub async fn run_file_backup(
    app: &CliApp,
    project: Option<&str>,
    all: bool,
    kind: &str,
    base_backup: Option<i64>,
    storage: Option<&str>,
) -> Result<()> {
    let kind: FileBackupKind = kind.parse()?;

    let projects: Vec<&ProjectConfig> = match (project, all) {
        (Some(id), _) => vec![app.config.project(id)?],
        (None, true) => app
            .config
            .projects
            .iter()
            .filter(|p| p.source_path.is_some())
            .collect(),
        (None, false) => bail!("请指定 --project 或 --all"),
    };
    if base_backup.is_some() && projects.len() > 1 {
        bail!("--base-backup 只能与单个项目一起使用");
    }
    if projects.is_empty() {
        warn!("⚠️  没有配置 source_path 的项目");
        return Ok(());
    }

    app.backup_manager.storage().ensure_available()?;

    info!("📁 创建{}文件备份 ({} 个项目)", kind_label(kind), projects.len());
    let mut failed = 0;
    for project in &projects {
        let request = FileBackupRequest {
            project_id: project.id.clone(),
            kind,
            base_backup_id: base_backup,
            storage: storage.unwrap_or_default().to_string(),
            trigger: TriggerType::Manual,
            schedule_id: None,
            extra_excludes: Vec::new(),
        };

        match app.backup_manager.create_file_backup(&request).await {
            Ok(backup) => info!(
                "   ✅ {}: {} ({} 个文件, {})",
                project.id,
                backup.filename,
                backup.files_count,
                format_size(backup.size_bytes)
            ),
            Err(e) => {
                failed += 1;
                error!("   ❌ {}: {}", project.id, e);
            }
        }
    }

    if failed > 0 {
        bail!("{failed}/{} 个项目文件备份失败", projects.len());
    }
    info!("🎉 文件备份完成");
    Ok(())
}

fn kind_label(kind: FileBackupKind) -> &'static str {
    match kind {
        FileBackupKind::Full => "全量",
        FileBackupKind::Incremental => "增量",
    }
}

/// 打包服务器目录
pub async fn run_server_backup(
    app: &CliApp,
    server: Option<&str>,
    all: bool,
    storage: Option<&str>,
) -> Result<()> {
    let servers: Vec<&ServerConfig> = match (server, all) {
        (Some(id), _) => vec![app.config.server(id)?],
        (None, true) => app.config.servers.iter().collect(),
        (None, false) => bail!("请指定 --server 或 --all"),
    };
    if servers.is_empty() {
        warn!("⚠️  没有配置任何服务器");
        return Ok(());
    }

    app.backup_manager.storage().ensure_available()?;

    info!("🖥️  创建服务器备份 ({} 台)", servers.len());
    let mut failed = 0;
    for server in &servers {
        let request = ServerBackupRequest {
            server_id: server.id.clone(),
            storage: storage.unwrap_or_default().to_string(),
            trigger: TriggerType::Manual,
            schedule_id: None,
        };

        match app.backup_manager.create_server_backup(&request).await {
            Ok(backup) => info!(
                "   ✅ {}: {} ({})",
                server.id,
                backup.filename,
                format_size(backup.size_bytes)
            ),
            Err(e) => {
                failed += 1;
                error!("   ❌ {}: {}", server.id, e);
            }
        }
    }

    if failed > 0 {
        bail!("{failed}/{} 台服务器备份失败", servers.len());
    }
    info!("🎉 服务器备份完成");
    Ok(())
}

/// 从备份恢复，按 --type 选择备份种类
pub async fn run_restore(app: &CliApp, args: &RestoreArgs) -> Result<()> {
    let kind: RecordKind = args.kind.parse()?;
    match kind {
        RecordKind::Files => {
            let target = args
                .target
                .clone()
                .context("恢复文件备份需要指定 --target")?;
            info!("🔄 从文件备份 {} 恢复到 {}", args.backup, target.display());

            let options = RestoreOptions {
                target_dir: target,
                force_overwrite: args.force,
            };
            let report = app
                .backup_manager
                .restore_file_backup(args.backup, &options)
                .await?;

            info!(
                "🎉 恢复完成: 依次应用了 {} 个备份 {:?}，共 {} 个文件",
                report.applied.len(),
                report.applied,
                report.files_count
            );
        }
        RecordKind::Database => {
            info!("🔄 从数据库备份 {} 恢复", args.backup);
            let options = DatabaseRestoreOptions {
                server_id: args.server.clone(),
                database: args.database.clone(),
            };
            let record = app
                .backup_manager
                .restore_database_backup(args.backup, &options)
                .await?;
            info!(
                "🎉 恢复完成: {} -> {}",
                record.filename,
                options.database.as_deref().unwrap_or(&record.database_name)
            );
        }
        RecordKind::Server => {
            let root = args
                .target
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|| "/".to_string());
            warn!("⚠️  服务器备份将覆盖 {} 下的同名文件", root);
            let record = app
                .backup_manager
                .restore_server_backup(args.backup, &root)
                .await?;
            info!("🎉 恢复完成: {} -> {}:{}", record.filename, record.server_id, root);
        }
    }
    Ok(())
}
