use crate::app::CliApp;
use crate::utils::format_size;
use anyhow::Result;
use backup_core::models::{BackupFilter, BackupStatus};
use tracing::info;

fn status_display(status: BackupStatus, verified: bool) -> &'static str {
    match status {
        BackupStatus::Completed if verified => "✅ 已校验",
        BackupStatus::Completed => "✅ 完成",
        BackupStatus::Running => "⏳ 进行中",
        BackupStatus::Pending => "🕓 等待",
        BackupStatus::Failed => "❌ 失败",
    }
}

/// 列出备份记录
pub async fn run_list_backups(app: &CliApp, project: Option<&str>) -> Result<()> {
    let filter = match project {
        Some(id) => BackupFilter::for_project(id),
        None => BackupFilter::default(),
    };

    let database_backups = app.database.list_database_backups(&filter).await?;
    let file_backups = app.database.list_file_backups(&filter).await?;
    // 服务器备份不属于项目
    let server_backups = match project {
        Some(_) => Vec::new(),
        None => app.database.list_server_backups(&filter).await?,
    };

    if database_backups.is_empty() && file_backups.is_empty() && server_backups.is_empty() {
        info!("📦 暂无备份记录");
        info!("💡 使用以下命令创建备份:");
        info!("   backup database --project <ID>");
        info!("   backup files --project <ID> --type full");
        info!("   backup server --server <ID>");
        return Ok(());
    }

    if !database_backups.is_empty() {
        info!("🗄️  数据库备份");
        info!(
            "{:<6} {:<12} {:<16} {:<12} {:<20} {:<12} {:<10} {}",
            "ID", "项目", "数据库", "触发", "创建时间", "状态", "大小", "文件"
        );
        info!("{}", "-".repeat(110));
        for backup in &database_backups {
            info!(
                "{:<6} {:<12} {:<16} {:<12} {:<20} {:<12} {:<10} {}",
                backup.id,
                backup.project_id,
                backup.database_name,
                backup.trigger.as_str(),
                backup.created_at.format("%Y-%m-%d %H:%M:%S"),
                status_display(backup.status, backup.verified_at.is_some()),
                format_size(backup.size_bytes),
                backup.filename
            );
            if let Some(message) = &backup.error_message {
                info!("       错误: {}", message);
            }
        }
    }

    if !file_backups.is_empty() {
        info!("📁 文件备份");
        info!(
            "{:<6} {:<12} {:<12} {:<8} {:<20} {:<12} {:<8} {:<10} {}",
            "ID", "项目", "类型", "基础", "创建时间", "状态", "文件数", "大小", "文件"
        );
        info!("{}", "-".repeat(110));
        for backup in &file_backups {
            let parent = backup
                .parent_backup_id
                .map(|id| format!("#{id}"))
                .unwrap_or_else(|| "-".to_string());
            info!(
                "{:<6} {:<12} {:<12} {:<8} {:<20} {:<12} {:<8} {:<10} {}",
                backup.id,
                backup.project_id,
                backup.kind.as_str(),
                parent,
                backup.created_at.format("%Y-%m-%d %H:%M:%S"),
                status_display(backup.status, backup.verified_at.is_some()),
                backup.files_count,
                format_size(backup.size_bytes),
                backup.filename
            );
            if let Some(message) = &backup.error_message {
                info!("       错误: {}", message);
            }
        }
    }

    if !server_backups.is_empty() {
        info!("🖥️  服务器备份");
        info!(
            "{:<6} {:<12} {:<12} {:<20} {:<12} {:<10} {}",
            "ID", "服务器", "触发", "创建时间", "状态", "大小", "文件"
        );
        info!("{}", "-".repeat(110));
        for backup in &server_backups {
            info!(
                "{:<6} {:<12} {:<12} {:<20} {:<12} {:<10} {}",
                backup.id,
                backup.server_id,
                backup.trigger.as_str(),
                backup.created_at.format("%Y-%m-%d %H:%M:%S"),
                status_display(backup.status, backup.verified_at.is_some()),
                format_size(backup.size_bytes),
                backup.filename
            );
            if let Some(message) = &backup.error_message {
                info!("       错误: {}", message);
            }
        }
    }

    let total_size: u64 = database_backups
        .iter()
        .map(|b| b.size_bytes)
        .chain(file_backups.iter().map(|b| b.size_bytes))
        .chain(server_backups.iter().map(|b| b.size_bytes))
        .sum();
    info!("📊 备份统计:");
    info!("   数据库备份: {}", database_backups.len());
    info!("   文件备份: {}", file_backups.len());
    if !server_backups.is_empty() {
        info!("   服务器备份: {}", server_backups.len());
    }
    info!("   总大小: {}", format_size(total_size));

    Ok(())
}
