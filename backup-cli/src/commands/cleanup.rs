use crate::app::CliApp;
use anyhow::{Result, bail};
use tracing::{info, warn};

/// 按保留策略清理旧备份
pub async fn run_cleanup(app: &CliApp, project: Option<&str>, dry_run: bool) -> Result<()> {
    app.backup_manager.storage().ensure_available()?;

    if dry_run {
        info!("🔍 试运行模式: 不会删除任何备份");
    }

    let retention = app.scheduler.retention();
    let report = match project {
        Some(id) => {
            app.config.project(id)?;
            retention.cleanup_project(id, dry_run).await?
        }
        None => retention.cleanup_all(dry_run).await?,
    };

    if report.plans.is_empty() {
        info!("没有启用的备份计划，无需清理");
        return Ok(());
    }

    for plan in &report.plans {
        info!(
            "📋 计划 #{} ({}): 保留 {} 个，删除 {} 个",
            plan.schedule_id,
            plan.kind,
            plan.keep.len(),
            plan.delete_count()
        );
        if dry_run && !plan.delete.is_empty() {
            info!("   将删除: {:?}", plan.delete);
        }
        if !plan.cascaded.is_empty() {
            warn!("   ⚠️  级联删除增量备份: {:?}", plan.cascaded);
        }
        if !plan.skipped.is_empty() {
            warn!("   ⏭️  仍有进行中的增量备份，跳过: {:?}", plan.skipped);
        }
    }

    let action = if dry_run { "将删除" } else { "已删除" };
    info!(
        "🧹 {} {} 个备份 (其中级联 {} 个)",
        action, report.deleted, report.cascaded
    );

    if report.errors > 0 {
        bail!("{} 个备份清理失败", report.errors);
    }
    Ok(())
}
