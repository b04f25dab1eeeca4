use crate::app::CliApp;
use anyhow::{Result, bail};
use tracing::{error, info};

/// 执行一轮计划调度，适合每分钟由 cron 调用
pub async fn run_scheduler_tick(app: &CliApp) -> Result<()> {
    let report = app.scheduler.tick().await?;

    if report.processed == 0 {
        return Ok(());
    }

    for outcome in &report.outcomes {
        match &outcome.error {
            None => info!(
                "   ✅ 计划 #{} 完成，清理 {} 个旧备份",
                outcome.schedule_id, outcome.pruned
            ),
            Some(e) => error!("   ❌ 计划 #{} 失败: {}", outcome.schedule_id, e),
        }
    }

    info!(
        "📊 本轮 ({}) 处理 {} 个计划: 成功 {}，失败 {}，清理 {} 个备份",
        report.run_id, report.processed, report.succeeded, report.failed, report.pruned
    );

    if report.failed > 0 {
        bail!("{} 个计划执行失败", report.failed);
    }
    Ok(())
}
