use crate::app::CliApp;
use anyhow::{Result, bail};
use backup_core::{
    models::RecordKind,
    verify::{VerifyScope, VerifySummary},
};
use tracing::{error, info};

/// 校验备份完整性
pub async fn run_verify(
    app: &CliApp,
    backup: Option<i64>,
    kind: &str,
    all: bool,
    project: Option<&str>,
) -> Result<()> {
    if let Some(id) = backup {
        let kind: RecordKind = kind.parse()?;

        if app.verifier.verify(kind, id).await? {
            info!("✅ 备份 #{} 校验通过", id);
            return Ok(());
        }
        error!("❌ 备份 #{} 校验失败: 产物缺失或校验和不一致", id);
        bail!("备份 #{id} 校验失败");
    }

    let scope = match (all, project) {
        (true, _) => VerifyScope::Unverified,
        (false, Some(id)) => {
            app.config.project(id)?;
            VerifyScope::Project(id.to_string())
        }
        (false, None) => bail!("请指定 --backup、--all 或 --project"),
    };

    info!("🔍 开始批量校验...");
    let summary = app.verifier.verify_batch(&scope).await?;
    report(&summary)
}

fn report(summary: &VerifySummary) -> Result<()> {
    if summary.total() == 0 {
        info!("没有需要校验的备份");
        return Ok(());
    }

    info!("📊 校验结果:");
    info!("   通过: {} ✅", summary.passed);
    if summary.failed > 0 {
        error!("   失败: {} ❌", summary.failed);
    }
    if summary.errors > 0 {
        error!("   出错: {}", summary.errors);
    }

    if !summary.all_passed() {
        bail!("{} 个备份未通过校验", summary.failed + summary.errors);
    }
    Ok(())
}
