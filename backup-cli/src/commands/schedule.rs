use crate::app::CliApp;
use crate::cli::{ScheduleAddArgs, ScheduleCommand};
use anyhow::{Context, Result, bail};
use backup_core::{
    config::AppConfig,
    models::{BackupSchedule, BackupTarget, NewSchedule, RetentionPolicy},
    schedule::Recurrence,
};
use chrono::NaiveTime;
use tracing::info;

/// 备份计划管理
pub async fn handle_schedule_command(app: &CliApp, cmd: ScheduleCommand) -> Result<()> {
    match cmd {
        ScheduleCommand::Add(args) => {
            let new = build_new_schedule(&app.config, &args)?;
            let schedule = app.scheduler.create_schedule(&new).await?;
            info!(
                "✅ 已创建计划 #{}: {} {}，下次执行 {}",
                schedule.id,
                owner(&schedule),
                Recurrence::from(&schedule).label(),
                schedule
                    .next_run_at
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_default()
            );
            Ok(())
        }
        ScheduleCommand::List => list_schedules(app).await,
        ScheduleCommand::Remove { id } => {
            if !app.database.delete_schedule(id).await? {
                bail!("计划 #{id} 不存在");
            }
            info!("🗑️  已删除计划 #{}，已有备份保持不变", id);
            Ok(())
        }
        ScheduleCommand::Enable { id } => set_active(app, id, true).await,
        ScheduleCommand::Disable { id } => set_active(app, id, false).await,
    }
}

async fn set_active(app: &CliApp, id: i64, active: bool) -> Result<()> {
    if !app.database.set_schedule_active(id, active).await? {
        bail!("计划 #{id} 不存在");
    }
    info!("计划 #{} 已{}", id, if active { "启用" } else { "停用" });
    Ok(())
}

async fn list_schedules(app: &CliApp) -> Result<()> {
    let schedules = app.database.list_schedules(false).await?;
    if schedules.is_empty() {
        info!("📅 暂无备份计划");
        info!("💡 使用 'backup schedule add --project <ID>' 添加计划");
        return Ok(());
    }

    info!(
        "{:<5} {:<12} {:<12} {:<14} {:<34} {:<14} {:<8} {}",
        "ID", "项目", "类型", "目标", "频率", "保留", "状态", "下次执行"
    );
    info!("{}", "-".repeat(120));
    for schedule in &schedules {
        info!(
            "{:<5} {:<12} {:<12} {:<14} {:<34} {:<14} {:<8} {}",
            schedule.id,
            owner(schedule),
            schedule.target.as_str(),
            schedule.target_name.as_deref().unwrap_or("-"),
            Recurrence::from(schedule).label(),
            schedule.retention.to_string(),
            if schedule.is_active { "启用" } else { "停用" },
            schedule
                .next_run_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}

/// 服务器计划没有项目，显示服务器 ID
fn owner(schedule: &BackupSchedule) -> &str {
    match schedule.target {
        BackupTarget::Server => &schedule.server_id,
        _ => &schedule.project_id,
    }
}

/// 由命令行参数与配置默认值组装新计划
pub fn build_new_schedule(config: &AppConfig, args: &ScheduleAddArgs) -> Result<NewSchedule> {
    let target: BackupTarget = args.target.parse()?;
    let (project_id, server_id) = if target == BackupTarget::Server {
        let Some(server) = &args.server else {
            bail!("服务器计划需要指定 --server");
        };
        (String::new(), config.server(server)?.id.clone())
    } else {
        let Some(project) = &args.project else {
            bail!("请指定 --project");
        };
        let project = config.project(project)?;
        let server = args.server.clone().unwrap_or_else(|| project.server.clone());
        (project.id.clone(), server)
    };
    let time_of_day = NaiveTime::parse_from_str(&args.time, "%H:%M")
        .with_context(|| format!("无效的执行时间: {} (格式 HH:MM)", args.time))?;

    let retention = match args.retention_days {
        Some(days) => RetentionPolicy::Days(days),
        None => RetentionPolicy::Tiered {
            daily: args.daily.unwrap_or(config.retention.daily),
            weekly: args.weekly.unwrap_or(config.retention.weekly),
            monthly: args.monthly.unwrap_or(config.retention.monthly),
        },
    };

    let target_name = match target {
        BackupTarget::Database(_) => args.database.clone(),
        BackupTarget::Files | BackupTarget::Server => None,
    };

    let new = NewSchedule {
        project_id,
        server_id,
        target,
        target_name,
        frequency: args.frequency.parse()?,
        time_of_day,
        day_of_week: args.day_of_week,
        day_of_month: args.day_of_month,
        retention,
        storage: args
            .storage
            .clone()
            .unwrap_or_else(|| config.storage.default.clone()),
        incremental: args.incremental,
    };
    new.validate()?;
    Ok(new)
}
