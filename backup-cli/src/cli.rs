use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// 备份计划管理命令
#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// 新增备份计划
    Add(ScheduleAddArgs),
    /// 列出所有备份计划
    List,
    /// 删除备份计划
    Remove {
        /// 计划 ID
        id: i64,
    },
    /// 启用备份计划
    Enable {
        /// 计划 ID
        id: i64,
    },
    /// 停用备份计划
    Disable {
        /// 计划 ID
        id: i64,
    },
}

#[derive(Args, Debug)]
pub struct ScheduleAddArgs {
    /// 项目 ID（服务器计划不需要）
    #[arg(long)]
    pub project: Option<String>,

    /// 服务器 ID，缺省使用项目配置的服务器；服务器计划必填
    #[arg(long)]
    pub server: Option<String>,

    /// 备份类型: mysql / postgresql / sqlite / files / server
    #[arg(long = "type", default_value = "files")]
    pub target: String,

    /// 数据库名（数据库计划必填）
    #[arg(long)]
    pub database: Option<String>,

    /// 执行频率: hourly / daily / weekly / monthly
    #[arg(long, default_value = "daily")]
    pub frequency: String,

    /// 执行时间 HH:MM (UTC)
    #[arg(long, default_value = "02:00")]
    pub time: String,

    /// 星期几，0 = 周日（weekly 计划）
    #[arg(long)]
    pub day_of_week: Option<u32>,

    /// 每月几号，短月取最后一天（monthly 计划）
    #[arg(long)]
    pub day_of_month: Option<u32>,

    /// 按天数保留；设置后忽略分层保留参数
    #[arg(long)]
    pub retention_days: Option<u32>,

    /// 按天保留的份数，缺省使用配置中的默认值
    #[arg(long)]
    pub daily: Option<u32>,

    /// 按周保留的份数
    #[arg(long)]
    pub weekly: Option<u32>,

    /// 按月保留的份数
    #[arg(long)]
    pub monthly: Option<u32>,

    /// 存储目标，缺省使用默认存储
    #[arg(long)]
    pub storage: Option<String>,

    /// 文件计划是否执行增量备份
    #[arg(long)]
    pub incremental: bool,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// 备份 ID
    #[arg(long)]
    pub backup: i64,

    /// 备份种类: files / database / server
    #[arg(long = "type", default_value = "files")]
    pub kind: String,

    /// 恢复目标目录；文件备份必填，服务器备份缺省为 /
    #[arg(long)]
    pub target: Option<PathBuf>,

    /// 目标目录非空时清空后覆盖（文件备份）
    #[arg(long)]
    pub force: bool,

    /// 恢复到另一台服务器（数据库备份）
    #[arg(long)]
    pub server: Option<String>,

    /// 恢复到另一个数据库（数据库备份）
    #[arg(long)]
    pub database: Option<String>,
}

/// Backup CLI - 数据库与文件备份调度工具
#[derive(Parser)]
#[command(name = "backup")]
#[command(about = "数据库与文件备份调度、校验和保留清理工具")]
#[command(version)]
pub struct Cli {
    /// 配置文件路径，缺省时依次查找 config.toml / backup.toml / .backup.toml
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 创建配置文件和记录库
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 备份项目数据库
    Database {
        /// 项目 ID，缺省备份所有项目
        #[arg(long)]
        project: Option<String>,
        /// 触发方式: manual / scheduled / pre_deploy
        #[arg(long = "type", default_value = "manual")]
        trigger: String,
        /// 只备份指定的数据库
        #[arg(long)]
        database: Option<String>,
    },
    /// 备份项目文件
    Files {
        /// 项目 ID
        #[arg(long, conflicts_with = "all")]
        project: Option<String>,
        /// 备份所有配置了源目录的项目
        #[arg(long)]
        all: bool,
        /// 备份类型: full / incremental
        #[arg(long = "type", default_value = "full")]
        kind: String,
        /// 增量备份的基础备份 ID，缺省使用最近的全量备份
        #[arg(long)]
        base_backup: Option<i64>,
        /// 存储目标
        #[arg(long)]
        storage: Option<String>,
    },
    /// 打包服务器目录
    Server {
        /// 服务器 ID
        #[arg(long, conflicts_with = "all")]
        server: Option<String>,
        /// 备份所有服务器
        #[arg(long)]
        all: bool,
        /// 存储目标
        #[arg(long)]
        storage: Option<String>,
    },
    /// 按保留策略清理旧备份
    Cleanup {
        /// 只清理指定项目
        #[arg(long)]
        project: Option<String>,
        /// 只显示将要删除的备份
        #[arg(long)]
        dry_run: bool,
    },
    /// 校验备份完整性
    Verify {
        /// 校验单个备份
        #[arg(long, conflicts_with_all = ["all", "project"])]
        backup: Option<i64>,
        /// 与 --backup 一起使用: database / files / server
        #[arg(long = "type", requires = "backup", default_value = "database")]
        kind: String,
        /// 校验所有未校验过的备份
        #[arg(long, conflicts_with = "project")]
        all: bool,
        /// 校验指定项目的全部备份
        #[arg(long)]
        project: Option<String>,
    },
    /// 执行一轮计划调度
    Run,
    /// 列出备份记录
    List {
        /// 只显示指定项目
        #[arg(long)]
        project: Option<String>,
    },
    /// 备份计划管理
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    /// 从备份恢复
    Restore(RestoreArgs),
}
