use backup_cli::{Cli, CliApp, Commands, run_init, setup_logging};
use backup_core::BackupError;
use clap::Parser;
use tracing::error;

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let cli = Cli::parse();

    // 设置日志记录，guard 需要存活到进程结束
    let _log_guard = setup_logging(cli.verbose);

    // `init` 命令是特例，它不需要预先加载配置
    if let Commands::Init { force } = cli.command {
        if let Err(e) = run_init(force).await {
            error!("❌ 初始化失败: {}", e);
            std::process::exit(1);
        }
        return;
    }

    // 对于其他所有命令，我们需要加载配置并初始化App
    let app = match CliApp::new(cli.config.as_deref()).await {
        Ok(app) => app,
        Err(e) => {
            if let Some(BackupError::ConfigNotFound) = e.downcast_ref::<BackupError>() {
                match &cli.config {
                    Some(path) => error!("❌ 配置文件 '{}' 未找到。", path.display()),
                    None => error!("❌ 未找到配置文件 (config.toml / backup.toml / .backup.toml)。"),
                }
                error!("👉 请先运行 'backup init' 命令来创建配置文件。");
            } else {
                error!("❌ 应用初始化失败: {:#}", e);
            }
            std::process::exit(1);
        }
    };

    // 运行命令
    if let Err(e) = app.run_command(cli.command).await {
        error!("❌ 操作失败: {:#}", e);
        std::process::exit(1);
    }
}
