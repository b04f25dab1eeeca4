use backup_core::constants::logging::LOG_FILE_ENV;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

/// # 日志配置
///
/// 库代码只使用 `tracing` 宏，日志订阅者在 `main.rs` 中通过 `setup_logging()` 安装。
///
/// - `-v, --verbose`：启用 DEBUG 级别
/// - `RUST_LOG`：标准的日志级别控制，优先于 `-v`
/// - `BACKUP_LOG_FILE`：设置后日志写入该文件而非终端
///
/// ```bash
/// BACKUP_LOG_FILE=/var/log/backup.log backup run
/// RUST_LOG=backup_core::retention=debug backup cleanup --dry-run
/// ```
///
/// 返回的 guard 需要在 `main` 中保持存活，否则文件日志会在退出前丢失。
pub fn setup_logging(verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Ok(log_file) = std::env::var(LOG_FILE_ENV) {
        let path = Path::new(&log_file);
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "backup.log".into());

        // 文件输出使用详细格式便于排查
        let appender = tracing_appender::rolling::never(directory, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        fmt()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .init();
        Some(guard)
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_names(false)
            .with_line_number(false)
            .without_time()
            .compact()
            .init();
        None
    }
}

/// 人类可读的大小
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let size = bytes as f64;
    if size >= GB {
        format!("{:.1}GB", size / GB)
    } else if size >= MB {
        format!("{:.1}MB", size / MB)
    } else if size >= KB {
        format!("{:.1}KB", size / KB)
    } else {
        format!("{bytes}B")
    }
}
