use anyhow::Result;
use backup_core::{config::AppConfig, constants::config, database::Database};
use std::path::Path;
use tracing::{info, warn};

/// 运行独立的初始化流程
pub async fn run_init(force: bool) -> Result<()> {
    run_init_in(Path::new("."), force).await.map(|_| ())
}

/// 在指定目录下初始化
pub async fn run_init_in(dir: &Path, force: bool) -> Result<bool> {
    info!("🗄️  Backup 初始化");
    info!("======================");

    let config_path = dir.join(config::CONFIG_FILE_NAME);
    let db_path = dir.join(config::DATABASE_FILE_NAME);

    if !force && (config_path.exists() || db_path.exists()) {
        warn!("⚠️  检测到已存在的配置文件或记录库");
        info!("如果您要重新初始化，请使用 --force 参数");
        info!("示例: backup init --force");
        return Ok(false);
    }

    info!("📋 步骤 1: 创建配置文件和存储目录");

    let config = AppConfig::default();
    config.save_to_file(&config_path)?;
    info!("   ✅ 创建配置文件: {}", config_path.display());

    for destination in &config.storage.destinations {
        let root = dir.join(&destination.root);
        std::fs::create_dir_all(&root)?;
        info!("   ✅ 创建存储目录: {} ({})", root.display(), destination.name);
    }

    info!("📋 步骤 2: 初始化记录库");
    Database::connect(&db_path).await?;
    info!("   ✅ 创建DuckDB记录库: {}", db_path.display());

    info!("🎉 初始化完成！");
    info!("");
    info!("📝 接下来的步骤:");
    info!("   1️⃣  编辑 config.toml，添加 [[servers]] 与 [[projects]]");
    info!("   2️⃣  运行 'backup database --project <ID>' 或 'backup files --project <ID>' 创建首个备份");
    info!("   3️⃣  运行 'backup schedule add --project <ID>' 添加备份计划");
    info!("   4️⃣  在 crontab 中每分钟执行一次 'backup run'");

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_creates_config_and_database() {
        let dir = tempdir().unwrap();
        assert!(run_init_in(dir.path(), false).await.unwrap());

        let config_path = dir.path().join(config::CONFIG_FILE_NAME);
        assert!(config_path.exists());
        assert!(dir.path().join(config::DATABASE_FILE_NAME).exists());

        let loaded = AppConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.storage.default, "local");

        // 已初始化时不覆盖
        std::fs::write(&config_path, "# edited").unwrap();
        assert!(!run_init_in(dir.path(), false).await.unwrap());
        assert_eq!(std::fs::read_to_string(&config_path).unwrap(), "# edited");
    }
}
