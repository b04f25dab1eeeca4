/// 备份相关常量
pub mod backup {
    use std::path::PathBuf;

    /// 默认本地存储目录
    pub const DEFAULT_STORAGE_DIR: &str = "./backups";

    /// 默认存储目标名称
    pub const DEFAULT_DESTINATION: &str = "local";

    /// 数据库备份在存储中的根前缀 (backups/Y/m/d/)
    pub const DATABASE_KEY_PREFIX: &str = "backups";

    /// 文件备份在存储中的根前缀 (file-backups/Y/m/d/)
    pub const FILES_KEY_PREFIX: &str = "file-backups";

    /// 服务器备份在存储中的根前缀 (server-backups/<server>/Y/m/d/)
    pub const SERVER_KEY_PREFIX: &str = "server-backups";

    /// 服务器备份默认打包的目录
    pub const DEFAULT_SERVER_PATHS: &[&str] = &["/etc", "/var/www", "/opt", "/home"];

    /// 归档文件名中的时间戳格式
    pub const FILENAME_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

    /// 增量链最大深度
    pub const MAX_CHAIN_DEPTH: usize = 100;

    /// gzip 压缩级别
    pub const COMPRESSION_LEVEL: u32 = 6;

    /// 哈希计算时的读取缓冲区大小
    pub const HASH_BUFFER_SIZE: usize = 8192;

    /// 文件备份默认排除规则
    pub const DEFAULT_EXCLUDES: &[&str] = &[
        "storage/logs/*",
        "storage/framework/cache/*",
        "storage/framework/sessions/*",
        "storage/framework/views/*",
        "node_modules/*",
        "vendor/*",
        ".git/*",
        "*.log",
        ".env",
        ".env.*",
    ];

    /// 获取默认存储目录
    pub fn get_default_storage_dir() -> PathBuf {
        PathBuf::from(DEFAULT_STORAGE_DIR)
    }
}

/// 保留策略默认值
pub mod retention {
    /// 按天保留的份数
    pub const DEFAULT_DAILY: u32 = 7;

    /// 按 ISO 周保留的份数
    pub const DEFAULT_WEEKLY: u32 = 4;

    /// 按月保留的份数
    pub const DEFAULT_MONTHLY: u32 = 3;
}

/// 超时相关常量（秒）
pub mod timeout {
    /// mysqldump 超时
    pub const MYSQL_DUMP: u64 = 3600;

    /// pg_dump 超时
    pub const POSTGRES_DUMP: u64 = 3600;

    /// sqlite 文件复制超时
    pub const SQLITE_COPY: u64 = 600;

    /// 服务器目录打包超时
    pub const SERVER_ARCHIVE: u64 = 3600;

    /// 恢复前的准备命令 (如 dropdb / createdb) 超时
    pub const RESTORE_PREPARE: u64 = 300;

    /// SSH 连接超时
    pub const SSH_CONNECT: u64 = 10;
}

/// SSH 连接默认值
pub mod ssh {
    pub const DEFAULT_PORT: u16 = 22;
    pub const DEFAULT_USER: &str = "root";

    /// 视为本机的主机名
    pub const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1"];
}

/// 调度器相关常量
pub mod scheduler {
    /// 默认并行执行的计划数量（1 = 顺序执行）
    pub const DEFAULT_MAX_PARALLEL: usize = 1;
}

/// 配置文件相关常量
pub mod config {
    use std::path::{Path, PathBuf};

    /// 配置文件名
    pub const CONFIG_FILE_NAME: &str = "config.toml";

    /// 配置文件查找顺序
    pub const CONFIG_FILE_CANDIDATES: &[&str] = &["config.toml", "backup.toml", ".backup.toml"];

    /// 数据库文件名
    pub const DATABASE_FILE_NAME: &str = "backup.db";

    /// 获取默认数据库文件路径
    pub fn get_database_path() -> PathBuf {
        Path::new(".").join(DATABASE_FILE_NAME)
    }
}

/// 日志相关常量
pub mod logging {
    /// 设置后日志写入该文件
    pub const LOG_FILE_ENV: &str = "BACKUP_LOG_FILE";
}
