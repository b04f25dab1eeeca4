use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("配置错误: {0}")]
    Config(#[from] toml::de::Error),

    #[error("配置无效: {0}")]
    InvalidConfig(String),

    #[error("DuckDB数据库错误: {0}")]
    DuckDb(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("目录遍历错误: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("路径错误: {0}")]
    StripPrefix(#[from] std::path::StripPrefixError),

    #[error("排除规则无效: {0}")]
    Pattern(#[from] regex::Error),

    #[error("未找到已完成的全量备份 (no completed full backup found): 项目 {project}")]
    NoCompletedFullBackup { project: String },

    #[error("基础备份 {base_id} 属于项目 {actual}，与请求项目 {expected} 不一致")]
    BaseProjectMismatch {
        base_id: i64,
        expected: String,
        actual: String,
    },

    #[error("基础备份 {base_id} 不可用: {reason}")]
    BaseUnavailable { base_id: i64, reason: String },

    #[error("增量链深度 {depth} 超过上限 {max}")]
    ChainTooDeep { depth: usize, max: usize },

    #[error("备份记录不存在: {0}")]
    RecordNotFound(i64),

    #[error("备份记录 {id} 状态为 {status}，只能校验或恢复已完成的备份")]
    NotCompleted { id: i64, status: String },

    #[error("远程命令执行失败 (exit code {exit_code}): {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    #[error("远程命令超时 ({seconds} 秒)")]
    Timeout { seconds: u64 },

    #[error("存储操作失败: {0}")]
    Storage(String),

    #[error("备份操作失败: {0}")]
    Backup(String),

    #[error("恢复操作失败: {0}")]
    Restore(String),

    #[error("自定义错误: {0}")]
    Custom(String),

    #[error("配置文件未找到")]
    ConfigNotFound,
}

// 为DuckDB错误实现From trait
impl From<duckdb::Error> for BackupError {
    fn from(err: duckdb::Error) -> Self {
        BackupError::DuckDb(err.to_string())
    }
}

impl BackupError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn backup(msg: impl Into<String>) -> Self {
        Self::Backup(msg.into())
    }

    pub fn restore(msg: impl Into<String>) -> Self {
        Self::Restore(msg.into())
    }

    /// 是否属于配置类错误：这类错误在任何 I/O 之前抛出，不会创建备份记录
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::InvalidConfig(_)
                | Self::Pattern(_)
                | Self::NoCompletedFullBackup { .. }
                | Self::BaseProjectMismatch { .. }
                | Self::BaseUnavailable { .. }
                | Self::ChainTooDeep { .. }
                | Self::ConfigNotFound
        )
    }
}
