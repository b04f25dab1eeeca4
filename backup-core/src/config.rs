use crate::constants::{backup, config, retention, scheduler, ssh};
use crate::error::Result;
use crate::models::{DatabaseEngine, RetentionPolicy};
use crate::BackupError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retention: RetentionDefaults,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

/// 记录库配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

/// 存储配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    pub default: String,
    #[serde(default)]
    pub destinations: Vec<StorageDestination>,
}

/// 存储类型
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// 本地目录 (也可以是挂载的远端磁盘)
    #[default]
    Local,
    /// S3 兼容的对象存储
    S3,
}

/// 单个存储目标
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageDestination {
    pub name: String,
    #[serde(default)]
    pub kind: StorageKind,
    /// local: 根目录
    #[serde(default)]
    pub root: String,
    #[serde(default)]
    pub path_prefix: Option<String>,
    /// s3: 存储桶
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// s3: 自定义端点 (OSS / MinIO / GCS 互操作接口)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// s3: 访问密钥，缺省读取 AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

impl StorageDestination {
    fn validate(&self) -> Result<()> {
        match self.kind {
            StorageKind::Local if self.root.trim().is_empty() => Err(BackupError::invalid_config(
                format!("本地存储目标 {} 缺少 root", self.name),
            )),
            StorageKind::S3 if self.bucket.as_deref().is_none_or(|b| b.trim().is_empty()) => {
                Err(BackupError::invalid_config(format!(
                    "S3 存储目标 {} 缺少 bucket",
                    self.name
                )))
            }
            _ => Ok(()),
        }
    }
}

/// 调度器配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub max_parallel: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: scheduler::DEFAULT_MAX_PARALLEL,
        }
    }
}

/// 默认保留策略
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetentionDefaults {
    pub daily: u32,
    pub weekly: u32,
    pub monthly: u32,
}

impl Default for RetentionDefaults {
    fn default() -> Self {
        Self {
            daily: retention::DEFAULT_DAILY,
            weekly: retention::DEFAULT_WEEKLY,
            monthly: retention::DEFAULT_MONTHLY,
        }
    }
}

impl RetentionDefaults {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy::Tiered {
            daily: self.daily,
            weekly: self.weekly,
            monthly: self.monthly,
        }
    }
}

/// 文件备份配置
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct FilesConfig {
    #[serde(default)]
    pub extra_excludes: Vec<String>,
}

/// 服务器连接信息
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub id: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_ssh_user")]
    pub user: String,
    #[serde(default)]
    pub ssh_key: Option<String>,
    /// 服务器备份打包的目录
    #[serde(default = "default_backup_paths")]
    pub backup_paths: Vec<String>,
}

fn default_ssh_port() -> u16 {
    ssh::DEFAULT_PORT
}

fn default_ssh_user() -> String {
    ssh::DEFAULT_USER.to_string()
}

fn default_backup_paths() -> Vec<String> {
    backup::DEFAULT_SERVER_PATHS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            host: ssh::LOCAL_HOSTS[0].to_string(),
            port: default_ssh_port(),
            user: default_ssh_user(),
            ssh_key: None,
            backup_paths: default_backup_paths(),
        }
    }
}

impl ServerConfig {
    /// 目标是否为本机
    pub fn is_local(&self) -> bool {
        ssh::LOCAL_HOSTS.contains(&self.host.as_str())
    }
}

/// 项目配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProjectConfig {
    pub id: String,
    /// 归档文件名使用的短名，缺省时使用 id
    #[serde(default)]
    pub slug: Option<String>,
    pub server: String,
    /// 文件备份的源目录
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub databases: Vec<ProjectDatabase>,
}

impl ProjectConfig {
    pub fn slug(&self) -> &str {
        self.slug.as_deref().unwrap_or(&self.id)
    }
}

/// 项目下的数据库
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProjectDatabase {
    pub name: String,
    pub engine: DatabaseEngine,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: config::get_database_path().to_string_lossy().to_string(),
            },
            storage: StorageConfig {
                default: backup::DEFAULT_DESTINATION.to_string(),
                destinations: vec![StorageDestination {
                    name: backup::DEFAULT_DESTINATION.to_string(),
                    root: backup::get_default_storage_dir()
                        .to_string_lossy()
                        .to_string(),
                    ..Default::default()
                }],
            },
            scheduler: SchedulerConfig::default(),
            retention: RetentionDefaults::default(),
            files: FilesConfig::default(),
            servers: Vec::new(),
            projects: Vec::new(),
        }
    }
}

impl AppConfig {
    /// 智能查找并加载配置文件
    /// 按优先级查找：config.toml -> backup.toml -> .backup.toml
    pub fn find_and_load_config() -> Result<Self> {
        for config_file in config::CONFIG_FILE_CANDIDATES {
            if Path::new(config_file).exists() {
                tracing::info!("找到配置文件: {}", config_file);
                return Self::load_from_file(config_file);
            }
        }

        Err(BackupError::ConfigNotFound)
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::ConfigNotFound);
            }
            Err(e) => return Err(e.into()),
        };
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = if self.servers.is_empty()
            && self.projects.is_empty()
            && self.storage.destinations.len() == 1
        {
            self.to_toml_with_comments()
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| BackupError::custom(format!("序列化配置失败: {e}")))?
        };
        fs::write(&path, content)?;
        Ok(())
    }

    /// 生成带注释的TOML配置
    fn to_toml_with_comments(&self) -> String {
        const TEMPLATE: &str = include_str!("../templates/config.toml.template");

        let root = self
            .storage
            .destinations
            .first()
            .map(|d| d.root.clone())
            .unwrap_or_else(|| backup::DEFAULT_STORAGE_DIR.to_string());

        TEMPLATE
            .replace("{database_path}", &self.database.path)
            .replace("{storage_default}", &self.storage.default)
            .replace("{storage_root}", &root)
            .replace("{max_parallel}", &self.scheduler.max_parallel.to_string())
            .replace("{retention_daily}", &self.retention.daily.to_string())
            .replace("{retention_weekly}", &self.retention.weekly.to_string())
            .replace("{retention_monthly}", &self.retention.monthly.to_string())
    }

    /// 校验引用关系，配置错误在任何 I/O 之前暴露
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for destination in &self.storage.destinations {
            destination.validate()?;
            if !names.insert(destination.name.as_str()) {
                return Err(BackupError::invalid_config(format!(
                    "存储目标重复: {}",
                    destination.name
                )));
            }
        }
        if !self.storage.destinations.is_empty() && !names.contains(self.storage.default.as_str())
        {
            return Err(BackupError::invalid_config(format!(
                "默认存储目标 {} 未在 storage.destinations 中定义",
                self.storage.default
            )));
        }

        let mut servers = HashSet::new();
        for server in &self.servers {
            if !servers.insert(server.id.as_str()) {
                return Err(BackupError::invalid_config(format!(
                    "服务器 id 重复: {}",
                    server.id
                )));
            }
            if server.backup_paths.iter().any(|p| !p.starts_with('/')) {
                return Err(BackupError::invalid_config(format!(
                    "服务器 {} 的 backup_paths 必须是绝对路径",
                    server.id
                )));
            }
        }

        let mut projects = HashSet::new();
        for project in &self.projects {
            if !projects.insert(project.id.as_str()) {
                return Err(BackupError::invalid_config(format!(
                    "项目 id 重复: {}",
                    project.id
                )));
            }
            if !servers.contains(project.server.as_str()) {
                return Err(BackupError::invalid_config(format!(
                    "项目 {} 引用了未定义的服务器 {}",
                    project.id, project.server
                )));
            }
        }

        if self.scheduler.max_parallel == 0 {
            return Err(BackupError::invalid_config("scheduler.max_parallel 必须大于 0"));
        }

        Ok(())
    }

    pub fn server(&self, id: &str) -> Result<&ServerConfig> {
        self.servers
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| BackupError::invalid_config(format!("未知的服务器: {id}")))
    }

    pub fn project(&self, id: &str) -> Result<&ProjectConfig> {
        self.projects
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| BackupError::invalid_config(format!("未知的项目: {id}")))
    }

    /// 获取记录库路径
    pub fn get_database_path(&self) -> PathBuf {
        PathBuf::from(&self.database.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[database]
path = "backup.db"

[storage]
default = "local"

[[storage.destinations]]
name = "local"
root = "./backups"

[[storage.destinations]]
name = "offsite"
root = "/mnt/offsite"
path_prefix = "shop"

[[storage.destinations]]
name = "s3"
kind = "s3"
bucket = "shop-backups"
region = "oss-cn-hangzhou"
endpoint = "https://oss-cn-hangzhou.aliyuncs.com"

[[servers]]
id = "web-1"
host = "10.0.0.5"
user = "deploy"

[[projects]]
id = "shop"
server = "web-1"
source_path = "/var/www/shop"
excludes = ["public/uploads/tmp/*"]
databases = [{ name = "shop", engine = "mysql" }]
"#;

    #[test]
    fn test_default_config_roundtrip() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");

        let config = AppConfig::default();
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.storage.default, "local");
        assert_eq!(loaded.storage.destinations.len(), 1);
        assert_eq!(loaded.retention.daily, retention::DEFAULT_DAILY);
        assert_eq!(loaded.scheduler.max_parallel, 1);
        assert!(loaded.servers.is_empty());
    }

    #[test]
    fn test_parse_sample() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        let server = config.server("web-1").unwrap();
        assert_eq!(server.port, 22);
        assert!(!server.is_local());
        assert_eq!(server.backup_paths, vec!["/etc", "/var/www", "/opt", "/home"]);

        let s3 = &config.storage.destinations[2];
        assert_eq!(s3.kind, StorageKind::S3);
        assert_eq!(s3.bucket.as_deref(), Some("shop-backups"));
        assert_eq!(config.storage.destinations[0].kind, StorageKind::Local);

        let project = config.project("shop").unwrap();
        assert_eq!(project.slug(), "shop");
        assert_eq!(project.databases[0].engine, DatabaseEngine::Mysql);
        assert!(config.project("blog").is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_server() {
        let mut config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.projects[0].server = "db-9".to_string();
        assert!(config.validate().unwrap_err().is_configuration_error());
    }

    #[test]
    fn test_validate_storage_destinations() {
        let mut config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.storage.destinations[2].bucket = None;
        assert!(config.validate().unwrap_err().is_configuration_error());

        let mut config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.storage.destinations[0].root = String::new();
        assert!(config.validate().is_err());

        let mut config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.servers[0].backup_paths = vec!["etc".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_config_not_found() {
        let temp_dir = tempdir().unwrap();
        let result = AppConfig::load_from_file(temp_dir.path().join("nope.toml"));
        assert!(matches!(result, Err(BackupError::ConfigNotFound)));
    }
}
