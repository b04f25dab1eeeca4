// 备份产物存储
//
// 存储后端只负责按 key 读写字节，与备份语义无关。
// 不同存储目标（本地目录、S3 兼容对象存储）通过 StorageRegistry 按名称查找。

mod local;
mod s3;

pub use local::LocalStorage;
pub use s3::S3Storage;

use crate::config::{StorageConfig, StorageKind};
use crate::{BackupError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// 存储后端读取流
pub type ArtifactReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    /// 存储目标名称
    fn name(&self) -> &str;

    /// 上传本地文件到 key，返回存储后的字节数
    async fn put(&self, key: &str, source: &Path) -> Result<u64>;

    /// 读取 key 对应的内容
    async fn get(&self, key: &str) -> Result<ArtifactReader>;

    /// 删除 key；不存在时视为成功
    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn size(&self, key: &str) -> Result<u64>;
}

/// 存储目标注册表
#[derive(Debug, Clone, Default)]
pub struct StorageRegistry {
    backends: BTreeMap<String, Arc<dyn StorageBackend>>,
    default: Option<String>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 根据配置创建所有存储目标
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let mut registry = Self::new();
        for destination in &config.destinations {
            let backend: Arc<dyn StorageBackend> = match destination.kind {
                StorageKind::Local => Arc::new(LocalStorage::new(
                    &destination.name,
                    &destination.root,
                    destination.path_prefix.as_deref(),
                )?),
                StorageKind::S3 => Arc::new(S3Storage::from_destination(destination)?),
            };
            registry.register(backend);
        }
        registry.default = Some(config.default.clone());
        Ok(registry)
    }

    pub fn register(&mut self, backend: Arc<dyn StorageBackend>) {
        if self.default.is_none() {
            self.default = Some(backend.name().to_string());
        }
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn StorageBackend>> {
        self.backends.get(name).cloned().ok_or_else(|| {
            BackupError::invalid_config(format!(
                "未知的存储目标: {name} (可用: {})",
                self.names().join(", ")
            ))
        })
    }

    /// 解析存储目标名，未指定时使用默认目标
    pub fn resolve_name(&self, name: Option<&str>) -> Result<String> {
        let name = name
            .or(self.default.as_deref())
            .ok_or_else(|| BackupError::invalid_config("未配置任何存储目标"))?;
        self.get(name)?;
        Ok(name.to_string())
    }

    /// 批量任务开始前检查: 没有任何存储目标时无法继续
    pub fn ensure_available(&self) -> Result<()> {
        if self.is_empty() {
            return Err(BackupError::storage("未配置任何存储目标，无法执行备份"));
        }
        Ok(())
    }
}

/// 校验存储 key，拒绝绝对路径与 `..`
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part == ".." || part.is_empty())
    {
        return Err(BackupError::storage(format!("非法的存储 key: {key}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("backups/2025/01/15/app_2025-01-15_020000.sql.gz").is_ok());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs/path").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("").is_err());
    }

    #[test]
    fn test_registry_resolution() {
        let temp_dir = tempdir().unwrap();
        let mut registry = StorageRegistry::new();
        assert!(registry.ensure_available().is_err());

        registry.register(Arc::new(
            LocalStorage::new("local", temp_dir.path(), None).unwrap(),
        ));
        registry.register(Arc::new(
            LocalStorage::new("offsite", temp_dir.path().join("offsite"), None).unwrap(),
        ));

        assert!(registry.ensure_available().is_ok());
        assert_eq!(registry.resolve_name(None).unwrap(), "local");
        assert_eq!(registry.resolve_name(Some("offsite")).unwrap(), "offsite");

        let err = registry.resolve_name(Some("s3")).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_from_config_builds_each_kind() {
        use crate::config::StorageDestination;

        let temp_dir = tempdir().unwrap();
        let config = StorageConfig {
            default: "offsite".to_string(),
            destinations: vec![
                StorageDestination {
                    name: "local".to_string(),
                    root: temp_dir.path().to_string_lossy().to_string(),
                    ..Default::default()
                },
                StorageDestination {
                    name: "offsite".to_string(),
                    kind: StorageKind::S3,
                    bucket: Some("backups".to_string()),
                    endpoint: Some("http://127.0.0.1:9000".to_string()),
                    access_key: Some("minio".to_string()),
                    secret_key: Some("minio123".to_string()),
                    ..Default::default()
                },
            ],
        };

        let registry = StorageRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["local", "offsite"]);
        assert_eq!(registry.resolve_name(None).unwrap(), "offsite");
    }
}
