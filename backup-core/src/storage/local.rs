use super::{ArtifactReader, StorageBackend, validate_key};
use crate::{BackupError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 本地目录存储
///
/// 写入先落到同目录下的 `.partial` 文件，大小校验通过后再原子重命名，
/// 因此读取方永远看不到写了一半的产物。
#[derive(Debug, Clone)]
pub struct LocalStorage {
    name: String,
    root: PathBuf,
}

impl LocalStorage {
    pub fn new<P: AsRef<Path>>(name: &str, root: P, path_prefix: Option<&str>) -> Result<Self> {
        let mut root = root.as_ref().to_path_buf();
        if let Some(prefix) = path_prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
            validate_key(prefix)?;
            root = root.join(prefix);
        }

        Ok(Self {
            name: name.to_string(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, source: &Path) -> Result<u64> {
        let target = self.path_for(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let expected = tokio::fs::metadata(source).await?.len();
        let mut partial = target.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let copied = tokio::fs::copy(source, &partial).await?;
        if copied != expected {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(BackupError::storage(format!(
                "上传后大小不一致: {key} 期望 {expected} 字节，实际 {copied} 字节"
            )));
        }

        tokio::fs::rename(&partial, &target).await?;
        info!(storage = %self.name, key = %key, size = copied, "备份产物已写入存储");
        Ok(copied)
    }

    async fn get(&self, key: &str) -> Result<ArtifactReader> {
        let path = self.path_for(key)?;
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            BackupError::storage(format!("无法读取 {}/{key}: {e}", self.name))
        })?;
        Ok(Box::new(file))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(storage = %self.name, key = %key, "已删除备份产物");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(storage = %self.name, key = %key, "备份产物不存在，跳过删除");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn size(&self, key: &str) -> Result<u64> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::metadata(&path).await?.len())
    }
}
