use super::{ArtifactReader, StorageBackend, validate_key};
use crate::config::StorageDestination;
use crate::{BackupError, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::{Builder, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;
use tracing::{debug, info};

const DEFAULT_REGION: &str = "us-east-1";

/// S3 兼容的对象存储
///
/// 配置了 endpoint 时使用 path-style 访问，兼容阿里云 OSS、MinIO 与 GCS 的互操作接口。
#[derive(Debug, Clone)]
pub struct S3Storage {
    name: String,
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3Storage {
    /// 由存储目标配置创建；未配置密钥时读取 AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY
    pub fn from_destination(destination: &StorageDestination) -> Result<Self> {
        let bucket = destination
            .bucket
            .clone()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| {
                BackupError::invalid_config(format!(
                    "S3 存储目标 {} 缺少 bucket",
                    destination.name
                ))
            })?;

        let access_key = credential(&destination.access_key, "AWS_ACCESS_KEY_ID");
        let secret_key = credential(&destination.secret_key, "AWS_SECRET_ACCESS_KEY");
        let (Some(access_key), Some(secret_key)) = (access_key, secret_key) else {
            return Err(BackupError::invalid_config(format!(
                "S3 存储目标 {} 缺少访问密钥",
                destination.name
            )));
        };

        let credentials = Credentials::new(access_key, secret_key, None, None, "backup-config");
        let region = destination
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let mut builder = Builder::new()
            .region(Region::new(region))
            .credentials_provider(credentials)
            .behavior_version_latest();
        if let Some(endpoint) = &destination.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let prefix = match destination.path_prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(p) if !p.is_empty() => {
                validate_key(p)?;
                Some(p.to_string())
            }
            _ => None,
        };

        Ok(Self {
            name: destination.name.clone(),
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket,
            prefix,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// 存储 key 加上前缀后的对象名
    fn object_key(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        Ok(match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        })
    }

    fn error(&self, action: &str, key: &str, e: impl std::fmt::Display) -> BackupError {
        BackupError::storage(format!("{action} {}/{key} 失败: {e}", self.name))
    }

    /// 对象不存在时返回 None
    async fn content_length(&self, key: &str) -> Result<Option<u64>> {
        let object = self.object_key(key)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&object)
            .send()
            .await
        {
            Ok(head) => Ok(Some(head.content_length().unwrap_or(0).max(0) as u64)),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(None)
                } else {
                    Err(self.error("查询", key, service_error))
                }
            }
        }
    }
}

fn credential(configured: &Option<String>, env: &str) -> Option<String> {
    configured
        .clone()
        .or_else(|| std::env::var(env).ok())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl StorageBackend for S3Storage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, source: &Path) -> Result<u64> {
        let object = self.object_key(key)?;
        let expected = tokio::fs::metadata(source).await?.len();
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| self.error("读取", key, e))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object)
            .body(body)
            .send()
            .await
            .map_err(|e| self.error("上传", key, e.into_service_error()))?;

        let stored = self.content_length(key).await?.unwrap_or(0);
        if stored != expected {
            let _ = self.delete(key).await;
            return Err(BackupError::storage(format!(
                "上传后大小不一致: {key} 期望 {expected} 字节，实际 {stored} 字节"
            )));
        }

        info!(
            storage = %self.name,
            bucket = %self.bucket,
            key = %object,
            size = stored,
            "备份产物已上传到对象存储"
        );
        Ok(stored)
    }

    async fn get(&self, key: &str) -> Result<ArtifactReader> {
        let object = self.object_key(key)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object)
            .send()
            .await
            .map_err(|e| self.error("读取", key, e.into_service_error()))?;
        Ok(Box::new(Box::pin(output.body.into_async_read())))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let object = self.object_key(key)?;
        // 对象不存在时 S3 同样返回成功
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object)
            .send()
            .await
            .map_err(|e| self.error("删除", key, e.into_service_error()))?;
        debug!(storage = %self.name, key = %object, "已删除对象");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.content_length(key).await?.is_some())
    }

    async fn size(&self, key: &str) -> Result<u64> {
        self.content_length(key)
            .await?
            .ok_or_else(|| BackupError::storage(format!("对象不存在: {}/{key}", self.name)))
    }
}
