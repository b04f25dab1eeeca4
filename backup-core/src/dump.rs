//! 数据库导出与恢复策略
//!
//! 每种引擎对应一条 shell 管道命令，导出结果经 gzip 压缩后从 stdout 直接写入本地文件；
//! 恢复时再把压缩文件送入 stdin。管道统一在 `bash -o pipefail` 下执行，
//! 导出工具失败时不会被 gzip 的退出码掩盖。

use crate::config::ServerConfig;
use crate::constants::timeout;
use crate::models::DatabaseEngine;
use crate::remote::{RemoteExecutor, shell_quote};
use crate::{BackupError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// 用 bash 的 pipefail 包装管道，任何一段失败整条命令即失败
pub fn with_pipefail(pipeline: &str) -> String {
    format!("bash -o pipefail -c {}", shell_quote(pipeline))
}

#[async_trait]
pub trait DumpStrategy: Send + Sync + Debug {
    fn engine(&self) -> DatabaseEngine;

    /// 导出工具名，写入备份元数据
    fn method(&self) -> &'static str;

    /// 导出管道 (含 gzip 压缩)
    fn pipeline(&self, database: &str) -> String;

    /// 恢复管道，压缩数据从 stdin 读入
    fn restore_pipeline(&self, database: &str) -> String;

    fn timeout(&self) -> Duration;

    /// 实际执行的导出命令
    fn command(&self, database: &str) -> String {
        with_pipefail(&self.pipeline(database))
    }

    fn restore_command(&self, database: &str) -> String {
        with_pipefail(&self.restore_pipeline(database))
    }

    fn metadata(&self) -> serde_json::Value {
        json!({
            "engine": self.engine().as_str(),
            "method": self.method(),
            "compression": "gzip",
        })
    }

    /// 在目标服务器上执行导出，压缩数据写入 dest，返回字节数
    async fn dump_to_file(
        &self,
        executor: &dyn RemoteExecutor,
        server: &ServerConfig,
        database: &str,
        dest: &Path,
    ) -> Result<u64> {
        let command = self.command(database);
        debug!(server = %server.id, "执行导出命令: {}", command);

        let output = executor
            .run_to_file(server, &command, dest, self.timeout())
            .await?
            .into_result()?;

        let size = tokio::fs::metadata(dest).await?.len();
        if size == 0 {
            return Err(BackupError::backup(format!(
                "{} 导出结果为空: {}",
                self.method(),
                output.stderr.trim()
            )));
        }
        Ok(size)
    }

    /// 把压缩的导出文件恢复到目标数据库
    async fn restore_from_file(
        &self,
        executor: &dyn RemoteExecutor,
        server: &ServerConfig,
        database: &str,
        source: &Path,
    ) -> Result<()> {
        let command = self.restore_command(database);
        debug!(server = %server.id, "执行恢复命令: {}", command);

        executor
            .run_with_input(server, &command, source, self.timeout())
            .await?
            .into_result()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDump;

impl DumpStrategy for MysqlDump {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Mysql
    }

    fn method(&self) -> &'static str {
        "mysqldump"
    }

    fn pipeline(&self, database: &str) -> String {
        format!(
            "mysqldump --single-transaction --quick --lock-tables=false {} | gzip",
            shell_quote(database)
        )
    }

    fn restore_pipeline(&self, database: &str) -> String {
        format!("gunzip | mysql {}", shell_quote(database))
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(timeout::MYSQL_DUMP)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDump;

impl DumpStrategy for PostgresDump {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Postgresql
    }

    fn method(&self) -> &'static str {
        "pg_dump"
    }

    // --clean 让导出可以直接覆盖已有的库
    fn pipeline(&self, database: &str) -> String {
        format!(
            "pg_dump --clean --if-exists {} | gzip",
            shell_quote(database)
        )
    }

    fn restore_pipeline(&self, database: &str) -> String {
        format!(
            "gunzip | psql --quiet --set ON_ERROR_STOP=1 {}",
            shell_quote(database)
        )
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(timeout::POSTGRES_DUMP)
    }
}

/// SQLite 直接复制数据库文件，database 为文件路径
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteCopy;

impl DumpStrategy for SqliteCopy {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Sqlite
    }

    fn method(&self) -> &'static str {
        "copy"
    }

    fn pipeline(&self, database: &str) -> String {
        format!("cat {} | gzip", shell_quote(database))
    }

    /// 先解压到旁边的临时文件，成功后再替换
    fn restore_pipeline(&self, database: &str) -> String {
        let staged = shell_quote(&format!("{database}.restore"));
        let target = shell_quote(database);
        format!("gunzip > {staged} && mv {staged} {target}")
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(timeout::SQLITE_COPY)
    }
}

pub fn strategy_for(engine: DatabaseEngine) -> Box<dyn DumpStrategy> {
    match engine {
        DatabaseEngine::Mysql => Box::new(MysqlDump),
        DatabaseEngine::Postgresql => Box::new(PostgresDump),
        DatabaseEngine::Sqlite => Box::new(SqliteCopy),
    }
}

/// 服务器目录打包
///
/// 目录以 tar.gz 流的形式写到 stdout，读不到的目录只记警告。
#[derive(Debug, Clone)]
pub struct ServerArchive {
    paths: Vec<String>,
}

impl ServerArchive {
    pub fn new(paths: &[String]) -> Result<Self> {
        if paths.is_empty() {
            return Err(BackupError::invalid_config("服务器备份目录不能为空"));
        }
        Ok(Self {
            paths: paths.to_vec(),
        })
    }

    pub fn command(&self) -> String {
        let paths: Vec<String> = self.paths.iter().map(|p| shell_quote(p)).collect();
        format!("tar -czf - --ignore-failed-read {}", paths.join(" "))
    }

    /// 解压到 root；归档内的路径已去掉开头的 `/`，root 为 `/` 时原地覆盖
    pub fn restore_command(root: &str) -> String {
        format!("tar -xzf - --overwrite -C {}", shell_quote(root))
    }

    pub fn timeout() -> Duration {
        Duration::from_secs(timeout::SERVER_ARCHIVE)
    }

    pub fn metadata(&self) -> serde_json::Value {
        json!({
            "method": "tar",
            "compression": "gzip",
            "paths": self.paths,
        })
    }
}
