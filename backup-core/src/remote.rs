//! 远程命令执行
//!
//! 数据库导出工具通过 SSH 在目标服务器上执行；目标为本机时直接用 `sh -c`。
//! 导出与恢复的数据量可能很大，stdout / stdin 直接与本地文件对接，不经过内存。

use crate::config::ServerConfig;
use crate::constants::timeout;
use crate::{BackupError, Result};
use async_trait::async_trait;
use std::fmt::Debug;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

/// 命令执行结果
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// 非零退出码转换为错误
    pub fn into_result(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(BackupError::CommandFailed {
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

impl CommandOutput {
    fn from_parts(status: ExitStatus, stdout: Vec<u8>, stderr: &[u8]) -> Self {
        Self {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr: String::from_utf8_lossy(stderr).to_string(),
        }
    }
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync + Debug {
    /// 在服务器上执行命令，超时视为失败
    async fn run(
        &self,
        server: &ServerConfig,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput>;

    /// 执行命令并把 stdout 写入本地文件，返回值中 stdout 为空
    ///
    /// 默认实现先收集完整输出再落盘，只适合输出很小的执行器。
    async fn run_to_file(
        &self,
        server: &ServerConfig,
        command: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let mut output = self.run(server, command, timeout).await?;
        tokio::fs::write(dest, std::mem::take(&mut output.stdout)).await?;
        Ok(output)
    }

    /// 执行命令，stdin 从本地文件读取
    async fn run_with_input(
        &self,
        server: &ServerConfig,
        command: &str,
        input: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput>;
}

/// 基于系统 `ssh` 命令的执行器
#[derive(Debug, Clone)]
pub struct SshExecutor {
    connect_timeout: u64,
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self {
            connect_timeout: timeout::SSH_CONNECT,
        }
    }
}

impl SshExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 检查 ssh 命令是否可用
    pub fn check_prerequisites(&self) -> Result<()> {
        if which::which("ssh").is_err() {
            return Err(BackupError::invalid_config("ssh 未安装或不在 PATH 中"));
        }
        Ok(())
    }

    /// 构造 ssh 参数
    pub fn ssh_args(&self, server: &ServerConfig, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            server.port.to_string(),
        ];

        if let Some(key) = &server.ssh_key {
            args.push("-i".to_string());
            args.push(key.clone());
        }

        args.push(format!("{}@{}", server.user, server.host));
        args.push(command.to_string());
        args
    }

    fn build_command(&self, server: &ServerConfig, command: &str) -> Command {
        let mut cmd = if server.is_local() {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        } else {
            let mut cmd = Command::new("ssh");
            cmd.args(self.ssh_args(server, command));
            cmd
        };

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn timed_out(timeout: Duration) -> BackupError {
    BackupError::Timeout {
        seconds: timeout.as_secs(),
    }
}

fn missing_pipe(name: &str) -> BackupError {
    BackupError::custom(format!("无法获取子进程的 {name}"))
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(
        &self,
        server: &ServerConfig,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        debug!(server = %server.id, command = %command, "执行远程命令");

        let output = tokio::time::timeout(timeout, self.build_command(server, command).output())
            .await
            .map_err(|_| timed_out(timeout))??;

        Ok(CommandOutput::from_parts(
            output.status,
            output.stdout,
            &output.stderr,
        ))
    }

    async fn run_to_file(
        &self,
        server: &ServerConfig,
        command: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        debug!(
            server = %server.id,
            command = %command,
            dest = %dest.display(),
            "执行远程命令 (输出到文件)"
        );

        // 超时后 child 随 future 一起 drop，kill_on_drop 负责结束进程
        let mut child = self.build_command(server, command).spawn()?;
        let mut stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let mut stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let work = async {
            let mut file = tokio::fs::File::create(dest).await?;
            let mut errors = Vec::new();
            tokio::try_join!(
                tokio::io::copy(&mut stdout, &mut file),
                stderr.read_to_end(&mut errors)
            )?;
            file.flush().await?;
            let status = child.wait().await?;
            Ok::<_, BackupError>(CommandOutput::from_parts(status, Vec::new(), &errors))
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| timed_out(timeout))?
    }

    async fn run_with_input(
        &self,
        server: &ServerConfig,
        command: &str,
        input: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        debug!(
            server = %server.id,
            command = %command,
            input = %input.display(),
            "执行远程命令 (从文件读取输入)"
        );

        let mut source = tokio::fs::File::open(input).await?;
        let mut cmd = self.build_command(server, command);
        cmd.stdin(Stdio::piped());
        let mut child = cmd.spawn()?;
        let mut stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;

        let feed = async move {
            tokio::io::copy(&mut source, &mut stdin).await?;
            stdin.shutdown().await
        };

        let work = async {
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            let output = output?;
            // 命令提前退出时写入端会收到 EPIPE，以退出码为准
            if output.status.success() {
                fed?;
            }
            Ok::<_, BackupError>(CommandOutput::from_parts(
                output.status,
                output.stdout,
                &output.stderr,
            ))
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| timed_out(timeout))?
    }
}

/// 单引号转义，等价于 shell 的 escapeshellarg
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
