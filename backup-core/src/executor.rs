use crate::{BackupError, Result};
use futures::future::BoxFuture;
use std::fmt;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// 一次外部命令调用
#[derive(Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
}

impl CommandInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    /// 用于日志的命令行，不包含环境变量与标准输入
    pub fn display_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

// 环境变量可能包含密码，调试输出中只保留变量名
impl fmt::Debug for CommandInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("CommandInvocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env_keys)
            .field("stdin_bytes", &self.stdin.as_ref().map(Vec::len))
            .finish()
    }
}

/// 命令执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// 失败时的描述：优先使用标准错误输出，否则使用退出码
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr_text();
        if !stderr.is_empty() {
            return stderr;
        }
        match self.code {
            Some(code) => format!("退出码 {code}"),
            None => "进程被信号终止".to_string(),
        }
    }
}

/// 外部命令执行器
pub trait CommandExecutor: Send + Sync + fmt::Debug {
    fn run<'a>(&'a self, invocation: &'a CommandInvocation) -> BoxFuture<'a, Result<CommandOutput>>;
}

/// 通过 tokio 子进程执行命令
#[derive(Debug, Clone, Default)]
pub struct SystemCommandExecutor;

impl SystemCommandExecutor {
    async fn execute(invocation: &CommandInvocation) -> Result<CommandOutput> {
        if which::which(&invocation.program).is_err() {
            return Err(BackupError::ToolNotFound(invocation.program.clone()));
        }

        tracing::debug!("执行外部命令: {}", invocation.display_line());

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pipe = child.stdin.take();
        // 写标准输入与读取输出并发进行，避免管道写满后互相等待
        let feed = async {
            if let (Some(mut pipe), Some(input)) = (pipe, invocation.stdin.as_deref()) {
                pipe.write_all(input).await?;
                pipe.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        if let Err(e) = fed {
            // 子进程提前退出时写入会失败，退出状态更能说明问题
            if output.status.success() {
                return Err(e.into());
            }
            tracing::debug!("写入标准输入失败: {}", e);
        }

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

impl CommandExecutor for SystemCommandExecutor {
    fn run<'a>(&'a self, invocation: &'a CommandInvocation) -> BoxFuture<'a, Result<CommandOutput>> {
        Box::pin(Self::execute(invocation))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_debug_hides_env_values() {
        let invocation = CommandInvocation::new("mysqldump")
            .args(["--databases", "lopic"])
            .env("MYSQL_PWD", "s3cret");
        let debug = format!("{invocation:?}");
        assert!(debug.contains("MYSQL_PWD"));
        assert!(!debug.contains("s3cret"));
        assert_eq!(invocation.display_line(), "mysqldump --databases lopic");
    }

    #[test]
    fn test_failure_message_prefers_stderr() {
        let output = CommandOutput {
            success: false,
            code: Some(2),
            stdout: Vec::new(),
            stderr: b"  Access denied\n".to_vec(),
        };
        assert_eq!(output.failure_message(), "Access denied");

        let output = CommandOutput {
            stderr: Vec::new(),
            ..output
        };
        assert_eq!(output.failure_message(), "退出码 2");
    }

    #[tokio::test]
    async fn test_missing_program_reported() {
        let executor = SystemCommandExecutor;
        let invocation = CommandInvocation::new("lopic-definitely-not-installed");
        let err = executor.run(&invocation).await.unwrap_err();
        assert!(matches!(err, BackupError::ToolNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_executor_pipes_stdin() {
        if which::which("cat").is_err() {
            return;
        }
        let executor = SystemCommandExecutor;
        let invocation = CommandInvocation::new("cat").stdin(b"hello".to_vec());
        let output = executor.run(&invocation).await.unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, b"hello");
    }
}
