use crate::config::DatabaseConfig;
use crate::constants::{mysql, tables};
use crate::executor::{CommandExecutor, CommandInvocation};
use crate::{BackupError, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// MySQL 连接与工具参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub dump_command: String,
    pub restore_command: String,
    pub extra_dump_args: Vec<String>,
}

impl From<&DatabaseConfig> for MysqlSettings {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            password: config.password.clone(),
            dbname: config.dbname.clone(),
            dump_command: config.dump_command.clone(),
            restore_command: config.restore_command.clone(),
            extra_dump_args: config.extra_dump_args.clone(),
        }
    }
}

/// MySQL 方言的导出/导入器，调用外部 mysqldump / mysql
#[derive(Debug, Clone)]
pub struct MysqlDumper {
    settings: MysqlSettings,
    executor: Arc<dyn CommandExecutor>,
}

impl MysqlDumper {
    pub fn new(settings: MysqlSettings, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { settings, executor }
    }

    fn connection_args(&self) -> Vec<String> {
        vec![
            format!("--host={}", self.settings.host),
            format!("--port={}", self.settings.port),
            format!("--user={}", self.settings.user),
        ]
    }

    fn with_password(&self, invocation: CommandInvocation) -> CommandInvocation {
        if self.settings.password.is_empty() {
            invocation
        } else {
            invocation.env(mysql::PASSWORD_ENV, self.settings.password.clone())
        }
    }

    /// 导出命令：单事务一致性快照，包含存储过程、触发器、事件，排除任务表
    pub fn dump_invocation(&self) -> CommandInvocation {
        let db = &self.settings.dbname;
        let invocation = CommandInvocation::new(&self.settings.dump_command)
            .args(self.connection_args())
            .args([
                "--databases".to_string(),
                db.clone(),
                "--single-transaction".to_string(),
                "--routines".to_string(),
                "--triggers".to_string(),
                "--events".to_string(),
                format!("--ignore-table={db}.{}", tables::BACKUP_TASKS),
                format!("--ignore-table={db}.{}", tables::RESTORE_TASKS),
            ])
            .args(self.settings.extra_dump_args.iter().cloned());
        self.with_password(invocation)
    }

    /// 恢复命令：SQL 通过标准输入传入
    pub fn restore_invocation(&self, sql: Vec<u8>) -> CommandInvocation {
        let invocation = CommandInvocation::new(&self.settings.restore_command)
            .args(self.connection_args())
            .arg(&self.settings.dbname)
            .stdin(sql);
        self.with_password(invocation)
    }

    /// 执行 mysqldump，返回标准输出中的 SQL
    ///
    /// 只有非零退出码才视为失败，错误信息取自 stderr；
    /// 退出码为 0 时 stderr 上的内容（如版本兼容提示）只记录为警告。
    pub async fn export(&self) -> Result<Vec<u8>> {
        let invocation = self.dump_invocation();
        info!("开始导出 MySQL 数据库: {}", self.settings.dbname);

        let output = self.executor.run(&invocation).await?;
        if !output.success {
            return Err(BackupError::dump_tool(output.failure_message()));
        }

        let stderr = output.stderr_text();
        if !stderr.is_empty() {
            warn!("{} 输出警告: {}", self.settings.dump_command, stderr);
        }

        info!("MySQL 导出完成 ({} 字节)", output.stdout.len());
        Ok(output.stdout)
    }

    /// 通过 mysql 客户端回放 SQL
    ///
    /// 失败判定与 `export` 相同：只看退出码，成功时的 stderr 只记录为警告。
    pub async fn import(&self, sql: Vec<u8>) -> Result<()> {
        let invocation = self.restore_invocation(sql);
        info!("开始恢复 MySQL 数据库: {}", self.settings.dbname);

        let output = self.executor.run(&invocation).await?;
        if !output.success {
            return Err(BackupError::restore_tool(output.failure_message()));
        }

        let stderr = output.stderr_text();
        if !stderr.is_empty() {
            warn!("{} 输出警告: {}", self.settings.restore_command, stderr);
        }

        info!("MySQL 数据恢复完成");
        Ok(())
    }
}
