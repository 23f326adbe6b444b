use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::thread;
use tokio::sync::{mpsc, oneshot};

use super::actor::TaskDbActor;
use super::messages::DbMessage;
use super::models::{BackupTask, RestoreRecord, RestoreTask, StaleTaskReport};

const CHANNEL_CAPACITY: usize = 100;

/// 任务库管理器
#[derive(Debug, Clone)]
pub struct TaskDbManager {
    sender: mpsc::Sender<DbMessage>,
}

impl TaskDbManager {
    /// 打开指定路径的任务库并初始化任务表
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        // 确保数据库文件的父目录存在
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let actor = TaskDbActor::new(db_path)?;
        Self::start(actor).await
    }

    /// 创建内存任务库
    pub async fn new_memory() -> Result<Self> {
        let actor = TaskDbActor::new_memory()?;
        Self::start(actor).await
    }

    async fn start(actor: TaskDbActor) -> Result<Self> {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);

        thread::Builder::new()
            .name("task-db-actor".to_string())
            .spawn(move || actor.run(receiver))?;

        let manager = Self { sender };
        manager.init_tables().await?;

        Ok(manager)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> DbMessage,
    ) -> Result<T> {
        let (respond_to, receiver) = oneshot::channel();

        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| BackupError::custom("任务库Actor已关闭"))?;

        receiver
            .await
            .map_err(|_| BackupError::custom("等待任务库响应超时"))?
    }

    async fn init_tables(&self) -> Result<()> {
        self.request(|respond_to| DbMessage::InitTables { respond_to })
            .await
    }

    // ========== 备份任务 ==========

    /// 创建 pending 状态的备份任务
    pub async fn create_backup_task(&self, start_time: DateTime<Utc>) -> Result<BackupTask> {
        self.request(|respond_to| DbMessage::CreateBackupTask {
            start_time,
            respond_to,
        })
        .await
    }

    pub async fn get_backup_task(&self, id: i64) -> Result<Option<BackupTask>> {
        self.request(|respond_to| DbMessage::GetBackupTask { id, respond_to })
            .await
    }

    /// 全部备份任务，按创建时间倒序
    pub async fn list_backup_tasks(&self) -> Result<Vec<BackupTask>> {
        self.request(|respond_to| DbMessage::ListBackupTasks { respond_to })
            .await
    }

    pub async fn mark_backup_running(&self, id: i64) -> Result<bool> {
        self.request(|respond_to| DbMessage::MarkBackupRunning { id, respond_to })
            .await
    }

    pub async fn complete_backup_task(
        &self,
        id: i64,
        size: u64,
        storage_path: String,
        end_time: DateTime<Utc>,
    ) -> Result<bool> {
        self.request(|respond_to| DbMessage::CompleteBackupTask {
            id,
            size,
            storage_path,
            end_time,
            respond_to,
        })
        .await
    }

    pub async fn fail_backup_task(
        &self,
        id: i64,
        error: String,
        end_time: DateTime<Utc>,
    ) -> Result<bool> {
        self.request(|respond_to| DbMessage::FailBackupTask {
            id,
            error,
            end_time,
            respond_to,
        })
        .await
    }

    pub async fn delete_backup_task(&self, id: i64) -> Result<bool> {
        self.request(|respond_to| DbMessage::DeleteBackupTask { id, respond_to })
            .await
    }

    // ========== 恢复任务 ==========

    /// 创建 pending 状态的恢复任务
    pub async fn create_restore_task(
        &self,
        backup_task_id: i64,
        start_time: DateTime<Utc>,
    ) -> Result<RestoreTask> {
        self.request(|respond_to| DbMessage::CreateRestoreTask {
            backup_task_id,
            start_time,
            respond_to,
        })
        .await
    }

    pub async fn get_restore_task(&self, id: i64) -> Result<Option<RestoreTask>> {
        self.request(|respond_to| DbMessage::GetRestoreTask { id, respond_to })
            .await
    }

    /// 全部恢复记录（附带引用的备份任务），按创建时间倒序
    pub async fn list_restore_records(&self) -> Result<Vec<RestoreRecord>> {
        self.request(|respond_to| DbMessage::ListRestoreRecords { respond_to })
            .await
    }

    pub async fn mark_restore_running(&self, id: i64) -> Result<bool> {
        self.request(|respond_to| DbMessage::MarkRestoreRunning { id, respond_to })
            .await
    }

    pub async fn complete_restore_task(&self, id: i64, end_time: DateTime<Utc>) -> Result<bool> {
        self.request(|respond_to| DbMessage::CompleteRestoreTask {
            id,
            end_time,
            respond_to,
        })
        .await
    }

    pub async fn fail_restore_task(
        &self,
        id: i64,
        error: String,
        end_time: DateTime<Utc>,
    ) -> Result<bool> {
        self.request(|respond_to| DbMessage::FailRestoreTask {
            id,
            error,
            end_time,
            respond_to,
        })
        .await
    }

    pub async fn delete_restore_task(&self, id: i64) -> Result<bool> {
        self.request(|respond_to| DbMessage::DeleteRestoreTask { id, respond_to })
            .await
    }

    pub async fn delete_restore_tasks_for_backup(&self, backup_task_id: i64) -> Result<usize> {
        self.request(|respond_to| DbMessage::DeleteRestoreTasksForBackup {
            backup_task_id,
            respond_to,
        })
        .await
    }

    // ========== 维护 ==========

    /// 将 cutoff 之前开始、仍处于 pending/running 的任务标记为失败
    pub async fn fail_stale_tasks(
        &self,
        cutoff: DateTime<Utc>,
        error: String,
    ) -> Result<StaleTaskReport> {
        self.request(|respond_to| DbMessage::FailStaleTasks {
            cutoff,
            error,
            respond_to,
        })
        .await
    }

    // ========== SQLite 应用数据 ==========

    /// 在同一连接上导出白名单中的应用表
    pub async fn export_tables(&self, tables: Vec<String>) -> Result<String> {
        self.request(|respond_to| DbMessage::ExportTables { tables, respond_to })
            .await
    }

    /// 在同一连接上事务性地回放导出的 SQL，返回执行的语句数
    pub async fn import_tables(&self, sql: String, tables: Vec<String>) -> Result<usize> {
        self.request(|respond_to| DbMessage::ImportTables {
            sql,
            tables,
            respond_to,
        })
        .await
    }
}
