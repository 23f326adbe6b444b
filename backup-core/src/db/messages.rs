use crate::Result;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::models::{BackupTask, RestoreRecord, RestoreTask, StaleTaskReport};

/// 任务库操作消息
#[derive(Debug)]
pub enum DbMessage {
    /// 初始化任务表
    InitTables {
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 备份任务 ==========
    /// 创建 pending 状态的备份任务
    CreateBackupTask {
        start_time: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<BackupTask>>,
    },
    GetBackupTask {
        id: i64,
        respond_to: oneshot::Sender<Result<Option<BackupTask>>>,
    },
    ListBackupTasks {
        respond_to: oneshot::Sender<Result<Vec<BackupTask>>>,
    },
    /// pending -> running，返回是否发生了状态迁移
    MarkBackupRunning {
        id: i64,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    CompleteBackupTask {
        id: i64,
        size: u64,
        storage_path: String,
        end_time: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    FailBackupTask {
        id: i64,
        error: String,
        end_time: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    DeleteBackupTask {
        id: i64,
        respond_to: oneshot::Sender<Result<bool>>,
    },

    // ========== 恢复任务 ==========
    CreateRestoreTask {
        backup_task_id: i64,
        start_time: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<RestoreTask>>,
    },
    GetRestoreTask {
        id: i64,
        respond_to: oneshot::Sender<Result<Option<RestoreTask>>>,
    },
    ListRestoreRecords {
        respond_to: oneshot::Sender<Result<Vec<RestoreRecord>>>,
    },
    MarkRestoreRunning {
        id: i64,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    CompleteRestoreTask {
        id: i64,
        end_time: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    FailRestoreTask {
        id: i64,
        error: String,
        end_time: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    DeleteRestoreTask {
        id: i64,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    /// 删除引用某个备份的全部恢复任务，返回删除条数
    DeleteRestoreTasksForBackup {
        backup_task_id: i64,
        respond_to: oneshot::Sender<Result<usize>>,
    },

    // ========== 维护 ==========
    /// 将 cutoff 之前开始且仍未结束的任务标记为失败
    FailStaleTasks {
        cutoff: DateTime<Utc>,
        error: String,
        respond_to: oneshot::Sender<Result<StaleTaskReport>>,
    },

    // ========== SQLite 应用数据导出/导入 ==========
    ExportTables {
        tables: Vec<String>,
        respond_to: oneshot::Sender<Result<String>>,
    },
    ImportTables {
        sql: String,
        tables: Vec<String>,
        respond_to: oneshot::Sender<Result<usize>>,
    },
}
