// 备份/恢复任务编排
//
// 创建类操作只写入 pending 记录并立即返回，实际工作在后台任务中完成。
// 备份与恢复共享一个单许可信号量，同一时刻最多一个流水线在运行。

mod pipeline;
mod upload;


pub use upload::{UploadSource, UploadedArchive};

use crate::config::AppConfig;
use crate::database::{
    BackupTask, Database, RestoreRecord, RestoreTask, StaleTaskReport, TaskStatus,
};
use crate::dialect::Dialect;
use crate::dump::DatabaseDumper;
use crate::executor::SystemCommandExecutor;
use crate::notifier::{NoopNotifier, TaskNotifier};
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

const STALE_TASK_ERROR: &str = "服务重启时任务仍未结束，已标记为失败";

/// 备份相关目录
#[derive(Debug, Clone)]
pub struct BackupPaths {
    /// 上传文件根目录
    pub upload_dir: PathBuf,
    /// 归档存放目录
    pub backup_dir: PathBuf,
    /// 上传暂存与解压目录
    pub temp_dir: PathBuf,
}

impl From<&AppConfig> for BackupPaths {
    fn from(config: &AppConfig) -> Self {
        Self {
            upload_dir: config.get_upload_dir(),
            backup_dir: config.get_backup_dir(),
            temp_dir: config.get_temp_dir(),
        }
    }
}

/// 可供下载的备份归档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupDownload {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
}

impl BackupDownload {
    pub async fn open(&self) -> Result<tokio::fs::File> {
        Ok(tokio::fs::File::open(&self.path).await?)
    }
}

/// 备份服务
#[derive(Debug, Clone)]
pub struct BackupService {
    database: Database,
    dumper: DatabaseDumper,
    paths: BackupPaths,
    notifier: Arc<dyn TaskNotifier>,
    slot: Arc<Semaphore>,
}

impl BackupService {
    /// 创建备份服务，确保备份与临时目录存在
    pub fn new(database: Database, dumper: DatabaseDumper, paths: BackupPaths) -> Result<Self> {
        std::fs::create_dir_all(&paths.backup_dir)?;
        std::fs::create_dir_all(&paths.temp_dir)?;

        Ok(Self {
            database,
            dumper,
            paths,
            notifier: Arc::new(NoopNotifier),
            slot: Arc::new(Semaphore::new(1)),
        })
    }

    /// 按配置组装：打开任务库，MySQL 方言使用系统命令执行器
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let database = Database::connect(config.get_task_db_path()).await?;
        let dumper = DatabaseDumper::from_config(
            &config.database,
            database.clone(),
            Arc::new(SystemCommandExecutor),
        );
        Self::new(database, dumper, BackupPaths::from(config))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn TaskNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn dialect(&self) -> Dialect {
        self.dumper.dialect()
    }

    pub fn paths(&self) -> &BackupPaths {
        &self.paths
    }

    // ========== 创建任务 ==========

    /// 创建备份任务并在后台执行
    pub async fn create_backup(&self) -> Result<BackupTask> {
        self.start_backup(None).await
    }

    /// 同 `create_backup`，任务结束时通知发起用户
    pub async fn create_backup_for(&self, user_id: i64) -> Result<BackupTask> {
        self.start_backup(Some(user_id)).await
    }

    async fn start_backup(&self, requested_by: Option<i64>) -> Result<BackupTask> {
        let task = self.database.create_backup_task(Utc::now()).await?;
        info!("已创建备份任务: {}", task.id);

        self.spawn_backup(task.id, requested_by);
        Ok(task)
    }

    /// 接收上传的备份归档，暂存后在后台登记为 completed 的备份
    ///
    /// 暂存失败时删除刚创建的任务记录并返回错误。
    pub async fn create_upload_backup_task(
        &self,
        start_time: DateTime<Utc>,
        upload: UploadedArchive,
    ) -> Result<BackupTask> {
        upload.validate()?;

        let task = self.database.create_backup_task(start_time).await?;
        let staged = match upload::stage_upload(&self.paths.temp_dir, task.id, upload).await {
            Ok(path) => path,
            Err(e) => {
                warn!("上传暂存失败，删除备份任务 {}: {}", task.id, e);
                if let Err(db_err) = self.database.delete_backup_task(task.id).await {
                    tracing::error!("删除备份任务 {} 失败: {}", task.id, db_err);
                }
                return Err(e);
            }
        };

        info!("已创建上传备份任务: {} ({})", task.id, staged.display());
        self.spawn_upload(task.id, staged);
        Ok(task)
    }

    /// 从指定备份恢复，恢复任务在后台执行
    pub async fn restore_backup(&self, backup_id: i64) -> Result<RestoreTask> {
        self.start_restore(backup_id, None).await
    }

    /// 同 `restore_backup`，任务结束时通知发起用户
    pub async fn restore_backup_for(&self, backup_id: i64, user_id: i64) -> Result<RestoreTask> {
        self.start_restore(backup_id, Some(user_id)).await
    }

    async fn start_restore(&self, backup_id: i64, requested_by: Option<i64>) -> Result<RestoreTask> {
        // 备份状态在后台校验，这里只确认记录存在
        self.database.get_backup_task(backup_id).await?;

        let task = self
            .database
            .create_restore_task(backup_id, Utc::now())
            .await?;
        info!("已创建恢复任务: {} (备份 {})", task.id, backup_id);

        self.spawn_restore(task.id, requested_by);
        Ok(task)
    }

    // ========== 查询 ==========

    /// 全部备份任务，最新的在前
    pub async fn get_backup_list(&self) -> Result<Vec<BackupTask>> {
        self.database.list_backup_tasks().await
    }

    /// 全部恢复记录，最新的在前
    pub async fn get_restore_records(&self) -> Result<Vec<RestoreRecord>> {
        self.database.list_restore_records().await
    }

    pub async fn get_backup_task_by_id(&self, id: i64) -> Result<BackupTask> {
        self.database.get_backup_task(id).await
    }

    pub async fn get_restore_task_by_id(&self, id: i64) -> Result<RestoreTask> {
        self.database.get_restore_task(id).await
    }

    /// 轮询直到备份任务进入终态
    pub async fn wait_for_backup(&self, id: i64, poll_interval: Duration) -> Result<BackupTask> {
        loop {
            let task = self.database.get_backup_task(id).await?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// 轮询直到恢复任务进入终态
    pub async fn wait_for_restore(&self, id: i64, poll_interval: Duration) -> Result<RestoreTask> {
        loop {
            let task = self.database.get_restore_task(id).await?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    // ========== 删除 ==========

    /// 删除备份：先删除引用它的恢复任务，再删除归档文件，最后删除记录
    pub async fn delete_backup(&self, id: i64) -> Result<()> {
        let task = self.database.get_backup_task(id).await?;

        let removed = self.database.delete_restore_tasks_for_backup(id).await?;
        if removed > 0 {
            info!("已删除备份 {} 关联的 {} 条恢复任务", id, removed);
        }

        if let Some(storage_path) = &task.storage_path {
            match tokio::fs::remove_file(storage_path).await {
                Ok(()) => info!("删除备份文件: {}", storage_path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("备份文件已不存在: {}", storage_path)
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.database.delete_backup_task(id).await?;
        info!("已删除备份任务: {}", id);
        Ok(())
    }

    /// 删除恢复任务，不影响其引用的备份
    pub async fn delete_restore_task(&self, id: i64) -> Result<()> {
        self.database.delete_restore_task(id).await?;
        info!("已删除恢复任务: {}", id);
        Ok(())
    }

    // ========== 下载 ==========

    /// 仅 completed 且归档文件存在的备份可以下载
    pub async fn download_backup(&self, id: i64) -> Result<BackupDownload> {
        let task = self.database.get_backup_task(id).await?;
        if task.status != TaskStatus::Completed {
            return Err(BackupError::BackupNotCompleted(task.status.to_string()));
        }

        let path = task.storage_path.map(PathBuf::from).ok_or_else(|| {
            BackupError::BackupFileMissing(format!("备份任务 {id} 没有归档路径"))
        })?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|_| BackupError::BackupFileMissing(path.display().to_string()))?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("backup_{id}.zip"));

        Ok(BackupDownload {
            path,
            file_name,
            size: metadata.len(),
        })
    }

    // ========== 维护 ==========

    /// 将开始时间早于 `grace` 之前、仍处于 pending/running 的任务标记为失败
    ///
    /// 只应在启动时、尚未创建任何新任务前调用。
    pub async fn recover_stale_tasks(&self, grace: Duration) -> Result<StaleTaskReport> {
        let grace = chrono::Duration::from_std(grace)
            .map_err(|e| BackupError::custom(format!("宽限期无效: {e}")))?;
        let cutoff = Utc::now() - grace;

        let report = self
            .database
            .fail_stale_tasks(cutoff, STALE_TASK_ERROR)
            .await?;
        if report.total() > 0 {
            warn!(
                "已将 {} 个备份任务、{} 个恢复任务标记为失败",
                report.backups, report.restores
            );
        }
        Ok(report)
    }

    fn notify(&self, requested_by: Option<i64>, event: &str, payload: Value) {
        if let Some(user_id) = requested_by {
            self.notifier.notify(user_id, event, payload);
        }
    }
}
