use super::BackupService;
use super::upload;
use crate::archive::{ArchiveWriter, extract_archive};
use crate::constants::{archive, events};
use crate::database::{BackupTask, RestoreTask, TaskStatus};
use crate::dialect::Dialect;
use crate::file_sync::{FileRestoreOutcome, restore_upload_tree, write_upload_tree};
use crate::{BackupError, Result};
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, error, info, warn};

impl BackupService {
    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit> {
        self.slot
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BackupError::custom("任务调度器已关闭"))
    }

    fn archive_path(&self, task_id: i64) -> PathBuf {
        let timestamp = Utc::now().format(archive::TIMESTAMP_FORMAT);
        self.paths.backup_dir.join(format!(
            "{}{}_{}{}",
            archive::BACKUP_PREFIX,
            timestamp,
            task_id,
            archive::BACKUP_EXTENSION
        ))
    }

    // ========== 备份 ==========

    pub(super) fn spawn_backup(&self, task_id: i64, requested_by: Option<i64>) {
        let service = self.clone();
        tokio::spawn(async move {
            // 许可一直持有到终态写入完成
            let _permit = match service.acquire_slot().await {
                Ok(permit) => permit,
                Err(e) => {
                    service.finish_backup(task_id, requested_by, Err(e)).await;
                    return;
                }
            };
            let result = service.run_backup(task_id).await;
            service.finish_backup(task_id, requested_by, result).await;
        });
    }

    async fn run_backup(&self, task_id: i64) -> Result<BackupTask> {
        self.database.mark_backup_running(task_id).await?;
        info!("备份任务 {} 开始执行", task_id);

        let sql = self.dumper.export().await?;
        let dialect = self.dumper.dialect();
        let upload_dir = self.paths.upload_dir.clone();
        let archive_path = self.archive_path(task_id);

        let path = archive_path.clone();
        let written = tokio::task::spawn_blocking(move || -> Result<u64> {
            let mut writer = ArchiveWriter::create(&path)?;
            writer.add_database_dump(dialect, &sql)?;
            let files = write_upload_tree(&mut writer, &upload_dir)?;
            debug!("归档包含 {} 个上传文件", files);
            writer.finish()
        })
        .await
        .map_err(BackupError::from)
        .and_then(|result| result);

        if let Err(e) = written {
            remove_quietly(&archive_path).await;
            return Err(e);
        }

        self.record_archive(task_id, &archive_path).await
    }

    /// 归档就绪后写入 completed；写入失败时删除归档，保证没有孤立文件
    async fn record_archive(&self, task_id: i64, archive_path: &Path) -> Result<BackupTask> {
        let recorded = self.complete_with_archive(task_id, archive_path).await;
        if recorded.is_err() {
            remove_quietly(archive_path).await;
        }
        recorded
    }

    async fn complete_with_archive(&self, task_id: i64, archive_path: &Path) -> Result<BackupTask> {
        let size = tokio::fs::metadata(archive_path).await?.len();
        let storage_path = std::path::absolute(archive_path)?
            .to_string_lossy()
            .to_string();

        let task = self
            .database
            .complete_backup_task(task_id, size, storage_path)
            .await?;
        if task.status != TaskStatus::Completed {
            return Err(BackupError::custom(format!(
                "备份任务 {task_id} 状态已变为 {}",
                task.status
            )));
        }
        Ok(task)
    }

    async fn finish_backup(
        &self,
        task_id: i64,
        requested_by: Option<i64>,
        result: Result<BackupTask>,
    ) {
        match result {
            Ok(task) => {
                info!(
                    "备份任务 {} 完成: {} ({} 字节)",
                    task_id,
                    task.storage_path.as_deref().unwrap_or_default(),
                    task.size.unwrap_or_default()
                );
                self.notify(
                    requested_by,
                    events::BACKUP_COMPLETED,
                    json!({
                        "task_id": task.id,
                        "size": task.size,
                        "storage_path": task.storage_path,
                    }),
                );
            }
            Err(e) => {
                error!("备份任务 {} 失败: {}", task_id, e);
                let message = e.to_string();
                if let Err(db_err) = self.database.fail_backup_task(task_id, &message).await {
                    error!("记录备份任务 {} 的失败状态时出错: {}", task_id, db_err);
                }
                self.notify(
                    requested_by,
                    events::BACKUP_FAILED,
                    json!({ "task_id": task_id, "error": message }),
                );
            }
        }
    }

    // ========== 上传 ==========

    /// 上传的归档不触碰数据库与上传目录，因此不占用执行许可
    pub(super) fn spawn_upload(&self, task_id: i64, staged: PathBuf) {
        let service = self.clone();
        tokio::spawn(async move {
            let result = service.run_upload(task_id, &staged).await;
            remove_quietly(&staged).await;
            service.finish_backup(task_id, None, result).await;
        });
    }

    async fn run_upload(&self, task_id: i64, staged: &Path) -> Result<BackupTask> {
        self.database.mark_backup_running(task_id).await?;
        info!("上传备份任务 {} 开始执行", task_id);

        tokio::fs::create_dir_all(&self.paths.backup_dir).await?;
        let archive_path = self.archive_path(task_id);
        upload::move_file(staged, &archive_path).await?;

        self.record_archive(task_id, &archive_path).await
    }

    // ========== 恢复 ==========

    pub(super) fn spawn_restore(&self, restore_id: i64, requested_by: Option<i64>) {
        let service = self.clone();
        tokio::spawn(async move {
            let _permit = match service.acquire_slot().await {
                Ok(permit) => permit,
                Err(e) => {
                    service.finish_restore(restore_id, requested_by, Err(e)).await;
                    return;
                }
            };
            let result = service.run_restore(restore_id).await;
            service.finish_restore(restore_id, requested_by, result).await;
        });
    }

    async fn run_restore(&self, restore_id: i64) -> Result<RestoreTask> {
        let restore = self.database.get_restore_task(restore_id).await?;
        let backup = self.database.get_backup_task(restore.backup_task_id).await?;

        // 以下校验都在任何破坏性操作之前完成
        if backup.status != TaskStatus::Completed {
            return Err(BackupError::BackupNotCompleted(backup.status.to_string()));
        }
        let archive_path = backup
            .storage_path
            .as_deref()
            .map(PathBuf::from)
            .filter(|path| path.is_file())
            .ok_or_else(|| {
                BackupError::BackupFileMissing(backup.storage_path.clone().unwrap_or_default())
            })?;

        self.database.mark_restore_running(restore_id).await?;
        info!(
            "恢复任务 {} 开始执行，来源: {}",
            restore_id,
            archive_path.display()
        );

        let temp_dir = self.paths.temp_dir.clone();
        let source = archive_path.clone();
        let extracted =
            tokio::task::spawn_blocking(move || extract_archive(&source, &temp_dir)).await??;

        let backup_dialect = Dialect::detect_in_dir(extracted.path())?;
        backup_dialect.ensure_matches(self.dumper.dialect())?;

        let sql = tokio::fs::read(extracted.path().join(backup_dialect.sql_file_name())).await?;
        self.dumper.import(sql).await?;
        info!("恢复任务 {} 数据库已恢复", restore_id);

        let upload_dir = self.paths.upload_dir.clone();
        let outcome =
            tokio::task::spawn_blocking(move || restore_upload_tree(extracted.path(), &upload_dir))
                .await??;
        match outcome {
            FileRestoreOutcome::Skipped => info!("恢复任务 {} 未包含上传文件", restore_id),
            FileRestoreOutcome::Replaced { files } => {
                info!("恢复任务 {} 已恢复 {} 个上传文件", restore_id, files)
            }
        }

        self.database.complete_restore_task(restore_id).await
    }

    async fn finish_restore(
        &self,
        restore_id: i64,
        requested_by: Option<i64>,
        result: Result<RestoreTask>,
    ) {
        match result {
            Ok(task) => {
                info!("恢复任务 {} 完成", restore_id);
                self.notify(
                    requested_by,
                    events::RESTORE_COMPLETED,
                    json!({
                        "task_id": task.id,
                        "backup_task_id": task.backup_task_id,
                    }),
                );
            }
            Err(e) => {
                if e.is_security() {
                    warn!("恢复任务 {} 被拒绝，归档不安全: {}", restore_id, e);
                } else {
                    error!("恢复任务 {} 失败: {}", restore_id, e);
                }
                let message = e.to_string();
                if let Err(db_err) = self.database.fail_restore_task(restore_id, &message).await {
                    error!("记录恢复任务 {} 的失败状态时出错: {}", restore_id, db_err);
                }
                self.notify(
                    requested_by,
                    events::RESTORE_FAILED,
                    json!({ "task_id": restore_id, "error": message }),
                );
            }
        }
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("已删除文件: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("删除文件失败 {}: {}", path.display(), e),
    }
}
