use crate::db::TaskDbManager;
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use std::path::Path;

pub use crate::db::{BackupTask, RestoreRecord, RestoreTask, StaleTaskReport, TaskStatus};

/// 任务库适配器
///
/// 查询单条记录时，不存在即返回对应的 NotFound 错误。
#[derive(Debug, Clone)]
pub struct Database {
    manager: TaskDbManager,
}

impl Database {
    /// 连接（或创建）数据库文件
    pub async fn connect<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let manager = TaskDbManager::new(db_path).await?;
        Ok(Self { manager })
    }

    /// 内存数据库，用于测试
    pub async fn connect_memory() -> Result<Self> {
        let manager = TaskDbManager::new_memory().await?;
        Ok(Self { manager })
    }

    // ========== 备份任务 ==========

    pub async fn create_backup_task(&self, start_time: DateTime<Utc>) -> Result<BackupTask> {
        self.manager.create_backup_task(start_time).await
    }

    pub async fn get_backup_task(&self, id: i64) -> Result<BackupTask> {
        self.manager
            .get_backup_task(id)
            .await?
            .ok_or(BackupError::BackupTaskNotFound(id))
    }

    pub async fn list_backup_tasks(&self) -> Result<Vec<BackupTask>> {
        self.manager.list_backup_tasks().await
    }

    /// pending -> running；任务不存在或已离开 pending 时返回错误
    pub async fn mark_backup_running(&self, id: i64) -> Result<()> {
        if !self.manager.mark_backup_running(id).await? {
            return Err(BackupError::custom(format!(
                "备份任务 {id} 不存在或已不处于 pending 状态"
            )));
        }
        Ok(())
    }

    pub async fn complete_backup_task(
        &self,
        id: i64,
        size: u64,
        storage_path: String,
    ) -> Result<BackupTask> {
        if !self
            .manager
            .complete_backup_task(id, size, storage_path, Utc::now())
            .await?
        {
            tracing::warn!("备份任务 {} 已处于终态，忽略完成状态写入", id);
        }
        self.get_backup_task(id).await
    }

    /// 记录失败；返回是否实际写入
    pub async fn fail_backup_task(&self, id: i64, error: impl Into<String>) -> Result<bool> {
        self.manager
            .fail_backup_task(id, error.into(), Utc::now())
            .await
    }

    pub async fn delete_backup_task(&self, id: i64) -> Result<()> {
        if !self.manager.delete_backup_task(id).await? {
            return Err(BackupError::BackupTaskNotFound(id));
        }
        Ok(())
    }

    // ========== 恢复任务 ==========

    pub async fn create_restore_task(
        &self,
        backup_task_id: i64,
        start_time: DateTime<Utc>,
    ) -> Result<RestoreTask> {
        self.manager
            .create_restore_task(backup_task_id, start_time)
            .await
    }

    pub async fn get_restore_task(&self, id: i64) -> Result<RestoreTask> {
        self.manager
            .get_restore_task(id)
            .await?
            .ok_or(BackupError::RestoreTaskNotFound(id))
    }

    pub async fn list_restore_records(&self) -> Result<Vec<RestoreRecord>> {
        self.manager.list_restore_records().await
    }

    pub async fn mark_restore_running(&self, id: i64) -> Result<()> {
        if !self.manager.mark_restore_running(id).await? {
            return Err(BackupError::custom(format!(
                "恢复任务 {id} 不存在或已不处于 pending 状态"
            )));
        }
        Ok(())
    }

    pub async fn complete_restore_task(&self, id: i64) -> Result<RestoreTask> {
        if !self.manager.complete_restore_task(id, Utc::now()).await? {
            tracing::warn!("恢复任务 {} 已处于终态，忽略完成状态写入", id);
        }
        self.get_restore_task(id).await
    }

    pub async fn fail_restore_task(&self, id: i64, error: impl Into<String>) -> Result<bool> {
        self.manager
            .fail_restore_task(id, error.into(), Utc::now())
            .await
    }

    pub async fn delete_restore_task(&self, id: i64) -> Result<()> {
        if !self.manager.delete_restore_task(id).await? {
            return Err(BackupError::RestoreTaskNotFound(id));
        }
        Ok(())
    }

    pub async fn delete_restore_tasks_for_backup(&self, backup_task_id: i64) -> Result<usize> {
        self.manager
            .delete_restore_tasks_for_backup(backup_task_id)
            .await
    }

    // ========== 维护 ==========

    pub async fn fail_stale_tasks(
        &self,
        cutoff: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Result<StaleTaskReport> {
        self.manager.fail_stale_tasks(cutoff, error.into()).await
    }

    // ========== SQLite 应用数据 ==========

    pub async fn export_tables(&self, tables: &[String]) -> Result<String> {
        self.manager.export_tables(tables.to_vec()).await
    }

    pub async fn import_tables(&self, sql: String, tables: &[String]) -> Result<usize> {
        self.manager.import_tables(sql, tables.to_vec()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_backup_task_lifecycle() {
        let temp_dir = tempdir().unwrap();
        let db = Database::connect(temp_dir.path().join("tasks.db"))
            .await
            .unwrap();

        let task = db.create_backup_task(Utc::now()).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.size.is_none() && task.storage_path.is_none());

        db.mark_backup_running(task.id).await.unwrap();
        // 已离开 pending 不能再次进入 running
        assert!(db.mark_backup_running(task.id).await.is_err());

        let done = db
            .complete_backup_task(task.id, 42, "/data/backup/b.zip".to_string())
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.size, Some(42));
        assert_eq!(done.storage_path.as_deref(), Some("/data/backup/b.zip"));
        assert!(done.end_time.is_some());

        // 终态不可再变
        assert!(!db.fail_backup_task(task.id, "late").await.unwrap());
        assert_eq!(
            db.get_backup_task(task.id).await.unwrap().status,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_failed_backup_has_no_artifact() {
        let db = Database::connect_memory().await.unwrap();
        let task = db.create_backup_task(Utc::now()).await.unwrap();

        assert!(db.fail_backup_task(task.id, "mysqldump 不可用").await.unwrap());
        let failed = db.get_backup_task(task.id).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("mysqldump 不可用"));
        assert!(failed.size.is_none() && failed.storage_path.is_none());
    }

    #[tokio::test]
    async fn test_lists_are_newest_first() {
        let db = Database::connect_memory().await.unwrap();
        let first = db.create_backup_task(Utc::now()).await.unwrap();
        let second = db.create_backup_task(Utc::now()).await.unwrap();

        let ids: Vec<i64> = db
            .list_backup_tasks()
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);

        let r1 = db.create_restore_task(first.id, Utc::now()).await.unwrap();
        let r2 = db.create_restore_task(second.id, Utc::now()).await.unwrap();
        let records = db.list_restore_records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].task.id, r2.id);
        assert_eq!(records[1].task.id, r1.id);
        assert_eq!(
            records[1].backup_task.as_ref().map(|b| b.id),
            Some(first.id)
        );
    }

    #[tokio::test]
    async fn test_delete_requires_restore_rows_removed_first() {
        let db = Database::connect_memory().await.unwrap();
        let backup = db.create_backup_task(Utc::now()).await.unwrap();
        db.create_restore_task(backup.id, Utc::now()).await.unwrap();
        db.create_restore_task(backup.id, Utc::now()).await.unwrap();

        // 外键约束阻止直接删除被引用的备份
        assert!(db.delete_backup_task(backup.id).await.is_err());

        assert_eq!(db.delete_restore_tasks_for_backup(backup.id).await.unwrap(), 2);
        db.delete_backup_task(backup.id).await.unwrap();
        assert!(matches!(
            db.get_backup_task(backup.id).await,
            Err(BackupError::BackupTaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fail_stale_tasks() {
        let db = Database::connect_memory().await.unwrap();
        let old = db
            .create_backup_task(Utc::now() - Duration::hours(2))
            .await
            .unwrap();
        let fresh = db.create_backup_task(Utc::now()).await.unwrap();
        let old_restore = db
            .create_restore_task(fresh.id, Utc::now() - Duration::hours(3))
            .await
            .unwrap();

        let report = db
            .fail_stale_tasks(Utc::now() - Duration::hours(1), "进程重启")
            .await
            .unwrap();
        assert_eq!(report.backups, 1);
        assert_eq!(report.restores, 1);
        assert_eq!(report.total(), 2);

        assert_eq!(
            db.get_backup_task(old.id).await.unwrap().status,
            TaskStatus::Failed
        );
        assert_eq!(
            db.get_backup_task(fresh.id).await.unwrap().status,
            TaskStatus::Pending
        );
        let restore = db.get_restore_task(old_restore.id).await.unwrap();
        assert_eq!(restore.status, TaskStatus::Failed);
        assert_eq!(restore.error.as_deref(), Some("进程重启"));
    }
}
