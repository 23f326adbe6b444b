use crate::Result;
use crate::dump::sqlite;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::DbMessage;
use super::models::{BackupTask, RestoreRecord, RestoreTask, StaleTaskReport, TaskStatus};

const BACKUP_COLUMNS: &str =
    "id, status, start_time, end_time, size, storage_path, error, created_at, updated_at";

const RESTORE_COLUMNS: &str =
    "id, backup_task_id, status, start_time, end_time, error, created_at, updated_at";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite Actor - 独占任务库连接，串行处理所有读写
pub struct TaskDbActor {
    connection: Connection,
}

impl TaskDbActor {
    /// 打开（或创建）指定路径的数据库文件
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let connection = Connection::open(db_path)?;
        Self::configure(connection)
    }

    /// 创建内存数据库 Actor
    pub fn new_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        Self::configure(connection)
    }

    fn configure(connection: Connection) -> Result<Self> {
        connection.busy_timeout(BUSY_TIMEOUT)?;
        connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { connection })
    }

    /// 运行 Actor 消息循环，直到所有发送端关闭
    ///
    /// 导出与导入可能耗时较长，因此运行在独立线程上，使用阻塞接收。
    pub fn run(mut self, mut receiver: mpsc::Receiver<DbMessage>) {
        info!("任务库 Actor 已启动");

        while let Some(message) = receiver.blocking_recv() {
            self.handle_message(message);
        }

        info!("任务库 Actor 已关闭");
    }

    fn handle_message(&mut self, message: DbMessage) {
        match message {
            DbMessage::InitTables { respond_to } => {
                let _ = respond_to.send(self.init_tables());
            }
            DbMessage::CreateBackupTask {
                start_time,
                respond_to,
            } => {
                let _ = respond_to.send(self.create_backup_task(start_time));
            }
            DbMessage::GetBackupTask { id, respond_to } => {
                let _ = respond_to.send(self.get_backup_task(id));
            }
            DbMessage::ListBackupTasks { respond_to } => {
                let _ = respond_to.send(self.list_backup_tasks());
            }
            DbMessage::MarkBackupRunning { id, respond_to } => {
                let _ = respond_to.send(self.mark_backup_running(id));
            }
            DbMessage::CompleteBackupTask {
                id,
                size,
                storage_path,
                end_time,
                respond_to,
            } => {
                let result = self.complete_backup_task(id, size, &storage_path, end_time);
                let _ = respond_to.send(result);
            }
            DbMessage::FailBackupTask {
                id,
                error,
                end_time,
                respond_to,
            } => {
                let _ = respond_to.send(self.fail_backup_task(id, &error, end_time));
            }
            DbMessage::DeleteBackupTask { id, respond_to } => {
                let _ = respond_to.send(self.delete_backup_task(id));
            }
            DbMessage::CreateRestoreTask {
                backup_task_id,
                start_time,
                respond_to,
            } => {
                let _ = respond_to.send(self.create_restore_task(backup_task_id, start_time));
            }
            DbMessage::GetRestoreTask { id, respond_to } => {
                let _ = respond_to.send(self.get_restore_task(id));
            }
            DbMessage::ListRestoreRecords { respond_to } => {
                let _ = respond_to.send(self.list_restore_records());
            }
            DbMessage::MarkRestoreRunning { id, respond_to } => {
                let _ = respond_to.send(self.mark_restore_running(id));
            }
            DbMessage::CompleteRestoreTask {
                id,
                end_time,
                respond_to,
            } => {
                let _ = respond_to.send(self.complete_restore_task(id, end_time));
            }
            DbMessage::FailRestoreTask {
                id,
                error,
                end_time,
                respond_to,
            } => {
                let _ = respond_to.send(self.fail_restore_task(id, &error, end_time));
            }
            DbMessage::DeleteRestoreTask { id, respond_to } => {
                let _ = respond_to.send(self.delete_restore_task(id));
            }
            DbMessage::DeleteRestoreTasksForBackup {
                backup_task_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.delete_restore_tasks_for_backup(backup_task_id));
            }
            DbMessage::FailStaleTasks {
                cutoff,
                error,
                respond_to,
            } => {
                let _ = respond_to.send(self.fail_stale_tasks(cutoff, &error));
            }
            DbMessage::ExportTables { tables, respond_to } => {
                let result = sqlite::export_tables(&mut self.connection, &tables);
                let _ = respond_to.send(result);
            }
            DbMessage::ImportTables {
                sql,
                tables,
                respond_to,
            } => {
                let result = sqlite::import_tables(&mut self.connection, &sql, &tables);
                let _ = respond_to.send(result);
            }
        }
    }

    fn init_tables(&self) -> Result<()> {
        const INIT_SQL: &str = include_str!("../../migrations/init_tasks.sql");
        self.connection.execute_batch(INIT_SQL)?;
        debug!("任务表初始化完成");
        Ok(())
    }

    // ========== 备份任务 ==========

    fn create_backup_task(&self, start_time: DateTime<Utc>) -> Result<BackupTask> {
        let now = Utc::now();
        self.connection.execute(
            "INSERT INTO backup_tasks (created_at, updated_at, status, start_time)
             VALUES (?1, ?1, ?2, ?3)",
            params![now, TaskStatus::Pending, start_time],
        )?;

        let id = self.connection.last_insert_rowid();
        debug!("创建备份任务: {}", id);
        self.require_backup_task(id)
    }

    fn require_backup_task(&self, id: i64) -> Result<BackupTask> {
        self.get_backup_task(id)?
            .ok_or(crate::BackupError::BackupTaskNotFound(id))
    }

    fn get_backup_task(&self, id: i64) -> Result<Option<BackupTask>> {
        let sql = format!("SELECT {BACKUP_COLUMNS} FROM backup_tasks WHERE id = ?1");
        let task = self
            .connection
            .query_row(&sql, params![id], |row| backup_from_row(row, 0))
            .optional()?;
        Ok(task)
    }

    fn list_backup_tasks(&self) -> Result<Vec<BackupTask>> {
        let sql =
            format!("SELECT {BACKUP_COLUMNS} FROM backup_tasks ORDER BY created_at DESC, id DESC");
        let mut stmt = self.connection.prepare(&sql)?;
        let tasks = stmt
            .query_map([], |row| backup_from_row(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    fn mark_backup_running(&self, id: i64) -> Result<bool> {
        let changed = self.connection.execute(
            "UPDATE backup_tasks SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![TaskStatus::Running, Utc::now(), id, TaskStatus::Pending],
        )?;
        Ok(changed > 0)
    }

    fn complete_backup_task(
        &self,
        id: i64,
        size: u64,
        storage_path: &str,
        end_time: DateTime<Utc>,
    ) -> Result<bool> {
        let size = i64::try_from(size).unwrap_or(i64::MAX);
        let changed = self.connection.execute(
            "UPDATE backup_tasks
             SET status = ?1, size = ?2, storage_path = ?3, end_time = ?4, updated_at = ?4, error = NULL
             WHERE id = ?5 AND status IN ('pending', 'running')",
            params![TaskStatus::Completed, size, storage_path, end_time, id],
        )?;
        Ok(changed > 0)
    }

    fn fail_backup_task(&self, id: i64, error: &str, end_time: DateTime<Utc>) -> Result<bool> {
        let changed = self.connection.execute(
            "UPDATE backup_tasks
             SET status = ?1, error = ?2, end_time = ?3, updated_at = ?3, size = NULL, storage_path = NULL
             WHERE id = ?4 AND status IN ('pending', 'running')",
            params![TaskStatus::Failed, error, end_time, id],
        )?;
        Ok(changed > 0)
    }

    fn delete_backup_task(&self, id: i64) -> Result<bool> {
        let changed = self
            .connection
            .execute("DELETE FROM backup_tasks WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // ========== 恢复任务 ==========

    fn create_restore_task(
        &self,
        backup_task_id: i64,
        start_time: DateTime<Utc>,
    ) -> Result<RestoreTask> {
        let now = Utc::now();
        self.connection.execute(
            "INSERT INTO restore_tasks (created_at, updated_at, backup_task_id, status, start_time)
             VALUES (?1, ?1, ?2, ?3, ?4)",
            params![now, backup_task_id, TaskStatus::Pending, start_time],
        )?;

        let id = self.connection.last_insert_rowid();
        debug!("创建恢复任务: {} (备份 {})", id, backup_task_id);
        self.get_restore_task(id)?
            .ok_or(crate::BackupError::RestoreTaskNotFound(id))
    }

    fn get_restore_task(&self, id: i64) -> Result<Option<RestoreTask>> {
        let sql = format!("SELECT {RESTORE_COLUMNS} FROM restore_tasks WHERE id = ?1");
        let task = self
            .connection
            .query_row(&sql, params![id], restore_from_row)
            .optional()?;
        Ok(task)
    }

    fn list_restore_records(&self) -> Result<Vec<RestoreRecord>> {
        let mut stmt = self.connection.prepare(
            "SELECT r.id, r.backup_task_id, r.status, r.start_time, r.end_time, r.error,
                    r.created_at, r.updated_at,
                    b.id, b.status, b.start_time, b.end_time, b.size, b.storage_path, b.error,
                    b.created_at, b.updated_at
             FROM restore_tasks r
             LEFT JOIN backup_tasks b ON b.id = r.backup_task_id
             ORDER BY r.created_at DESC, r.id DESC",
        )?;

        let records = stmt
            .query_map([], |row| {
                let task = restore_from_row(row)?;
                let backup_id: Option<i64> = row.get(8)?;
                let backup_task = match backup_id {
                    Some(_) => Some(backup_from_row(row, 8)?),
                    None => None,
                };
                Ok(RestoreRecord { task, backup_task })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn mark_restore_running(&self, id: i64) -> Result<bool> {
        let changed = self.connection.execute(
            "UPDATE restore_tasks SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![TaskStatus::Running, Utc::now(), id, TaskStatus::Pending],
        )?;
        Ok(changed > 0)
    }

    fn complete_restore_task(&self, id: i64, end_time: DateTime<Utc>) -> Result<bool> {
        let changed = self.connection.execute(
            "UPDATE restore_tasks
             SET status = ?1, end_time = ?2, updated_at = ?2, error = NULL
             WHERE id = ?3 AND status IN ('pending', 'running')",
            params![TaskStatus::Completed, end_time, id],
        )?;
        Ok(changed > 0)
    }

    fn fail_restore_task(&self, id: i64, error: &str, end_time: DateTime<Utc>) -> Result<bool> {
        let changed = self.connection.execute(
            "UPDATE restore_tasks
             SET status = ?1, error = ?2, end_time = ?3, updated_at = ?3
             WHERE id = ?4 AND status IN ('pending', 'running')",
            params![TaskStatus::Failed, error, end_time, id],
        )?;
        Ok(changed > 0)
    }

    fn delete_restore_task(&self, id: i64) -> Result<bool> {
        let changed = self
            .connection
            .execute("DELETE FROM restore_tasks WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn delete_restore_tasks_for_backup(&self, backup_task_id: i64) -> Result<usize> {
        let changed = self.connection.execute(
            "DELETE FROM restore_tasks WHERE backup_task_id = ?1",
            params![backup_task_id],
        )?;
        Ok(changed)
    }

    // ========== 维护 ==========

    fn fail_stale_tasks(&mut self, cutoff: DateTime<Utc>, error: &str) -> Result<StaleTaskReport> {
        let now = Utc::now();
        let tx = self.connection.transaction()?;
        let mut report = StaleTaskReport::default();

        for table in ["backup_tasks", "restore_tasks"] {
            let stale_ids = {
                let sql = format!(
                    "SELECT id, start_time FROM {table} WHERE status IN ('pending', 'running')"
                );
                let mut stmt = tx.prepare(&sql)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, DateTime<Utc>>(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.into_iter()
                    .filter(|(_, start_time)| *start_time < cutoff)
                    .map(|(id, _)| id)
                    .collect::<Vec<_>>()
            };

            let clear_result = if table == "backup_tasks" {
                ", size = NULL, storage_path = NULL"
            } else {
                ""
            };
            let update = format!(
                "UPDATE {table} SET status = ?1, error = ?2, end_time = ?3, updated_at = ?3{clear_result}
                 WHERE id = ?4"
            );
            for id in &stale_ids {
                tx.execute(&update, params![TaskStatus::Failed, error, now, id])?;
                warn!("任务 {}#{} 已过期，标记为失败", table, id);
            }

            if table == "backup_tasks" {
                report.backups = stale_ids.len();
            } else {
                report.restores = stale_ids.len();
            }
        }

        tx.commit()?;
        Ok(report)
    }
}

fn backup_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<BackupTask> {
    let size: Option<i64> = row.get(offset + 4)?;
    Ok(BackupTask {
        id: row.get(offset)?,
        status: row.get(offset + 1)?,
        start_time: row.get(offset + 2)?,
        end_time: row.get(offset + 3)?,
        size: size.map(|s| u64::try_from(s).unwrap_or(0)),
        storage_path: row.get(offset + 5)?,
        error: row.get(offset + 6)?,
        created_at: row.get(offset + 7)?,
        updated_at: row.get(offset + 8)?,
    })
}

fn restore_from_row(row: &Row<'_>) -> rusqlite::Result<RestoreTask> {
    Ok(RestoreTask {
        id: row.get(0)?,
        backup_task_id: row.get(1)?,
        status: row.get(2)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
        error: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
