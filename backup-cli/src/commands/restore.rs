use super::POLL_INTERVAL;
use crate::app::CliApp;
use backup_core::{BackupError, Result, database::TaskStatus};
use chrono::Local;
use tracing::{error, info, warn};

/// 从备份恢复并等待完成
pub async fn run_restore(app: &CliApp, backup_id: i64, user: Option<i64>) -> Result<()> {
    info!("🔄 从备份恢复");
    info!("=============");

    let backup = app.service.get_backup_task_by_id(backup_id).await?;
    if backup.status != TaskStatus::Completed {
        warn!(
            "⚠️  备份任务 {} 当前状态为 {}，恢复任务将会失败",
            backup_id, backup.status
        );
    }
    warn!("⚠️  恢复会覆盖当前数据库和上传目录的全部内容");

    let task = match user {
        Some(user_id) => app.service.restore_backup_for(backup_id, user_id).await?,
        None => app.service.restore_backup(backup_id).await?,
    };
    info!("📝 已创建恢复任务: {}", task.id);
    info!("⏳ 正在解压归档并导入数据库...");

    let task = app.service.wait_for_restore(task.id, POLL_INTERVAL).await?;
    if task.status != TaskStatus::Completed {
        let message = task.error.as_deref().unwrap_or("未知错误");
        error!("❌ 恢复任务 {} 失败", task.id);
        error!("   原因: {}", message);
        return Err(BackupError::custom(format!(
            "恢复任务 {} 失败: {message}",
            task.id
        )));
    }

    info!("✅ 恢复任务 {} 完成", task.id);
    Ok(())
}

/// 列出所有恢复记录
pub async fn run_list_restores(app: &CliApp) -> Result<()> {
    let records = app.service.get_restore_records().await?;

    if records.is_empty() {
        info!("📋 暂无恢复记录");
        return Ok(());
    }

    info!("📋 恢复记录");
    info!("============");
    info!(
        "{:<6} {:<8} {:<10} {:<20} {}",
        "ID", "备份ID", "状态", "开始时间", "备份文件"
    );
    info!("{}", "-".repeat(90));

    for record in &records {
        let backup_file = record
            .backup_task
            .as_ref()
            .and_then(|backup| backup.storage_path.as_deref())
            .unwrap_or("-");
        info!(
            "{:<6} {:<8} {:<10} {:<20} {}",
            record.task.id,
            record.task.backup_task_id,
            record.task.status.as_str(),
            record
                .task
                .start_time
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            backup_file
        );
        if let Some(message) = &record.task.error {
            info!("       错误: {}", message);
        }
    }
    Ok(())
}

/// 删除恢复任务
pub async fn run_delete_restore(app: &CliApp, restore_id: i64) -> Result<()> {
    app.service.delete_restore_task(restore_id).await?;
    info!("🗑️  已删除恢复任务 {}", restore_id);
    Ok(())
}
