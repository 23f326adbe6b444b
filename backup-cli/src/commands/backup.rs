use super::POLL_INTERVAL;
use crate::app::CliApp;
use crate::utils::format_size;
use backup_core::{
    BackupError, Result,
    backup::UploadedArchive,
    database::{BackupTask, TaskStatus},
};
use chrono::{Local, Utc};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

/// 创建备份并等待完成
pub async fn run_backup(app: &CliApp, user: Option<i64>) -> Result<()> {
    info!("💾 创建数据备份");
    info!("===============");
    info!("数据库类型: {}", app.service.dialect());

    let task = match user {
        Some(user_id) => app.service.create_backup_for(user_id).await?,
        None => app.service.create_backup().await?,
    };
    info!("📝 已创建备份任务: {}", task.id);
    info!("⏳ 正在导出数据库并打包上传文件...");

    let task = app.service.wait_for_backup(task.id, POLL_INTERVAL).await?;
    report_backup_result(&task)
}

/// 导入外部备份归档
pub async fn run_upload(app: &CliApp, file: &Path) -> Result<()> {
    info!("📤 导入备份归档: {}", file.display());

    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let upload = UploadedArchive::from_file(file_name, file);

    let task = app
        .service
        .create_upload_backup_task(Utc::now(), upload)
        .await?;
    info!("📝 已创建上传备份任务: {}", task.id);

    let task = app.service.wait_for_backup(task.id, POLL_INTERVAL).await?;
    report_backup_result(&task)?;
    info!("💡 归档内容在恢复时校验，可以运行:");
    info!("   lopic-backup restore {}", task.id);
    Ok(())
}

/// 打印任务结果；任务失败时返回错误，使进程以非零状态退出
fn report_backup_result(task: &BackupTask) -> Result<()> {
    if task.status != TaskStatus::Completed {
        let message = task.error.as_deref().unwrap_or("未知错误");
        error!("❌ 备份任务 {} 失败", task.id);
        error!("   原因: {}", message);
        return Err(BackupError::custom(format!(
            "备份任务 {} 失败: {message}",
            task.id
        )));
    }

    info!("✅ 备份任务 {} 完成", task.id);
    if let Some(path) = &task.storage_path {
        info!("   📁 文件: {}", path);
    }
    info!("   📏 大小: {}", format_size(task.size.unwrap_or_default()));
    Ok(())
}

/// 列出所有备份
pub async fn run_list_backups(app: &CliApp) -> Result<()> {
    let backups = app.service.get_backup_list().await?;

    if backups.is_empty() {
        info!("📦 暂无备份记录");
        info!("💡 使用以下命令创建备份:");
        info!("   lopic-backup backup");
        return Ok(());
    }

    info!("📦 备份列表");
    info!("============");
    info!(
        "{:<6} {:<10} {:<20} {:<10} {}",
        "ID", "状态", "开始时间", "大小", "文件路径"
    );
    info!("{}", "-".repeat(90));

    let mut completed = 0;
    let mut total_size = 0u64;
    for backup in &backups {
        let size_display = match backup.size {
            Some(size) => {
                completed += 1;
                total_size += size;
                format_size(size)
            }
            None => "-".to_string(),
        };
        info!(
            "{:<6} {:<10} {:<20} {:<10} {}",
            backup.id,
            backup.status.as_str(),
            backup
                .start_time
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            size_display,
            backup.storage_path.as_deref().unwrap_or("-")
        );
    }

    info!("{}", "-".repeat(90));
    info!(
        "共 {} 个备份，其中 {} 个已完成，合计 {}",
        backups.len(),
        completed,
        format_size(total_size)
    );
    Ok(())
}

/// 显示单个备份任务的详细信息
pub async fn run_show_backup(app: &CliApp, backup_id: i64) -> Result<()> {
    let task = app.service.get_backup_task_by_id(backup_id).await?;

    info!("📦 备份任务 {}", task.id);
    info!("   状态: {}", task.status);
    info!("   开始时间: {}", task.start_time.with_timezone(&Local));
    if let Some(end_time) = task.end_time {
        info!("   结束时间: {}", end_time.with_timezone(&Local));
    }
    if let Some(size) = task.size {
        info!("   大小: {}", format_size(size));
    }
    if let Some(path) = &task.storage_path {
        info!("   文件: {}", path);
    }
    if let Some(message) = &task.error {
        warn!("   错误: {}", message);
    }
    Ok(())
}

/// 将备份归档复制到指定位置
pub async fn run_download(app: &CliApp, backup_id: i64, output: &Path) -> Result<()> {
    let download = app.service.download_backup(backup_id).await?;
    info!(
        "📥 导出备份 {} ({}, {})",
        backup_id,
        download.file_name,
        format_size(download.size)
    );

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut source = download.open().await?;
    let mut target = tokio::fs::File::create(output).await?;
    let copied = tokio::io::copy(&mut source, &mut target).await?;

    info!("✅ 已写入 {} ({})", output.display(), format_size(copied));
    Ok(())
}

/// 删除备份及其关联的恢复记录
pub async fn run_delete_backup(app: &CliApp, backup_id: i64) -> Result<()> {
    app.service.delete_backup(backup_id).await?;
    info!("🗑️  已删除备份任务 {}", backup_id);
    Ok(())
}

/// 手动执行遗留任务清理
pub async fn run_recover_stale(app: &CliApp, grace_secs: Option<u64>) -> Result<()> {
    let grace = grace_secs
        .map(Duration::from_secs)
        .or_else(|| app.config.stale_task_grace())
        .unwrap_or_default();
    info!("🧹 清理开始时间早于 {} 秒前的未结束任务", grace.as_secs());

    let report = app.service.recover_stale_tasks(grace).await?;
    if report.total() == 0 {
        info!("✅ 没有遗留任务");
    } else {
        info!(
            "✅ 已标记失败: 备份 {} 个, 恢复 {} 个",
            report.backups, report.restores
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Commands;
    use backup_core::config::AppConfig;
    use backup_core::dialect::Dialect;
    use tempfile::{TempDir, tempdir};

    /// MySQL 配置，但导出工具是必定失败的 `false`
    async fn failing_dump_app() -> (TempDir, CliApp) {
        let dir = tempdir().unwrap();
        let root = dir.path();

        let mut config = AppConfig::default();
        config.server.upload_dir = root.join("uploads").to_string_lossy().to_string();
        config.database.dialect = Dialect::Mysql;
        config.database.dump_command = "false".to_string();
        config.database.restore_command = "false".to_string();
        config.backup.backup_dir = root.join("backup").to_string_lossy().to_string();
        config.backup.temp_dir = root.join("temp").to_string_lossy().to_string();
        config.backup.task_db = root.join("tasks.db").to_string_lossy().to_string();

        let config_path = root.join("config.toml");
        config.save_to_file(&config_path).unwrap();
        let app = CliApp::new(&config_path).await.unwrap();
        (dir, app)
    }

    #[tokio::test]
    async fn test_failed_tasks_fail_the_command() {
        let (_dir, app) = failing_dump_app().await;

        let result = app.run_command(Commands::Backup { user: None }).await;
        assert!(result.is_err());

        let backups = app.service.get_backup_list().await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].status, TaskStatus::Failed);

        // 从失败的备份恢复同样返回错误
        let result = app
            .run_command(Commands::Restore {
                backup_id: backups[0].id,
                user: None,
            })
            .await;
        assert!(result.is_err());
        let records = app.service.get_restore_records().await.unwrap();
        assert_eq!(records[0].task.status, TaskStatus::Failed);
    }
}
