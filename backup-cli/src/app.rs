use anyhow::Context;
use backup_core::{backup::BackupService, config::AppConfig, notifier::LogNotifier};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::cli::Commands;
use crate::commands;

#[derive(Clone)]
pub struct CliApp {
    pub config: AppConfig,
    pub service: BackupService,
}

impl CliApp {
    /// 加载配置并初始化备份服务
    ///
    /// 配置了宽限期时，先把上次进程遗留的未结束任务标记为失败。
    pub async fn new(config_path: &Path) -> anyhow::Result<Self> {
        let config = AppConfig::load_from_file(config_path)
            .with_context(|| format!("加载配置文件 {} 失败", config_path.display()))?;
        config.ensure_dirs()?;

        let service = BackupService::from_config(&config)
            .await
            .context("初始化备份服务失败")?
            .with_notifier(Arc::new(LogNotifier));

        if let Some(grace) = config.stale_task_grace() {
            let report = service.recover_stale_tasks(grace).await?;
            if report.total() > 0 {
                info!(
                    "🧹 已清理遗留任务: 备份 {} 个, 恢复 {} 个",
                    report.backups, report.restores
                );
            }
        }

        Ok(Self { config, service })
    }

    /// 运行应用命令
    pub async fn run_command(&self, command: Commands) -> backup_core::Result<()> {
        match command {
            Commands::Init { .. } => unreachable!(), // 已经在 main.rs 中处理
            Commands::Backup { user } => commands::run_backup(self, user).await,
            Commands::ListBackups => commands::run_list_backups(self).await,
            Commands::ListRestores => commands::run_list_restores(self).await,
            Commands::Show { backup_id } => commands::run_show_backup(self, backup_id).await,
            Commands::Restore { backup_id, user } => {
                commands::run_restore(self, backup_id, user).await
            }
            Commands::Upload { file } => commands::run_upload(self, &file).await,
            Commands::Download { backup_id, output } => {
                commands::run_download(self, backup_id, &output).await
            }
            Commands::DeleteBackup { backup_id } => {
                commands::run_delete_backup(self, backup_id).await
            }
            Commands::DeleteRestore { restore_id } => {
                commands::run_delete_restore(self, restore_id).await
            }
            Commands::RecoverStale { grace_secs } => {
                commands::run_recover_stale(self, grace_secs).await
            }
        }
    }
}
