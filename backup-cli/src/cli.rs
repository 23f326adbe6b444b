use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lopic 备份工具 - 图床数据库与上传文件的备份和恢复
#[derive(Parser, Debug)]
#[command(name = "lopic-backup")]
#[command(version, about)]
pub struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 生成默认配置文件并创建目录结构
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 创建备份（数据库导出 + 上传目录），等待完成
    Backup {
        /// 发起备份的用户ID，完成后向其发送通知
        #[arg(long)]
        user: Option<i64>,
    },
    /// 列出所有备份任务
    ListBackups,
    /// 列出所有恢复记录
    ListRestores,
    /// 查看单个备份任务
    Show {
        /// 备份任务ID
        backup_id: i64,
    },
    /// 从指定备份恢复数据库和上传文件，等待完成
    Restore {
        /// 备份任务ID
        backup_id: i64,
        /// 发起恢复的用户ID，完成后向其发送通知
        #[arg(long)]
        user: Option<i64>,
    },
    /// 导入外部备份归档，登记为一条备份任务
    Upload {
        /// 备份归档文件路径
        file: PathBuf,
    },
    /// 将备份归档复制到指定位置
    Download {
        /// 备份任务ID
        backup_id: i64,
        /// 输出文件路径
        #[arg(short, long)]
        output: PathBuf,
    },
    /// 删除备份任务、归档文件及其恢复记录
    DeleteBackup {
        /// 备份任务ID
        backup_id: i64,
    },
    /// 删除恢复任务
    DeleteRestore {
        /// 恢复任务ID
        restore_id: i64,
    },
    /// 将开始时间超过宽限期仍未结束的任务标记为失败
    RecoverStale {
        /// 宽限期（秒），默认取配置中的值，未配置时为 0
        #[arg(long)]
        grace_secs: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_restore_with_user() {
        let cli = Cli::try_parse_from(["lopic-backup", "-v", "restore", "3", "--user", "7"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("config.toml"));
        match cli.command {
            Commands::Restore { backup_id, user } => {
                assert_eq!(backup_id, 3);
                assert_eq!(user, Some(7));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_download_requires_output() {
        assert!(Cli::try_parse_from(["lopic-backup", "download", "1"]).is_err());

        let cli = Cli::try_parse_from([
            "lopic-backup",
            "-c",
            "/etc/lopic.toml",
            "download",
            "1",
            "-o",
            "out.zip",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/lopic.toml"));
        assert!(matches!(
            cli.command,
            Commands::Download { backup_id: 1, .. }
        ));
    }
}
