/// 归档格式相关常量
pub mod archive {
    /// MySQL 方言的数据库导出文件名
    pub const DATABASE_MYSQL_FILE: &str = "database_mysql.sql";

    /// SQLite 方言的数据库导出文件名
    pub const DATABASE_SQLITE_FILE: &str = "database_sqlite.sql";

    /// 上传文件在归档中的根目录
    pub const UPLOADS_DIR: &str = "uploads";

    /// 备份文件前缀
    pub const BACKUP_PREFIX: &str = "backup_";

    /// 备份文件扩展名
    pub const BACKUP_EXTENSION: &str = ".zip";

    /// 备份文件名中的时间戳格式
    pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

    /// 上传暂存文件前缀
    pub const UPLOAD_STAGING_PREFIX: &str = "upload_";

    /// 上传文件名不可用时的兜底文件名
    pub const FALLBACK_UPLOAD_NAME: &str = "backup.zip";

    /// 恢复时解压临时目录前缀
    pub const RESTORE_SCRATCH_PREFIX: &str = "restore_";
}

/// 默认路径常量
pub mod paths {
    use std::path::{Path, PathBuf};

    /// 数据目录名
    pub const DATA_DIR_NAME: &str = "data";

    /// 备份目录名
    pub const BACKUP_DIR_NAME: &str = "backup";

    /// 临时目录名
    pub const TEMP_DIR_NAME: &str = "temp";

    /// 默认上传目录
    pub const DEFAULT_UPLOAD_DIR: &str = "uploads";

    /// 默认 SQLite 数据库文件
    pub const DEFAULT_SQLITE_PATH: &str = "data/lopic.db";

    /// MySQL 方言下任务表所在的本地数据库文件
    pub const DEFAULT_TASK_DB: &str = "data/backup_tasks.db";

    /// 获取默认备份目录路径（跨平台）
    pub fn get_default_backup_dir() -> PathBuf {
        Path::new(DATA_DIR_NAME).join(BACKUP_DIR_NAME)
    }

    /// 获取默认临时目录路径（跨平台）
    pub fn get_default_temp_dir() -> PathBuf {
        Path::new(DATA_DIR_NAME).join(TEMP_DIR_NAME)
    }
}

/// 数据表相关常量
pub mod tables {
    /// 备份任务表
    pub const BACKUP_TASKS: &str = "backup_tasks";

    /// 恢复任务表
    pub const RESTORE_TASKS: &str = "restore_tasks";

    /// SQLite 方言导出/导入的应用表白名单（任务表本身不在其中）
    pub const APPLICATION_TABLES: &[&str] = &[
        "users",
        "roles",
        "albums",
        "images",
        "system_settings",
        "refresh_token_blacklist",
        "image_albums",
        "storages",
        "password_reset_codes",
    ];
}

/// MySQL 工具相关常量
pub mod mysql {
    /// 导出工具
    pub const DUMP_COMMAND: &str = "mysqldump";

    /// 恢复工具
    pub const RESTORE_COMMAND: &str = "mysql";

    /// 默认端口
    pub const DEFAULT_PORT: u16 = 3306;

    /// 传递密码的环境变量，避免密码出现在进程参数中
    pub const PASSWORD_ENV: &str = "MYSQL_PWD";
}

/// 任务进度通知事件名
pub mod events {
    pub const BACKUP_FAILED: &str = "backup_task_failed";
    pub const BACKUP_COMPLETED: &str = "backup_task_completed";
    pub const RESTORE_FAILED: &str = "restore_task_failed";
    pub const RESTORE_COMPLETED: &str = "restore_task_completed";
}
