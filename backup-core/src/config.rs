use crate::constants::{mysql, paths};
use crate::dialect::Dialect;
use crate::error::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub backup: BackupConfig,
}

/// 服务器相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub upload_dir: String,
}

/// 数据库相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub dialect: Dialect,
    #[serde(default = "default_sqlite_path")]
    pub path: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub dbname: String,
    #[serde(default = "default_dump_command")]
    pub dump_command: String,
    #[serde(default = "default_restore_command")]
    pub restore_command: String,
    #[serde(default)]
    pub extra_dump_args: Vec<String>,
}

/// 备份相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackupConfig {
    pub backup_dir: String,
    pub temp_dir: String,
    #[serde(default = "default_task_db")]
    pub task_db: String,
    #[serde(default)]
    pub stale_task_grace_secs: Option<u64>,
}

fn default_sqlite_path() -> String {
    paths::DEFAULT_SQLITE_PATH.to_string()
}

fn default_mysql_port() -> u16 {
    mysql::DEFAULT_PORT
}

fn default_dump_command() -> String {
    mysql::DUMP_COMMAND.to_string()
}

fn default_restore_command() -> String {
    mysql::RESTORE_COMMAND.to_string()
}

fn default_task_db() -> String {
    paths::DEFAULT_TASK_DB.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                upload_dir: paths::DEFAULT_UPLOAD_DIR.to_string(),
            },
            database: DatabaseConfig {
                dialect: Dialect::Sqlite,
                path: default_sqlite_path(),
                host: "127.0.0.1".to_string(),
                port: default_mysql_port(),
                user: "root".to_string(),
                password: String::new(),
                dbname: "lopic".to_string(),
                dump_command: default_dump_command(),
                restore_command: default_restore_command(),
                extra_dump_args: Vec::new(),
            },
            backup: BackupConfig {
                backup_dir: paths::get_default_backup_dir()
                    .to_string_lossy()
                    .to_string(),
                temp_dir: paths::get_default_temp_dir().to_string_lossy().to_string(),
                task_db: default_task_db(),
                stale_task_grace_secs: None,
            },
        }
    }
}

impl AppConfig {
    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BackupError::ConfigNotFound(path.display().to_string()));
        }

        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        tracing::debug!("已加载配置文件: {}", path.display());

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml_with_comments()?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&path, content)?;
        Ok(())
    }

    /// 生成带注释的TOML配置
    fn to_toml_with_comments(&self) -> Result<String> {
        const TEMPLATE: &str = include_str!("../templates/config.toml.template");

        let content = TEMPLATE
            .replace("{upload_dir}", &escape_toml(&self.server.upload_dir))
            .replace("{database_type}", self.database.dialect.as_str())
            .replace("{database_path}", &escape_toml(&self.database.path))
            .replace("{database_host}", &escape_toml(&self.database.host))
            .replace("{database_port}", &self.database.port.to_string())
            .replace("{database_user}", &escape_toml(&self.database.user))
            .replace("{database_password}", &escape_toml(&self.database.password))
            .replace("{database_name}", &escape_toml(&self.database.dbname))
            .replace("{dump_command}", &escape_toml(&self.database.dump_command))
            .replace(
                "{restore_command}",
                &escape_toml(&self.database.restore_command),
            )
            .replace("{backup_dir}", &escape_toml(&self.backup.backup_dir))
            .replace("{temp_dir}", &escape_toml(&self.backup.temp_dir))
            .replace("{task_db}", &escape_toml(&self.backup.task_db));

        // 模板渲染结果必须仍能被解析回配置
        toml::from_str::<AppConfig>(&content)?;
        Ok(content)
    }

    /// 获取上传根目录
    pub fn get_upload_dir(&self) -> PathBuf {
        PathBuf::from(&self.server.upload_dir)
    }

    /// 获取备份目录路径
    pub fn get_backup_dir(&self) -> PathBuf {
        PathBuf::from(&self.backup.backup_dir)
    }

    /// 获取临时目录路径
    pub fn get_temp_dir(&self) -> PathBuf {
        PathBuf::from(&self.backup.temp_dir)
    }

    /// 任务表所在的 SQLite 文件：SQLite 模式下就是应用数据库本身
    pub fn get_task_db_path(&self) -> PathBuf {
        match self.database.dialect {
            Dialect::Sqlite => PathBuf::from(&self.database.path),
            Dialect::Mysql => PathBuf::from(&self.backup.task_db),
        }
    }

    /// 过期任务判定宽限期，未配置时不做启动清理
    pub fn stale_task_grace(&self) -> Option<Duration> {
        self.backup.stale_task_grace_secs.map(Duration::from_secs)
    }

    /// 确保备份与临时目录存在
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.get_backup_dir())?;
        fs::create_dir_all(self.get_temp_dir())?;
        Ok(())
    }
}

fn escape_toml(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_roundtrip_through_template() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.database.password = "p\"w".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.database.dialect, Dialect::Sqlite);
        assert_eq!(loaded.database.password, "p\"w");
        assert_eq!(loaded.backup.backup_dir, config.backup.backup_dir);
        assert!(loaded.stale_task_grace().is_none());
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempdir().unwrap();
        let err = AppConfig::load_from_file(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, BackupError::ConfigNotFound(_)));
    }

    #[test]
    fn test_unknown_dialect_rejected() {
        let content = r#"
[server]
upload_dir = "uploads"

[database]
type = "postgres"

[backup]
backup_dir = "data/backup"
temp_dir = "data/temp"
"#;
        let err = toml::from_str::<AppConfig>(content).unwrap_err();
        assert!(err.to_string().contains("postgres"));
    }

    #[test]
    fn test_task_db_path_follows_dialect() {
        let mut config = AppConfig::default();
        config.database.path = "app.db".to_string();
        config.backup.task_db = "tasks.db".to_string();
        assert_eq!(config.get_task_db_path(), PathBuf::from("app.db"));

        config.database.dialect = Dialect::Mysql;
        assert_eq!(config.get_task_db_path(), PathBuf::from("tasks.db"));
    }
}
