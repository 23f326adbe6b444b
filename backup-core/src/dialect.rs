use crate::constants::archive;
use crate::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// 数据库方言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Dialect {
    /// MySQL 系列，通过外部 mysqldump / mysql 工具导出导入
    Mysql,
    /// 嵌入式单文件数据库（SQLite）
    Sqlite,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Mysql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// 该方言在归档根目录中的 SQL 文件名
    pub fn sql_file_name(&self) -> &'static str {
        match self {
            Dialect::Mysql => archive::DATABASE_MYSQL_FILE,
            Dialect::Sqlite => archive::DATABASE_SQLITE_FILE,
        }
    }

    /// 根据解压目录中存在的 SQL 文件判断备份来源方言
    pub fn detect_in_dir(extract_dir: &Path) -> Result<Self> {
        let has_mysql = extract_dir.join(archive::DATABASE_MYSQL_FILE).is_file();
        let has_sqlite = extract_dir.join(archive::DATABASE_SQLITE_FILE).is_file();

        match (has_mysql, has_sqlite) {
            (true, false) => Ok(Dialect::Mysql),
            (false, true) => Ok(Dialect::Sqlite),
            (true, true) => Err(BackupError::AmbiguousDbBackup),
            (false, false) => Err(BackupError::NoValidDbBackup),
        }
    }

    /// 校验备份方言与当前数据库方言一致
    pub fn ensure_matches(&self, current: Dialect) -> Result<()> {
        if *self != current {
            return Err(BackupError::DialectMismatch {
                backup: self.as_str().to_string(),
                current: current.as_str().to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(Dialect::Mysql),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            other => Err(BackupError::UnsupportedDialect(other.to_string())),
        }
    }
}

impl TryFrom<String> for Dialect {
    type Error = BackupError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Dialect> for String {
    fn from(dialect: Dialect) -> Self {
        dialect.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_dialect() {
        assert_eq!("mysql".parse::<Dialect>().unwrap(), Dialect::Mysql);
        assert_eq!("SQLite".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert!(matches!(
            "postgres".parse::<Dialect>(),
            Err(BackupError::UnsupportedDialect(_))
        ));
    }

    #[test]
    fn test_detect_in_dir() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Dialect::detect_in_dir(dir.path()),
            Err(BackupError::NoValidDbBackup)
        ));

        std::fs::write(dir.path().join("database_sqlite.sql"), "").unwrap();
        assert_eq!(Dialect::detect_in_dir(dir.path()).unwrap(), Dialect::Sqlite);

        std::fs::write(dir.path().join("database_mysql.sql"), "").unwrap();
        assert!(matches!(
            Dialect::detect_in_dir(dir.path()),
            Err(BackupError::AmbiguousDbBackup)
        ));
    }

    #[test]
    fn test_ensure_matches() {
        assert!(Dialect::Sqlite.ensure_matches(Dialect::Sqlite).is_ok());
        let err = Dialect::Mysql.ensure_matches(Dialect::Sqlite).unwrap_err();
        assert!(matches!(err, BackupError::DialectMismatch { .. }));
    }
}
