use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

/// 错误分类，供上层（HTTP 层 / CLI）决定如何呈现
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 输入错误：未知 ID、非法上传、未完成或方言不匹配的备份，均在产生副作用前拒绝
    Input,
    /// 归档安全错误：解压时检测到路径穿越
    ArchiveSafety,
    /// 外部工具错误：子进程失败
    Tooling,
    /// 事务错误：SQL 回放失败，已整体回滚
    Transactional,
    /// 其他内部错误
    Internal,
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("配置解析错误: {0}")]
    Config(#[from] toml::de::Error),

    #[error("配置文件未找到: {0}")]
    ConfigNotFound(String),

    #[error("SQLite数据库错误: {0}")]
    Sqlite(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("ZIP 文件错误: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("目录遍历错误: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("路径错误: {0}")]
    StripPrefix(#[from] std::path::StripPrefixError),

    #[error("备份任务不存在: {0}")]
    BackupTaskNotFound(i64),

    #[error("恢复任务不存在: {0}")]
    RestoreTaskNotFound(i64),

    #[error("备份任务状态不是 completed: {0}")]
    BackupNotCompleted(String),

    #[error("备份文件不存在: {0}")]
    BackupFileMissing(String),

    #[error("归档中没有有效的数据库备份文件")]
    NoValidDbBackup,

    #[error("归档中同时包含 MySQL 与 SQLite 数据库备份文件")]
    AmbiguousDbBackup,

    #[error("备份数据库类型 {backup} 与当前数据库类型 {current} 不一致")]
    DialectMismatch { backup: String, current: String },

    #[error("不支持的数据库类型: {0}，仅支持 sqlite 和 mysql")]
    UnsupportedDialect(String),

    #[error("上传文件无效: {0}")]
    InvalidUpload(String),

    #[error("检测到 Zip Slip 攻击，非法文件名: {0}")]
    ZipSlip(String),

    #[error("外部命令不可用: {0}")]
    ToolNotFound(String),

    #[error("数据库导出失败: {0}")]
    DumpTool(String),

    #[error("数据库恢复失败: {0}")]
    RestoreTool(String),

    #[error("执行 SQL 失败: {0}")]
    SqlReplay(String),

    #[error("备份中包含不允许执行的语句: {0}")]
    ForbiddenStatement(String),

    #[error("自定义错误: {0}")]
    Custom(String),
}

// 为SQLite错误实现From trait
impl From<rusqlite::Error> for BackupError {
    fn from(err: rusqlite::Error) -> Self {
        BackupError::Sqlite(err.to_string())
    }
}

impl BackupError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn dump_tool(msg: impl Into<String>) -> Self {
        Self::DumpTool(msg.into())
    }

    pub fn restore_tool(msg: impl Into<String>) -> Self {
        Self::RestoreTool(msg.into())
    }

    pub fn sql_replay(msg: impl Into<String>) -> Self {
        Self::SqlReplay(msg.into())
    }

    pub fn zip_slip(name: impl Into<String>) -> Self {
        Self::ZipSlip(name.into())
    }

    /// 按错误分类归类：输入、归档安全、外部工具、事务、内部
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::BackupTaskNotFound(_)
            | Self::RestoreTaskNotFound(_)
            | Self::BackupNotCompleted(_)
            | Self::BackupFileMissing(_)
            | Self::NoValidDbBackup
            | Self::AmbiguousDbBackup
            | Self::DialectMismatch { .. }
            | Self::UnsupportedDialect(_)
            | Self::InvalidUpload(_)
            | Self::ForbiddenStatement(_) => ErrorCategory::Input,
            Self::ZipSlip(_) => ErrorCategory::ArchiveSafety,
            Self::ToolNotFound(_) | Self::DumpTool(_) | Self::RestoreTool(_) => {
                ErrorCategory::Tooling
            }
            Self::SqlReplay(_) => ErrorCategory::Transactional,
            _ => ErrorCategory::Internal,
        }
    }

    /// 是否为归档安全错误
    pub fn is_security(&self) -> bool {
        self.category() == ErrorCategory::ArchiveSafety
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            BackupError::zip_slip("../evil.txt").category(),
            ErrorCategory::ArchiveSafety
        );
        assert!(BackupError::zip_slip("/etc/passwd").is_security());
        assert_eq!(
            BackupError::DialectMismatch {
                backup: "mysql".into(),
                current: "sqlite".into()
            }
            .category(),
            ErrorCategory::Input
        );
        assert_eq!(
            BackupError::dump_tool("exit 2").category(),
            ErrorCategory::Tooling
        );
        assert_eq!(
            BackupError::sql_replay("no such table").category(),
            ErrorCategory::Transactional
        );
        assert_eq!(
            BackupError::custom("boom").category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = BackupError::DialectMismatch {
            backup: "mysql".into(),
            current: "sqlite".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("mysql") && msg.contains("sqlite"));

        let err = BackupError::restore_tool("ERROR 1064 (42000)");
        assert!(err.to_string().contains("ERROR 1064"));
    }
}
