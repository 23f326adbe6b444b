// 数据库导出/导入
//
// - mysql: 通过外部 mysqldump / mysql 工具，命令经由可替换的执行器运行
// - sqlite: 在任务库连接上按表白名单生成 SQL，并事务性地回放

pub mod mysql;
pub mod sqlite;

use crate::Result;
use crate::config::DatabaseConfig;
use crate::constants::tables;
use crate::database::Database;
use crate::dialect::Dialect;
use crate::executor::CommandExecutor;
use std::sync::Arc;

pub use mysql::{MysqlDumper, MysqlSettings};
pub use sqlite::SqliteDumper;

/// 当前数据库方言对应的导出/导入器
#[derive(Debug, Clone)]
pub enum DatabaseDumper {
    Mysql(MysqlDumper),
    Sqlite(SqliteDumper),
}

impl DatabaseDumper {
    pub fn from_config(
        config: &DatabaseConfig,
        database: Database,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        match config.dialect {
            Dialect::Mysql => Self::mysql(MysqlSettings::from(config), executor),
            Dialect::Sqlite => Self::sqlite(database),
        }
    }

    pub fn mysql(settings: MysqlSettings, executor: Arc<dyn CommandExecutor>) -> Self {
        Self::Mysql(MysqlDumper::new(settings, executor))
    }

    /// 使用默认表白名单
    pub fn sqlite(database: Database) -> Self {
        let allow_list = tables::APPLICATION_TABLES
            .iter()
            .map(|t| t.to_string())
            .collect();
        Self::Sqlite(SqliteDumper::new(database, allow_list))
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Mysql(_) => Dialect::Mysql,
            Self::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// 导出为可回放的 SQL 文本
    pub async fn export(&self) -> Result<Vec<u8>> {
        match self {
            Self::Mysql(dumper) => dumper.export().await,
            Self::Sqlite(dumper) => dumper.export().await,
        }
    }

    /// 回放 `export` 产生的 SQL
    pub async fn import(&self, sql: Vec<u8>) -> Result<()> {
        match self {
            Self::Mysql(dumper) => dumper.import(sql).await,
            Self::Sqlite(dumper) => dumper.import(sql).await,
        }
    }
}
