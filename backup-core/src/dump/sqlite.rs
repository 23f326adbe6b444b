use crate::database::Database;
use crate::{BackupError, Result};
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, params};
use std::fmt::Write as _;
use tracing::{debug, info, warn};

/// SQLite 标识符：双引号、反引号、方括号包裹，或不带引号的单词
macro_rules! identifier {
    () => {
        r#"(?:"(?:[^"]|"")+"|`(?:[^`]|``)+`|\[[^\]]+\]|\w+)"#
    };
}

/// 允许出现在 SQLite 备份中的语句：建表、建索引、插入，并捕获目标表名
const ALLOWED_STATEMENT: &str = concat!(
    r"(?is)^\s*(?:CREATE\s+TABLE(?:\s+IF\s+NOT\s+EXISTS)?|INSERT\s+(?:OR\s+[A-Z]+\s+)?INTO|CREATE\s+(?:UNIQUE\s+)?INDEX(?:\s+IF\s+NOT\s+EXISTS)?\s+",
    identifier!(),
    r"\s+ON)\s*(",
    identifier!(),
    r")"
);

/// SQLite 方言的导出/导入器，所有操作都经由任务库连接执行
#[derive(Debug, Clone)]
pub struct SqliteDumper {
    database: Database,
    tables: Vec<String>,
}

impl SqliteDumper {
    pub fn new(database: Database, tables: Vec<String>) -> Self {
        Self { database, tables }
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub async fn export(&self) -> Result<Vec<u8>> {
        let sql = self.database.export_tables(&self.tables).await?;
        Ok(sql.into_bytes())
    }

    pub async fn import(&self, sql: Vec<u8>) -> Result<()> {
        let sql = String::from_utf8(sql)
            .map_err(|e| BackupError::sql_replay(format!("SQL 文件不是合法的 UTF-8: {e}")))?;
        let executed = self.database.import_tables(sql, &self.tables).await?;
        info!("SQLite 数据恢复完成，共执行 {} 条语句", executed);
        Ok(())
    }
}

/// 导出白名单中的表：建表语句、逐行 INSERT、相关索引
///
/// 所有表在同一个读事务内导出，得到一致的快照；不存在的表被跳过。
pub fn export_tables(conn: &mut Connection, tables: &[String]) -> Result<String> {
    let tx = conn.transaction()?;
    let mut out = String::new();

    for table in tables {
        let create_sql: Option<String> = tx
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;

        let Some(create_sql) = create_sql else {
            debug!("表 {} 不存在，跳过导出", table);
            continue;
        };

        let _ = writeln!(out, "{create_sql};\n");

        let mut stmt = tx.prepare(&format!("SELECT * FROM {}", quote_identifier(table)))?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query([])?;
        let mut row_count = 0usize;

        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(sql_literal(row.get_ref(i)?));
            }
            let _ = writeln!(out, "INSERT INTO {} VALUES ({});", table, values.join(", "));
            row_count += 1;
        }
        drop(rows);
        drop(stmt);

        let mut index_stmt = tx.prepare(
            "SELECT sql FROM sqlite_master
             WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL",
        )?;
        let indexes = index_stmt
            .query_map(params![table], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for index_sql in indexes {
            let _ = writeln!(out, "{index_sql};");
        }

        out.push('\n');
        debug!("已导出表 {} ({} 行)", table, row_count);
    }

    tx.commit()?;
    Ok(out)
}

/// 在单个事务中回放导出的 SQL
///
/// 回放前先校验全部语句；白名单表先被删除再重建，任一语句失败则整体回滚。
/// 执行期间关闭外键检查，结束后无论成败都重新开启。
pub fn import_tables(conn: &mut Connection, sql: &str, tables: &[String]) -> Result<usize> {
    let statements = split_statements(sql);
    let guard = StatementGuard::new(tables)?;
    for statement in &statements {
        guard.check(statement)?;
    }

    // foreign_keys 在事务内修改无效，必须在 BEGIN 之前关闭
    conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
    let result = replay(conn, &statements, tables);

    if let Err(e) = conn.execute_batch("PRAGMA foreign_keys = ON;") {
        warn!("重新开启外键检查失败: {}", e);
        if result.is_ok() {
            return Err(e.into());
        }
    }
    result
}

fn replay(conn: &mut Connection, statements: &[String], tables: &[String]) -> Result<usize> {
    let tx = conn.transaction()?;

    for table in tables {
        tx.execute(
            &format!("DROP TABLE IF EXISTS {}", quote_identifier(table)),
            [],
        )
        .map_err(|e| BackupError::sql_replay(format!("删除表 {table} 失败: {e}")))?;
    }

    for (index, statement) in statements.iter().enumerate() {
        tx.execute(statement, []).map_err(|e| {
            BackupError::sql_replay(format!("第 {} 条语句执行失败: {}", index + 1, e))
        })?;
    }

    tx.commit()?;
    Ok(statements.len())
}

/// 语句白名单：只允许对白名单表执行 CREATE TABLE / CREATE INDEX / INSERT
pub struct StatementGuard<'a> {
    pattern: Regex,
    tables: &'a [String],
}

impl<'a> StatementGuard<'a> {
    pub fn new(tables: &'a [String]) -> Result<Self> {
        let pattern = Regex::new(ALLOWED_STATEMENT)
            .map_err(|e| BackupError::custom(format!("语句白名单表达式无效: {e}")))?;
        Ok(Self { pattern, tables })
    }

    pub fn check(&self, statement: &str) -> Result<()> {
        let forbidden = || BackupError::ForbiddenStatement(preview(statement));

        let captures = self.pattern.captures(statement).ok_or_else(forbidden)?;
        let table = captures
            .get(1)
            .map(|m| unquote_identifier(m.as_str()))
            .ok_or_else(forbidden)?;

        if self.tables.iter().any(|t| t.eq_ignore_ascii_case(&table)) {
            Ok(())
        } else {
            Err(forbidden())
        }
    }
}

/// 去掉标识符外层引号并还原连写的引号
fn unquote_identifier(identifier: &str) -> String {
    let mut chars = identifier.chars();
    match (chars.next(), chars.next_back()) {
        (Some(open @ ('"' | '`')), Some(close)) if open == close => {
            let quote = open.to_string();
            chars.as_str().replace(&quote.repeat(2), &quote)
        }
        (Some('['), Some(']')) => chars.as_str().to_string(),
        _ => identifier.to_string(),
    }
}

fn preview(statement: &str) -> String {
    const MAX_CHARS: usize = 80;
    let mut text: String = statement.chars().take(MAX_CHARS).collect();
    if statement.chars().count() > MAX_CHARS {
        text.push_str("...");
    }
    text
}

/// 按 `;` 切分 SQL，忽略字符串与引号标识符内部的分号，并去掉注释
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                current.push(c);
                while let Some(next) = chars.next() {
                    current.push(next);
                    if next == c {
                        // 连写两个引号是转义
                        match chars.next_if_eq(&c) {
                            Some(escaped) => current.push(escaped),
                            None => break,
                        }
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
                current.push('\n');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for next in chars.by_ref() {
                    if previous == '*' && next == '/' {
                        break;
                    }
                    previous = next;
                }
                current.push(' ');
            }
            ';' => {
                push_statement(&mut statements, &current);
                current.clear();
            }
            _ => current.push(c),
        }
    }
    push_statement(&mut statements, &current);

    statements
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
}

/// 将单个值渲染为 SQL 字面量
pub fn sql_literal(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) if f.is_nan() => "NULL".to_string(),
        // SQLite 把超出范围的字面量解析为 ±Inf
        ValueRef::Real(f) if f.is_infinite() => {
            let literal = if f > 0.0 { "9e999" } else { "-9e999" };
            literal.to_string()
        }
        ValueRef::Real(f) => format!("{f:?}"),
        ValueRef::Text(bytes) => quote_text(&String::from_utf8_lossy(bytes)),
        ValueRef::Blob(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2 + 3);
            hex.push_str("X'");
            for b in bytes {
                let _ = write!(hex, "{b:02X}");
            }
            hex.push('\'');
            hex
        }
    }
}

fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(tables: &[&str]) -> Vec<String> {
        tables.iter().map(|t| t.to_string()).collect()
    }

    fn seed(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, quota REAL, avatar BLOB);
             CREATE TABLE images (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id), path TEXT);
             CREATE INDEX idx_images_user ON images(user_id);
             CREATE TABLE secrets (id INTEGER PRIMARY KEY, token TEXT);
             INSERT INTO users VALUES (1, 'O''Brien; admin', 1.5, X'00FF10');
             INSERT INTO users VALUES (2, '-- not a comment', NULL, NULL);
             INSERT INTO images VALUES (10, 1, 'a/b.png');
             INSERT INTO secrets VALUES (1, 'keep-out');",
        )
        .unwrap();
    }

    #[test]
    fn test_export_import_roundtrip() {
        let mut source = Connection::open_in_memory().unwrap();
        seed(&source);
        let tables = allow(&["users", "images", "missing_table"]);

        let sql = export_tables(&mut source, &tables).unwrap();
        assert!(sql.contains("INSERT INTO users VALUES (1, 'O''Brien; admin', 1.5, X'00FF10');"));
        assert!(sql.contains("CREATE INDEX idx_images_user ON images(user_id);"));
        assert!(!sql.contains("secrets"));

        let mut target = Connection::open_in_memory().unwrap();
        target
            .execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, stale TEXT);")
            .unwrap();
        target
            .execute_batch("INSERT INTO users VALUES (99, 'stale');")
            .unwrap();

        let executed = import_tables(&mut target, &sql, &tables).unwrap();
        assert_eq!(executed, 6);

        let (name, avatar): (String, Vec<u8>) = target
            .query_row("SELECT name, avatar FROM users WHERE id = 1", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(name, "O'Brien; admin");
        assert_eq!(avatar, vec![0x00, 0xFF, 0x10]);

        let count: i64 = target
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);

        let fk: i64 = target
            .query_row("PRAGMA foreign_keys", [], |r| r.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_failed_replay_rolls_back() {
        let mut conn = Connection::open_in_memory().unwrap();
        seed(&conn);
        let tables = allow(&["users", "images"]);

        let sql = "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
                   INSERT INTO users VALUES (1, 'a');
                   INSERT INTO users VALUES (1, 'duplicate');";
        let err = import_tables(&mut conn, sql, &tables).unwrap_err();
        assert!(matches!(err, BackupError::SqlReplay(_)));

        // 原有数据与表结构都保留
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM images", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let name: String = conn
            .query_row("SELECT name FROM users WHERE id = 2", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "-- not a comment");
    }

    #[test]
    fn test_forbidden_statements_rejected_before_changes() {
        let mut conn = Connection::open_in_memory().unwrap();
        seed(&conn);
        let tables = allow(&["users", "images"]);

        for sql in [
            "INSERT INTO users VALUES (5, 'x'); DROP TABLE secrets;",
            "INSERT INTO secrets VALUES (2, 'x');",
            "UPDATE users SET name = 'x';",
            "CREATE TRIGGER t AFTER INSERT ON users BEGIN DELETE FROM secrets; END;",
        ] {
            let err = import_tables(&mut conn, sql, &tables).unwrap_err();
            assert!(matches!(err, BackupError::ForbiddenStatement(_)), "{sql}");
        }

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_statement_guard_accepts_allowed_forms() {
        let tables = allow(&["users", "images"]);
        let guard = StatementGuard::new(&tables).unwrap();
        for sql in [
            "CREATE TABLE users (id INTEGER)",
            "CREATE TABLE IF NOT EXISTS \"users\" (id INTEGER)",
            "create unique index idx_users_name on users(name)",
            "INSERT INTO `images` VALUES (1)",
            "INSERT OR REPLACE INTO users VALUES (1)",
        ] {
            assert!(guard.check(sql).is_ok(), "{sql}");
        }
    }

    #[test]
    fn test_quoted_identifiers_roundtrip() {
        let mut source = Connection::open_in_memory().unwrap();
        source
            .execute_batch(
                "CREATE TABLE \"users\" (id INTEGER PRIMARY KEY, name TEXT);
                 CREATE INDEX \"idx-users-name\" ON users(name);
                 CREATE UNIQUE INDEX [idx users id] ON \"users\"(id);
                 INSERT INTO users VALUES (1, 'alice');",
            )
            .unwrap();
        let tables = allow(&["users"]);

        let sql = export_tables(&mut source, &tables).unwrap();
        assert!(sql.contains("CREATE INDEX \"idx-users-name\" ON users(name);"));

        let mut target = Connection::open_in_memory().unwrap();
        import_tables(&mut target, &sql, &tables).unwrap();

        let indexes: i64 = target
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = 'users' AND sql IS NOT NULL",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(indexes, 2);
        let name: String = target
            .query_row("SELECT name FROM users WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "alice");
    }

    #[test]
    fn test_statement_guard_unquotes_table_names() {
        let tables = allow(&["users"]);
        let guard = StatementGuard::new(&tables).unwrap();
        for sql in [
            "CREATE INDEX \"idx-a\" ON [users](id)",
            "CREATE INDEX `idx``b` ON `users`(id)",
            "INSERT INTO \"users\" VALUES (1)",
        ] {
            assert!(guard.check(sql).is_ok(), "{sql}");
        }
        for sql in [
            "INSERT INTO \"secrets\" VALUES (1)",
            "CREATE INDEX \"idx\" ON \"users-archive\"(id)",
            "INSERT INTO \"users\"\"x\" VALUES (1)",
        ] {
            assert!(guard.check(sql).is_err(), "{sql}");
        }
        assert_eq!(unquote_identifier("\"a\"\"b\""), "a\"b");
        assert_eq!(unquote_identifier("[a b]"), "a b");
        assert_eq!(unquote_identifier("plain"), "plain");
    }

    #[test]
    fn test_split_statements_respects_quotes_and_comments() {
        let sql = "-- header\nINSERT INTO users VALUES (1, 'a;b');\n\
                   /* block ; comment */ INSERT INTO users VALUES (2, 'it''s -- fine');\n\
                   INSERT INTO users VALUES (3, \"x;y\")";
        let statements = split_statements(sql);
        assert_eq!(
            statements,
            vec![
                "INSERT INTO users VALUES (1, 'a;b')",
                "INSERT INTO users VALUES (2, 'it''s -- fine')",
                "INSERT INTO users VALUES (3, \"x;y\")",
            ]
        );
    }

    #[test]
    fn test_sql_literals() {
        assert_eq!(sql_literal(ValueRef::Null), "NULL");
        assert_eq!(sql_literal(ValueRef::Integer(-7)), "-7");
        assert_eq!(sql_literal(ValueRef::Real(2.0)), "2.0");
        assert_eq!(sql_literal(ValueRef::Real(f64::INFINITY)), "9e999");
        assert_eq!(sql_literal(ValueRef::Text(b"it's")), "'it''s'");
        assert_eq!(sql_literal(ValueRef::Blob(&[0xAB, 0x01])), "X'AB01'");
    }
}
