//! Local SQL store
//!
//! Statements are opaque strings; the engine only needs enough catalog access
//! to scan, copy and checksum whole tables.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use ts_core::protocol::{ResultSet, TableDump};
use ts_core::{ChecksumDigest, ClusterError, Value};

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("table {0} does not exist")]
    NoSuchTable(String),
}

impl From<SqlError> for ClusterError {
    fn from(err: SqlError) -> Self {
        match err {
            SqlError::NoSuchTable(table) => ClusterError::TableNotFound(table),
            SqlError::Sqlite(e) => ClusterError::Execution(e.to_string()),
        }
    }
}

/// Connection to the embedded relational engine
pub trait SqlEngine: Send + Sync {
    /// Run one mutating statement, returning affected rows
    fn execute(&self, sql: &str) -> Result<usize, SqlError>;

    /// Run statements in one transaction
    fn execute_batch(&self, statements: &[String]) -> Result<usize, SqlError>;

    fn query(&self, sql: &str) -> Result<ResultSet, SqlError>;

    fn table_exists(&self, table: &str) -> Result<bool, SqlError>;

    fn list_tables(&self) -> Result<Vec<String>, SqlError>;

    /// First primary-key column, if any
    fn primary_key(&self, table: &str) -> Result<Option<String>, SqlError>;

    /// Every row, in primary-key order (insertion order without a key)
    fn scan_table(&self, table: &str) -> Result<ResultSet, SqlError>;

    /// Schema and rows, `None` when the table does not exist
    fn dump_table(&self, table: &str) -> Result<Option<TableDump>, SqlError>;

    /// Drop, re-create and refill a table from a dump, atomically
    fn replace_table(&self, dump: &TableDump) -> Result<(), SqlError>;

    fn drop_table(&self, table: &str) -> Result<(), SqlError>;

    /// Checksum over a full scan. An absent table checksums as empty.
    fn table_checksum(&self, table: &str) -> Result<ChecksumDigest, SqlError> {
        if !self.table_exists(table)? {
            return Ok(ChecksumDigest::EMPTY);
        }
        Ok(self.scan_table(table)?.checksum())
    }
}

/// Quote an identifier for generated SQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `INSERT INTO t (cols) VALUES (literals)` for one row
pub fn insert_statement(table: &str, columns: &[String], row: &[Value]) -> String {
    let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let values: Vec<String> = row.iter().map(Value::to_sql_literal).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.join(", "),
        values.join(", ")
    )
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(r) => SqlValue::Real(*r),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

/// SQLite-backed engine
pub struct SqliteEngine {
    conn: Mutex<Connection>,
}

impl SqliteEngine {
    /// Open a database file (`:memory:` opens a private in-memory store)
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqlError> {
        let conn = if path.as_ref() == Path::new(":memory:") {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, SqlError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn query_locked(conn: &Connection, sql: &str) -> Result<ResultSet, SqlError> {
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();
        let mut cursor = stmt.query([])?;
        let mut rows = Vec::new();
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_sql(row.get_ref(i)?));
            }
            rows.push(values);
        }
        Ok(ResultSet { columns, rows })
    }

    fn create_sql_locked(conn: &Connection, table: &str) -> Result<Option<String>, SqlError> {
        let sql = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(sql)
    }

    fn primary_key_locked(conn: &Connection, table: &str) -> Result<Option<String>, SqlError> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let mut keys: Vec<(i64, String)> = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(5)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        keys.retain(|(pk, _)| *pk > 0);
        keys.sort();
        Ok(keys.into_iter().next().map(|(_, name)| name))
    }

    fn scan_locked(conn: &Connection, table: &str) -> Result<ResultSet, SqlError> {
        let order = match Self::primary_key_locked(conn, table)? {
            Some(pk) => quote_ident(&pk),
            None => "rowid".to_string(),
        };
        Self::query_locked(
            conn,
            &format!("SELECT * FROM {} ORDER BY {}", quote_ident(table), order),
        )
    }
}

impl SqlEngine for SqliteEngine {
    fn execute(&self, sql: &str) -> Result<usize, SqlError> {
        Ok(self.conn.lock().execute(sql, [])?)
    }

    fn execute_batch(&self, statements: &[String]) -> Result<usize, SqlError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut affected = 0;
        for sql in statements {
            affected += tx.execute(sql, [])?;
        }
        tx.commit()?;
        Ok(affected)
    }

    fn query(&self, sql: &str) -> Result<ResultSet, SqlError> {
        let conn = self.conn.lock();
        Self::query_locked(&conn, sql)
    }

    fn table_exists(&self, table: &str) -> Result<bool, SqlError> {
        let conn = self.conn.lock();
        Ok(Self::create_sql_locked(&conn, table)?.is_some())
    }

    fn list_tables(&self) -> Result<Vec<String>, SqlError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn primary_key(&self, table: &str) -> Result<Option<String>, SqlError> {
        let conn = self.conn.lock();
        if Self::create_sql_locked(&conn, table)?.is_none() {
            return Err(SqlError::NoSuchTable(table.to_string()));
        }
        Self::primary_key_locked(&conn, table)
    }

    fn scan_table(&self, table: &str) -> Result<ResultSet, SqlError> {
        let conn = self.conn.lock();
        if Self::create_sql_locked(&conn, table)?.is_none() {
            return Err(SqlError::NoSuchTable(table.to_string()));
        }
        Self::scan_locked(&conn, table)
    }

    fn dump_table(&self, table: &str) -> Result<Option<TableDump>, SqlError> {
        let conn = self.conn.lock();
        let Some(create_sql) = Self::create_sql_locked(&conn, table)? else {
            return Ok(None);
        };
        let scan = Self::scan_locked(&conn, table)?;
        Ok(Some(TableDump {
            table_name: table.to_string(),
            create_sql,
            columns: scan.columns,
            rows: scan.rows,
        }))
    }

    fn replace_table(&self, dump: &TableDump) -> Result<(), SqlError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            &format!("DROP TABLE IF EXISTS {}", quote_ident(&dump.table_name)),
            [],
        )?;
        tx.execute(&dump.create_sql, [])?;
        if !dump.rows.is_empty() {
            let placeholders = vec!["?"; dump.columns.len()].join(", ");
            let columns: Vec<String> = dump.columns.iter().map(|c| quote_ident(c)).collect();
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(&dump.table_name),
                columns.join(", "),
                placeholders
            ))?;
            for row in &dump.rows {
                stmt.execute(params_from_iter(row.iter().map(to_sql)))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn drop_table(&self, table: &str) -> Result<(), SqlError> {
        self.conn
            .lock()
            .execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)), [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_orders() -> SqliteEngine {
        let engine = SqliteEngine::open_in_memory().unwrap();
        engine
            .execute("CREATE TABLE orders (id TEXT PRIMARY KEY, qty INTEGER, note TEXT)")
            .unwrap();
        engine
            .execute_batch(&[
                "INSERT INTO orders VALUES ('b', 2, NULL)".to_string(),
                "INSERT INTO orders VALUES ('a', 1, 'first')".to_string(),
            ])
            .unwrap();
        engine
    }

    #[test]
    fn test_scan_is_in_key_order() {
        let engine = engine_with_orders();
        let scan = engine.scan_table("orders").unwrap();
        assert_eq!(scan.columns, vec!["id", "qty", "note"]);
        assert_eq!(scan.rows[0][0], Value::Text("a".into()));
        assert_eq!(scan.rows[1][2], Value::Null);
        assert_eq!(engine.primary_key("orders").unwrap().as_deref(), Some("id"));
    }

    #[test]
    fn test_missing_table() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        assert!(!engine.table_exists("nope").unwrap());
        assert_eq!(engine.table_checksum("nope").unwrap(), ChecksumDigest::EMPTY);
        assert!(engine.dump_table("nope").unwrap().is_none());
        assert!(matches!(engine.scan_table("nope"), Err(SqlError::NoSuchTable(_))));
    }

    #[test]
    fn test_batch_is_atomic() {
        let engine = engine_with_orders();
        let before = engine.table_checksum("orders").unwrap();
        let result = engine.execute_batch(&[
            "INSERT INTO orders VALUES ('c', 3, NULL)".to_string(),
            "INSERT INTO orders VALUES ('a', 9, NULL)".to_string(),
        ]);
        assert!(result.is_err());
        assert_eq!(engine.table_checksum("orders").unwrap(), before);
    }

    #[test]
    fn test_replace_table_converges_checksum() {
        let source = engine_with_orders();
        let replica = SqliteEngine::open_in_memory().unwrap();
        replica.execute("CREATE TABLE orders (id TEXT PRIMARY KEY, qty INTEGER, note TEXT)").unwrap();
        replica.execute("INSERT INTO orders VALUES ('zz', 0, 'stale')").unwrap();
        assert_ne!(
            replica.table_checksum("orders").unwrap(),
            source.table_checksum("orders").unwrap()
        );

        let dump = source.dump_table("orders").unwrap().unwrap();
        replica.replace_table(&dump).unwrap();
        assert_eq!(
            replica.table_checksum("orders").unwrap(),
            source.table_checksum("orders").unwrap()
        );
    }

    #[test]
    fn test_insert_statement_round_trips_values() {
        let engine = engine_with_orders();
        let row = vec![
            Value::Text("it's".into()),
            Value::Integer(5),
            Value::Null,
        ];
        let columns = vec!["id".to_string(), "qty".to_string(), "note".to_string()];
        engine.execute(&insert_statement("orders", &columns, &row)).unwrap();
        let result = engine.query("SELECT * FROM orders WHERE qty = 5").unwrap();
        assert_eq!(result.rows, vec![row]);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.db");
        {
            let engine = SqliteEngine::open(&path).unwrap();
            engine.execute("CREATE TABLE t (k INTEGER PRIMARY KEY)").unwrap();
            engine.execute("INSERT INTO t VALUES (1)").unwrap();
        }
        let engine = SqliteEngine::open(&path).unwrap();
        assert_eq!(engine.list_tables().unwrap(), vec!["t"]);
        assert_eq!(engine.scan_table("t").unwrap().rows.len(), 1);
    }
}
