//! SQLite backend for [`KgConnection`].
//!
//! Batches are written inside a single transaction, chunked at
//! [`CHUNKSIZE`] rows, so a reader never sees a half-written batch. A
//! replace batch deletes and inserts under that same transaction.

use std::path::{Path, PathBuf};

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, ToSql, Transaction};

use crate::{
    BatchStats, KgConnection, Row, StoreError, StoreResult, TableSchema, Value, CHUNKSIZE,
    ID_COLUMN,
};

pub struct SqliteConnection {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteConnection {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened sqlite store");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            path: None,
        })
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Integer(n),
        ValueRef::Real(x) => Value::Real(x),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(n) => ToSqlOutput::Borrowed(ValueRef::Integer(*n)),
            Value::Real(x) => ToSqlOutput::Borrowed(ValueRef::Real(*x)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn insert_sql(table: &str, row: &Row) -> String {
    let columns: Vec<String> = row.columns().map(quote_ident).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.join(", "),
        placeholders
    )
}

/// Insert `rows` in [`CHUNKSIZE`] chunks inside `tx`.
fn insert_in(tx: &Transaction<'_>, table: &str, rows: &[Row]) -> StoreResult<usize> {
    if rows.iter().any(Row::is_empty) {
        return Err(StoreError::EmptyRow);
    }
    let mut written = 0usize;
    for chunk in rows.chunks(CHUNKSIZE) {
        for row in chunk {
            let mut stmt = tx.prepare_cached(&insert_sql(table, row))?;
            stmt.execute(params_from_iter(row.iter().map(|(_, v)| v)))?;
            written += 1;
        }
        tracing::debug!(table, written, "inserted chunk");
    }
    Ok(written)
}

fn delete_in(tx: &Transaction<'_>, table: &str, ids: &[String]) -> StoreResult<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?1",
        quote_ident(table),
        quote_ident(ID_COLUMN)
    );
    let mut stmt = tx.prepare_cached(&sql)?;
    let mut deleted = 0usize;
    for id in ids {
        deleted += stmt.execute([id])?;
    }
    Ok(deleted)
}

impl KgConnection for SqliteConnection {
    fn create_table(&mut self, schema: &TableSchema) -> StoreResult<()> {
        if self.table_exists(&schema.name)? {
            return Err(StoreError::TableExists(schema.name.clone()));
        }
        let columns: Vec<String> = schema
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.ty.sql()))
            .collect();
        let sql = format!(
            "CREATE TABLE {} ({})",
            quote_ident(&schema.name),
            columns.join(", ")
        );
        self.conn.execute(&sql, [])?;
        Ok(())
    }

    fn table_exists(&self, table: &str) -> StoreResult<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn for_each_row(
        &self,
        table: &str,
        columns: &[&str],
        visit: &mut dyn FnMut(Row),
    ) -> StoreResult<()> {
        if !self.table_exists(table)? {
            return Err(StoreError::UnknownTable(table.to_string()));
        }
        let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let sql = format!("SELECT {} FROM {}", cols.join(", "), quote_ident(table));
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        while let Some(r) = rows.next()? {
            let mut row = Row::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                row.set(*name, value_from_ref(r.get_ref(i)?));
            }
            visit(row);
        }
        Ok(())
    }

    fn insert_rows(&mut self, table: &str, rows: &[Row]) -> StoreResult<usize> {
        let tx = self.conn.transaction()?;
        let inserted = insert_in(&tx, table, rows)?;
        tx.commit()?;
        Ok(inserted)
    }

    fn replace_rows(
        &mut self,
        table: &str,
        rows: &[Row],
        stale_ids: &[String],
    ) -> StoreResult<BatchStats> {
        let tx = self.conn.transaction()?;
        let deleted = delete_in(&tx, table, stale_ids)?;
        let inserted = insert_in(&tx, table, rows)?;
        tx.commit()?;
        Ok(BatchStats { inserted, deleted })
    }

    fn row_count(&self, table: &str) -> StoreResult<u64> {
        if !self.table_exists(table)? {
            return Err(StoreError::UnknownTable(table.to_string()));
        }
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let n: i64 = self.conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(n as u64)
    }

    fn close(self: Box<Self>) -> StoreResult<()> {
        let SqliteConnection { conn, path } = *self;
        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        if let Some(path) = path {
            tracing::debug!(path = %path.display(), "closed sqlite store");
        }
        Ok(())
    }
}
