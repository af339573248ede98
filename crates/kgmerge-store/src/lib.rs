//! KGMerge Tabular Store
//!
//! The relation and eventuality tables of every shard (and of the merged
//! graph) live in a small tabular store. The merge engine only needs four
//! things from it:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      KgConnection                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  create_table(schema)        fixed column schema             │
//! │  for_each_row(table, cols)   stream rows as ordered fields   │
//! │  insert_rows(table, rows)    one batch, one transaction      │
//! │  replace_rows(table, rows, ids)  delete + insert, one tx     │
//! │  close()                                                     │
//! └──────────────────────────────────────────────────────────────┘
//!                │
//!                ▼
//!        SqliteConnection (the only backend)
//! ```
//!
//! Schemas are fixed: see [`relation_schema`] and [`eventuality_schema`].

pub mod sqlite;


use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub use sqlite::SqliteConnection;

// ============================================================================
// Fixed schema
// ============================================================================

/// Rows per insert chunk. All chunks of one batch share a transaction.
pub const CHUNKSIZE: usize = 32768;

pub const EVENTUALITY_TABLE_NAME: &str = "Eventualities";
pub const RELATION_TABLE_NAME: &str = "Relations";

/// Primary key column shared by both tables.
pub const ID_COLUMN: &str = "_id";
pub const HEAD_COLUMN: &str = "hid";
pub const TAIL_COLUMN: &str = "tid";

/// Discourse senses a relation between two eventualities can express.
///
/// Each relation row carries one frequency column per sense, in this order.
pub const RELATION_SENSES: [&str; 15] = [
    "Precedence",
    "Succession",
    "Synchronous",
    "Reason",
    "Result",
    "Condition",
    "Contrast",
    "Concession",
    "Conjunction",
    "Instantiation",
    "Restatement",
    "ChosenAlternative",
    "Alternative",
    "Exception",
    "Co_Occurrence",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    PrimaryKey,
    Text,
    Real,
    Blob,
}

impl ColumnType {
    pub fn sql(self) -> &'static str {
        match self {
            ColumnType::PrimaryKey => "PRIMARY KEY",
            ColumnType::Text => "TEXT",
            ColumnType::Real => "REAL",
            ColumnType::Blob => "BLOB",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A table name plus its ordered column list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// `_id`, `hid`, `tid`, then one REAL column per sense.
pub fn relation_schema() -> TableSchema {
    let mut columns = vec![
        Column::new(ID_COLUMN, ColumnType::PrimaryKey),
        Column::new(HEAD_COLUMN, ColumnType::Text),
        Column::new(TAIL_COLUMN, ColumnType::Text),
    ];
    columns.extend(
        RELATION_SENSES
            .iter()
            .map(|sense| Column::new(*sense, ColumnType::Real)),
    );
    TableSchema {
        name: RELATION_TABLE_NAME.to_string(),
        columns,
    }
}

pub fn eventuality_schema() -> TableSchema {
    TableSchema {
        name: EVENTUALITY_TABLE_NAME.to_string(),
        columns: vec![
            Column::new(ID_COLUMN, ColumnType::PrimaryKey),
            Column::new("frequency", ColumnType::Real),
            Column::new("pattern", ColumnType::Text),
            Column::new("verbs", ColumnType::Text),
            Column::new("skeleton_words", ColumnType::Text),
            Column::new("words", ColumnType::Text),
            Column::new("info", ColumnType::Blob),
        ],
    }
}

// ============================================================================
// Rows
// ============================================================================

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the cell; non-numeric cells have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(x) => Some(*x),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

/// A row as an ordered field map. Field order is the column order it was
/// read (or built) with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Set a field, replacing an existing value in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Numeric field, 0.0 when absent or NULL.
    pub fn get_f64_or_zero(&self, name: &str) -> f64 {
        self.get(name).and_then(Value::as_f64).unwrap_or(0.0)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("table `{0}` already exists")]
    TableExists(String),

    #[error("table `{0}` does not exist")]
    UnknownTable(String),

    #[error("backend `{0}` is not implemented (supported: sqlite)")]
    UnsupportedBackend(String),

    #[error("row has no columns")]
    EmptyRow,

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Rows touched by one [`KgConnection::replace_rows`] batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub inserted: usize,
    pub deleted: usize,
}

// ============================================================================
// Connection trait
// ============================================================================

/// A connection to one on-disk table store (one shard database or the
/// merged database).
pub trait KgConnection {
    /// Create a table with a fixed schema. Fails with
    /// [`StoreError::TableExists`] if the table is already there.
    fn create_table(&mut self, schema: &TableSchema) -> StoreResult<()>;

    fn table_exists(&self, table: &str) -> StoreResult<bool>;

    /// Stream every row of `table` in natural order, restricted to `columns`.
    fn for_each_row(
        &self,
        table: &str,
        columns: &[&str],
        visit: &mut dyn FnMut(Row),
    ) -> StoreResult<()>;

    /// Insert (or replace by primary key) a batch of rows atomically.
    fn insert_rows(&mut self, table: &str, rows: &[Row]) -> StoreResult<usize>;

    /// Delete `stale_ids` and insert (or replace) `rows` in one transaction.
    fn replace_rows(
        &mut self,
        table: &str,
        rows: &[Row],
        stale_ids: &[String],
    ) -> StoreResult<BatchStats>;

    fn row_count(&self, table: &str) -> StoreResult<u64>;

    fn close(self: Box<Self>) -> StoreResult<()>;
}

// ============================================================================
// Backend selection
// ============================================================================

/// Storage backend selector. Only SQLite is implemented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
}

impl Backend {
    pub fn open(self, path: &Path) -> StoreResult<Box<dyn KgConnection>> {
        match self {
            Backend::Sqlite => Ok(Box::new(SqliteConnection::open(path)?)),
        }
    }
}

impl FromStr for Backend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Backend::Sqlite),
            other => Err(StoreError::UnsupportedBackend(other.to_string())),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Sqlite => write!(f, "sqlite"),
        }
    }
}
