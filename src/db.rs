//! Read-only schema inspection with Diesel
//!
//! Once a file is classified `Unencrypted` it can be browsed: list its user
//! tables and describe their columns. Connections are opened read-only so
//! inspecting a file never modifies or creates it.

use crate::probe::read_only_uri;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sql_types::{BigInt, Integer, Nullable, Text};
use diesel::sqlite::SqliteConnection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Models
// ============================================================================

/// One column as reported by `PRAGMA table_info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    /// `None` when counting failed
    pub row_count: Option<u64>,
}

#[derive(QueryableByName)]
struct TableNameRow {
    #[diesel(sql_type = Text)]
    name: String,
}

#[derive(QueryableByName)]
struct ColumnRow {
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Text)]
    data_type: String,
    #[diesel(sql_type = Integer)]
    not_null: i32,
    #[diesel(sql_type = Nullable<Text>)]
    dflt_value: Option<String>,
    #[diesel(sql_type = Integer)]
    pk: i32,
}

impl From<ColumnRow> for ColumnInfo {
    fn from(row: ColumnRow) -> Self {
        Self {
            name: row.name,
            data_type: row.data_type,
            nullable: row.not_null == 0,
            primary_key: row.pk > 0,
            default_value: row.dflt_value,
        }
    }
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Read-only handle on one database file
pub struct Database {
    pool: DbPool,
}

/// Error type for database operations
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Table not found: {0}")]
    TableNotFound(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl Database {
    /// Open `path` read-only. Fails if the file does not exist.
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(read_only_uri(&path_str));
        let pool = Pool::builder()
            .max_size(2)
            .connection_timeout(CONNECTION_TIMEOUT)
            .build(manager)
            .map_err(|e| DbError::Connection(format!("{}: {}", path_str, e)))?;

        Ok(Self { pool })
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| DbError::Connection(e.to_string()))
    }

    /// User tables, sorted by name. Internal `sqlite_*` tables are skipped.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut conn = self.get_conn()?;
        let rows = diesel::sql_query(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .load::<TableNameRow>(&mut conn)?;

        Ok(rows.into_iter().map(|r| r.name).collect())
    }

    pub fn table_info(&self, table: &str) -> Result<TableInfo> {
        let mut conn = self.get_conn()?;

        let columns: Vec<ColumnInfo> = diesel::sql_query(
            "SELECT name, type AS data_type, \"notnull\" AS not_null, dflt_value, pk \
             FROM pragma_table_info(?) ORDER BY cid",
        )
        .bind::<Text, _>(table)
        .load::<ColumnRow>(&mut conn)?
        .into_iter()
        .map(ColumnInfo::from)
        .collect();

        if columns.is_empty() {
            return Err(DbError::TableNotFound(table.to_string()));
        }

        let row_count = Self::row_count(&mut conn, table);

        Ok(TableInfo {
            name: table.to_string(),
            columns,
            row_count,
        })
    }

    fn row_count(conn: &mut SqliteConnection, table: &str) -> Option<u64> {
        let query = format!("SELECT COUNT(*) AS count FROM {}", quote_ident(table));
        match diesel::sql_query(query).get_result::<CountRow>(conn) {
            Ok(row) => u64::try_from(row.count).ok(),
            Err(e) => {
                tracing::debug!(table = %table, error = %e, "row count failed");
                None
            }
        }
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
