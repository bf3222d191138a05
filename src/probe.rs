//! Connectivity probing
//!
//! A header that carries the SQLite signature only proves the file *looks*
//! like a database. The prober asks the real engine to open it. Anything
//! short of a clean open is treated as encrypted by the caller.

use crate::error::{DetectError, Result};
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel::sqlite::SqliteConnection;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Name under which the probe is exposed to remote callers.
pub const PROBE_COMMAND: &str = "test_database_connection";

/// Body of a probe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub path: String,
}

/// Body of a probe response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResponse {
    pub can_open: bool,
}

/// "Can this file be opened as a database?"
///
/// `Ok(false)` means the engine rejected the file. `Err` means the probe
/// itself could not run. Callers treat both the same way.
pub trait Prober: Send + Sync {
    fn can_open(&self, path: &str) -> impl Future<Output = Result<bool>> + Send;
}

impl<P: Prober> Prober for std::sync::Arc<P> {
    fn can_open(&self, path: &str) -> impl Future<Output = Result<bool>> + Send {
        (**self).can_open(path)
    }
}

/// Probes through the bundled SQLite engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteProber;

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

impl SqliteProber {
    pub fn new() -> Self {
        Self
    }

    /// Blocking probe. Opening alone is lazy in SQLite, so the schema is read
    /// to force the engine to decode page 1.
    pub fn probe_blocking(path: &str) -> bool {
        let mut conn = match SqliteConnection::establish(&read_only_uri(path)) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!(path = %path, error = %e, "engine refused connection");
                return false;
            }
        };

        match diesel::sql_query("SELECT count(*) AS count FROM sqlite_master")
            .get_result::<CountRow>(&mut conn)
        {
            Ok(row) => {
                tracing::debug!(path = %path, objects = row.count, "engine opened file");
                true
            }
            Err(e) => {
                tracing::debug!(path = %path, error = %e, "engine could not read schema");
                false
            }
        }
    }
}

impl Prober for SqliteProber {
    fn can_open(&self, path: &str) -> impl Future<Output = Result<bool>> + Send {
        let path = path.to_string();
        async move {
            tokio::task::spawn_blocking(move || Self::probe_blocking(&path))
                .await
                .map_err(|e| DetectError::ProbeFailure(e.to_string()))
        }
    }
}

/// SQLite URI that opens `path` read-only and never creates it.
pub fn read_only_uri(path: &str) -> String {
    let escaped = path
        .replace('%', "%25")
        .replace('?', "%3f")
        .replace('#', "%23");
    format!("file:{}?mode=ro", escaped)
}
