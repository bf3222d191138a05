//! Detection session
//!
//! [`Detector`] is what a front end talks to. It owns the cache, remembers
//! the most recent result and error, and reports whether a detection is in
//! flight. Classification itself lives in [`crate::pipeline`].
//!
//! # Flow
//!
//! ```text
//! detect(path)
//!   ├─ "" ────────────────────────────► None
//!   ├─ cache hit (age ≤ ttl) ─────────► result, no file access
//!   └─ miss ─► read header ─► sniff ─┬► Encrypted / Unknown
//!                                    └► SQLite signature ─► probe
//!                                          ├─ opens ──────► Unencrypted
//!                                          └─ else ───────► Encrypted
//! ```
//!
//! Failures (unreadable file, cancellation) become a result with status
//! [`ClassificationStatus::Error`]. They are never cached.

pub mod cache;
pub mod header;

use crate::config::DetectorConfig;
use crate::error::{DetectError, ErrorKind};
use crate::pipeline::Classifier;
use crate::probe::{Prober, SqliteProber};
use cache::{DetectionCache, Sweeper};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationStatus {
    /// Opens cleanly through the engine
    Unencrypted,
    /// Cipher header, salt, high entropy, or refused by the engine
    Encrypted,
    /// Not recognizably a database, not provably encrypted
    Unknown,
    Detecting,
    Error,
}

impl ClassificationStatus {
    /// Only final verdicts about the file's content are worth remembering.
    pub fn is_cacheable(self) -> bool {
        matches!(
            self,
            ClassificationStatus::Unencrypted
                | ClassificationStatus::Encrypted
                | ClassificationStatus::Unknown
        )
    }
}

impl std::fmt::Display for ClassificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassificationStatus::Unencrypted => write!(f, "UNENCRYPTED"),
            ClassificationStatus::Encrypted => write!(f, "ENCRYPTED"),
            ClassificationStatus::Unknown => write!(f, "UNKNOWN"),
            ClassificationStatus::Detecting => write!(f, "DETECTING"),
            ClassificationStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Outcome of one detection attempt. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub status: ClassificationStatus,
    pub file_path: String,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl DetectionResult {
    pub fn classified(file_path: &str, status: ClassificationStatus) -> Self {
        Self {
            status,
            file_path: file_path.to_string(),
            checked_at: Utc::now(),
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(file_path: &str, err: &DetectError) -> Self {
        Self {
            status: ClassificationStatus::Error,
            file_path: file_path.to_string(),
            checked_at: Utc::now(),
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ClassificationStatus::Error
    }

    /// Ok only for a file that can be handed to the engine as-is.
    pub fn ensure_unencrypted(&self) -> Result<(), String> {
        match self.status {
            ClassificationStatus::Unencrypted => Ok(()),
            ClassificationStatus::Error => Err(self
                .error
                .clone()
                .unwrap_or_else(|| "detection failed".to_string())),
            other => Err(format!("{} is {}, refusing to open", self.file_path, other)),
        }
    }

    /// File name for display
    pub fn file_name(&self) -> &str {
        std::path::Path::new(&self.file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.file_path)
    }
}

#[derive(Debug, Default)]
struct Session {
    current: Option<DetectionResult>,
    error: Option<String>,
}

/// Paths with a detection running. At most one detection per path.
#[derive(Debug, Default)]
struct InFlightPaths {
    paths: Mutex<HashSet<String>>,
    count: AtomicUsize,
    released: Notify,
}

impl InFlightPaths {
    fn paths(&self) -> MutexGuard<'_, HashSet<String>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_enter(&self, path: &str) -> Option<InFlight<'_>> {
        if !self.paths().insert(path.to_string()) {
            return None;
        }
        self.count.fetch_add(1, Ordering::SeqCst);
        Some(InFlight {
            owner: self,
            path: path.to_string(),
        })
    }

    /// Wait until no other detection holds `path`, then claim it.
    async fn enter(&self, path: &str) -> InFlight<'_> {
        loop {
            let released = self.released.notified();
            if let Some(guard) = self.try_enter(path) {
                return guard;
            }
            released.await;
        }
    }

    fn is_empty(&self) -> bool {
        self.count.load(Ordering::SeqCst) == 0
    }
}

/// Releases its path however the detection ends, including when its
/// future is dropped mid-await.
struct InFlight<'a> {
    owner: &'a InFlightPaths,
    path: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.owner.paths().remove(&self.path);
        self.owner.count.fetch_sub(1, Ordering::SeqCst);
        self.owner.released.notify_waiters();
    }
}

/// Detection session over a shared cache.
pub struct Detector<P = SqliteProber> {
    classifier: Classifier<P>,
    cache: Arc<DetectionCache>,
    session: Mutex<Session>,
    in_flight: InFlightPaths,
}

impl Detector<SqliteProber> {
    /// Session probing through the bundled SQLite engine.
    pub fn native(config: DetectorConfig) -> Self {
        Self::new(SqliteProber::new(), config)
    }
}

impl<P: Prober> Detector<P> {
    /// Session with its own cache.
    pub fn new(prober: P, config: DetectorConfig) -> Self {
        let cache = Arc::new(DetectionCache::new(config.cache_ttl));
        Self::with_cache(prober, config, cache)
    }

    /// Session over a cache shared with other sessions.
    pub fn with_cache(prober: P, config: DetectorConfig, cache: Arc<DetectionCache>) -> Self {
        Self {
            classifier: Classifier::new(prober, config),
            cache,
            session: Mutex::new(Session::default()),
            in_flight: InFlightPaths::default(),
        }
    }

    pub fn cache(&self) -> &Arc<DetectionCache> {
        &self.cache
    }

    pub fn classifier(&self) -> &Classifier<P> {
        &self.classifier
    }

    /// Start the periodic eviction task for this session's cache.
    pub fn spawn_sweeper(&self) -> Sweeper {
        self.cache.spawn_sweeper()
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classify `path`. `None` for an empty path, otherwise always a result.
    pub async fn detect(&self, path: &str) -> Option<DetectionResult> {
        self.detect_with_cancel(path, &CancellationToken::new()).await
    }

    /// Like [`Detector::detect`], giving up once `cancel` fires.
    ///
    /// A second call for a path that is already being detected waits for
    /// the first and is then normally served from the cache.
    pub async fn detect_with_cancel(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Option<DetectionResult> {
        if path.is_empty() {
            return None;
        }

        let _in_flight = match self.in_flight.try_enter(path) {
            Some(guard) => guard,
            None => {
                tracing::debug!(path = %path, "waiting for detection in flight");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let result = DetectionResult::failed(path, &DetectError::Cancelled);
                        return Some(self.record(result));
                    }
                    guard = self.in_flight.enter(path) => guard,
                }
            }
        };
        self.session().error = None;

        let result = match self.cache.get(path) {
            Some(status) => {
                tracing::debug!(path = %path, status = ?status, "cache hit");
                DetectionResult::classified(path, status)
            }
            None => {
                tracing::debug!(path = %path, "cache miss");
                match self.classifier.classify_path(path, cancel).await {
                    Ok(status) => {
                        self.cache.insert(path, status);
                        tracing::info!(path = %path, status = ?status, "classified");
                        DetectionResult::classified(path, status)
                    }
                    Err(e) => {
                        match e.kind() {
                            ErrorKind::Cancelled => {
                                tracing::info!(path = %path, "detection cancelled")
                            }
                            _ => tracing::warn!(path = %path, error = %e, "detection failed"),
                        }
                        DetectionResult::failed(path, &e)
                    }
                }
            }
        };

        Some(self.record(result))
    }

    fn record(&self, result: DetectionResult) -> DetectionResult {
        let mut session = self.session();
        session.error = result.error.clone();
        session.current = Some(result.clone());
        result
    }

    /// Re-run detection for the most recent result's path.
    pub async fn retry(&self) -> Option<DetectionResult> {
        let path = self.session().current.as_ref()?.file_path.clone();
        self.detect(&path).await
    }

    /// Forget the current result and error. The cache is left alone.
    pub fn clear_result(&self) {
        let mut session = self.session();
        session.current = None;
        session.error = None;
    }

    pub fn is_detecting(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn error(&self) -> Option<String> {
        self.session().error.clone()
    }

    pub fn current(&self) -> Option<DetectionResult> {
        self.session().current.clone()
    }

    /// `Detecting` while any detection runs, else the current result's status.
    pub fn status(&self) -> Option<ClassificationStatus> {
        if self.is_detecting() {
            return Some(ClassificationStatus::Detecting);
        }
        self.session().current.as_ref().map(|r| r.status)
    }
}
