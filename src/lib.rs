//! dbspy - Tell plain SQLite databases apart from encrypted ones
//!
//! dbspy looks at a file and decides whether it is a database you can open
//! right now, an encrypted database, or not a database at all. It does that
//! from the first few bytes, and only asks the SQLite engine for a live open
//! when the header claims to be a plain database.
//!
//! # Overview
//!
//! Opening an encrypted or corrupt file through a database driver is slow and
//! the errors are unhelpful. A front end wants an answer quickly, wants to
//! ask again without redoing the work, and wants to be able to give up.
//! dbspy caches verdicts per path for a short time and accepts a
//! cancellation token on every detection.
//!
//! # Detection Methods
//!
//! 1. **Signature check**: the 16-byte `"SQLite format 3\0"` header, or the
//!    `17 07 17 07` marker of a ciphered container.
//! 2. **Salt area**: nonzero bytes where a plain header has its magic string.
//! 3. **Entropy window**: too many non-printable bytes right after the header.
//! 4. **Open probe**: a read-only open through the bundled SQLite engine,
//!    only for files whose header looks plain.
//!
//! # Quick Start
//!
//! ```no_run
//! use dbspy::{ClassificationStatus, Detector, DetectorConfig};
//!
//! # async fn run() {
//! let detector = Detector::native(DetectorConfig::default());
//!
//! if let Some(result) = detector.detect("/path/to/app.db").await {
//!     match result.status {
//!         ClassificationStatus::Unencrypted => println!("Ready to browse"),
//!         ClassificationStatus::Encrypted => println!("Needs a key"),
//!         ClassificationStatus::Unknown => println!("Not a database we know"),
//!         _ => println!("Couldn't check: {:?}", result.error),
//!     }
//! }
//! # }
//! ```
//!
//! # Modules
//!
//! - [`detector`]: Session controller, header sniffer and cache
//! - [`pipeline`]: Read → sniff → probe, with cancellation and timeout
//! - [`probe`]: The open-probe trait and its SQLite implementation
//! - [`db`]: Read-only schema inspection for unencrypted files
//! - [`report`]: Output formatters (JSON, CSV)

pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod pipeline;
pub mod probe;
pub mod report;
pub mod serve;

pub use config::DetectorConfig;
pub use detector::cache::DetectionCache;
pub use detector::{ClassificationStatus, DetectionResult, Detector};
pub use error::{DetectError, ErrorKind};
pub use pipeline::Classifier;
pub use probe::{Prober, SqliteProber};
pub use tokio_util::sync::CancellationToken;
