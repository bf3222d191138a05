//! Report generation for batch detection results
//!
//! - **JSON**: Machine-readable, includes the summary and every result
//! - **CSV**: Spreadsheet-compatible, one row per file
//!
//! # Usage
//!
//! ```ignore
//! use dbspy::report;
//!
//! // Automatically picks format based on extension
//! report::generate("report.json", &results)?;  // JSON
//! report::generate("report.csv", &results)?;   // CSV
//! ```

pub mod csv;
pub mod json;

use crate::detector::{ClassificationStatus, DetectionResult};
use serde::Serialize;
use std::io;
use std::path::Path;

/// Generate a report in the appropriate format based on file extension
pub fn generate<P: AsRef<Path>>(path: P, results: &[DetectionResult]) -> io::Result<()> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let mut file = std::fs::File::create(path)?;

    match ext.as_str() {
        "json" => json::write(&mut file, results),
        _ => csv::write(&mut file, results),
    }
}

/// Status counts for a batch of results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub unencrypted: usize,
    pub encrypted: usize,
    pub unknown: usize,
    pub error: usize,
}

impl Summary {
    pub fn from_results(results: &[DetectionResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };

        for r in results {
            match r.status {
                ClassificationStatus::Unencrypted => summary.unencrypted += 1,
                ClassificationStatus::Encrypted => summary.encrypted += 1,
                ClassificationStatus::Unknown => summary.unknown += 1,
                ClassificationStatus::Error => summary.error += 1,
                ClassificationStatus::Detecting => {}
            }
        }

        summary
    }
}
