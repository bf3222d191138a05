//! JSON report: generation time, summary, and every result

use super::Summary;
use crate::detector::DetectionResult;
use serde::Serialize;
use std::io::{self, Write};

#[derive(Serialize)]
struct Report<'a> {
    generated: String,
    summary: Summary,
    files: &'a [DetectionResult],
}

pub fn write<W: Write>(writer: &mut W, results: &[DetectionResult]) -> io::Result<()> {
    let report = Report {
        generated: chrono::Local::now().to_rfc3339(),
        summary: Summary::from_results(results),
        files: results,
    };
    serde_json::to_writer_pretty(&mut *writer, &report)?;
    writeln!(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::ClassificationStatus;

    #[test]
    fn test_json_report_shape() {
        let results = vec![
            DetectionResult::classified("/a.db", ClassificationStatus::Unencrypted),
            DetectionResult::classified("/b.db", ClassificationStatus::Encrypted),
        ];
        let mut out = Vec::new();
        write(&mut out, &results).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["summary"]["total"], 2);
        assert_eq!(value["summary"]["encrypted"], 1);
        assert_eq!(value["files"][0]["filePath"], "/a.db");
        assert_eq!(value["files"][1]["status"], "encrypted");
        assert!(value["generated"].is_string());
    }
}
