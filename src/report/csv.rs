//! CSV report, one row per file

use crate::detector::DetectionResult;
use std::io::{self, Write};

const HEADER: &str = "status,file_name,file_path,checked_at,error_kind,error";

pub fn write<W: Write>(writer: &mut W, results: &[DetectionResult]) -> io::Result<()> {
    writeln!(writer, "{}", HEADER)?;
    for r in results {
        writeln!(
            writer,
            "{},{},{},{},{},{}",
            r.status,
            escape(r.file_name()),
            escape(&r.file_path),
            r.checked_at.to_rfc3339(),
            r.error_kind.map(|k| k.to_string()).unwrap_or_default(),
            escape(r.error.as_deref().unwrap_or("")),
        )?;
    }
    Ok(())
}

/// Quote a field if it contains a separator, quote or newline.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
