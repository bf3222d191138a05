//! Header sniffing for SQLite-style database files
//!
//! Classifies a file from a short prefix of its bytes, without handing it to
//! the database engine first.
//!
//! # How Header Sniffing Works
//!
//! A plain SQLite database starts with a fixed 100-byte header. Its first 16
//! bytes are the literal string `"SQLite format 3\0"`. Page-level encryption
//! schemes (SQLCipher and friends) encrypt the whole first page, header
//! included, so the magic string disappears and the bytes that follow look
//! random.
//!
//! ```text
//! Offset  | Plain SQLite              | Typical encrypted file
//! --------|---------------------------|-----------------------------
//! 0..16   | "SQLite format 3\0"       | random salt / cipher marker
//! 16..48  | page size, versions, ...  | ciphertext
//! ```
//!
//! ## Checks, in order
//!
//! 1. **SQLite signature**: the container looks valid. Only a live open can
//!    tell a usable file from one that kept its magic bytes but is still
//!    encrypted or corrupt, so the verdict is deferred to the prober.
//! 2. **Cipher signature**: bytes `17 07 17 07` mark a known ciphered
//!    container.
//! 3. **Salt area**: bytes 4..16 would be part of the magic string in a plain
//!    file. Anything nonzero there is treated as an encryption header.
//! 4. **Entropy window**: bytes 16..48 are sampled. Too many bytes outside the
//!    printable ASCII range means the content is probably ciphertext.
//!
//! Anything that passes all four is `Unknown`: not provably encrypted, but
//! not a database we recognize either.

use crate::error::{DetectError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// The 16-byte header of every plain SQLite 3 database.
pub const SQLITE_MAGIC: [u8; 16] = *b"SQLite format 3\0";

/// Marker of a known ciphered-container format.
pub const CIPHER_MAGIC: [u8; 4] = [0x17, 0x07, 0x17, 0x07];

/// Length of the signature header.
pub const HEADER_LEN: usize = 16;

/// Size of a SQLite database header; default number of bytes read.
pub const SQLITE_HEADER_LEN: usize = 100;

/// Largest prefix a detection will ever read.
pub const MAX_READ_LIMIT: usize = 64 * 1024;

/// Where and how hard to look for ciphertext after the signature header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyWindow {
    /// First sampled byte
    pub offset: usize,
    /// Number of sampled bytes
    pub len: usize,
    /// Verdict is `Encrypted` when strictly more bytes than this look random
    pub threshold: usize,
}

impl Default for EntropyWindow {
    fn default() -> Self {
        Self {
            offset: 16,
            len: 32,
            threshold: 20,
        }
    }
}

impl EntropyWindow {
    /// Number of bytes a buffer needs before the window is sampled.
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.len)
    }
}

/// Why a header was judged encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Evidence {
    CipherSignature,
    SaltArea,
    HighEntropy { count: usize },
}

impl std::fmt::Display for Evidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Evidence::CipherSignature => write!(f, "cipher_signature"),
            Evidence::SaltArea => write!(f, "salt_area"),
            Evidence::HighEntropy { count } => write!(f, "high_entropy({})", count),
        }
    }
}

/// Outcome of sniffing a header, before any probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sniff {
    /// Starts with the SQLite signature; needs a live open to confirm.
    SqliteSignature,
    Encrypted(Evidence),
    Unknown,
}

/// Classify a file prefix. Pure: no I/O, no engine calls.
pub fn sniff(bytes: &[u8], window: &EntropyWindow) -> Sniff {
    if bytes.len() >= HEADER_LEN && bytes[..HEADER_LEN] == SQLITE_MAGIC {
        return Sniff::SqliteSignature;
    }

    if bytes.len() >= CIPHER_MAGIC.len() && bytes[..CIPHER_MAGIC.len()] == CIPHER_MAGIC {
        return Sniff::Encrypted(Evidence::CipherSignature);
    }

    let salt_end = bytes.len().min(HEADER_LEN);
    if bytes.len() > 4 && bytes[4..salt_end].iter().any(|&b| b != 0) {
        return Sniff::Encrypted(Evidence::SaltArea);
    }

    if bytes.len() >= window.end() {
        let count = high_entropy_count(&bytes[window.offset..window.end()]);
        if count > window.threshold {
            return Sniff::Encrypted(Evidence::HighEntropy { count });
        }
    }

    Sniff::Unknown
}

/// Count bytes outside printable ASCII. Zero bytes are padding and never count.
pub fn high_entropy_count(sample: &[u8]) -> usize {
    sample
        .iter()
        .filter(|&&b| b > 0x80 || (b != 0 && b < 0x20))
        .count()
}

/// Read at most `limit` bytes from the start of `path`.
///
/// Short files yield a short buffer; only an I/O failure is an error.
pub async fn read_prefix(path: &Path, limit: usize) -> Result<Vec<u8>> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| DetectError::read(path, e))?;

    let mut buf = Vec::with_capacity(limit.min(SQLITE_HEADER_LEN));
    file.take(limit as u64)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| DetectError::read(path, e))?;

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // SIGNATURE CHECKS
    // ==========================================================================
    //
    // The two magic-byte checks are definitive and run before anything else.
    // A SQLite signature always defers to the prober, even if the rest of
    // the buffer is noise.
    // ==========================================================================

    fn window() -> EntropyWindow {
        EntropyWindow::default()
    }

    fn sqlite_buffer() -> Vec<u8> {
        let mut data = SQLITE_MAGIC.to_vec();
        data.extend_from_slice(&[0u8; 1008]);
        data
    }

    #[test]
    fn test_sqlite_signature_defers_to_probe() {
        assert_eq!(sniff(&sqlite_buffer(), &window()), Sniff::SqliteSignature);
    }

    #[test]
    fn test_sqlite_signature_wins_over_noisy_body() {
        let mut data = SQLITE_MAGIC.to_vec();
        data.extend_from_slice(&[0xFF; 32]);
        assert_eq!(sniff(&data, &window()), Sniff::SqliteSignature);
    }

    #[test]
    fn test_truncated_magic_is_not_sqlite() {
        // 15 bytes of the magic string: not a full header
        let data = &SQLITE_MAGIC[..15];
        assert_ne!(sniff(data, &window()), Sniff::SqliteSignature);
    }

    #[test]
    fn test_cipher_signature() {
        let mut data = vec![0x17, 0x07, 0x17, 0x07];
        data.extend_from_slice(&[0u8; 44]);
        assert_eq!(
            sniff(&data, &window()),
            Sniff::Encrypted(Evidence::CipherSignature)
        );
    }

    #[test]
    fn test_cipher_signature_ignores_remaining_bytes() {
        let mut data = vec![0x17, 0x07, 0x17, 0x07];
        data.extend((0..60u8).map(|i| i.wrapping_mul(37)));
        assert_eq!(
            sniff(&data, &window()),
            Sniff::Encrypted(Evidence::CipherSignature)
        );

        // Bare four bytes still match
        assert_eq!(
            sniff(&CIPHER_MAGIC, &window()),
            Sniff::Encrypted(Evidence::CipherSignature)
        );
    }

    // ==========================================================================
    // SALT AREA
    // ==========================================================================
    //
    // Bytes 4..16 hold the tail of the magic string in a plain file. When
    // neither signature matched, any nonzero byte there is read as a salt.
    // ==========================================================================

    #[test]
    fn test_nonzero_salt_byte_is_encrypted() {
        for pos in 4..16 {
            let mut data = vec![0u8; 48];
            data[pos] = 0x01;
            assert_eq!(
                sniff(&data, &window()),
                Sniff::Encrypted(Evidence::SaltArea),
                "nonzero byte at {pos}"
            );
        }
    }

    #[test]
    fn test_salt_area_checked_on_short_buffer() {
        // Only 8 bytes, salt byte at 6
        let data = [0u8, 0, 0, 0, 0, 0, 0xAB, 0];
        assert_eq!(sniff(&data, &window()), Sniff::Encrypted(Evidence::SaltArea));
    }

    #[test]
    fn test_first_four_bytes_are_not_salt() {
        let mut data = vec![0u8; 48];
        data[0..4].copy_from_slice(b"PK\x03\x04");
        assert_eq!(sniff(&data, &window()), Sniff::Unknown);
    }

    // ==========================================================================
    // ENTROPY WINDOW
    // ==========================================================================
    //
    // Bytes 16..48 are sampled. A byte counts as high-entropy when it is
    // above 0x80 or a nonzero control byte (0x01..0x1F). The verdict flips
    // when the count strictly exceeds the threshold (20 of 32).
    // ==========================================================================

    /// 16 zero bytes, then `high` bytes of 0xFF, then zeros up to 48 bytes.
    fn entropy_fixture(high: usize) -> Vec<u8> {
        let mut data = vec![0u8; 16];
        data.extend(std::iter::repeat(0xFF).take(high));
        data.extend(std::iter::repeat(0x00).take(32 - high));
        assert_eq!(data.len(), 48);
        data
    }

    #[test]
    fn test_all_zero_buffer_is_unknown() {
        assert_eq!(sniff(&[0u8; 48], &window()), Sniff::Unknown);
    }

    #[test]
    fn test_entropy_boundary_at_threshold() {
        // 20 x 0xFF + 12 x 0x00: exactly at the threshold, not over it
        assert_eq!(sniff(&entropy_fixture(20), &window()), Sniff::Unknown);
    }

    #[test]
    fn test_entropy_boundary_over_threshold() {
        // 21 x 0xFF + 11 x 0x00
        assert_eq!(
            sniff(&entropy_fixture(21), &window()),
            Sniff::Encrypted(Evidence::HighEntropy { count: 21 })
        );
    }

    #[test]
    fn test_entropy_byte_ranges() {
        // 0x80 and 0x20 are the exclusive bounds
        assert_eq!(high_entropy_count(&[0x80, 0x20, 0x41, 0x7F]), 0);
        assert_eq!(high_entropy_count(&[0x81, 0x1F, 0x01, 0xFF]), 4);
        assert_eq!(high_entropy_count(&[0x00, 0x00]), 0);
    }

    #[test]
    fn test_entropy_mixed_control_and_high_bytes() {
        // 25 bytes that count (0x01 and 0xFF alternating) + 7 printable
        let mut data = vec![0u8; 16];
        for i in 0..25 {
            data.push(if i % 2 == 0 { 0x01 } else { 0xFF });
        }
        data.extend_from_slice(b"ABCDEFG");
        assert_eq!(
            sniff(&data, &window()),
            Sniff::Encrypted(Evidence::HighEntropy { count: 25 })
        );
    }

    #[test]
    fn test_entropy_skipped_on_short_buffer() {
        // 47 bytes: window not fully available, so no entropy verdict
        let mut data = vec![0u8; 16];
        data.extend_from_slice(&[0xFF; 31]);
        assert_eq!(sniff(&data, &window()), Sniff::Unknown);
    }

    #[test]
    fn test_printable_text_is_unknown() {
        let mut data = vec![0u8; 16];
        data.extend_from_slice(b"CREATE TABLE users (id INTEGER);");
        assert_eq!(sniff(&data, &window()), Sniff::Unknown);
    }

    #[test]
    fn test_custom_window() {
        let custom = EntropyWindow {
            offset: 16,
            len: 8,
            threshold: 4,
        };
        let mut data = vec![0u8; 16];
        data.extend_from_slice(&[0xEE; 5]);
        data.extend_from_slice(&[0x00; 3]);
        assert_eq!(
            sniff(&data, &custom),
            Sniff::Encrypted(Evidence::HighEntropy { count: 5 })
        );
        // Same bytes under the default window are too short to sample
        assert_eq!(sniff(&data, &window()), Sniff::Unknown);
    }

    #[test]
    fn test_empty_buffer_is_unknown() {
        assert_eq!(sniff(&[], &window()), Sniff::Unknown);
    }

    // ==========================================================================
    // READING
    // ==========================================================================

    #[tokio::test]
    async fn test_read_prefix_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.db");
        std::fs::write(&path, vec![0xAAu8; 4096]).unwrap();

        let bytes = read_prefix(&path, SQLITE_HEADER_LEN).await.unwrap();
        assert_eq!(bytes.len(), SQLITE_HEADER_LEN);
    }

    #[tokio::test]
    async fn test_read_prefix_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.db");
        std::fs::write(&path, b"abc").unwrap();

        let bytes = read_prefix(&path, SQLITE_HEADER_LEN).await.unwrap();
        assert_eq!(bytes, b"abc");
    }

    #[tokio::test]
    async fn test_read_prefix_huge_limit_on_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.db");
        std::fs::write(&path, b"abc").unwrap();

        // Capacity is not taken from the limit
        let bytes = read_prefix(&path, usize::MAX).await.unwrap();
        assert_eq!(bytes, b"abc");
    }

    #[test]
    fn test_window_end_saturates() {
        let window = EntropyWindow {
            offset: usize::MAX,
            len: 32,
            threshold: 20,
        };
        assert_eq!(window.end(), usize::MAX);
        assert_eq!(sniff(&[0u8; 64], &window), Sniff::Unknown);
    }

    #[tokio::test]
    async fn test_read_prefix_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");

        let err = read_prefix(&path, SQLITE_HEADER_LEN).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ReadFailure);
        assert!(err.to_string().contains("missing.db"));
    }
}
