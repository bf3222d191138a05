//! Classification pipeline: read header → sniff → (maybe) probe.
//!
//! Cancellation is cooperative. The token is checked before the read, after
//! it, before the probe and after it, and both awaits race the token so a
//! cancel does not wait for a slow disk or engine.

use crate::config::DetectorConfig;
use crate::detector::header::{self, Sniff};
use crate::detector::ClassificationStatus;
use crate::error::{DetectError, Result};
use crate::probe::Prober;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Stateless classifier over one prober.
#[derive(Debug, Clone)]
pub struct Classifier<P> {
    prober: P,
    config: DetectorConfig,
}

impl<P: Prober> Classifier<P> {
    pub fn new(prober: P, config: DetectorConfig) -> Self {
        Self { prober, config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn prober(&self) -> &P {
        &self.prober
    }

    /// Run the full pipeline for one path.
    pub async fn classify_path(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<ClassificationStatus> {
        if path.is_empty() {
            return Err(DetectError::EmptyInput);
        }

        check(cancel)?;
        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DetectError::Cancelled),
            read = header::read_prefix(Path::new(path), self.config.read_limit()) => read?,
        };
        check(cancel)?;

        match header::sniff(&bytes, &self.config.entropy) {
            Sniff::SqliteSignature => {
                check(cancel)?;
                let status = self.probe(path, cancel).await?;
                check(cancel)?;
                Ok(status)
            }
            Sniff::Encrypted(evidence) => {
                tracing::debug!(path = %path, evidence = %evidence, "header looks encrypted");
                Ok(ClassificationStatus::Encrypted)
            }
            Sniff::Unknown => {
                tracing::debug!(path = %path, bytes = bytes.len(), "header not recognized");
                Ok(ClassificationStatus::Unknown)
            }
        }
    }

    /// One engine call bounded by `probe_timeout`. Expiry is a probe failure.
    pub async fn bounded_probe(&self, path: &str) -> Result<bool> {
        match tokio::time::timeout(self.config.probe_timeout, self.prober.can_open(path)).await {
            Ok(inner) => inner,
            Err(_) => Err(DetectError::ProbeFailure(format!(
                "no answer within {:?}",
                self.config.probe_timeout
            ))),
        }
    }

    /// Ask the engine. Failure and timeout both resolve to `Encrypted`;
    /// only cancellation escapes as an error.
    async fn probe(&self, path: &str, cancel: &CancellationToken) -> Result<ClassificationStatus> {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DetectError::Cancelled),
            outcome = self.bounded_probe(path) => outcome,
        };

        match outcome {
            Ok(true) => Ok(ClassificationStatus::Unencrypted),
            Ok(false) => {
                tracing::debug!(path = %path, "signature present but engine refused the file");
                Ok(ClassificationStatus::Encrypted)
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "probe failed, treating as encrypted");
                Ok(ClassificationStatus::Encrypted)
            }
        }
    }
}

fn check(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(DetectError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::detector::header::SQLITE_MAGIC;
    use crate::error::ErrorKind;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    // ==========================================================================
    // PROBER DOUBLES
    // ==========================================================================

    /// Answers with a fixed verdict and counts calls.
    #[derive(Debug, Default)]
    pub(crate) struct StubProber {
        pub answer: bool,
        pub calls: AtomicUsize,
    }

    impl StubProber {
        pub fn answering(answer: bool) -> Arc<Self> {
            Arc::new(Self {
                answer,
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Prober for StubProber {
        fn can_open(&self, _path: &str) -> impl Future<Output = Result<bool>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let answer = self.answer;
            async move { Ok(answer) }
        }
    }

    pub(crate) struct FailingProber;

    impl Prober for FailingProber {
        fn can_open(&self, _path: &str) -> impl Future<Output = Result<bool>> + Send {
            async { Err(DetectError::ProbeFailure("engine unavailable".into())) }
        }
    }

    /// Never answers.
    pub(crate) struct HangingProber;

    impl Prober for HangingProber {
        fn can_open(&self, _path: &str) -> impl Future<Output = Result<bool>> + Send {
            std::future::pending()
        }
    }

    pub(crate) fn write_file(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path.to_string_lossy().to_string()
    }

    pub(crate) fn sqlite_bytes() -> Vec<u8> {
        let mut data = SQLITE_MAGIC.to_vec();
        data.extend_from_slice(&[0u8; 1008]);
        data
    }

    // ==========================================================================
    // PROBE POLICY
    // ==========================================================================
    //
    // Signature present:
    //   canOpen true   -> Unencrypted
    //   canOpen false  -> Encrypted
    //   probe error    -> Encrypted
    //   probe timeout  -> Encrypted
    // ==========================================================================

    #[tokio::test]
    async fn test_signature_and_openable_is_unencrypted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "plain.db", &sqlite_bytes());
        let prober = StubProber::answering(true);
        let classifier = Classifier::new(prober.clone(), DetectorConfig::default());

        let status = classifier
            .classify_path(&path, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, ClassificationStatus::Unencrypted);
        assert_eq!(prober.calls(), 1);
    }

    #[tokio::test]
    async fn test_signature_but_refused_is_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "refused.db", &sqlite_bytes());
        let classifier = Classifier::new(StubProber::answering(false), DetectorConfig::default());

        let status = classifier
            .classify_path(&path, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, ClassificationStatus::Encrypted);
    }

    #[tokio::test]
    async fn test_probe_error_is_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "broken.db", &sqlite_bytes());
        let classifier = Classifier::new(FailingProber, DetectorConfig::default());

        let status = classifier
            .classify_path(&path, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, ClassificationStatus::Encrypted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_is_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "slow.db", &sqlite_bytes());
        let config = DetectorConfig::default().with_probe_timeout(Duration::from_secs(2));
        let classifier = Classifier::new(HangingProber, config);

        let status = classifier
            .classify_path(&path, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, ClassificationStatus::Encrypted);
    }

    #[tokio::test]
    async fn test_no_signature_skips_probe() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = vec![0x17, 0x07, 0x17, 0x07];
        data.extend_from_slice(&[0u8; 60]);
        let path = write_file(&dir, "cipher.db", &data);
        let prober = StubProber::answering(true);
        let classifier = Classifier::new(prober.clone(), DetectorConfig::default());

        let status = classifier
            .classify_path(&path, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, ClassificationStatus::Encrypted);
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_file_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "zeros.bin", &[0u8; 48]);
        let classifier = Classifier::new(StubProber::answering(true), DetectorConfig::default());

        let status = classifier
            .classify_path(&path, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, ClassificationStatus::Unknown);
    }

    #[tokio::test]
    async fn test_huge_read_limit_on_tiny_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "tiny.bin", b"abc");
        let config = DetectorConfig::default().with_read_limit(usize::MAX);
        let classifier = Classifier::new(StubProber::answering(true), config);

        let status = classifier
            .classify_path(&path, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, ClassificationStatus::Unknown);
    }

    // ==========================================================================
    // FAILURES AND CANCELLATION
    // ==========================================================================

    #[tokio::test]
    async fn test_missing_file_is_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.db").to_string_lossy().to_string();
        let classifier = Classifier::new(StubProber::answering(true), DetectorConfig::default());

        let err = classifier
            .classify_path(&path, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadFailure);
    }

    #[tokio::test]
    async fn test_empty_path() {
        let classifier = Classifier::new(StubProber::answering(true), DetectorConfig::default());
        let err = classifier
            .classify_path("", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyInput);
    }

    #[tokio::test]
    async fn test_cancelled_before_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "plain.db", &sqlite_bytes());
        let prober = StubProber::answering(true);
        let classifier = Classifier::new(prober.clone(), DetectorConfig::default());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = classifier.classify_path(&path, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_probe() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "plain.db", &sqlite_bytes());
        let config = DetectorConfig::default().with_probe_timeout(Duration::from_secs(60));
        let classifier = Classifier::new(HangingProber, config);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = classifier.classify_path(&path, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
