//! Rolling per-key request history and suspicion scoring.
//!
//! Samples are stored as bincode-encoded entries of a bounded list in the
//! [`QuotaStore`], newest first. Scoring reads the trailing window and runs
//! the detectors in [`crate::domain::behavior`].

use crate::application::ports::{with_timeout, Clock, QuotaStore};
use crate::domain::behavior::{BehaviorSample, SuspicionScore};
use crate::domain::error::StoreError;
use crate::domain::key::RateLimitKey;
use crate::domain::policy::duration_to_ms;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default maximum samples retained per key.
pub const DEFAULT_HISTORY_CAP: usize = 1_000;
/// Default lifetime of a key's history after its last sample.
pub const DEFAULT_HISTORY_TTL: Duration = Duration::from_secs(3_600);

const HISTORY_PREFIX: &str = "behavior:";

/// History retention settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BehaviorConfig {
    /// Samples kept per key; older ones are trimmed on append
    pub history_cap: usize,
    /// Trailing window considered when scoring
    pub history_ttl: Duration,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            history_cap: DEFAULT_HISTORY_CAP,
            history_ttl: DEFAULT_HISTORY_TTL,
        }
    }
}

/// Records request samples and scores keys for anomalous behavior.
#[derive(Debug, Clone)]
pub struct BehaviorAnalyzer {
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    config: BehaviorConfig,
    timeout: Duration,
}

impl BehaviorAnalyzer {
    pub fn new(store: Arc<dyn QuotaStore>, clock: Arc<dyn Clock>, config: BehaviorConfig) -> Self {
        Self {
            store,
            clock,
            config,
            timeout: crate::application::limiter::DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config(&self) -> &BehaviorConfig {
        &self.config
    }

    fn history_key(key: &RateLimitKey) -> String {
        format!("{}{}", HISTORY_PREFIX, key)
    }

    /// Append a sample to the key's bounded history.
    pub async fn record_sample(
        &self,
        key: &RateLimitKey,
        sample: &BehaviorSample,
    ) -> Result<(), StoreError> {
        let encoded =
            bincode::serialize(sample).map_err(|e| StoreError::Corrupted(e.to_string()))?;
        with_timeout(
            self.timeout,
            self.store.append_bounded(
                &Self::history_key(key),
                encoded,
                self.config.history_cap,
                self.config.history_ttl,
            ),
        )
        .await
    }

    /// Samples inside the trailing window, newest first.
    ///
    /// Entries that fail to decode are skipped.
    pub async fn history(&self, key: &RateLimitKey) -> Result<Vec<BehaviorSample>, StoreError> {
        let raw = with_timeout(self.timeout, self.store.read_list(&Self::history_key(key))).await?;
        let cutoff = self
            .clock
            .now_ms()
            .saturating_sub(duration_to_ms(self.config.history_ttl));

        let mut samples = Vec::with_capacity(raw.len());
        for bytes in raw {
            match bincode::deserialize::<BehaviorSample>(&bytes) {
                Ok(sample) if sample.timestamp_ms >= cutoff => samples.push(sample),
                Ok(_) => {}
                Err(e) => debug!(key = %key, error = %e, "skipping undecodable behavior sample"),
            }
        }
        Ok(samples)
    }

    /// Suspicion score for a key. Scores zero when the history cannot be read.
    pub async fn score(&self, key: &RateLimitKey) -> SuspicionScore {
        match self.history(key).await {
            Ok(samples) => {
                let score = SuspicionScore::evaluate(&samples);
                if score.score > 0 {
                    debug!(key = %key, score = score.score, patterns = ?score.tags(), "suspicious behavior");
                }
                score
            }
            Err(error) => {
                warn!(key = %key, error = %error, "behavior history unavailable, scoring as clean");
                SuspicionScore::clean()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::behavior::SuspicionPattern;
    use crate::infrastructure::memory_store::MemoryQuotaStore;
    use crate::infrastructure::mocks::{Fault, FlakyQuotaStore, MockClock};

    fn analyzer(config: BehaviorConfig) -> (BehaviorAnalyzer, MockClock) {
        let clock = MockClock::new(10_000_000);
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(MemoryQuotaStore::new(Arc::clone(&shared)));
        (BehaviorAnalyzer::new(store, shared, config), clock)
    }

    #[tokio::test]
    async fn test_record_and_read_history() {
        let (analyzer, clock) = analyzer(BehaviorConfig::default());
        let key = RateLimitKey::ip("1.2.3.4");

        for path in ["/a", "/b"] {
            let sample = BehaviorSample::new(path, "GET", clock.now_ms());
            analyzer.record_sample(&key, &sample).await.unwrap();
        }

        let history = analyzer.history(&key).await.unwrap();
        let paths: Vec<_> = history.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["/b", "/a"]);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let (analyzer, clock) = analyzer(BehaviorConfig {
            history_cap: 10,
            history_ttl: DEFAULT_HISTORY_TTL,
        });
        let key = RateLimitKey::ip("1.2.3.4");

        for i in 0..25 {
            let sample = BehaviorSample::new(format!("/p/{}", i), "GET", clock.now_ms());
            analyzer.record_sample(&key, &sample).await.unwrap();
        }
        let history = analyzer.history(&key).await.unwrap();
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].path, "/p/24");

        // Trimmed history never reaches the scanning threshold
        assert_eq!(analyzer.score(&key).await.score, 0);
    }

    #[tokio::test]
    async fn test_scanning_scores_through_store() {
        let (analyzer, clock) = analyzer(BehaviorConfig::default());
        let key = RateLimitKey::ip("6.6.6.6");

        for i in 0..25 {
            let sample = BehaviorSample::new(format!("/admin/{}", i), "GET", clock.now_ms());
            analyzer.record_sample(&key, &sample).await.unwrap();
        }

        let score = analyzer.score(&key).await;
        assert!(score.score >= 30);
        assert!(score.has(SuspicionPattern::EndpointScanning));
    }

    #[tokio::test]
    async fn test_injection_scores_through_store() {
        let (analyzer, clock) = analyzer(BehaviorConfig::default());
        let key = RateLimitKey::user("mallory");

        let sample = BehaviorSample::new("/search", "GET", clock.now_ms())
            .with_query("q", "1 UNION SELECT password");
        analyzer.record_sample(&key, &sample).await.unwrap();

        let score = analyzer.score(&key).await;
        assert!(score.score >= 50);
        assert_eq!(score.tags(), vec!["injection_attempt"]);
    }

    #[tokio::test]
    async fn test_samples_outside_window_drop_out() {
        let (analyzer, clock) = analyzer(BehaviorConfig::default());
        let key = RateLimitKey::user("mallory");

        let old = BehaviorSample::new("/search", "GET", clock.now_ms())
            .with_query("q", "' OR '1'='1");
        analyzer.record_sample(&key, &old).await.unwrap();

        // A fresh sample keeps the list alive while the old one ages out
        clock.advance(Duration::from_secs(3_000));
        let fresh = BehaviorSample::new("/home", "GET", clock.now_ms());
        analyzer.record_sample(&key, &fresh).await.unwrap();
        clock.advance(Duration::from_secs(1_000));

        let history = analyzer.history(&key).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(analyzer.score(&key).await.score, 0);
    }

    #[tokio::test]
    async fn test_store_fault_scores_zero() {
        let clock = Arc::new(MockClock::new(0));
        let store = Arc::new(FlakyQuotaStore::new(clock.clone()));
        let analyzer = BehaviorAnalyzer::new(store.clone(), clock, BehaviorConfig::default());
        let key = RateLimitKey::ip("1.2.3.4");

        let sample = BehaviorSample::new("/search", "GET", 0).with_query("q", "<script>");
        analyzer.record_sample(&key, &sample).await.unwrap();

        store.fail_with(Fault::Refuse);
        assert!(analyzer.record_sample(&key, &sample).await.is_err());
        assert_eq!(analyzer.score(&key).await, SuspicionScore::clean());
    }
}
