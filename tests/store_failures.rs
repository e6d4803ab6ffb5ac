use admission_guard::infrastructure::mocks::{
    Fault, FlakyBlacklist, FlakyQuotaStore, MockCaptureLayer, MockClock,
};
use admission_guard::{
    AdmissionDecision, AdmissionGuard, BlacklistType, FailureMode, FailureOutcome, Identity,
    QuotaStore, Rejection, RequestContext, Tier,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

struct Harness {
    guard: AdmissionGuard,
    store: Arc<FlakyQuotaStore>,
    blacklist: Arc<FlakyBlacklist>,
}

fn harness(limiter_mode: FailureMode, blacklist_mode: FailureMode) -> Harness {
    let clock = MockClock::new(1_700_000_000_000);
    clock.set_hour(3);
    let clock = Arc::new(clock);
    let store = Arc::new(FlakyQuotaStore::new(clock.clone()));
    let blacklist = Arc::new(FlakyBlacklist::new());

    let guard = AdmissionGuard::builder()
        .with_clock(clock)
        .with_quota_store(store.clone())
        .with_blacklist_repository(blacklist.clone())
        .with_limiter_failure_mode(limiter_mode)
        .with_blacklist_failure_mode(blacklist_mode)
        .build()
        .unwrap();

    Harness {
        guard,
        store,
        blacklist,
    }
}

fn request() -> RequestContext {
    RequestContext::new(
        Identity::new().with_ip("1.2.3.4"),
        Tier::Basic,
        "GET",
        "/products",
    )
}

#[tokio::test]
async fn test_quota_store_down_fails_open_by_default() {
    let h = harness(FailureMode::Open, FailureMode::Open);
    h.store.fail_with(Fault::Refuse);

    match h.guard.admit(&request()).await {
        AdmissionDecision::Admitted(admission) => {
            assert!(admission.degraded);
            assert_eq!(admission.remaining, 100);
            assert_eq!(admission.reset_after_ms, 60_000);
        }
        other => panic!("expected degraded admission, got {:?}", other),
    }
    assert_eq!(h.guard.metrics().degraded_decisions(), 1);
    assert_eq!(h.guard.metrics().requests_admitted(), 1);
}

#[tokio::test]
async fn test_quota_store_down_fails_closed_when_configured() {
    let h = harness(FailureMode::Closed, FailureMode::Open);
    h.store.fail_with(Fault::Refuse);

    assert_eq!(
        h.guard.admit(&request()).await,
        AdmissionDecision::Denied(Rejection::StoreUnavailable {
            retry_after_secs: 60
        })
    );
    assert_eq!(h.guard.metrics().store_rejections(), 1);
    assert_eq!(h.guard.metrics().quota_rejections(), 0);
}

#[tokio::test]
async fn test_recovery_resumes_counting() {
    let h = harness(FailureMode::Open, FailureMode::Open);
    h.store.fail_with(Fault::Refuse);
    h.guard.admit(&request()).await;

    h.store.recover();
    assert!(h.store.health().await.is_healthy());
    match h.guard.admit(&request()).await {
        AdmissionDecision::Admitted(admission) => {
            assert!(!admission.degraded);
            assert_eq!(admission.remaining, 99);
        }
        other => panic!("expected admission, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_hanging_store_times_out() {
    let h = harness(FailureMode::Open, FailureMode::Open);
    h.store.fail_with(Fault::Hang(Duration::from_secs(5)));

    let started = tokio::time::Instant::now();
    let decision = h.guard.admit(&request()).await;
    assert!(started.elapsed() < Duration::from_secs(5));

    match decision {
        AdmissionDecision::Admitted(admission) => assert!(admission.degraded),
        other => panic!("expected degraded admission, got {:?}", other),
    }
}

#[tokio::test]
async fn test_blacklist_down_fails_open_independently() {
    // Limiter closed, blacklist open: a blacklist outage alone never blocks
    let h = harness(FailureMode::Closed, FailureMode::Open);
    h.blacklist.fail_with(Fault::Refuse);

    assert!(h.guard.admit(&request()).await.is_admitted());
    assert_eq!(h.guard.metrics().degraded_decisions(), 1);
}

#[tokio::test]
async fn test_blacklist_down_fails_closed_when_configured() {
    let h = harness(FailureMode::Open, FailureMode::Closed);
    h.blacklist.fail_with(Fault::Refuse);

    assert_eq!(
        h.guard.admit(&request()).await,
        AdmissionDecision::Denied(Rejection::Blacklisted)
    );
}

#[tokio::test]
async fn test_failure_tracking_survives_store_outage() {
    let h = harness(FailureMode::Open, FailureMode::Open);
    let identity = Identity::new().with_ip("1.2.3.4");
    h.store.fail_with(Fault::Refuse);

    for _ in 0..20 {
        assert_eq!(
            h.guard.record_failure(&identity).await,
            FailureOutcome::Unavailable
        );
    }
    assert!(h.blacklist.inner().is_empty());
    assert!(h.guard.record_success(&identity).await.is_err());
}

#[tokio::test]
async fn test_escalation_lost_when_blacklist_down() {
    let h = harness(FailureMode::Open, FailureMode::Open);
    let identity = Identity::new().with_ip("1.2.3.4");

    for _ in 0..10 {
        h.guard.record_failure(&identity).await;
    }
    h.blacklist.fail_with(Fault::Refuse);
    assert_eq!(
        h.guard.record_failure(&identity).await,
        FailureOutcome::Unavailable
    );

    h.blacklist.recover();
    assert!(h
        .blacklist
        .inner()
        .entry(BlacklistType::Ip, "1.2.3.4")
        .is_none());
}

#[tokio::test]
async fn test_degradation_is_logged() {
    let capture = MockCaptureLayer::new();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let _default = tracing::subscriber::set_default(subscriber);

    let h = harness(FailureMode::Open, FailureMode::Open);
    h.store.fail_with(Fault::Refuse);
    h.guard.admit(&request()).await;

    let events = capture.find("quota store unavailable, failing open");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, Level::WARN);
    assert_eq!(events[0].field("policy"), Some("general"));
    assert_eq!(events[0].field("key"), Some("ip:1.2.3.4"));
    assert!(!capture.find("failed to record behavior sample").is_empty());
}
