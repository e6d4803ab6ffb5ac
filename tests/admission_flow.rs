use admission_guard::infrastructure::mocks::MockClock;
use admission_guard::{
    AdmissionDecision, AdmissionError, AdmissionGuard, BlacklistType, FailureOutcome, Identity,
    MemoryQuotaStore, Policy, RateLimitKey, Rejection, RequestContext, Tier,
};
use std::sync::Arc;
use std::time::Duration;

fn off_peak_clock() -> MockClock {
    let clock = MockClock::new(1_700_000_000_000);
    clock.set_hour(3);
    clock
}

fn guard_with(clock: &MockClock) -> AdmissionGuard {
    AdmissionGuard::builder()
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap()
}

fn browse(ip: &str) -> RequestContext {
    RequestContext::new(Identity::new().with_ip(ip), Tier::Basic, "GET", "/products")
}

#[tokio::test]
async fn test_basic_tier_admits_one_hundred_then_rejects() {
    let clock = off_peak_clock();
    let guard = guard_with(&clock);
    let ctx = browse("1.2.3.4");

    for i in 0..100u32 {
        match guard.admit(&ctx).await {
            AdmissionDecision::Admitted(admission) => {
                assert_eq!(admission.remaining, 99 - i);
                assert_eq!(admission.policy.points(), 100);
                assert!(!admission.degraded);
            }
            other => panic!("request {} should be admitted, got {:?}", i + 1, other),
        }
    }

    match guard.admit(&ctx).await {
        AdmissionDecision::Denied(Rejection::QuotaExceeded {
            remaining,
            policy,
            tier,
            retry_after_secs,
        }) => {
            assert_eq!(remaining, 0);
            assert_eq!(policy, "general");
            assert_eq!(tier, Tier::Basic);
            assert_eq!(retry_after_secs, 60);
        }
        other => panic!("101st request should be rejected, got {:?}", other),
    }

    let snapshot = guard.metrics().snapshot();
    assert_eq!(snapshot.requests_admitted, 100);
    assert_eq!(snapshot.quota_rejections, 1);
    assert_eq!(
        guard.metrics().top_abusers(1),
        vec![("ip:1.2.3.4".to_string(), 1)]
    );
}

#[tokio::test]
async fn test_block_expires_after_block_duration() {
    let clock = off_peak_clock();
    let guard = guard_with(&clock);
    let ctx = browse("1.2.3.4");

    for _ in 0..101 {
        guard.admit(&ctx).await;
    }
    clock.advance(Duration::from_secs(59));
    assert!(!guard.admit(&ctx).await.is_admitted());

    clock.advance(Duration::from_secs(1));
    assert!(guard.admit(&ctx).await.is_admitted());
}

#[tokio::test]
async fn test_keys_are_independent() {
    let clock = off_peak_clock();
    let guard = guard_with(&clock);

    for _ in 0..101 {
        guard.admit(&browse("1.1.1.1")).await;
    }
    assert!(!guard.admit(&browse("1.1.1.1")).await.is_admitted());
    assert!(guard.admit(&browse("2.2.2.2")).await.is_admitted());

    // Same address, but authenticated callers are limited per user
    let user = RequestContext::new(
        Identity::new().with_ip("1.1.1.1").with_user("alice"),
        Tier::Basic,
        "GET",
        "/products",
    );
    assert!(guard.admit(&user).await.is_admitted());
}

#[tokio::test]
async fn test_premium_tier_has_larger_budget() {
    let clock = off_peak_clock();
    let guard = guard_with(&clock);
    let ctx = RequestContext::new(
        Identity::new().with_api_client("partner-7"),
        Tier::Premium,
        "GET",
        "/catalog",
    );

    match guard.admit(&ctx).await {
        AdmissionDecision::Admitted(admission) => {
            assert_eq!(admission.key, RateLimitKey::api("partner-7"));
            assert_eq!(admission.policy.points(), 1_000);
            assert_eq!(admission.remaining, 999);
        }
        other => panic!("expected admission, got {:?}", other),
    }
}

#[tokio::test]
async fn test_peak_hours_reduce_budget() {
    let clock = off_peak_clock();
    clock.set_hour(12);
    let guard = guard_with(&clock);
    let ctx = browse("1.2.3.4");

    let mut admitted = 0;
    while guard.admit(&ctx).await.is_admitted() {
        admitted += 1;
    }
    assert_eq!(admitted, 80);
}

#[tokio::test]
async fn test_injection_attempt_reduces_budget() {
    let clock = off_peak_clock();
    let guard = guard_with(&clock);
    let attack = browse("6.6.6.6").with_query("id", "1 UNION SELECT password FROM users");

    match guard.admit(&attack).await {
        AdmissionDecision::Admitted(admission) => {
            assert!(admission.score.score >= 50);
            assert!(admission.score.tags().contains(&"injection_attempt"));
            assert_eq!(admission.policy.points(), 70);
        }
        other => panic!("expected admission, got {:?}", other),
    }

    let mut admitted = 1;
    while guard.admit(&browse("6.6.6.6")).await.is_admitted() {
        admitted += 1;
    }
    assert_eq!(admitted, 70);
}

#[tokio::test]
async fn test_eleventh_failure_blacklists_source() {
    let clock = off_peak_clock();
    let guard = guard_with(&clock);
    let identity = Identity::new().with_ip("9.9.9.9").with_user("mallory");
    let ctx = RequestContext::new(identity.clone(), Tier::Basic, "POST", "/login");

    for _ in 0..10 {
        assert!(matches!(
            guard.record_failure(&identity).await,
            FailureOutcome::Recorded { .. }
        ));
    }
    assert!(guard.admit(&ctx).await.is_admitted());

    match guard.record_failure(&identity).await {
        FailureOutcome::Escalated(entry) => {
            assert_eq!(entry.entry_type, BlacklistType::Ip);
            assert_eq!(entry.value, "9.9.9.9");
        }
        other => panic!("expected escalation, got {:?}", other),
    }

    assert_eq!(
        guard.admit(&ctx).await,
        AdmissionDecision::Denied(Rejection::Blacklisted)
    );
    assert_eq!(guard.metrics().escalations(), 1);
    assert_eq!(guard.metrics().blacklist_denials(), 1);

    // Escalations are bounded
    clock.advance(Duration::from_secs(24 * 3_600));
    assert!(guard.admit(&ctx).await.is_admitted());
}

#[tokio::test]
async fn test_failures_keep_manual_blacklist_entry() {
    let clock = off_peak_clock();
    let guard = guard_with(&clock);
    let manual = guard
        .blacklist()
        .add(BlacklistType::Ip, "9.9.9.9", "chargeback fraud ring", None)
        .await
        .unwrap();
    let identity = Identity::new().with_ip("9.9.9.9");

    for _ in 0..11 {
        guard.record_failure(&identity).await;
    }
    assert_eq!(
        guard.record_failure(&identity).await,
        FailureOutcome::Escalated(manual.clone())
    );
    assert_eq!(guard.metrics().escalations(), 0);
    assert_eq!(guard.blacklist().active_entries().await.unwrap(), vec![manual]);

    // The permanent entry outlives the escalation window
    clock.advance(Duration::from_secs(24 * 3_600));
    assert_eq!(
        guard.admit(&browse("9.9.9.9")).await,
        AdmissionDecision::Denied(Rejection::Blacklisted)
    );
}

#[tokio::test]
async fn test_success_clears_failure_count() {
    let clock = off_peak_clock();
    let guard = guard_with(&clock);
    let identity = Identity::new().with_ip("9.9.9.9");

    for _ in 0..10 {
        guard.record_failure(&identity).await;
    }
    guard.record_success(&identity).await.unwrap();
    assert_eq!(
        guard.record_failure(&identity).await,
        FailureOutcome::Recorded { remaining: 9 }
    );
}

#[tokio::test]
async fn test_blacklist_runs_before_quota() {
    let clock = off_peak_clock();
    let guard = guard_with(&clock);
    guard
        .blacklist()
        .add(BlacklistType::Ip, "6.6.6.6", "chargeback fraud", None)
        .await
        .unwrap();

    let decision = guard.admit(&browse("6.6.6.6")).await;
    assert_eq!(decision, AdmissionDecision::Denied(Rejection::Blacklisted));
    assert_eq!(
        decision.into_result().unwrap_err(),
        AdmissionError::Blacklisted
    );

    // No quota was consumed for the denied request
    let record = guard
        .controller()
        .limiter()
        .get("general", &RateLimitKey::ip("6.6.6.6"))
        .await
        .unwrap();
    assert!(record.is_none());
    assert_eq!(guard.metrics().requests_admitted(), 0);
}

#[tokio::test]
async fn test_user_agent_blacklist() {
    let clock = off_peak_clock();
    let guard = guard_with(&clock);
    guard
        .blacklist()
        .add(BlacklistType::UserAgent, "sqlmap/1.7", "scanner", None)
        .await
        .unwrap();

    let scanner = RequestContext::new(
        Identity::new().with_ip("5.5.5.5").with_user_agent("sqlmap/1.7"),
        Tier::Basic,
        "GET",
        "/",
    );
    assert_eq!(
        guard.admit(&scanner).await,
        AdmissionDecision::Denied(Rejection::Blacklisted)
    );

    // Deactivated entries stop matching
    assert!(guard
        .blacklist()
        .deactivate(BlacklistType::UserAgent, "sqlmap/1.7")
        .await
        .unwrap());
    assert!(guard.admit(&scanner).await.is_admitted());
}

#[tokio::test]
async fn test_endpoint_class_gate() {
    let clock = off_peak_clock();
    let guard = AdmissionGuard::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_endpoint_policy("auth", Policy::from_secs(5, 60, 300).unwrap())
        .build()
        .unwrap();
    let login = browse("3.3.3.3").with_endpoint_class("auth");

    for _ in 0..5 {
        assert!(guard.admit(&login).await.is_admitted());
    }
    match guard.admit(&login).await {
        AdmissionDecision::Denied(rejection) => {
            assert_eq!(rejection.retry_after_secs(), Some(300));
        }
        other => panic!("expected auth rejection, got {:?}", other),
    }

    // Unknown classes only pass the general gate
    let other = browse("3.3.3.3").with_endpoint_class("reports");
    assert!(guard.admit(&other).await.is_admitted());
}

#[tokio::test]
async fn test_idle_keys_are_purged_from_memory_store() {
    let clock = off_peak_clock();
    let store = Arc::new(MemoryQuotaStore::new(Arc::new(clock.clone())));
    let guard = AdmissionGuard::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_quota_store(store.clone())
        .build()
        .unwrap();

    for i in 0..1_000u32 {
        let ip = format!("10.{}.{}.{}", i / 65_536, (i / 256) % 256, i % 256);
        assert!(guard.admit(&browse(&ip)).await.is_admitted());
    }
    let populated = store.len();
    assert!(populated >= 1_000);

    clock.advance(Duration::from_secs(48 * 3_600));
    assert!(guard.admit(&browse("172.16.0.1")).await.is_admitted());
    assert!(store.len() <= 2);
}
