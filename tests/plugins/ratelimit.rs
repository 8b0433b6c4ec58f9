use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use stewardgate::core::config::RateLimitConfig;
use stewardgate::plugins::ratelimit::RateLimiter;

const T0: u64 = 1_700_000_000_000;

#[test]
fn test_concurrent_acquire_never_exceeds_limit() {
    let limiter = Arc::new(RateLimiter::new(Duration::from_secs(60), 10));
    let granted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            let granted = Arc::clone(&granted);
            thread::spawn(move || {
                for _ in 0..25 {
                    if limiter.try_acquire_at("shared-actor", T0) {
                        granted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(granted.load(Ordering::SeqCst), 10);
    assert_eq!(limiter.remaining_at("shared-actor", T0), 0);
}

#[test]
fn test_actors_do_not_share_budget_under_contention() {
    let limiter = Arc::new(RateLimiter::new(Duration::from_secs(60), 3));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let limiter = Arc::clone(&limiter);
            thread::spawn(move || {
                let actor = format!("actor-{}", i);
                (0..10)
                    .filter(|_| limiter.try_acquire_at(&actor, T0))
                    .count()
            })
        })
        .collect();

    for h in handles {
        assert_eq!(h.join().unwrap(), 3);
    }
    assert_eq!(limiter.tracked_actors(), 6);
}

#[test]
fn test_budget_returns_after_window() {
    let limiter = RateLimiter::from_config(&RateLimitConfig {
        window_secs: 60,
        max_requests: 2,
    });
    assert!(limiter.try_acquire_at("a", T0));
    assert!(limiter.try_acquire_at("a", T0 + 30_000));
    assert!(!limiter.try_acquire_at("a", T0 + 59_999));
    assert_eq!(limiter.remaining_at("a", T0 + 60_000), 1);
    assert!(limiter.try_acquire_at("a", T0 + 60_000));
    assert_eq!(limiter.remaining_at("a", T0 + 90_000), 1);
}

#[test]
fn test_sweep_races_with_acquire() {
    let limiter = Arc::new(RateLimiter::new(Duration::from_millis(10), 1_000_000));

    let writers: Vec<_> = (0..4)
        .map(|i| {
            let limiter = Arc::clone(&limiter);
            thread::spawn(move || {
                for n in 0..500u64 {
                    assert!(limiter.try_acquire_at(&format!("w{}-{}", i, n % 7), T0 + n));
                }
            })
        })
        .collect();
    let sweeper = {
        let limiter = Arc::clone(&limiter);
        thread::spawn(move || {
            for n in 0..200u64 {
                limiter.sweep_at(T0 + n * 3);
            }
        })
    };

    for h in writers {
        h.join().unwrap();
    }
    sweeper.join().unwrap();

    limiter.sweep_at(T0 + 10_000);
    assert_eq!(limiter.tracked_actors(), 0);
}
