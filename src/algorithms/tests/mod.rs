// src/algorithms/tests/mod.rs



/// Tests for Token Bucket algorithm
mod token_bucket_tests;

/// Common tests for all algorithms
#[cfg(test)]
mod common_tests {
    use std::time::Duration;

    use chrono::DateTime;

    use crate::algorithms::AlgorithmKind;
    use crate::clock::Clock;
    use crate::test_utils::create_test_rate_limiter;

    /// Test consistent behavior across all algorithm implementations
    #[tokio::test]
    async fn test_algorithm_trait_consistency() {
        let window = Duration::from_secs(60);

        for kind in AlgorithmKind::ALL {
            let (limiter, _clock) = create_test_rate_limiter(kind).await;
            let name = kind.as_str();

            // All should allow exactly 5 requests
            for i in 0..5 {
                let result = limiter.execute(name, 5, window).await.unwrap();
                assert!(result.allowed, "{}: Request {} should be allowed", name, i);
                assert_eq!(result.limit, 5);
                assert!(result.retry_after.is_none(), "{}: allowed carries no retry", name);
            }

            // All should deny further requests
            let result = limiter.execute(name, 5, window).await.unwrap();
            assert!(!result.allowed, "{}: 6th request should be denied", name);
            assert_eq!(result.remaining, 0);
            assert!(
                result.retry_after.is_some_and(|retry| !retry.is_zero()),
                "{}: denial should carry a positive retry_after",
                name
            );

            // All should respect key isolation
            let other = limiter
                .execute(&format!("{}_other", name), 5, window)
                .await
                .unwrap();
            assert!(other.allowed, "{}: Different key should be allowed", name);
            assert_eq!(other.remaining, 4);
        }
    }

    /// reset_at never lies in the past, and a denial always points to the future
    #[tokio::test]
    async fn test_reset_at_not_before_now() {
        let window = Duration::from_millis(1500);

        for kind in AlgorithmKind::ALL {
            let (limiter, clock) = create_test_rate_limiter(kind).await;
            let mut denials = 0;
            for step in 0..20 {
                let result = limiter.execute("reset_check", 3, window).await.unwrap();
                let now = DateTime::from_timestamp_millis(clock.now_millis()).unwrap();
                if result.allowed {
                    assert!(
                        result.reset_at >= now,
                        "{}: step {} reset_at {} before now {}",
                        kind,
                        step,
                        result.reset_at,
                        now
                    );
                } else {
                    denials += 1;
                    assert!(
                        result.reset_at > now,
                        "{}: step {} denied with reset_at {} not after now {}",
                        kind,
                        step,
                        result.reset_at,
                        now
                    );
                }
                clock.advance(Duration::from_millis(137));
            }
            assert!(denials > 0, "{}: the sequence should hit the limit", kind);
        }
    }

    /// A denial right at a window boundary still resets strictly later
    #[tokio::test]
    async fn test_denial_at_boundary_resets_later() {
        let window = Duration::from_secs(60);

        for kind in AlgorithmKind::ALL {
            let (limiter, clock) = create_test_rate_limiter(kind).await;
            assert!(limiter.execute("edge", 1, window).await.unwrap().allowed);

            // the last millisecond of the window
            clock.advance(window - Duration::from_millis(1));
            let result = limiter.execute("edge", 1, window).await.unwrap();
            assert!(!result.allowed, "{}: still inside the window", kind);
            assert!(result.reset_at.timestamp_millis() > clock.now_millis(), "{}", kind);
            assert_eq!(result.retry_after, Some(Duration::from_millis(1)), "{}", kind);
        }
    }

    /// A subject that stays idle for a full window starts over
    #[tokio::test]
    async fn test_idle_window_restores_capacity() {
        let window = Duration::from_secs(10);

        for kind in AlgorithmKind::ALL {
            let (limiter, clock) = create_test_rate_limiter(kind).await;
            for _ in 0..4 {
                limiter.execute("idle", 4, window).await.unwrap();
            }
            assert!(!limiter.execute("idle", 4, window).await.unwrap().allowed);

            clock.advance(window * 2);
            let result = limiter.execute("idle", 4, window).await.unwrap();
            assert!(result.allowed, "{}: should be allowed after idling", kind);
            assert_eq!(result.remaining, 3, "{}: full capacity after idling", kind);
        }
    }
}
