#[cfg(test)]
mod tests {
    use futures::future::join_all;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Barrier;

    use crate::algorithms::token_bucket::{BucketState, BucketStep};
    use crate::algorithms::AlgorithmKind;
    use crate::storage::Transition;
    use crate::test_utils::{create_test_rate_limiter, T0};

    const WINDOW: Duration = Duration::from_secs(10);

    fn step(now_ms: i64, limit: u64) -> BucketStep {
        BucketStep {
            now_ms,
            window_ms: 10_000,
            limit,
        }
    }

    /// Test token consumption and token depletion
    #[tokio::test]
    async fn test_token_consumption_and_depletion() {
        let (limiter, _clock) = create_test_rate_limiter(AlgorithmKind::TokenBucket).await;

        for i in 0..10u64 {
            let result = limiter
                .execute("consumption_test_user", 10, WINDOW)
                .await
                .unwrap();
            assert!(result.allowed, "Request {} should be allowed", i);
            assert_eq!(
                result.remaining,
                10 - i - 1,
                "Should have {} tokens remaining",
                10 - i - 1
            );
        }

        let result = limiter
            .execute("consumption_test_user", 10, WINDOW)
            .await
            .unwrap();
        assert!(!result.allowed, "Request when tokens depleted should be denied");
        assert_eq!(result.remaining, 0, "Should have 0 tokens remaining");
        assert_eq!(
            result.retry_after,
            Some(Duration::from_secs(1)),
            "One token refills every window / limit"
        );
        assert_eq!(result.reset_at.timestamp_millis(), T0 + 1_000);

        // Test multiple users (keys)
        let result = limiter
            .execute("consumption_different_user", 10, WINDOW)
            .await
            .unwrap();
        assert!(result.allowed, "Different user should be allowed");
        assert_eq!(result.remaining, 9);
    }

    /// Test token regeneration over time
    #[tokio::test]
    async fn test_token_regeneration_over_time() {
        let (limiter, clock) = create_test_rate_limiter(AlgorithmKind::TokenBucket).await;

        for _ in 0..10 {
            limiter.execute("regen_test_user", 10, WINDOW).await.unwrap();
        }
        assert!(!limiter.execute("regen_test_user", 10, WINDOW).await.unwrap().allowed);

        // waiting exactly retry_after buys exactly one request
        clock.advance(Duration::from_secs(1));
        let result = limiter.execute("regen_test_user", 10, WINDOW).await.unwrap();
        assert!(result.allowed, "Request after token regeneration should be allowed");
        assert_eq!(result.remaining, 0);

        let result = limiter.execute("regen_test_user", 10, WINDOW).await.unwrap();
        assert!(!result.allowed, "Only one token should have been regenerated");

        // Wait for more tokens
        clock.advance(Duration::from_secs(4));
        for i in 0..4 {
            let result = limiter.execute("regen_test_user", 10, WINDOW).await.unwrap();
            assert!(result.allowed, "Request {} after more regeneration should be allowed", i);
        }
        assert!(!limiter.execute("regen_test_user", 10, WINDOW).await.unwrap().allowed);
    }

    /// Refill never exceeds capacity however long the bucket idles
    #[tokio::test]
    async fn test_token_capacity_cap() {
        let (limiter, clock) = create_test_rate_limiter(AlgorithmKind::TokenBucket).await;

        limiter.execute("capped", 3, WINDOW).await.unwrap();
        clock.advance(Duration::from_secs(3600));

        let result = limiter.execute("capped", 3, WINDOW).await.unwrap();
        assert_eq!(result.remaining, 2, "Bucket refills to capacity and no further");
    }

    #[test]
    fn test_bucket_apply_partial_refill() {
        let empty = BucketState {
            tokens: 0.0,
            last_refill_ms: T0,
        };

        // half a token after 500ms: still denied, the half is kept
        let (next, decision) = step(T0 + 500, 10).apply(Some(empty));
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_ms, Some(500));
        assert_eq!(decision.reset_at_ms, T0 + 1_000);
        assert!((next.tokens - 0.5).abs() < 1e-9);
        assert_eq!(next.last_refill_ms, T0 + 500);

        let (next, decision) = step(T0 + 1_000, 10).apply(Some(next));
        assert!(decision.allowed);
        assert!(next.tokens.abs() < 1e-9);
    }

    #[test]
    fn test_bucket_apply_ignores_backwards_clock() {
        let state = BucketState {
            tokens: 2.0,
            last_refill_ms: T0 + 5_000,
        };

        let (next, decision) = step(T0, 10).apply(Some(state));
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1, "Skew must not remove tokens");
        assert!((next.tokens - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bucket_apply_reset_at_is_full_refill() {
        let (next, decision) = step(T0, 4).apply(None);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 3);
        // one token short of full at 2.5s per token
        assert_eq!(decision.reset_at_ms, T0 + 2_500);
        assert_eq!(next.tokens, 3.0);
    }

    // Fractional tokens survive storage bit for bit; 14-digit number output
    // would round this one and shift a later retry_after by a millisecond
    #[test]
    fn test_bucket_state_keeps_every_digit() {
        let state = BucketState {
            tokens: 0.1 + 0.2,
            last_refill_ms: T0,
        };

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains(r#""tokens":"0.30000000000000004""#), "{}", json);
        let back: BucketState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tokens.to_bits(), state.tokens.to_bits());
    }

    /// Test concurrent access to token bucket
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_token_bucket_access() {
        let (limiter, _clock) = create_test_rate_limiter(AlgorithmKind::TokenBucket).await;
        let limiter = Arc::new(limiter);
        let barrier = Arc::new(Barrier::new(20));

        let tasks = (0..20).map(|_| {
            let limiter = Arc::clone(&limiter);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                limiter.execute("concurrent_bucket", 10, WINDOW).await.unwrap().allowed
            })
        });

        let allowed = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(allowed, 10, "Exactly capacity requests should be allowed");
    }
}
