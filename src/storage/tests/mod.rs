// src/storage/tests/mod.rs


// Common utilities for storage tests
pub(crate) mod common {
    use futures::future::join_all;
    use serde::{Deserialize, Serialize};
    use std::sync::{Arc, LazyLock};
    use std::time::Duration;
    use tokio::sync::Barrier;

    use crate::error::Result;
    use crate::storage::{transition_script, StorageBackend, Transition};
    use ::redis::Script;

    /// Per-key tally used to exercise the storage contract without any
    /// rate limiting logic on top
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Tally {
        pub count: i64,
    }

    /// Adds `by` to the tally and reports the new total
    #[derive(Debug, Clone, Copy)]
    pub struct Increment {
        pub by: i64,
    }

    static INCREMENT_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
        transition_script(
            r#"
local count = 0
if state then
    count = state.count
end
count = count + tonumber(ARGV[2])
store({ count = count })
return cjson.encode(count)
"#,
        )
    });

    impl Transition for Increment {
        type State = Tally;
        type Outcome = i64;

        fn apply(&self, current: Option<Tally>) -> (Tally, i64) {
            let count = current.map_or(0, |t| t.count) + self.by;
            (Tally { count }, count)
        }

        fn script(&self) -> &'static Script {
            &INCREMENT_SCRIPT
        }

        fn script_args(&self) -> Vec<i64> {
            vec![self.by]
        }
    }

    // Test basic storage operations that should work on any backend
    pub async fn test_basic_operations<S: StorageBackend>(storage: &S, prefix: &str) -> Result<()> {
        let key = format!("{}:basic", prefix);
        let ttl = Duration::from_secs(60);

        // Absent key reads as None
        let missing: Option<Tally> = storage.load(&key).await?;
        assert_eq!(missing, None, "Key shouldn't exist initially");

        // First update starts from empty state
        let total = storage.atomic_update(&key, ttl, &Increment { by: 1 }).await?;
        assert_eq!(total, 1);

        // Second update sees the first
        let total = storage.atomic_update(&key, ttl, &Increment { by: 3 }).await?;
        assert_eq!(total, 4);

        let stored: Option<Tally> = storage.load(&key).await?;
        assert_eq!(stored, Some(Tally { count: 4 }), "Load should see the written state");

        // Other keys are independent
        let other = format!("{}:basic_other", prefix);
        let total = storage.atomic_update(&other, ttl, &Increment { by: 10 }).await?;
        assert_eq!(total, 10, "Different key should start from zero");

        Ok(())
    }

    // Concurrent updates of one key must serialize: no increment is lost
    pub async fn test_atomic_update_serializes<S>(storage: &S, prefix: &str) -> Result<()>
    where
        S: StorageBackend + Clone + 'static,
    {
        let key = format!("{}:concurrent", prefix);
        let tasks = 50;
        let barrier = Arc::new(Barrier::new(tasks));

        let handles = (0..tasks).map(|_| {
            let storage = storage.clone();
            let barrier = Arc::clone(&barrier);
            let key = key.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                storage
                    .atomic_update(&key, Duration::from_secs(60), &Increment { by: 1 })
                    .await
            })
        });

        let mut totals = Vec::with_capacity(tasks);
        for joined in join_all(handles).await {
            totals.push(joined.expect("task panicked")?);
        }
        totals.sort_unstable();

        // every caller observed a distinct intermediate total
        let expected: Vec<i64> = (1..=tasks as i64).collect();
        assert_eq!(totals, expected, "Each update should see all earlier ones");

        let stored: Option<Tally> = storage.load(&key).await?;
        assert_eq!(stored, Some(Tally { count: tasks as i64 }));
        Ok(())
    }
}
