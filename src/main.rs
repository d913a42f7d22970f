use dotenv::dotenv;
use quota_guard::{init_logging, RateLimiter, RateLimiterConfig};
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();
    info!("Rate limiter starting up");

    if let Err(e) = run().await {
        error!(error = %e, "Demo failed");
        std::process::exit(1);
    }
}

async fn run() -> quota_guard::Result<()> {
    let config = RateLimiterConfig::from_env()?;
    let mut builder = RateLimiter::builder().config(config);
    if let Ok(url) = std::env::var("QUOTA_GUARD_REDIS_URL") {
        builder = builder.redis_url(url);
    }
    let limiter = builder.build().await?;

    info!(
        algorithm = %limiter.algorithm(),
        backend = limiter.backend_name(),
        "Configuration loaded"
    );

    for attempt in 1..=6 {
        let result = limiter
            .execute("demo:127.0.0.1", 5, Duration::from_secs(60))
            .await?;
        if result.allowed {
            info!(attempt, remaining = result.remaining, "Request allowed");
        } else {
            warn!(
                attempt,
                retry_after_ms = result.retry_after.unwrap_or_default().as_millis() as u64,
                reset_at = %result.reset_at,
                "Request denied"
            );
        }
    }

    limiter.shutdown().await
}
