// src/bin/quota_guard_bench.rs

use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use quota_guard::config::{InMemoryConfig, RateLimiterConfig};
use quota_guard::{AlgorithmKind, RateLimiter};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "quota_guard_bench",
    about = "A benchmarking tool for rate limiting algorithms"
)]
struct Opt {
    /// Rate limiting algorithm to benchmark
    #[structopt(short, long, possible_values = &["sliding_window_counter", "sliding_window_log", "token_bucket", "all"], default_value = "all")]
    algorithm: String,

    /// Storage backend to use
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "memory")]
    storage: String,

    /// Redis URL (when using Redis storage)
    #[structopt(long, default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Maximum number of requests allowed per window
    #[structopt(short, long, default_value = "1000")]
    limit: u64,

    /// Window duration in seconds
    #[structopt(short, long, default_value = "60")]
    window_seconds: u64,

    /// Number of concurrent users to simulate
    #[structopt(short = "u", long, default_value = "10")]
    num_users: usize,

    /// Number of requests per user
    #[structopt(short = "r", long, default_value = "100")]
    requests_per_user: usize,

    /// Fraction of requests sent to a randomly chosen user instead of the task's own
    #[structopt(long, default_value = "0.0")]
    cross_traffic: f64,

    /// Number of iterations to run
    #[structopt(short, long, default_value = "3")]
    iterations: usize,

    /// Maximum concurrency level
    #[structopt(short = "c", long, default_value = "100")]
    concurrency: usize,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

/// Totals for one algorithm across all iterations
#[derive(Debug, Default)]
struct BenchResult {
    name: String,
    allowed: usize,
    denied: usize,
    errors: usize,
    duration: Duration,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = match (opt.disable_logs, opt.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "quota_guard_bench={},quota_guard={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Determine which algorithms to benchmark
    let algorithms: Vec<AlgorithmKind> = if opt.algorithm == "all" {
        AlgorithmKind::ALL.to_vec()
    } else {
        vec![opt.algorithm.parse()?]
    };

    let mut results = Vec::with_capacity(algorithms.len());
    for kind in algorithms {
        let limiter = build_limiter(kind, &opt).await?;
        let name = format!("{} ({})", kind, limiter.backend_name());
        let result = run_benchmark(limiter, name, &opt).await?;
        results.push(result);
    }

    print_results(&results);
    Ok(())
}

async fn build_limiter(
    kind: AlgorithmKind,
    opt: &Opt,
) -> Result<RateLimiter, Box<dyn std::error::Error>> {
    // fresh namespace per run so earlier runs against Redis don't interfere
    let config = RateLimiterConfig {
        algorithm: kind,
        key_prefix: format!("bench:{}", uuid::Uuid::new_v4()),
        ..RateLimiterConfig::default()
    };
    let builder = RateLimiter::builder().config(config);

    let builder = match opt.storage.as_str() {
        "memory" => builder.memory_config(InMemoryConfig {
            max_entries: 100_000,
            use_background_task: true,
            cleanup_interval: Duration::from_secs(60),
        }),
        "redis" => builder.redis_url(opt.redis_url.as_str()),
        other => return Err(format!("Unknown storage backend: {}", other).into()),
    };

    Ok(builder.build().await?)
}

async fn run_benchmark(
    limiter: RateLimiter,
    name: String,
    opt: &Opt,
) -> Result<BenchResult, Box<dyn std::error::Error>> {
    info!("Running benchmark: {}", name);

    let window = Duration::from_secs(opt.window_seconds);
    let per_iteration = (opt.num_users * opt.requests_per_user) as u64;
    let progress = ProgressBar::new(per_iteration * opt.iterations as u64);
    progress.set_style(
        ProgressStyle::with_template("{msg:32} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("##-"),
    );
    progress.set_message(name.clone());

    let mut totals = BenchResult {
        name,
        ..BenchResult::default()
    };
    let limiter = Arc::new(limiter);

    for iteration in 0..opt.iterations {
        let start_time = Instant::now();

        // Create a barrier to start all tasks at once
        let barrier = Arc::new(Barrier::new(opt.num_users));
        let semaphore = Arc::new(Semaphore::new(opt.concurrency.max(1)));

        let handles = (0..opt.num_users).map(|user_id| {
            let limiter = Arc::clone(&limiter);
            let barrier = Arc::clone(&barrier);
            let semaphore = Arc::clone(&semaphore);
            let progress = progress.clone();
            let opt = opt.clone();

            tokio::spawn(async move {
                barrier.wait().await;

                let (mut allowed, mut denied, mut errors) = (0usize, 0usize, 0usize);
                for _ in 0..opt.requests_per_user {
                    let Ok(_permit) = semaphore.acquire().await else {
                        break;
                    };

                    let target = if rand::rng().random_bool(opt.cross_traffic.clamp(0.0, 1.0)) {
                        rand::rng().random_range(0..opt.num_users)
                    } else {
                        user_id
                    };
                    let key = format!("iter_{}:user_{}", iteration, target);

                    match limiter.execute(&key, opt.limit, window).await {
                        Ok(result) if result.allowed => allowed += 1,
                        Ok(_) => denied += 1,
                        Err(e) => {
                            errors += 1;
                            warn!("Error in rate limiting: {}", e);
                        }
                    }
                    progress.inc(1);
                }

                (allowed, denied, errors)
            })
        });

        let mut iteration_allowed = 0;
        let mut iteration_denied = 0;
        for joined in futures::future::join_all(handles).await {
            let (allowed, denied, errors) = joined?;
            iteration_allowed += allowed;
            iteration_denied += denied;
            totals.errors += errors;
        }

        let elapsed = start_time.elapsed();
        totals.duration += elapsed;
        totals.allowed += iteration_allowed;
        totals.denied += iteration_denied;

        info!(
            "Iteration {}: {:?}, {} allowed, {} denied",
            iteration + 1,
            elapsed,
            iteration_allowed,
            iteration_denied
        );
    }

    progress.finish();
    if let Some(limiter) = Arc::into_inner(limiter) {
        limiter.shutdown().await?;
    }
    Ok(totals)
}

fn print_results(results: &[BenchResult]) {
    let mut table = Table::new();
    table.add_row(row![
        "Benchmark",
        "Requests",
        "Allowed",
        "Denied",
        "Errors",
        "Duration",
        "Req/sec"
    ]);

    for result in results {
        let total = result.allowed + result.denied + result.errors;
        let secs = result.duration.as_secs_f64();
        let throughput = if secs > 0.0 { total as f64 / secs } else { 0.0 };
        table.add_row(row![
            result.name,
            total,
            format!(
                "{} ({:.1}%)",
                result.allowed,
                100.0 * result.allowed as f64 / total.max(1) as f64
            ),
            result.denied,
            result.errors,
            format!("{:?}", result.duration),
            format!("{:.2}", throughput)
        ]);
    }

    println!("\nBenchmark Results:");
    table.printstd();
}
