// src/bin/quota_guard_cli.rs

use prettytable::{row, Table};
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use quota_guard::config::{FailurePolicy, RateLimiterConfig};
use quota_guard::{RateLimitResult, RateLimiter};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "quota_guard_cli",
    about = "A CLI for trying out rate limiting algorithms"
)]
struct Opt {
    /// Rate limiting algorithm to use
    #[structopt(short, long, possible_values = &["sliding_window_counter", "sliding_window_log", "token_bucket"], default_value = "sliding_window_counter")]
    algorithm: String,

    /// Key to use for rate limiting
    #[structopt(short, long, default_value = "default_user")]
    key: String,

    /// Maximum number of requests allowed per window
    #[structopt(short, long, default_value = "10")]
    limit: u64,

    /// Window duration in seconds
    #[structopt(short, long, default_value = "60")]
    window_seconds: u64,

    /// Redis URL; in-process storage when omitted
    #[structopt(long)]
    redis_url: Option<String>,

    /// What to do when storage fails: closed or open
    #[structopt(long, default_value = "closed")]
    failure_policy: FailurePolicy,

    /// Simulation mode
    #[structopt(long, possible_values = &["burst", "steady", "sine_wave", "custom"], default_value = "burst")]
    simulation: String,

    /// Number of requests to simulate
    #[structopt(short = "n", long, default_value = "20")]
    num_requests: usize,

    /// Time between requests in milliseconds (for steady and sine_wave modes)
    #[structopt(short = "t", long, default_value = "100")]
    request_interval_ms: u64,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

/// Tally of one simulation run
#[derive(Debug, Default)]
struct Outcome {
    allowed: usize,
    denied: usize,
    last: Option<RateLimitResult>,
}

impl Outcome {
    fn record(&mut self, index: usize, result: RateLimitResult, quiet: bool) {
        if result.allowed {
            self.allowed += 1;
            if !quiet {
                info!("Request {}: ALLOWED (remaining: {})", index + 1, result.remaining);
            }
        } else {
            self.denied += 1;
            if !quiet {
                warn!(
                    "Request {}: DENIED (retry after: {:?})",
                    index + 1,
                    result.retry_after.unwrap_or_default()
                );
            }
        }
        self.last = Some(result);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = match (opt.disable_logs, opt.verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "quota_guard_cli={},quota_guard={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut builder = RateLimiter::builder()
        .algorithm(opt.algorithm.as_str())
        .config(RateLimiterConfig {
            key_prefix: "cli".to_string(),
            failure_policy: opt.failure_policy,
            ..RateLimiterConfig::default()
        });
    if let Some(url) = &opt.redis_url {
        builder = builder.redis_url(url.as_str());
    }
    let limiter = builder.build().await?;

    if !opt.disable_logs {
        info!(
            "Configuration: algorithm={}, backend={}, limit={}, window={}s",
            limiter.algorithm(),
            limiter.backend_name(),
            opt.limit,
            opt.window_seconds
        );
    }

    let start_time = Instant::now();
    let outcome = match opt.simulation.as_str() {
        "custom" => simulate_custom(&opt, &limiter).await?,
        mode => simulate_timed(&opt, &limiter, mode).await?,
    };
    print_summary(&opt, &limiter, &outcome, start_time.elapsed());

    limiter.shutdown().await?;
    Ok(())
}

/// Delay before request `i` of `n` for the non-interactive modes
fn interval_for(mode: &str, base: Duration, i: usize, n: usize) -> Duration {
    match mode {
        "steady" => base,
        "sine_wave" => {
            // one full cycle over the run, between 0.5x and 1.5x the base
            let phase = (i as f64 * std::f64::consts::PI * 2.0) / (n.max(1) as f64);
            base.mul_f64(1.0 + 0.5 * phase.sin())
        }
        _ => Duration::ZERO,
    }
}

async fn simulate_timed(
    opt: &Opt,
    limiter: &RateLimiter,
    mode: &str,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    if !opt.disable_logs {
        info!(
            "Simulating {} of {} requests for key: {}",
            mode, opt.num_requests, opt.key
        );
    }

    let window = Duration::from_secs(opt.window_seconds);
    let base = Duration::from_millis(opt.request_interval_ms);
    let mut outcome = Outcome::default();

    for i in 0..opt.num_requests {
        let request_time = Instant::now();
        let result = limiter.execute(&opt.key, opt.limit, window).await?;
        outcome.record(i, result, opt.disable_logs);

        let pause = interval_for(mode, base, i, opt.num_requests);
        let elapsed = request_time.elapsed();
        if elapsed < pause {
            time::sleep(pause - elapsed).await;
        }
    }

    Ok(outcome)
}

// Simulate custom pattern with interactive input
async fn simulate_custom(
    opt: &Opt,
    limiter: &RateLimiter,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    println!("\nCustom Simulation Mode");
    println!("----------------------");
    println!("Press Enter to make a request, or type 'quit' to exit");

    let window = Duration::from_secs(opt.window_seconds);
    let mut outcome = Outcome::default();
    let mut input_buffer = String::new();

    for i in 0.. {
        input_buffer.clear();
        if std::io::stdin().read_line(&mut input_buffer)? == 0 {
            break;
        }

        let trimmed = input_buffer.trim();
        if trimmed == "quit" || trimmed == "exit" || trimmed == "q" {
            break;
        }

        let result = limiter.execute(&opt.key, opt.limit, window).await?;
        if result.allowed {
            println!("ALLOWED (remaining: {})", result.remaining);
        } else {
            println!(
                "DENIED (retry after: {:?})",
                result.retry_after.unwrap_or_default()
            );
        }
        outcome.record(i, result, true);
    }

    Ok(outcome)
}

fn print_summary(opt: &Opt, limiter: &RateLimiter, outcome: &Outcome, elapsed: Duration) {
    let mut table = Table::new();
    table.add_row(row!["Algorithm", limiter.algorithm()]);
    table.add_row(row!["Backend", limiter.backend_name()]);
    table.add_row(row!["Simulation", opt.simulation]);
    table.add_row(row!["Total requests", outcome.allowed + outcome.denied]);
    table.add_row(row!["Allowed", outcome.allowed]);
    table.add_row(row!["Denied", outcome.denied]);
    if let Some(last) = &outcome.last {
        table.add_row(row!["Remaining", last.remaining]);
        table.add_row(row!["Reset at", last.reset_at.to_rfc3339()]);
    }
    table.add_row(row!["Time elapsed", format!("{:?}", elapsed)]);

    println!("\nSimulation Results:");
    table.printstd();
}
