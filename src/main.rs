use anyhow::Context;
use ratekeeper::metrics::MetricsService;
use ratekeeper::{init_tracing, LimitOptions, LimiterSettings, RateLimitError, RateLimiter};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    // Initialize tracing
    init_tracing();

    // Get config file path and key from command line
    let (flags, mut args): (Vec<String>, Vec<String>) =
        env::args().skip(1).partition(|arg| arg.starts_with("--"));
    let print_metrics = flags.iter().any(|flag| flag == "--metrics");
    let key = if args.len() > 1 { args.pop() } else { None };
    let config_path = args
        .pop()
        .unwrap_or_else(|| "config/ratekeeper.yaml".to_string());

    let metrics = match MetricsService::new() {
        Ok(metrics) => metrics,
        Err(e) => {
            eprintln!("ratekeeper error: {}", e);
            process::exit(1);
        }
    };

    let result = run(&config_path, key).await;

    if print_metrics {
        print!("{}", metrics.render());
    }

    match result {
        Ok(()) => println!("allowed"),
        Err(e) => match e.downcast_ref::<RateLimitError>() {
            Some(RateLimitError::QuotaExceeded { key }) => {
                println!("denied: quota exceeded for {}", key);
                process::exit(2);
            }
            _ => {
                eprintln!("ratekeeper error: {:#}", e);
                eprintln!("Usage: ratekeeper [--metrics] [config_file] [key]");
                process::exit(1);
            }
        },
    }
}

async fn run(config_path: &str, key: Option<String>) -> anyhow::Result<()> {
    let settings = LimiterSettings::from_file(config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let limiter = RateLimiter::connect(settings).await?;
    limiter.ping().await.context("Quota store is not reachable")?;

    // Check against the configured quota, keeping state between runs
    let mut options = LimitOptions::new().window_scoped(true);
    if let Some(key) = key {
        options = options.key(key);
    }

    limiter.check(options).await?;
    Ok(())
}
