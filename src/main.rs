//! Resilience Core CLI
//!
//! Demonstrates the retry, circuit breaker and health check primitives
//! against simulated dependencies.
//!
//! ```text
//! resilience retry --fail-rate 0.7
//! resilience circuit-breaker --fail-rate 0.8 --threshold 2
//! resilience health-check --checks 10 --interval 0.5
//! resilience async-retry --fail-rate 0.6
//! resilience benchmark retry --iterations 1000
//! resilience --config resilience.toml demo
//! ```
//!
//! Exit code is 0 when every demonstration behaved as configured, 1 when
//! one did not, and 2 when the configuration could not be loaded.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use resilience_core::config::{
    load_config, CircuitBreakerConfig, CircuitBreakerConfigBuilder, ConfigError, ResilienceConfig,
    RetryConfig, RetryConfigBuilder,
};
use resilience_core::demo::{self, DemoOutcome};
use resilience_core::observability;

#[derive(Parser)]
#[command(name = "resilience")]
#[command(about = "Test and demonstrate resilience patterns", long_about = None)]
struct Cli {
    /// TOML file providing base settings; flags override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Serve Prometheus metrics on this address
    #[arg(long, global = true)]
    metrics_address: Option<SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test the blocking retry executor
    Retry {
        #[arg(long, default_value_t = 0.5, value_parser = parse_rate)]
        fail_rate: f64,
        #[arg(long)]
        max_attempts: Option<u32>,
        #[arg(long, value_parser = parse_seconds)]
        base_delay: Option<f64>,
    },
    /// Test the circuit breaker
    CircuitBreaker {
        #[arg(long, default_value_t = 0.7, value_parser = parse_rate)]
        fail_rate: f64,
        #[arg(long)]
        threshold: Option<u32>,
        #[arg(long, value_parser = parse_seconds)]
        recovery_timeout: Option<f64>,
        #[arg(long, default_value_t = 10)]
        calls: u32,
        /// Seconds between calls
        #[arg(long, default_value_t = 0.5, value_parser = parse_seconds)]
        pause: f64,
    },
    /// Test background health checks
    HealthCheck {
        #[arg(long, default_value_t = 5)]
        checks: u32,
        #[arg(long, value_parser = parse_seconds)]
        interval: Option<f64>,
    },
    /// Test the async retry executor
    AsyncRetry {
        #[arg(long, default_value_t = 0.6, value_parser = parse_rate)]
        fail_rate: f64,
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Run performance benchmarks
    Benchmark {
        pattern: Pattern,
        #[arg(long, default_value_t = 100)]
        iterations: u32,
    },
    /// Run all demonstrations
    Demo,
}

#[derive(Clone, Copy, ValueEnum)]
enum Pattern {
    Retry,
    #[value(alias = "circuit_breaker")]
    CircuitBreaker,
}

fn parse_rate(s: &str) -> Result<f64, String> {
    let rate: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err("must be between 0.0 and 1.0".to_string())
    }
}

fn parse_seconds(s: &str) -> Result<f64, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if secs >= 0.0 && Duration::try_from_secs_f64(secs).is_ok() {
        Ok(secs)
    } else {
        Err("must be a non-negative number of seconds".to_string())
    }
}

/// Retry settings: flags, then the config file, then demo defaults.
fn retry_config(
    file: Option<&ResilienceConfig>,
    max_attempts: Option<u32>,
    base_delay: Option<f64>,
    defaults: (u32, f64),
) -> Result<RetryConfig, ConfigError> {
    let mut builder = match file {
        Some(config) => RetryConfigBuilder::from(config.retry_config()),
        None => RetryConfig::builder()
            .max_attempts(defaults.0)
            .base_delay(defaults.1),
    };
    if let Some(n) = max_attempts {
        builder = builder.max_attempts(n);
    }
    if let Some(secs) = base_delay {
        builder = builder.base_delay(secs);
    }
    builder.build()
}

fn circuit_breaker_config(
    file: Option<&ResilienceConfig>,
    threshold: Option<u32>,
    recovery_timeout: Option<f64>,
) -> Result<CircuitBreakerConfig, ConfigError> {
    let mut builder = match file {
        Some(config) => CircuitBreakerConfigBuilder::from(config.circuit_breaker_config()),
        None => CircuitBreakerConfig::builder()
            .failure_threshold(3)
            .recovery_timeout(5.0),
    };
    if let Some(n) = threshold {
        builder = builder.failure_threshold(n);
    }
    if let Some(secs) = recovery_timeout {
        builder = builder.recovery_timeout(secs);
    }
    builder.build()
}

fn health_interval(file: Option<&ResilienceConfig>, interval: Option<f64>) -> Result<Duration, ConfigError> {
    match (interval, file) {
        (Some(secs), _) => Ok(ResilienceConfig::builder()
            .health_check_interval(secs)
            .build()?
            .health_check_interval()),
        (None, Some(config)) => Ok(config.health_check_interval()),
        (None, None) => Ok(Duration::from_secs(1)),
    }
}

async fn blocking<F>(name: &'static str, run: F) -> DemoOutcome
where
    F: FnOnce() -> DemoOutcome + Send + 'static,
{
    tokio::task::spawn_blocking(run)
        .await
        .unwrap_or_else(|e| DemoOutcome::aborted(name, format!("demonstration panicked: {e}")))
}

async fn benchmark(pattern: Pattern, iterations: u32) -> DemoOutcome {
    match pattern {
        Pattern::Retry => blocking("benchmark retry", move || demo::benchmark_retry(iterations)).await,
        Pattern::CircuitBreaker => {
            blocking("benchmark circuit-breaker", move || {
                demo::benchmark_circuit_breaker(iterations)
            })
            .await
        }
    }
}

async fn run(command: Commands, file: Option<&ResilienceConfig>) -> Result<Vec<DemoOutcome>, ConfigError> {
    let outcomes = match command {
        Commands::Retry {
            fail_rate,
            max_attempts,
            base_delay,
        } => {
            let config = retry_config(file, max_attempts, base_delay, (3, 1.0))?;
            vec![blocking("retry", move || demo::simulate_retry(config, fail_rate)).await]
        }
        Commands::CircuitBreaker {
            fail_rate,
            threshold,
            recovery_timeout,
            calls,
            pause,
        } => {
            let config = circuit_breaker_config(file, threshold, recovery_timeout)?;
            let pause = Duration::from_secs_f64(pause);
            vec![demo::simulate_circuit_breaker(config, fail_rate, calls, pause).await]
        }
        Commands::HealthCheck { checks, interval } => {
            let interval = health_interval(file, interval)?;
            vec![demo::simulate_health_check(checks, interval).await]
        }
        Commands::AsyncRetry {
            fail_rate,
            max_attempts,
        } => {
            let config = retry_config(file, max_attempts, None, (2, 0.5))?;
            vec![demo::simulate_async_retry(config, fail_rate).await]
        }
        Commands::Benchmark {
            pattern,
            iterations,
        } => vec![benchmark(pattern, iterations).await],
        Commands::Demo => {
            let retry = retry_config(file, None, None, (3, 1.0))?;
            let async_retry = retry_config(file, None, None, (2, 0.5))?;
            let breaker = circuit_breaker_config(file, None, None)?;
            let interval = health_interval(file, Some(0.5))?;

            vec![
                blocking("retry", move || demo::simulate_retry(retry, 0.6)).await,
                demo::simulate_circuit_breaker(breaker, 0.7, 10, Duration::from_millis(500)).await,
                demo::simulate_health_check(3, interval).await,
                demo::simulate_async_retry(async_retry, 0.5).await,
                benchmark(Pattern::Retry, 50).await,
                benchmark(Pattern::CircuitBreaker, 50).await,
            ]
        }
    };
    Ok(outcomes)
}

fn print_outcome(outcome: &DemoOutcome) {
    println!("== {}", outcome.name);
    for line in &outcome.lines {
        println!("   {line}");
    }
    let verdict = if outcome.passed { "PASS" } else { "FAIL" };
    println!("   {verdict} ({:.2}s)", outcome.elapsed.as_secs_f64());
    println!();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    observability::init_logging(&cli.log_level);

    if let Some(addr) = cli.metrics_address {
        if let Err(e) = observability::init_metrics(addr) {
            tracing::error!(address = %addr, error = %e, "Failed to start metrics exporter");
        }
    }

    let file = match cli.config.as_deref().map(load_config).transpose() {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    };

    let outcomes = match run(cli.command, file.as_ref()).await {
        Ok(outcomes) => outcomes,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    };

    for outcome in &outcomes {
        print_outcome(outcome);
    }
    let failed = outcomes.iter().filter(|o| !o.passed).count();
    if failed == 0 {
        println!("All {} demonstration(s) passed", outcomes.len());
        ExitCode::SUCCESS
    } else {
        println!("{failed} of {} demonstration(s) failed", outcomes.len());
        ExitCode::FAILURE
    }
}
