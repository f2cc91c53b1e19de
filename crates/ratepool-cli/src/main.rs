use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use ratepool::{Pool, PoolConfig, PoolError, PoolStats};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    capacity: Option<usize>,
    qps: Option<u64>,
    jobs: usize,
    job_ms: u64,
    deadline_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct Report {
    jobs: usize,
    succeeded: usize,
    timed_out: usize,
    shut_down: usize,
    peak_concurrency: usize,
    elapsed_ms: u64,
    observed_qps: f64,
    pool: PoolStats,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let args = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: ratepool [--capacity <n>] [--qps <n>] [--jobs <n>] [--job-ms <ms>]");
            eprintln!("                [--deadline-ms <ms>] [--config <file.json>]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --capacity <n>      Concurrent admissions [env: RATEPOOL_CAPACITY, default: 100]");
            eprintln!("  --qps <n>           Admissions per second [env: RATEPOOL_QPS, default: 800]");
            eprintln!("  --jobs <n>          Number of callers, one thread each [default: 1000]");
            eprintln!("  --job-ms <ms>       How long each job sleeps [default: 1]");
            eprintln!("  --deadline-ms <ms>  Give up waiting for a token after this long");
            eprintln!("  --config <file>     JSON pool config, overridden by env and flags");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(&args) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

/// RUST_LOG wins; otherwise RATEPOOL_LOG picks the level. LOG_FORMAT=json
/// switches to structured output.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("RATEPOOL_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("ratepool={level},ratepool_cli={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args {
        jobs: 1000,
        job_ms: 1,
        ..Args::default()
    };

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--config" => {
                i += 1;
                parsed.config = Some(PathBuf::from(value(args, i, flag)?));
            }
            "--capacity" => {
                i += 1;
                parsed.capacity = Some(number(args, i, flag)?);
            }
            "--qps" => {
                i += 1;
                parsed.qps = Some(number(args, i, flag)?);
            }
            "--jobs" => {
                i += 1;
                parsed.jobs = number(args, i, flag)?;
            }
            "--job-ms" => {
                i += 1;
                parsed.job_ms = number(args, i, flag)?;
            }
            "--deadline-ms" => {
                i += 1;
                parsed.deadline_ms = Some(number(args, i, flag)?);
            }
            "--help" | "-h" => return Err(String::new()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(parsed)
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn number<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<T, String> {
    let raw = value(args, i, flag)?;
    raw.parse()
        .map_err(|_| format!("{flag} expects a non-negative integer, got {raw:?}"))
}

fn resolve_config(args: &Args) -> anyhow::Result<PoolConfig> {
    resolve_config_with(args, |key| std::env::var(key).ok())
}

/// Layer file config, then `lookup` (the environment), then flags.
fn resolve_config_with<F>(args: &Args, lookup: F) -> anyhow::Result<PoolConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let base = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("invalid pool config in {}", path.display()))?
        }
        None => PoolConfig::new(DEFAULT_CAPACITY),
    };

    let mut config = base.apply_vars(lookup)?;

    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }
    if let Some(qps) = args.qps {
        config.qps = qps;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = resolve_config(args)?;
    let job_time = Duration::from_millis(args.job_ms);
    let deadline = args.deadline_ms.map(Duration::from_millis);

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let pool: Pool<(), ()> = Pool::from_config(&config, {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        move |_| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(job_time);
            running.fetch_sub(1, Ordering::SeqCst);
        }
    })
    .context("failed to start pool")?;

    info!(
        jobs = args.jobs,
        capacity = config.capacity,
        qps = pool.rate().qps(),
        "Submitting jobs"
    );

    let succeeded = AtomicUsize::new(0);
    let timed_out = AtomicUsize::new(0);
    let shut_down = AtomicUsize::new(0);

    let started = Instant::now();
    thread::scope(|s| {
        for _ in 0..args.jobs {
            s.spawn(|| {
                let result = match deadline {
                    Some(deadline) => pool.execute_with_deadline((), deadline),
                    None => pool.execute(()),
                };
                match result {
                    Ok(()) => {
                        succeeded.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(PoolError::Timeout { .. }) => {
                        timed_out.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(_) => {
                        shut_down.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
    });
    let elapsed = started.elapsed();

    pool.close();

    let admitted = succeeded.load(Ordering::SeqCst);
    let report = Report {
        jobs: args.jobs,
        succeeded: admitted,
        timed_out: timed_out.load(Ordering::SeqCst),
        shut_down: shut_down.load(Ordering::SeqCst),
        peak_concurrency: peak.load(Ordering::SeqCst),
        elapsed_ms: elapsed.as_millis() as u64,
        observed_qps: if elapsed.is_zero() {
            0.0
        } else {
            admitted as f64 / elapsed.as_secs_f64()
        },
        pool: pool.stats(),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to serialize report")?
    );
    Ok(())
}
