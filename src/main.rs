use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand};
use contractprobe::abcompare::{run_ab_compare, ABConfig};
use contractprobe::cancel::{cancel_pair, CancelToken};
use contractprobe::config::{load_auth_config, load_env_config};
use contractprobe::drift::check_endpoint;
use contractprobe::load_test::{LoadTestRunner, RunConfig};
use contractprobe::metrics::Snapshot;
use contractprobe::openapi::{load_openapi, ApiSpec, Endpoint};
use contractprobe::report::{self, JsonReport};
use contractprobe::smoke::{fetch_response, run_smoke_bulk, SmokeConfig};
use contractprobe::stats::Statistics;
use contractprobe::tcp::{load_scenario, run_scenario};
use contractprobe::types::load_plan;
use log::{error, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "contractprobe")]
#[command(about = "OpenAPI smoke tests, contract drift, A/B compare, TCP scenarios and load tests", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Environment name from the env config
    #[arg(long, short = 'e', global = true, default_value = "dev")]
    env: String,

    /// Base URL (overrides the env config)
    #[arg(long, global = true)]
    base: Option<String>,

    #[arg(long, global = true, default_value = "env.yaml")]
    env_config: PathBuf,

    #[arg(long, global = true, default_value = "auth.yaml")]
    auth_config: PathBuf,

    /// Auth profile to inject into every request
    #[arg(long, global = true)]
    auth_profile: Option<String>,

    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe every endpoint once
    Smoke(SmokeArgs),
    /// Compare live responses against the declared schemas
    Drift(DriftArgs),
    /// Diff responses of two environments
    Compare(CompareArgs),
    /// Run a TCP scenario plan
    Tcp(TcpArgs),
    /// Run a Taurus-style load-test plan
    Lt(LtArgs),
}

#[derive(Args, Debug)]
struct SmokeArgs {
    /// OpenAPI document (yaml/json)
    #[arg(long, short = 'f')]
    file: PathBuf,

    /// Only endpoints carrying one of these tags
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,

    #[arg(long, default_value_t = 10)]
    workers: usize,

    /// Requests per second (defaults to the environment's rateLimitRPS)
    #[arg(long)]
    rps: Option<u32>,

    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,

    /// JUnit XML output path
    #[arg(long)]
    report: Option<PathBuf>,

    /// JSON report output path
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DriftArgs {
    #[arg(long, short = 'f')]
    file: PathBuf,

    /// Single path to check; every GET endpoint when omitted
    #[arg(long)]
    path: Option<String>,

    #[arg(long, default_value = "GET")]
    method: String,

    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CompareArgs {
    #[arg(long, short = 'f')]
    file: PathBuf,

    #[arg(long = "env-a", default_value = "dev")]
    env_a: String,

    #[arg(long = "env-b", default_value = "test")]
    env_b: String,

    #[arg(long)]
    path: Option<String>,

    #[arg(long, default_value = "GET")]
    method: String,

    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct TcpArgs {
    #[arg(long, default_value = "plans/tcp.yaml")]
    plan: PathBuf,

    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct LtArgs {
    /// Taurus plan YAML
    #[arg(long, short = 'f')]
    file: PathBuf,

    #[arg(long, default_value_t = 30)]
    warm_up_secs: u64,

    /// Error-rate budget in percent
    #[arg(long)]
    max_error_pct: Option<f64>,

    /// p95 latency budget in milliseconds
    #[arg(long)]
    max_p95_ms: Option<u64>,

    #[arg(long)]
    json: Option<PathBuf>,
}

/// Where requests go and what they carry.
struct Target {
    base_url: String,
    headers: HashMap<String, String>,
    auth_headers: HashMap<String, String>,
    rate_limit_rps: u32,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    info!("🚀 contractprobe {} starting...", env!("CARGO_PKG_VERSION"));

    let (handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, cancelling");
            handle.cancel();
        }
    });

    match run(cli, cancel).await {
        Ok(code) => code,
        Err(e) => {
            error!("❌ {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

async fn run(cli: Cli, cancel: CancelToken) -> Result<ExitCode> {
    let g = &cli.global;
    match cli.command {
        Command::Smoke(args) => smoke(g, args, cancel).await,
        Command::Drift(args) => drift(g, args).await,
        Command::Compare(args) => compare(g, args).await,
        Command::Tcp(args) => tcp(args).await,
        Command::Lt(args) => load_test(args, cancel).await,
    }
}

fn resolve_target(g: &GlobalArgs, env_name: &str, base_override: Option<&str>) -> Result<Target> {
    let mut target = Target {
        base_url: String::new(),
        headers: HashMap::new(),
        auth_headers: HashMap::new(),
        rate_limit_rps: 0,
    };

    if g.env_config.exists() {
        let envs = load_env_config(&g.env_config)?;
        match envs.get_environment(env_name) {
            Some(env) => {
                target.base_url = env.base_url.clone();
                target.headers = env.headers.clone();
                target.rate_limit_rps = env.rate_limit_rps;
            }
            None => warn!("environment {env_name:?} not found in {}", g.env_config.display()),
        }
    }
    if let Some(base) = base_override {
        target.base_url = base.to_string();
    }
    if target.base_url.is_empty() {
        bail!("no base URL for environment {env_name:?}: set --base or baseURL in the env config");
    }

    if let Some(name) = &g.auth_profile {
        let auth = load_auth_config(&g.auth_config)?;
        let profile = auth
            .get_profile(name)
            .ok_or_else(|| anyhow!("auth profile {name:?} not found in {}", g.auth_config.display()))?;
        target.auth_headers = profile.headers()?;
    }
    Ok(target)
}

/// The single endpoint named by `path`/`method`, or every endpoint with
/// that method.
fn select_endpoints(spec: &ApiSpec, path: Option<&str>, method: &str) -> Result<Vec<Endpoint>> {
    match path {
        Some(p) => spec
            .find(p, method)
            .cloned()
            .map(|e| vec![e])
            .ok_or_else(|| anyhow!("no operation {method} {p} in the document")),
        None => Ok(spec
            .endpoints
            .iter()
            .filter(|e| e.method.eq_ignore_ascii_case(method))
            .cloned()
            .collect()),
    }
}

async fn smoke(g: &GlobalArgs, args: SmokeArgs, cancel: CancelToken) -> Result<ExitCode> {
    let spec = load_openapi(&args.file)?;
    let endpoints = spec.filter_by_tags(&args.tags);
    let target = resolve_target(g, &g.env, g.base.as_deref())?;

    let config = SmokeConfig {
        base_url: target.base_url,
        headers: target.headers,
        auth_headers: target.auth_headers,
        timeout: Duration::from_secs(args.timeout_secs),
        workers: args.workers,
        rate_limit_rps: args.rps.unwrap_or(target.rate_limit_rps),
    };

    let start = Instant::now();
    let results = run_smoke_bulk(config, &endpoints, &cancel).await?;
    let elapsed = start.elapsed();

    for r in &results {
        println!(
            "{} {:<7} {:<48} {:>3} {:>6}ms {}",
            if r.ok { "✅" } else { "❌" },
            r.method,
            r.path,
            r.status_code,
            r.latency_ms,
            r.error.as_deref().unwrap_or("")
        );
    }
    let summary = Statistics::from_results(&results).summary();
    println!(
        "\n{} endpoints: {} passed, {} failed | p50 {}ms p95 {}ms max {}ms",
        summary.total, summary.passed, summary.failed, summary.p50_ms, summary.p95_ms, summary.max_ms
    );

    if let Some(path) = &args.report {
        report::write_junit(path, &report::junit_smoke(&results, elapsed))?;
        info!("📤 JUnit report written to {}", path.display());
    }
    if let Some(path) = &args.json {
        JsonReport::new(elapsed).with_smoke(&results).write(path)?;
        info!("📤 JSON report written to {}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

async fn drift(g: &GlobalArgs, args: DriftArgs) -> Result<ExitCode> {
    let spec = load_openapi(&args.file)?;
    let endpoints = select_endpoints(&spec, args.path.as_deref(), &args.method)?;
    let target = resolve_target(g, &g.env, g.base.as_deref())?;
    let config = SmokeConfig {
        base_url: target.base_url,
        headers: target.headers,
        auth_headers: target.auth_headers,
        ..Default::default()
    };

    let start = Instant::now();
    let mut results = Vec::with_capacity(endpoints.len());
    for ep in &endpoints {
        let fetched = match fetch_response(config.clone(), ep).await {
            Ok(f) => f,
            Err(e) => {
                warn!("drift {} {}: request failed: {e:#}", ep.method, ep.path);
                continue;
            }
        };
        let result = check_endpoint(ep, &fetched.body, fetched.status);
        if result.ok {
            println!("✅ {} {} ({}): no drift", ep.method, ep.path, fetched.status);
        } else {
            println!("❌ {} {} ({}):", ep.method, ep.path, fetched.status);
            for f in &result.findings {
                println!(
                    "    {:<15} {:<32} expected {:<8} actual {}",
                    f.kind.as_str(),
                    f.path,
                    f.expected,
                    f.actual
                );
            }
        }
        results.push(result);
    }
    let elapsed = start.elapsed();

    if let Some(path) = &args.report {
        report::write_junit(path, &report::junit_drift(&results, elapsed))?;
    }
    if let Some(path) = &args.json {
        JsonReport::new(elapsed).with_drift(&results).write(path)?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn compare(g: &GlobalArgs, args: CompareArgs) -> Result<ExitCode> {
    let spec = load_openapi(&args.file)?;
    let endpoints = select_endpoints(&spec, args.path.as_deref(), &args.method)?;
    let a = resolve_target(g, &args.env_a, None)?;
    let b = resolve_target(g, &args.env_b, None)?;

    let config = ABConfig {
        auth_headers: a.auth_headers.clone(),
        ..ABConfig::between(&a.base_url, &a.headers, &b.base_url)
    };

    let start = Instant::now();
    let mut results = Vec::with_capacity(endpoints.len());
    for ep in &endpoints {
        let r = run_ab_compare(ep, &config).await?;
        let mark = if r.is_identical() { "✅" } else { "⚠️" };
        println!(
            "{mark} {} {}: {} vs {}",
            r.method, r.path, r.status_a, r.status_b
        );
        for e in r.error_a.iter().map(|e| format!("A error: {e}"))
            .chain(r.error_b.iter().map(|e| format!("B error: {e}")))
            .chain(r.headers_diff.iter().cloned())
            .chain(r.body_structure_diff.iter().map(|d| format!("structure {d}")))
            .chain(r.body_value_diff.iter().map(|d| format!("value {d}")))
        {
            println!("    {e}");
        }
        results.push(r);
    }

    if let Some(path) = &args.json {
        JsonReport::new(start.elapsed())
            .with_ab_compare(&results)
            .write(path)?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn tcp(args: TcpArgs) -> Result<ExitCode> {
    let scenario = load_scenario(&args.plan)?;
    let result = run_scenario(&scenario).await;

    for st in &result.steps {
        println!(
            "{} #{:<2} {:<8} {:>8.1}ms r={:<5} w={:<5} {}",
            if st.error.is_none() { "✅" } else { "❌" },
            st.index,
            st.kind,
            st.latency_ms,
            st.bytes_read,
            st.bytes_written,
            st.error.as_deref().unwrap_or(&st.hexdump)
        );
    }
    println!(
        "\n{}: ok={} attempts={} breaker={} in {:.1}ms",
        result.plan_name, result.ok, result.attempts, result.breaker_state, result.duration_ms
    );

    if let Some(path) = &args.report {
        report::write_junit(path, &report::junit_tcp(&result))?;
    }
    if let Some(path) = &args.json {
        JsonReport::new(Duration::from_secs_f64(result.duration_ms / 1000.0))
            .with_tcp(&result)
            .write(path)?;
    }
    Ok(if result.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn load_test(args: LtArgs, cancel: CancelToken) -> Result<ExitCode> {
    let plan = load_plan(&args.file)?;
    for line in plan.summary() {
        info!("📋 {line}");
    }

    let config = RunConfig {
        warm_up: Duration::from_secs(args.warm_up_secs),
        max_error_pct: args.max_error_pct,
        max_p95_ms: args.max_p95_ms,
        ..Default::default()
    };
    let runner = LoadTestRunner::new(plan, config);

    let (tx, mut rx) = mpsc::channel::<Snapshot>(16);
    let printer = tokio::spawn(async move {
        while let Some(s) = rx.recv().await {
            info!(
                "📊 {:>6.0}s | {:>7} samples | {:>8.1} RPS | p50 {}ms p95 {}ms p99 {}ms | errors {:.2}%",
                s.elapsed_secs, s.total, s.rps, s.p50_ms, s.p95_ms, s.p99_ms, s.error_rate_pct
            );
        }
    });

    let outcome = runner.run(&cancel, Some(tx)).await;
    let _ = printer.await;
    let report = outcome?;

    let s = &report.snapshot;
    println!(
        "\nrun {}: {} samples, {:.1} RPS, p50 {}ms p90 {}ms p95 {}ms p99 {}ms, errors {:.2}%",
        report.run_id, s.total, s.rps, s.p50_ms, s.p90_ms, s.p95_ms, s.p99_ms, s.error_rate_pct
    );
    for (status, count) in &s.status_dist {
        println!("    {status}: {count}");
    }

    if let Some(path) = &args.json {
        JsonReport::new(Duration::from_secs_f64(s.elapsed_secs))
            .with_load_test(&report)
            .write(path)?;
    }
    Ok(if report.violations.any() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
