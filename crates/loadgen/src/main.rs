use anyhow::{Context, Result};
use clap::Parser;
use loadgen_core::{
    render_console, write_html_report, write_json_report, RunConfig, RunResult, Runner,
    TestRegistry, HTML_REPORT_PATH,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "loadgen")]
#[command(about = "HTTP load tester - ramps virtual users against a host and reports latency")]
struct Args {
    /// Number of users to simulate
    #[arg(short, long, required_unless_present = "list")]
    users: Option<u64>,

    /// Users per second to add until all users are running
    #[arg(short = 'r', long, required_unless_present = "list")]
    spawn_rate: Option<u64>,

    /// Run time in seconds
    #[arg(short, long, required_unless_present = "list")]
    seconds: Option<u64>,

    /// Name of the test to execute
    #[arg(short, long, required_unless_present = "list")]
    test: Option<String>,

    /// Host to test against, prepended to every request path
    #[arg(short = 'H', long, required_unless_present = "list")]
    host: Option<String>,

    /// Load test definitions from this file instead of scanning the working directory
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Number of workers. Defaults to the number of logical cores
    #[arg(long)]
    threads: Option<usize>,

    /// Max concurrent connections per target. Unbounded by default
    #[arg(long)]
    connections: Option<usize>,

    /// Wait for the full response body instead of only the headers
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    wait_for_body: bool,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value = "30000")]
    timeout_ms: u64,

    /// Also write an HTML report to report.html
    #[arg(long)]
    html: bool,

    /// Write aggregated results as JSON to this path
    #[arg(long)]
    json: Option<PathBuf>,

    /// Print the names of all available tests and exit
    #[arg(long)]
    list: bool,
}

impl Args {
    fn run_config(&self) -> Result<RunConfig> {
        let users = self.users.context("--users is required")?;
        let spawn_rate = self.spawn_rate.context("--spawn-rate is required")?;
        let seconds = self.seconds.context("--seconds is required")?;
        let host = self.host.clone().context("--host is required")?;

        let mut config = RunConfig::new(users, spawn_rate, seconds, host);
        if let Some(threads) = self.threads {
            config.workers = threads;
        }
        config.max_connections = self.connections;
        config.wait_for_body = self.wait_for_body;
        config.request_timeout_ms = self.timeout_ms;
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let registry = load_registry(args.file.as_deref())?;

    if args.list {
        for name in registry.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let config = args.run_config()?;
    let test = args.test.clone().context("--test is required")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .thread_name("loadgen-worker")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let result = runtime.block_on(run(config, registry, &test))?;

    print!("{}", render_console(&result));

    if args.html {
        write_html_report(&result, HTML_REPORT_PATH)?;
    }
    if let Some(path) = &args.json {
        write_json_report(&result, path)?;
    }

    Ok(())
}

fn load_registry(file: Option<&Path>) -> Result<TestRegistry> {
    let mut registry = TestRegistry::with_builtins();

    match file {
        Some(path) => {
            let count = registry
                .load_file(path)
                .with_context(|| format!("Failed to load tests from {:?}", path))?;
            info!("Loaded {} tests from {:?}", count, path);
        }
        None => {
            let cwd = std::env::current_dir().context("Failed to read working directory")?;
            match registry.load_directory(&cwd) {
                Ok(0) => {}
                Ok(count) => info!("Loaded {} tests from {:?}", count, cwd),
                Err(e) => warn!("Not scanning for test definitions: {}", e),
            }
        }
    }

    Ok(registry)
}

async fn run(config: RunConfig, registry: TestRegistry, test: &str) -> Result<RunResult> {
    let runner = Runner::new(config, registry);

    let shutdown = runner.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping the run early");
            shutdown.cancel();
        }
    });

    Ok(runner.run(test).await?)
}
