use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use fetchpool::fetch::{Client, HttpFetcher};
use fetchpool::task::Pool;
use fetchpool::{source, Config};

#[derive(Parser, Debug)]
#[command(name = "fetchpool", version)]
#[command(about = "Fetch resources in parallel and print the MD5 digest of each response body", long_about = None)]
struct Cli {
    /// Number of parallel requests, 0 meaning the default
    #[arg(short, long, default_value_t = 0)]
    parallel: usize,

    /// Per-request timeout, in seconds
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Scheme used for addresses without one
    #[arg(long, default_value = "http")]
    scheme: String,

    /// File to read whitespace separated addresses from
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Addresses to fetch
    addresses: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut addresses = cli.addresses;
    if let Some(path) = &cli.file {
        addresses.extend(source::read_addresses(path).await?);
    }

    if addresses.is_empty() {
        Cli::command().print_help()?;
        return Ok(ExitCode::FAILURE);
    }

    let config = Config::default()
        .with_capacity(cli.parallel)
        .with_request_timeout(Duration::from_secs(cli.timeout))
        .with_default_scheme(cli.scheme);

    tracing::debug!("Fetching {} addresses with {} workers", addresses.len(), config.resolved_capacity());

    let cancel = CancellationToken::new();
    let (pool, tasks, mut results) = Pool::from_config(&config);

    let client = Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let fetcher = HttpFetcher::from_config(&config, cancel.clone()).with_client(client);

    tokio::spawn(source::feed(tasks, addresses));
    let run = tokio::spawn(pool.run(cancel.clone(), Arc::new(fetcher)));

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling remaining tasks...");
                cancel.cancel();
            }
        }
    });

    let mut failed = 0usize;

    while let Some(result) = results.recv().await {
        match result {
            Ok(outcome) => println!("{}\t{}", outcome.address(), outcome.digest()),
            Err(err) => {
                failed += 1;
                eprintln!("{err}");
            }
        }
    }

    run.await?;

    if failed > 0 {
        tracing::debug!("{failed} tasks failed");
        return Ok(ExitCode::from(2));
    }

    Ok(ExitCode::SUCCESS)
}
