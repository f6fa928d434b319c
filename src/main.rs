use clap::{ArgAction, ArgGroup, Parser};
use std::num::{NonZeroU64, NonZeroUsize};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use soundtrack_dl::downloader::BatchRunner;
use soundtrack_dl::error::UsageError;
use soundtrack_dl::fetcher::HttpFetcher;
use soundtrack_dl::model::BatchSummary;
use soundtrack_dl::page::{KHINSIDER_BASE_URL, KhinsiderPageModel, PageModel};
use soundtrack_dl::progress::{ConsoleProgress, render_summary};
use soundtrack_dl::{Config, input};

#[derive(Parser)]
#[command(name = "soundtrack-dl")]
#[command(about = "Downloads soundtrack albums and tracks from khinsider")]
#[command(version)]
#[command(group(ArgGroup::new("input").required(true).args(["urls", "file"])))]
struct Cli {
    #[arg(help = "Album or track page urls")]
    urls: Vec<String>,
    #[arg(short, long, help = "File with one album or track url per line")]
    file: Option<PathBuf>,
    #[arg(short, long, help = "Network operations in flight at once [default: 6]")]
    concurrency: Option<NonZeroUsize>,
    #[arg(short, long, help = "Destination directory [default: downloads]")]
    output: Option<PathBuf>,
    #[arg(long, help = "Retries after a failed request [default: 4]")]
    retries: Option<u32>,
    #[arg(long, value_name = "SECS", help = "Per-request timeout [default: 60]")]
    timeout: Option<NonZeroU64>,
    #[arg(long, help = "JSON config file, flags take precedence")]
    config: Option<PathBuf>,
    #[arg(long, help = "Write a JSON report of the run")]
    report: Option<PathBuf>,
    #[arg(short, long, action = ArgAction::Count, help = "More logging, repeat for more")]
    verbose: u8,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("failed to set up http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("failed to encode report: {0}")]
    Report(#[from] serde_json::Error),
    #[error("failed to write report {path}: {source}")]
    ReportIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Usage(_) => 2,
            _ => 1,
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,soundtrack_dl={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config, UsageError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(concurrency) = cli.concurrency {
        config.max_concurrency = concurrency.get();
    }
    if let Some(output) = &cli.output {
        config.output_dir = output.clone();
    }
    if let Some(retries) = cli.retries {
        config.retry.max_attempts = retries.saturating_add(1);
    }
    if let Some(timeout) = cli.timeout {
        config.request_timeout = Duration::from_secs(timeout.get());
    }
    Ok(config)
}

fn request_urls(cli: &Cli, page_model: &dyn PageModel) -> Result<Vec<String>, UsageError> {
    let urls = match &cli.file {
        Some(path) => input::read_url_list(path)?,
        None => input::non_empty(cli.urls.clone())?,
    };
    // reject anything that is not an album or track page before touching the network
    for url in &urls {
        page_model.classify(url.trim())?;
    }
    Ok(urls)
}

async fn run(cli: Cli) -> Result<BatchSummary, CliError> {
    let config = load_config(&cli)?;
    let page_model = Arc::new(KhinsiderPageModel::new(KHINSIDER_BASE_URL).map_err(UsageError::from)?);
    let urls = request_urls(&cli, page_model.as_ref())?;
    let fetcher = Arc::new(HttpFetcher::new(&config)?);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, finishing transfers already in progress");
                shutdown.cancel();
            }
        });
    }

    let progress = Arc::new(ConsoleProgress::new());
    let runner = BatchRunner::new(&config, fetcher, page_model, progress.clone(), shutdown);

    let started = Instant::now();
    let summary = runner.run_all(&urls).await;
    progress.finish();
    println!("{}", render_summary(&summary, started.elapsed()));

    if let Some(path) = &cli.report {
        let json = serde_json::to_vec_pretty(&summary)?;
        tokio::fs::write(path, json)
            .await
            .map_err(|source| CliError::ReportIo {
                path: path.clone(),
                source,
            })?;
    }
    Ok(summary)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(summary) if summary.all_albums_failed() => ExitCode::from(1),
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}
