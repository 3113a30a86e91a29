use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use tubefetch::cli::{self, Args, CliPrompter};
use tubefetch::config::AppConfig;
use tubefetch::downloader::{
    FfmpegMuxer, HttpFetcher, Pipeline, ProgressObserver, RunSummary, ToolManager, ToolType, YtDlpExtractor,
};
use tubefetch::progress::TerminalProgress;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.log_level());

    match run(args).await {
        Ok(summary) => cli::print_summary(&summary),
        Err(e) => {
            tracing::error!("run failed: {:#}", e);
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<RunSummary> {
    let config = AppConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    let mut network = config.network();
    if let Some(proxy) = args.proxy.clone().filter(|p| !p.trim().is_empty()) {
        network.proxy = Some(proxy);
    }
    if let Some(timeout) = args.timeout {
        network.timeout = Some(timeout);
    }

    let tools = ToolManager::new();
    let ytdlp = tools.locate(ToolType::YtDlp, config.ytdlp_path.as_deref());
    let ffmpeg = tools.locate(ToolType::Ffmpeg, config.ffmpeg_path.as_deref());
    for tool in [&ytdlp, &ffmpeg] {
        if !tool.is_available() {
            eprintln!(
                "{} {} not found, downloads that need it will fail",
                "Warning:".yellow().bold(),
                tool.tool_type.as_str()
            );
        }
    }

    let url = match args.url.clone() {
        Some(url) => url,
        None => cli::prompt_url()?,
    };

    let prompter = CliPrompter::new(
        args.mode(),
        args.quality.clone(),
        args.output.clone(),
        config.output_dir_or_default(),
    );

    let observer: Arc<dyn ProgressObserver> = if args.quiet {
        Arc::new(TerminalProgress::hidden())
    } else {
        Arc::new(TerminalProgress::new())
    };

    let pipeline = Pipeline::new(
        Arc::new(YtDlpExtractor::new(ytdlp.command_path(), network.clone())),
        Arc::new(HttpFetcher::new(&network)?),
        Arc::new(FfmpegMuxer::new(ffmpeg.command_path())),
        observer,
    );

    let summary = pipeline
        .run(&url, &prompter)
        .await
        .with_context(|| format!("cannot process {}", url))?;

    tracing::info!(succeeded = summary.succeeded(), failed = summary.failed(), "run finished");
    Ok(summary)
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}
