mod args;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audiograb_core::{
    load_config, load_config_from_env, metrics, validate_config, Config, Job, JobEventKind,
    JobState, Pipeline,
};

use args::{parse_url_lines, Args};

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns whether every job completed.
async fn run() -> Result<bool> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,audiograb_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = load(&args)?;

    let urls = if args.urls.is_empty() {
        read_stdin_urls().await?
    } else {
        args.urls.clone()
    };
    if urls.is_empty() {
        bail!("No URLs given");
    }

    let pipeline = Pipeline::from_config(&config).context("Failed to create pipeline")?;
    let logger = spawn_event_logger(&pipeline);

    for url in &urls {
        if let Err(e) = pipeline.submit_expanded(url.as_str()).await {
            warn!(%url, error = %e, "Failed to submit");
        }
    }

    tokio::select! {
        _ = pipeline.wait_idle() => info!("All jobs finished"),
        _ = signal::ctrl_c() => warn!("Interrupted, cancelling jobs"),
    }
    pipeline.shutdown().await;
    logger.abort();

    let jobs = pipeline.jobs();
    print_summary(&jobs);
    if args.metrics {
        print!("{}", metrics::encode_metrics());
    }

    Ok(jobs.iter().all(|job| job.state() == JobState::Completed))
}

fn load(args: &Args) -> Result<Config> {
    let mut config = match args.config_path() {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            load_config(&path)
                .with_context(|| format!("Failed to load config from {:?}", path))?
        }
        None => load_config_from_env().context("Failed to load config from environment")?,
    };

    if let Some(format) = args.format {
        config.pipeline.format = format;
    }
    if let Some(dir) = &args.output_dir {
        config.pipeline.output_dir = dir.clone();
    }

    validate_config(&config).context("Configuration validation failed")?;
    info!(
        output_dir = %config.pipeline.output_dir.display(),
        format = %config.pipeline.format,
        resolver = ?config.resolver.backend,
        "Configuration loaded"
    );
    Ok(config)
}

async fn read_stdin_urls() -> Result<Vec<String>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut raw = Vec::new();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        raw.push(line);
    }
    Ok(parse_url_lines(raw.iter().map(String::as_str)))
}

fn spawn_event_logger(pipeline: &Pipeline) -> JoinHandle<()> {
    let mut events = pipeline.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match event.kind {
                    JobEventKind::Submitted { url } => {
                        info!(job_id = %event.job_id, %url, "Submitted")
                    }
                    JobEventKind::StateChanged { to, .. } => {
                        info!(job_id = %event.job_id, state = %to, "{}", to.message())
                    }
                    JobEventKind::TitleChanged { title } => {
                        info!(job_id = %event.job_id, %title, "Title resolved")
                    }
                    JobEventKind::ProgressChanged { .. } => {}
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_summary(jobs: &[Arc<Job>]) {
    for job in jobs {
        let state = job.state();
        match (state, job.output_path(), job.last_error()) {
            (JobState::Completed, Some(path), _) => {
                println!("{:<10} {} -> {}", state.display_text(), job.title(), path.display())
            }
            (_, _, Some(e)) => println!("{:<10} {}: {}", state.display_text(), job.source_url(), e),
            _ => println!("{:<10} {}", state.display_text(), job.source_url()),
        }
    }
}
