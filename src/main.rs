use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use batch_transcriber::{BatchEngine, Config, ReportWriter, RunStatus, SarvamClient};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("Batch Transcriber")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Concurrent batch speech-to-text with speaker diarization")
        .arg(
            Arg::new("input-dir")
                .short('d')
                .long("input-dir")
                .value_name("DIR")
                .help("Directory containing audio files to transcribe"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Report path (.csv or .json)"),
        )
        .arg(
            Arg::new("batch-size")
                .short('b')
                .long("batch-size")
                .value_name("NUM")
                .value_parser(clap::value_parser!(usize))
                .help("Files per batch job (max 20)"),
        )
        .arg(
            Arg::new("speakers")
                .short('s')
                .long("speakers")
                .value_name("NUM")
                .value_parser(clap::value_parser!(u32))
                .help("Expected number of speakers per recording"),
        )
        .arg(
            Arg::new("concurrency")
                .short('c')
                .long("concurrency")
                .value_name("NUM")
                .value_parser(clap::value_parser!(usize))
                .help("Maximum batch jobs in flight"),
        )
        .arg(
            Arg::new("api-key")
                .long("api-key")
                .value_name("KEY")
                .env("SARVAM_API_KEY")
                .hide_env_values(true)
                .help("Sarvam API subscription key"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("Path to a TOML config file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let default_filter = if matches.get_flag("verbose") {
        "batch_transcriber=debug,info"
    } else {
        "batch_transcriber=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => {
            let mut config = Config::from_file(&PathBuf::from(path))?;
            config.apply_env();
            config
        }
        None => Config::load()?,
    };

    if let Some(dir) = matches.get_one::<String>("input-dir") {
        config.processing.input_dir = PathBuf::from(dir);
    }
    if let Some(output) = matches.get_one::<String>("output") {
        config.output.output_path = PathBuf::from(output);
    }
    if let Some(&batch_size) = matches.get_one::<usize>("batch-size") {
        config.processing.batch_size = batch_size;
    }
    if let Some(&speakers) = matches.get_one::<u32>("speakers") {
        config.processing.num_speakers = speakers;
    }
    if let Some(&concurrency) = matches.get_one::<usize>("concurrency") {
        config.performance.max_concurrent_jobs = concurrency;
    }
    if let Some(api_key) = matches.get_one::<String>("api-key") {
        config.provider.api_key = Some(api_key.clone());
    }

    config.validate()?;

    info!("🚀 Batch Transcriber starting...");
    info!("{}", config.summary());

    let cancel = CancellationToken::new();
    let client = SarvamClient::new(config.provider.clone())?
        .with_retry(config.retry.policy())
        .with_cancellation(cancel.clone());
    let engine = BatchEngine::new(&config, Arc::new(client)).with_cancellation(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, cancelling remaining batches...");
            cancel.cancel();
        }
    });

    let report = engine
        .process_directory(&config.processing.input_dir)
        .await
        .context("Cannot read input directory")?;

    let writer = ReportWriter::new(&config.output.output_path, config.output.format);
    writer.write(&report.table).await?;

    if report.status == RunStatus::NoFilesFound {
        warn!(
            "No audio files found in {}",
            config.processing.input_dir.display()
        );
    }

    info!("🎉 {}", report.summary());

    for row in report.table.iter().take(3) {
        info!("📄 File: {}", row.file_name);
        info!("   Language: {}", row.language);
        info!("   Status: {}", row.error);
        if !row.diarized_transcript.is_empty() {
            let preview: String = row.diarized_transcript.chars().take(200).collect();
            info!("   Diarized Transcript:\n{}...", preview);
        }
    }

    Ok(())
}
