use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use podcast_transcriptor::cli::{Cli, Commands, LogFormat, SpinnerProgress, TranscribeArgs};
use podcast_transcriptor::media::{AudioSource, FfmpegCutter, FfprobeProbe};
use podcast_transcriptor::output::RunTimings;
use podcast_transcriptor::transcribe::fal::FalClient;
use podcast_transcriptor::utils::{self, format_duration, format_file_size};
use podcast_transcriptor::{
    output, BatchOrchestrator, BatchPlan, Config, ExtractorRegistry, ProgressSink, TracingProgress,
    TranscriptorError,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = Config::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Transcribe(args) => transcribe(config, args, cli.quiet, cli.log_format).await?,
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                let path = match cli.config {
                    Some(path) => path,
                    None => Config::config_path()?,
                };
                println!("Configuration file: {}", path.display());
                println!("Set FAL_KEY or fal.api_key there, then run `transcriptor config --show`.");
            }
        }
        Commands::Probe { file } => probe(&config, &file).await?,
        Commands::Platforms => {
            println!("Supported inputs:");
            for platform in ExtractorRegistry::new().list_platforms() {
                println!("  • {}", platform);
            }
        }
    }

    Ok(())
}

fn init_tracing(cli: &Cli) {
    let default_filter = if cli.verbose {
        "podcast_transcriptor=debug,transcriptor=debug"
    } else if cli.quiet {
        "warn"
    } else {
        "podcast_transcriptor=info,transcriptor=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);

    match cli.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
    }
}

/// Warn about missing tools without stopping; they may still be found later
async fn warn_missing_dependencies() {
    let missing = utils::check_dependencies().await;
    if !missing.is_empty() {
        eprintln!("{}", style("⚠️  Dependency check warnings:").yellow());
        for dep in missing {
            eprintln!("   • {}", dep);
        }
    }
}

async fn transcribe(mut config: Config, args: TranscribeArgs, quiet: bool, log_format: LogFormat) -> Result<()> {
    args.apply_to(&mut config);
    config.validate().map_err(TranscriptorError::from)?;
    let fal_settings = config.fal_settings().map_err(TranscriptorError::from)?;

    warn_missing_dependencies().await;

    let output_dir = config.app.output_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    let temp_base = config.app.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
    fs_err::create_dir_all(&temp_base)?;
    let work_dir = tempfile::Builder::new()
        .prefix("transcriptor-")
        .tempdir_in(&temp_base)
        .context("Failed to create work directory")?;

    let registry = ExtractorRegistry::new();
    let extractor = registry.find_extractor(&args.input)?;
    // with JSON logging, progress goes through tracing instead of the spinner
    let headless = matches!(log_format, LogFormat::Json);
    let spinner = Arc::new(SpinnerProgress::new(quiet || headless));
    let progress: Arc<dyn ProgressSink> = if headless {
        Arc::new(TracingProgress)
    } else {
        spinner.clone()
    };

    progress.message(&format!("Reading metadata ({})", extractor.platform_name()));
    let info = extractor.extract_info(&args.input).await?;
    tracing::info!("Episode: {}", info.title);

    let download_dir: &Path = if config.app.keep_audio {
        fs_err::create_dir_all(&output_dir)?;
        &output_dir
    } else {
        work_dir.path()
    };
    progress.message("Fetching audio");
    let download_started = Instant::now();
    let audio = extractor.fetch_audio(&info, download_dir).await?;
    let download_secs = download_started.elapsed().as_secs_f64();

    let mut source = AudioSource::open(&audio.path)
        .await
        .with_context(|| format!("Cannot open audio file {}", audio.path.display()))?;
    if let Some(duration) = info.duration_secs {
        source = source.with_known_duration(duration);
    }
    tracing::info!(
        "Audio ready: {} ({}, {})",
        audio.path.display(),
        format_file_size(source.size_bytes()),
        source.format().map(|f| f.as_str()).unwrap_or("unknown format")
    );

    let orchestrator = BatchOrchestrator::new(
        Arc::new(FalClient::new(fal_settings)?),
        Arc::new(FfmpegCutter::new()),
        Arc::new(FfprobeProbe::new()),
        config.batch_settings(work_dir.path()),
    );
    let processing_started = Instant::now();
    let outcome = orchestrator.transcribe(&source, progress.clone()).await;
    let timings = RunTimings {
        download_secs,
        processing_secs: processing_started.elapsed().as_secs_f64(),
    };

    if config.app.keep_audio && audio.owned {
        println!("Audio saved to: {}", audio.path.display());
    } else {
        audio.cleanup().await;
    }

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            spinner.clear();
            return Err(TranscriptorError::from(e).into());
        }
    };
    spinner.finish("Transcription complete");

    let saved = output::save_transcript(
        &result,
        &info,
        &output_dir,
        config.app.include_metadata,
        Some(&timings),
    )
    .await?;

    println!("{} {}", style("Transcript:").green().bold(), saved.text_path.display());
    println!("{} {}", style("Full JSON:").green().bold(), saved.json_path.display());
    println!(
        "{} chunks, {} characters, transcribed in {}",
        result.chunks.len(),
        result.text.len(),
        format_duration(timings.processing_secs)
    );

    Ok(())
}

async fn probe(config: &Config, file: &Path) -> Result<()> {
    warn_missing_dependencies().await;

    let source = AudioSource::open(file)
        .await
        .map_err(|e| TranscriptorError::FileError(format!("{}: {}", file.display(), e)))?;
    let duration = source.duration(&FfprobeProbe::new()).await?;
    let settings = config.batch_settings(std::env::temp_dir());

    println!("{} {}", style("File:").bold(), file.display());
    println!("{} {}", style("Size:").bold(), format_file_size(source.size_bytes()));
    println!("{} {} ({:.1}s)", style("Duration:").bold(), format_duration(duration), duration);

    // A local file has no platform-reported duration, so only the size decides
    if settings.fits_single_request(source.size_bytes(), None) {
        println!("{} single request", style("Strategy:").bold());
        return Ok(());
    }

    let plan = BatchPlan::new(duration, settings.segment_duration_secs)?;
    println!(
        "{} {} segments, {} at a time",
        style("Strategy:").bold(),
        plan.len(),
        settings.concurrency.min(plan.len())
    );
    for (index, segment) in plan.segments().iter().enumerate() {
        println!(
            "  {:>3}. {} - {}",
            index + 1,
            format_duration(segment.offset),
            format_duration(segment.offset + segment.duration)
        );
    }

    Ok(())
}
