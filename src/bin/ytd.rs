//! `ytd`: download a video at the best available quality.
//!
//! `ytd down <URL>` lists the video-only and audio formats, lets the user pick
//! one of each (or takes the best with `--yes`), downloads both with live
//! progress and merges them with `ffmpeg`.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dialoguer::Select;
use dialoguer::theme::ColorfulTheme;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use ytd::config::{Overrides, load_settings};
use ytd::merge::FfmpegMerger;
use ytd::metadata::{FormatDescriptor, MediaKind, VideoMetadata, format_duration, format_size};
use ytd::pipeline::{BestFormat, FormatChooser, Pipeline};
use ytd::provider::YtDlpProvider;

#[derive(Parser, Debug)]
#[command(author, version, about = "Download videos with separate video and audio streams merged by ffmpeg.")]
struct Cli {
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true, help = "Increase log verbosity (-v info, -vv debug)")]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a video with the highest quality video and audio.
    Down(DownArgs),
    /// Print version information.
    Version,
}

#[derive(Args, Debug)]
struct DownArgs {
    #[arg(value_name = "URL", help = "Video URL (watch, youtu.be, shorts or embed)")]
    url: String,
    #[arg(short = 'o', long = "output", value_name = "NAME", help = "Output file name (defaults to the slugged title)")]
    output: Option<String>,
    #[arg(long = "output-dir", value_name = "DIR", help = "Directory for the merged file")]
    output_dir: Option<PathBuf>,
    #[arg(long = "temp-dir", value_name = "DIR", help = "Scratch directory for the separate streams")]
    temp_dir: Option<PathBuf>,
    #[arg(long = "config", value_name = "PATH", help = "Path to the config file")]
    config: Option<PathBuf>,
    #[arg(long = "quality", value_name = "LABEL", help = "Only consider video formats with this quality label, e.g. 1080p")]
    quality: Option<String>,
    #[arg(long = "mime-type", value_name = "MIME", help = "Only consider formats whose MIME type contains this text")]
    mime_type: Option<String>,
    #[arg(long = "language", value_name = "LANG", help = "Only consider audio tracks in this language")]
    language: Option<String>,
    #[arg(short = 'y', long = "yes", help = "Take the best formats without prompting")]
    yes: bool,
    #[arg(long = "overwrite", help = "Replace the output file if it already exists")]
    overwrite: bool,
    #[arg(short = 'q', long = "quiet", help = "Hide progress bars")]
    quiet: bool,
    #[arg(long = "timeout", value_name = "SECS", help = "Abort the whole run after this many seconds")]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Down(args) => run_down(args).await,
        Command::Version => {
            println!("Version:  {}", env!("CARGO_PKG_VERSION"));
            println!(
                "Target:   {}-{}",
                std::env::consts::ARCH,
                std::env::consts::OS
            );
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run_down(args: DownArgs) -> Result<()> {
    let settings = load_settings(Overrides {
        config: args.config,
        output_dir: args.output_dir,
        temp_dir: args.temp_dir,
        output_name: args.output,
        quality: args.quality,
        mime_type: args.mime_type,
        language: args.language,
        overwrite: args.overwrite,
        quiet: args.quiet,
    })
    .context("Loading configuration")?;
    debug!(?settings, "resolved settings");

    let provider = YtDlpProvider::locate(&settings.provider_tool)
        .with_context(|| format!("Locating {}", settings.provider_tool))?;
    let merger = FfmpegMerger::locate(&settings.merge_tool)
        .with_context(|| format!("Locating {}", settings.merge_tool))?
        .with_audio_codec(settings.audio_codec.clone())
        .overwrite(settings.overwrite);

    let interactive = !args.yes && std::io::stdin().is_terminal();
    let chooser: Box<dyn FormatChooser> = if interactive {
        Box::new(PromptChooser)
    } else {
        Box::new(BestFormat)
    };

    let cancel = CancellationToken::new();
    spawn_cancel_triggers(&cancel, args.timeout);

    let pipeline = Pipeline::new(Arc::new(provider), Arc::new(merger), settings).with_chooser(chooser);
    let output = pipeline
        .run(&cancel, &args.url)
        .await
        .with_context(|| format!("Downloading {}", args.url))?;

    println!("Video saved to {}", output.display());
    Ok(())
}

fn spawn_cancel_triggers(cancel: &CancellationToken, timeout: Option<u64>) {
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping");
            on_signal.cancel();
        }
    });

    if let Some(secs) = timeout {
        let on_deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!(secs, "timeout reached, stopping");
            on_deadline.cancel();
        });
    }
}

/// Interactive format picker shown on a terminal.
struct PromptChooser;

impl FormatChooser for PromptChooser {
    fn choose(
        &self,
        kind: MediaKind,
        video: &VideoMetadata,
        candidates: &[FormatDescriptor],
    ) -> ytd::Result<usize> {
        let (prompt, rows): (String, Vec<String>) = match kind {
            MediaKind::Video => {
                eprintln!();
                eprintln!("Video Information");
                eprintln!("Title:    {}", video.title);
                eprintln!("Author:   {}", video.author);
                eprintln!("Duration: {}", format_duration(video.duration));
                eprintln!();
                (
                    "Select a video format (size | quality | fps | type)".to_owned(),
                    candidates.iter().map(video_row).collect(),
                )
            }
            MediaKind::Audio => (
                "Select an audio format (size | bitrate | language | type)".to_owned(),
                candidates.iter().map(audio_row).collect(),
            ),
        };

        // The prompt reads the terminal synchronously; keep the worker's other
        // tasks (signal handler, timeout) movable while it waits.
        let picked = tokio::task::block_in_place(|| {
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .items(&rows)
                .default(0)
                .max_length(20)
                .interact_opt()
        });
        picked
            .map_err(|err| prompt_error(kind, err))?
            .ok_or(ytd::Error::Cancelled)
    }
}

/// Ctrl-C in raw mode surfaces as an interrupted read, not a signal.
fn prompt_error(kind: MediaKind, err: dialoguer::Error) -> ytd::Error {
    match err {
        dialoguer::Error::IO(source) if source.kind() == io::ErrorKind::Interrupted => ytd::Error::Cancelled,
        err => ytd::Error::Input(format!("{kind} format prompt failed: {err}")),
    }
}

fn video_row(format: &FormatDescriptor) -> String {
    format!(
        "{:<10} | {:<9} | {:>3} fps | {}",
        format_size(format.content_length),
        format.quality_label,
        format.fps,
        format.mime_type
    )
}

fn audio_row(format: &FormatDescriptor) -> String {
    let language = if format.language.is_empty() {
        "-"
    } else {
        format.language.as_str()
    };
    format!(
        "{:<10} | {:>5} kbps | {:<5} | {}",
        format_size(format.content_length),
        format.bitrate / 1000,
        language,
        format.mime_type
    )
}
