//! Muxing the separate video and audio downloads into one container.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const DEFAULT_AUDIO_CODEC: &str = "aac";

#[async_trait]
pub trait Merger: Send + Sync {
    /// Combines `video` and `audio` into `output`. Inputs are left untouched.
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<()>;
}

/// Runs `ffmpeg` (or a compatible tool): video copied, audio re-encoded.
#[derive(Debug, Clone)]
pub struct FfmpegMerger {
    binary: PathBuf,
    audio_codec: String,
    overwrite: bool,
}

impl FfmpegMerger {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            audio_codec: DEFAULT_AUDIO_CODEC.to_owned(),
            overwrite: false,
        }
    }

    /// Resolves `name` on `PATH`; absolute paths are checked as-is.
    pub fn locate(name: &str) -> Result<Self> {
        let binary = which::which(name)
            .map_err(|err| Error::Merge(format!("{name} is not installed or not in PATH: {err}")))?;
        Ok(Self::new(binary))
    }

    pub fn with_audio_codec(mut self, codec: impl Into<String>) -> Self {
        self.audio_codec = codec.into();
        self
    }

    /// Replace an existing output file instead of letting the tool refuse.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn args(&self, video: &Path, audio: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(11);
        if self.overwrite {
            args.push("-y".into());
        }
        args.extend([
            "-i".into(),
            video.as_os_str().to_owned(),
            "-i".into(),
            audio.as_os_str().to_owned(),
            "-c:v".into(),
            "copy".into(),
            "-c:a".into(),
            OsString::from(&self.audio_codec),
            output.as_os_str().to_owned(),
        ]);
        args
    }
}

#[async_trait]
impl Merger for FfmpegMerger {
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        let args = self.args(video, audio, output);
        debug!(binary = %self.binary.display(), ?args, "running merge tool");
        info!(output = %output.display(), "merging video and audio");

        // The tool shares the terminal so its own diagnostics stay visible.
        let status = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|err| Error::Merge(format!("failed to launch {}: {err}", self.binary.display())))?;

        if !status.success() {
            return Err(Error::Merge(format!(
                "{} exited with {status}",
                self.binary.display()
            )));
        }
        Ok(())
    }
}
