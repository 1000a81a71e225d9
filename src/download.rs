//! Streams a single format from the provider to a file on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::metadata::{FormatDescriptor, VideoMetadata, format_size};
use crate::progress::{ProgressDraw, ProgressTracker};
use crate::provider::{ByteStream, Provider};

/// One format headed for one file.
#[derive(Debug, Clone)]
pub struct DownloadTask<'a> {
    pub video: &'a VideoMetadata,
    pub format: &'a FormatDescriptor,
    pub destination: PathBuf,
}

pub struct Downloader {
    provider: Arc<dyn Provider>,
    draw: ProgressDraw,
}

impl Downloader {
    pub fn new(provider: Arc<dyn Provider>, draw: ProgressDraw) -> Self {
        Self { provider, draw }
    }

    pub async fn run(&self, cancel: &CancellationToken, task: &DownloadTask<'_>) -> Result<u64> {
        self.download_format(cancel, task.video, task.format, &task.destination)
            .await
    }

    /// Copies `format`'s bytes into `destination` and returns how many were
    /// written. A partial file is left behind on failure.
    pub async fn download_format(
        &self,
        cancel: &CancellationToken,
        video: &VideoMetadata,
        format: &FormatDescriptor,
        destination: &Path,
    ) -> Result<u64> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let format = video
            .format_by_itag(format.itag)
            .ok_or(Error::FormatNotFound { itag: format.itag })?;

        let opened = self.provider.open_stream(cancel, video, format).await?;
        info!(
            itag = format.itag,
            kind = %format.kind,
            size = %format_size(opened.content_length),
            path = %destination.display(),
            "downloading {} stream",
            format.kind
        );

        let file = File::create(destination)
            .await
            .map_err(|err| Error::io(destination, err))?;
        let mut writer = BufWriter::new(file);

        let tracker = ProgressTracker::start(format.kind.as_str(), opened.content_length, self.draw);
        let copied = copy_stream(cancel, opened.stream, &mut writer, &tracker, destination).await;
        let flushed = writer
            .flush()
            .await
            .map_err(|err| Error::io(destination, err));
        drop(writer);

        match copied.and(flushed) {
            Ok(()) => {
                let written = tracker.finish().await;
                debug!(itag = format.itag, written, "stream complete");
                Ok(written)
            }
            Err(err) => {
                let written = tracker.abandon().await;
                warn!(itag = format.itag, written, error = %err, "stream interrupted");
                Err(err)
            }
        }
    }
}

async fn copy_stream(
    cancel: &CancellationToken,
    mut stream: ByteStream,
    writer: &mut BufWriter<File>,
    tracker: &ProgressTracker,
    destination: &Path,
) -> Result<()> {
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = chunk else {
            return Ok(());
        };
        let chunk = chunk?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|err| Error::io(destination, err))?;
        tracker.record(chunk.len() as u64);
    }
}
