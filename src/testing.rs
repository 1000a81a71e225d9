//! In-memory stand-ins for the provider and merge tool used across unit tests.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::merge::Merger;
use crate::metadata::{ContentLength, FormatDescriptor, MediaKind, VideoMetadata};
use crate::provider::{OpenStream, Provider};

const CHUNK_SIZE: usize = 1_000;

pub fn video_format(itag: u32, height: u32, bitrate: u64) -> FormatDescriptor {
    FormatDescriptor {
        itag,
        kind: MediaKind::Video,
        quality_label: format!("{height}p"),
        bitrate,
        fps: 30,
        height,
        mime_type: "video/mp4; codecs=\"avc1.640028\"".into(),
        content_length: ContentLength::Exact(5_000),
        language: String::new(),
        audio_channels: 0,
        url: format!("https://media.invalid/{itag}"),
        http_headers: BTreeMap::new(),
    }
}

pub fn audio_format(itag: u32, bitrate: u64) -> FormatDescriptor {
    FormatDescriptor {
        itag,
        kind: MediaKind::Audio,
        quality_label: format!("{}k", bitrate / 1000),
        bitrate,
        fps: 0,
        height: 0,
        mime_type: "audio/mp4; codecs=\"mp4a.40.2\"".into(),
        content_length: ContentLength::Exact(1_200),
        language: String::new(),
        audio_channels: 2,
        url: format!("https://media.invalid/{itag}"),
        http_headers: BTreeMap::new(),
    }
}

/// Two video-only and two audio formats with distinct, known lengths.
pub fn sample_video() -> VideoMetadata {
    let mut hd = video_format(137, 1080, 4_000_000);
    hd.content_length = ContentLength::Exact(5_500);
    let mut sd = video_format(136, 720, 2_000_000);
    sd.content_length = ContentLength::Exact(3_000);
    let mut high = audio_format(251, 160_000);
    high.mime_type = "audio/webm; codecs=\"opus\"".into();
    high.content_length = ContentLength::Exact(1_700);
    let mut low = audio_format(140, 128_000);
    low.content_length = ContentLength::Exact(1_200);

    VideoMetadata {
        id: "abc123def45".into(),
        title: "Test 🚀 Video_Title... <>".into(),
        author: "Channel".into(),
        duration: Duration::from_secs(60),
        formats: vec![sd, low, hd, high],
    }
}

/// Deterministic payload for a format: its length in bytes of `itag % 251`.
pub fn payload_for(format: &FormatDescriptor) -> Vec<u8> {
    let len = format.content_length.bytes().unwrap_or_default() as usize;
    vec![(format.itag % 251) as u8; len]
}

/// Serves one fixed video and streams each format's payload in chunks.
pub struct MockProvider {
    video: VideoMetadata,
    payloads: HashMap<u32, Vec<u8>>,
    stall_after_first_chunk: bool,
    fail_streams: bool,
    opened: Mutex<Vec<u32>>,
}

impl MockProvider {
    pub fn new(video: VideoMetadata) -> Self {
        let payloads = video
            .formats
            .iter()
            .map(|format| (format.itag, payload_for(format)))
            .collect();
        Self {
            video,
            payloads,
            stall_after_first_chunk: false,
            fail_streams: false,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Streams hang forever after their first chunk.
    pub fn stalling(mut self) -> Self {
        self.stall_after_first_chunk = true;
        self
    }

    /// Streams yield one chunk and then a provider error.
    pub fn failing(mut self) -> Self {
        self.fail_streams = true;
        self
    }

    /// Itags passed to `open_stream`, in call order.
    pub fn opened(&self) -> Vec<u32> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn video_metadata(&self, video_id: &str) -> Result<VideoMetadata> {
        if video_id == self.video.id {
            Ok(self.video.clone())
        } else {
            Err(Error::provider(format!("video {video_id} not found")))
        }
    }

    async fn open_stream(
        &self,
        _cancel: &CancellationToken,
        video: &VideoMetadata,
        format: &FormatDescriptor,
    ) -> Result<OpenStream> {
        self.opened.lock().unwrap().push(format.itag);
        if video.id != self.video.id {
            return Err(Error::provider("unknown video"));
        }
        let payload = self
            .payloads
            .get(&format.itag)
            .cloned()
            .ok_or_else(|| Error::provider("no payload"))?;

        let chunks: Vec<Result<Bytes>> = payload
            .chunks(CHUNK_SIZE)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        let content_length = format.content_length;

        let stream = if self.stall_after_first_chunk {
            stream::iter(chunks.into_iter().take(1))
                .chain(stream::pending())
                .boxed()
        } else if self.fail_streams {
            stream::iter(chunks.into_iter().take(1))
                .chain(stream::once(async {
                    Err(Error::provider("connection reset"))
                }))
                .boxed()
        } else {
            stream::iter(chunks).boxed()
        };

        Ok(OpenStream {
            stream,
            content_length,
        })
    }
}

/// What a merge call saw on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCall {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub output: PathBuf,
    pub video_len: u64,
    pub audio_len: u64,
}

/// Records merge calls and writes a placeholder output file.
#[derive(Default)]
pub struct RecordingMerger {
    calls: Mutex<Vec<MergeCall>>,
    fail: bool,
}

impl RecordingMerger {
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<MergeCall> {
        self.calls.lock().unwrap().clone()
    }
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|meta| meta.len()).unwrap_or_default()
}

#[async_trait]
impl Merger for RecordingMerger {
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        self.calls.lock().unwrap().push(MergeCall {
            video: video.to_path_buf(),
            audio: audio.to_path_buf(),
            output: output.to_path_buf(),
            video_len: file_len(video),
            audio_len: file_len(audio),
        });
        if self.fail {
            return Err(Error::Merge("ffmpeg exited with exit status: 1".into()));
        }
        std::fs::write(output, b"merged").map_err(|err| Error::io(output, err))
    }
}
