//! Where video metadata and stream bytes come from.
//!
//! The pipeline only talks to the [`Provider`] trait. [`YtDlpProvider`] is the
//! production implementation: `yt-dlp` resolves the format list (it already
//! knows how to deal with signatures and throttling parameters), and the
//! chosen stream URL is then fetched directly with `reqwest` so we can observe
//! every chunk ourselves.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::metadata::{ContentLength, FormatDescriptor, RawVideoInfo, VideoMetadata};

/// Chunks of a remote stream. Errors are already classified.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// A readable stream plus the size we expect it to have.
pub struct OpenStream {
    pub stream: ByteStream,
    pub content_length: ContentLength,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Name of the provider (for logging)
    fn name(&self) -> &'static str;

    /// Title, author, duration and the full format list for one video.
    async fn video_metadata(&self, video_id: &str) -> Result<VideoMetadata>;

    /// Opens the byte stream for `format`. Implementations should give up
    /// promptly once `cancel` fires.
    async fn open_stream(
        &self,
        cancel: &CancellationToken,
        video: &VideoMetadata,
        format: &FormatDescriptor,
    ) -> Result<OpenStream>;
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Extracts the video id from the usual URL shapes: `watch?v=`, `youtu.be/`,
/// `/shorts/`, `/embed/` and `/live/`.
pub fn parse_video_id(input: &str) -> Result<String> {
    let input = input.trim();
    let url = Url::parse(input).map_err(|err| Error::Input(format!("{input:?} is not a URL: {err}")))?;

    let from_query = url
        .query_pairs()
        .find(|(key, _)| key == "v")
        .map(|(_, value)| value.into_owned());

    let mut segments = url.path_segments().into_iter().flatten().filter(|s| !s.is_empty());
    let from_path = match url.host_str() {
        Some("youtu.be") => segments.next().map(str::to_owned),
        _ => {
            let first = segments.next();
            match first {
                Some("shorts" | "embed" | "live" | "v") => segments.next().map(str::to_owned),
                _ => None,
            }
        }
    };

    let id = from_query
        .or(from_path)
        .ok_or_else(|| Error::Input(format!("video ID not found in URL {input}")))?;
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::Input(format!("malformed video ID {id:?}")));
    }
    Ok(id)
}

/// Metadata via the `yt-dlp` binary, streams via HTTP.
pub struct YtDlpProvider {
    binary: PathBuf,
    client: reqwest::Client,
}

impl YtDlpProvider {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Resolves `name` on `PATH` (absolute paths are checked as-is).
    pub fn locate(name: &str) -> Result<Self> {
        let binary = which::which(name)
            .map_err(|err| Error::provider(format!("{name} is not installed or not in PATH: {err}")))?;
        Ok(Self::new(binary))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl Provider for YtDlpProvider {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn video_metadata(&self, video_id: &str) -> Result<VideoMetadata> {
        let video_url = watch_url(video_id);
        let mut command = Command::new(&self.binary);
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg(&video_url)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(binary = %self.binary.display(), url = %video_url, "fetching metadata");
        let output = command.output().await.map_err(|err| {
            Error::provider_with(format!("failed to run {}", self.binary.display()), err)
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::provider(format!(
                "metadata command failed for {video_url} ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        let info: RawVideoInfo = serde_json::from_slice(&output.stdout)
            .map_err(|err| Error::provider_with("could not parse metadata JSON", err))?;
        let video = VideoMetadata::from_info(info);
        debug!(id = %video.id, formats = video.formats.len(), "metadata ingested");
        Ok(video)
    }

    async fn open_stream(
        &self,
        cancel: &CancellationToken,
        _video: &VideoMetadata,
        format: &FormatDescriptor,
    ) -> Result<OpenStream> {
        let mut request = self.client.get(&format.url);
        for (name, value) in &format.http_headers {
            request = request.header(name, value);
        }

        let itag = format.itag;
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = request.send() => response.map_err(|err| {
                Error::provider_with(format!("stream request for itag {itag} failed"), err)
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::provider(format!(
                "stream request for itag {itag} returned {status}"
            )));
        }

        let content_length = response
            .content_length()
            .filter(|length| *length > 0)
            .map(ContentLength::Exact)
            .unwrap_or(format.content_length);
        debug!(itag, ?content_length, "stream opened");

        let stream = response
            .bytes_stream()
            .map_err(move |err| {
                Error::provider_with(format!("stream for itag {itag} interrupted"), err)
            })
            .boxed();

        Ok(OpenStream {
            stream,
            content_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{audio_format, sample_video};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parse_video_id_accepts_common_shapes() {
        let cases = [
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", "dQw4w9WgXcQ"),
            ("https://www.youtube.com/watch?list=PL1&v=dQw4w9WgXcQ&t=4", "dQw4w9WgXcQ"),
            ("https://youtu.be/dQw4w9WgXcQ?si=abc", "dQw4w9WgXcQ"),
            ("https://www.youtube.com/shorts/abc_DEF-123", "abc_DEF-123"),
            ("https://www.youtube.com/embed/dQw4w9WgXcQ", "dQw4w9WgXcQ"),
            ("  https://m.youtube.com/watch?v=dQw4w9WgXcQ  ", "dQw4w9WgXcQ"),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_video_id(input).unwrap(), expected, "input: {input}");
        }
    }

    #[test]
    fn parse_video_id_rejects_garbage() {
        for input in [
            "not a url",
            "https://www.youtube.com/",
            "https://www.youtube.com/watch?v=",
            "https://www.youtube.com/watch?v=abc/../def",
            "https://www.youtube.com/@channel",
        ] {
            assert!(
                matches!(parse_video_id(input), Err(Error::Input(_))),
                "accepted {input:?}"
            );
        }
    }

    #[tokio::test]
    async fn open_stream_forwards_headers_and_length() {
        let server = MockServer::start().await;
        let body = vec![7u8; 4_096];
        Mock::given(method("GET"))
            .and(path("/videoplayback"))
            .and(header("user-agent", "ytd-test"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let mut format = audio_format(140, 128_000);
        format.url = format!("{}/videoplayback", server.uri());
        format.content_length = ContentLength::Estimated(1);
        format
            .http_headers
            .insert("User-Agent".into(), "ytd-test".into());

        let provider = YtDlpProvider::new("yt-dlp");
        let opened = provider
            .open_stream(&CancellationToken::new(), &sample_video(), &format)
            .await
            .unwrap();
        assert_eq!(opened.content_length, ContentLength::Exact(4_096));

        let chunks: Vec<Bytes> = opened.stream.try_collect().await.unwrap();
        let received: Vec<u8> = chunks.iter().flat_map(|chunk| chunk.iter().copied()).collect();
        assert_eq!(received, body);
    }

    #[tokio::test]
    async fn open_stream_maps_forbidden_to_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let mut format = audio_format(140, 128_000);
        format.url = format!("{}/expired", server.uri());

        let provider = YtDlpProvider::new("yt-dlp");
        let result = provider
            .open_stream(&CancellationToken::new(), &sample_video(), &format)
            .await;
        match result {
            Err(Error::Provider { message, .. }) => assert!(message.contains("403"), "{message}"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected a provider error"),
        }
    }

    #[tokio::test]
    async fn open_stream_respects_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut format = audio_format(140, 128_000);
        // Unroutable; the cancelled branch must win before any connect.
        format.url = "http://10.255.255.1:9/stream".into();

        let provider = YtDlpProvider::new("yt-dlp");
        let result = provider.open_stream(&cancel, &sample_video(), &format).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn locate_reports_missing_binary() {
        let result = YtDlpProvider::locate("ytd-test-no-such-binary-xyz");
        assert!(matches!(result, Err(Error::Provider { .. })));
    }

    #[cfg(unix)]
    mod stubbed {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::tempdir;

        fn install_stub(dir: &Path, body: &str) -> PathBuf {
            let script_path = dir.join("yt-dlp");
            fs::write(&script_path, format!("#!/usr/bin/env bash\nset -euo pipefail\n{body}")).unwrap();
            let mut perms = fs::metadata(&script_path).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script_path, perms).unwrap();
            script_path
        }

        #[tokio::test]
        async fn video_metadata_parses_stub_output() {
            let dir = tempdir().unwrap();
            let stub = install_stub(
                dir.path(),
                r#"if [[ " $* " != *" --dump-single-json "* ]]; then exit 2; fi
cat <<'JSON'
{
  "id": "alpha",
  "title": "Alpha Title",
  "uploader": "Uploader",
  "duration": 120,
  "formats": [
    { "format_id": "137", "url": "https://x/137", "ext": "mp4", "vcodec": "avc1", "acodec": "none",
      "height": 1080, "fps": 30, "tbr": 4000, "filesize": 1024 },
    { "format_id": "140", "url": "https://x/140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2",
      "abr": 128, "audio_channels": 2 }
  ]
}
JSON
"#,
            );

            let provider = YtDlpProvider::new(&stub);
            let video = provider.video_metadata("alpha").await.unwrap();
            assert_eq!(video.title, "Alpha Title");
            assert_eq!(video.author, "Uploader");
            assert_eq!(video.formats.len(), 2);
            // 128 kbit/s for 120 s.
            assert_eq!(
                video.format_by_itag(140).unwrap().content_length,
                ContentLength::Estimated(1_920_000)
            );
        }

        #[tokio::test]
        async fn video_metadata_surfaces_stub_failure() {
            let dir = tempdir().unwrap();
            let stub = install_stub(dir.path(), "echo 'ERROR: Video unavailable' >&2\nexit 1\n");

            let provider = YtDlpProvider::new(&stub);
            match provider.video_metadata("gone").await {
                Err(Error::Provider { message, .. }) => {
                    assert!(message.contains("Video unavailable"), "{message}")
                }
                other => panic!("unexpected result: {:?}", other.map(|v| v.id)),
            }
        }
    }
}
