//! Launcher and chunk-source traits
//!
//! Sessions never talk to `tokio::process` directly. A [`Launcher`] turns a
//! validated URL plus options into a [`ChunkSource`], and the session's pump
//! task drives that source until it ends or is closed.

use std::future::Future;

use bytes::Bytes;
use tokio::process::Command;
use url::Url;

use crate::error::{Error, Result};
use crate::registry::StreamKey;

use super::config::{parse_stream_url, StreamOptions};
use super::pipe::{ExitReport, MediaPipe};

/// One step of converter output
#[derive(Debug, Clone)]
pub enum PipeOutput {
    /// A chunk of output, exactly as read
    Chunk(Bytes),
    /// The output has ended
    End(ExitReport),
}

/// A finite, non-restartable sequence of output chunks
pub trait ChunkSource: Send + 'static {
    /// Wait for the next chunk or the end of output
    ///
    /// Must be cancel-safe: the pump task races it against teardown.
    fn next_chunk(&mut self) -> impl Future<Output = PipeOutput> + Send;

    /// Release the source; idempotent
    fn close(&mut self) -> impl Future<Output = ExitReport> + Send;
}

/// Opens chunk sources for upstream URLs
pub trait Launcher: Send + Sync + 'static {
    /// Source type produced by this launcher
    type Source: ChunkSource;

    /// Start converting `url`; fails with `Error::LaunchFailure`
    fn launch(&self, key: &StreamKey, url: &Url, options: &StreamOptions) -> Result<Self::Source>;
}

/// Launches ffmpeg as the converter process
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegLauncher;

impl FfmpegLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl Launcher for FfmpegLauncher {
    type Source = MediaPipe;

    fn launch(&self, key: &StreamKey, url: &Url, options: &StreamOptions) -> Result<MediaPipe> {
        start(url, options, key.to_string())
    }
}

/// Start an ffmpeg media pipe for `url`
pub fn start(url: &Url, options: &StreamOptions, label: impl Into<String>) -> Result<MediaPipe> {
    let url = parse_stream_url(url.as_str()).map_err(Error::LaunchFailure)?;

    let mut command = Command::new(&options.program);
    command.args(ffmpeg_args(&url, options));

    MediaPipe::spawn(command, label, options.chunk_size, options.verbose)
}

/// Full ffmpeg argument list for converting `url` to stdout
pub fn ffmpeg_args(url: &Url, options: &StreamOptions) -> Vec<String> {
    let loglevel = if options.verbose { "warning" } else { "quiet" };

    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        loglevel.into(),
        "-rtsp_transport".into(),
        options.transport.as_str().into(),
        "-i".into(),
        url.as_str().into(),
    ];

    args.extend(options.format.ffmpeg_args().iter().map(|s| s.to_string()));
    args.extend(options.additional_flags.iter().cloned());
    args.push("-".into());

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::config::{OutputFormat, Transport};

    fn cam() -> Url {
        Url::parse("rtsp://cam.local/1").unwrap()
    }

    #[test]
    fn test_default_args() {
        let args = ffmpeg_args(&cam(), &StreamOptions::default());

        assert_eq!(
            args,
            vec![
                "-hide_banner",
                "-loglevel",
                "warning",
                "-rtsp_transport",
                "tcp",
                "-i",
                "rtsp://cam.local/1",
                "-f",
                "mpegts",
                "-codec:v",
                "mpeg1video",
                "-r",
                "30",
                "-q",
                "1",
                "-",
            ]
        );
    }

    #[test]
    fn test_args_follow_options() {
        let options = StreamOptions::default()
            .transport(Transport::Udp)
            .format(OutputFormat::FragmentedMp4)
            .additional_flags(["-an"])
            .verbose(false);

        let args = ffmpeg_args(&cam(), &options);

        let transport = args.iter().position(|a| a == "-rtsp_transport").unwrap();
        assert_eq!(args[transport + 1], "udp");

        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(transport < input);

        assert_eq!(args[2], "quiet");
        assert!(args.contains(&"frag_keyframe+empty_moov+default_base_moof".to_string()));
        assert_eq!(args[args.len() - 2], "-an");
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[tokio::test]
    async fn test_start_rejects_non_rtsp_url() {
        let url = Url::parse("http://cam.local/1").unwrap();
        let result = start(&url, &StreamOptions::default(), "test");

        assert!(matches!(result, Err(Error::LaunchFailure(_))));
    }

    #[tokio::test]
    async fn test_start_missing_program() {
        let options = StreamOptions::default().program("/nonexistent/ffmpeg-missing");
        let key = StreamKey::new(&cam(), &options);

        let result = FfmpegLauncher::new().launch(&key, &cam(), &options);

        assert!(matches!(result, Err(Error::LaunchFailure(_))));
    }
}
