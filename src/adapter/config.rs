//! Per-stream adapter options

use std::path::PathBuf;

use url::Url;

/// Default flags appended after the output format arguments
pub const DEFAULT_ADDITIONAL_FLAGS: &[&str] = &["-q", "1"];

/// Default size of a single stdout read
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// RTSP lower transport requested from the upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transport {
    /// Interleaved RTP over the RTSP TCP connection
    #[default]
    Tcp,
    /// RTP over UDP
    Udp,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        }
    }
}

impl std::str::FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            other => Err(format!("unknown transport: {}", other)),
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container produced on the converter's stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    /// MPEG-TS carrying MPEG-1 video (JSMpeg compatible)
    #[default]
    MpegTs,
    /// Fragmented MP4 with the H.264 track copied through (MSE compatible)
    FragmentedMp4,
    /// multipart/x-mixed-replace JPEG frames
    Mjpeg,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::MpegTs => "mpegts",
            OutputFormat::FragmentedMp4 => "fmp4",
            OutputFormat::Mjpeg => "mjpeg",
        }
    }

    /// ffmpeg output arguments selecting this container
    pub fn ffmpeg_args(&self) -> &'static [&'static str] {
        match self {
            OutputFormat::MpegTs => &["-f", "mpegts", "-codec:v", "mpeg1video", "-r", "30"],
            OutputFormat::FragmentedMp4 => &[
                "-f",
                "mp4",
                "-codec:v",
                "copy",
                "-an",
                "-movflags",
                "frag_keyframe+empty_moov+default_base_moof",
            ],
            OutputFormat::Mjpeg => &["-f", "mpjpeg", "-codec:v", "mjpeg"],
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mpegts" | "ts" => Ok(OutputFormat::MpegTs),
            "fmp4" | "mp4" => Ok(OutputFormat::FragmentedMp4),
            "mjpeg" => Ok(OutputFormat::Mjpeg),
            other => Err(format!("unknown output format: {}", other)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options controlling how one upstream is opened and converted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    /// RTSP transport mode
    pub transport: Transport,

    /// Extra converter flags, placed after the format arguments
    pub additional_flags: Vec<String>,

    /// Log converter diagnostics
    pub verbose: bool,

    /// Output container
    pub format: OutputFormat,

    /// Converter binary
    pub program: PathBuf,

    /// Maximum bytes per stdout read
    pub chunk_size: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            transport: Transport::Tcp,
            additional_flags: DEFAULT_ADDITIONAL_FLAGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            verbose: true,
            format: OutputFormat::MpegTs,
            program: PathBuf::from("ffmpeg"),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl StreamOptions {
    /// Set the transport mode
    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Replace the additional flags
    pub fn additional_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.additional_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable converter diagnostics
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the output container
    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the converter binary
    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the stdout read size (at least 1 byte)
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}

/// Parse and validate an upstream stream URL
///
/// Accepts `rtsp://` and `rtsps://` URLs with a host component.
pub fn parse_stream_url(raw: &str) -> Result<Url, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("missing url".into());
    }

    let url = Url::parse(raw).map_err(|e| format!("invalid url: {}", e))?;

    match url.scheme() {
        "rtsp" | "rtsps" => {}
        other => return Err(format!("unsupported scheme: {}", other)),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err("url has no host".into()),
    }
}
