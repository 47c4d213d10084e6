//! Media pipe adapter
//!
//! Wraps the external converter process (ffmpeg) that turns an RTSP source
//! into a browser-consumable byte stream on its stdout.
//!
//! ```text
//!   rtsp://cam/1 ──► ffmpeg -rtsp_transport tcp -i rtsp://cam/1 -f mpegts ... -
//!                                                                       │
//!                                                  stdout ──► MediaPipe::next_chunk()
//!                                                  stderr ──► tracing (verbose only)
//! ```

pub mod config;
pub mod pipe;
pub mod source;

pub use config::{parse_stream_url, OutputFormat, StreamOptions, Transport};
pub use pipe::{ExitReport, MediaPipe};
pub use source::{ffmpeg_args, start, ChunkSource, FfmpegLauncher, Launcher, PipeOutput};
