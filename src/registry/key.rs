//! Stream keys
//!
//! Two requests share an upstream session exactly when their keys are equal.

use url::Url;

use crate::adapter::{OutputFormat, StreamOptions, Transport};

/// Identifies one upstream conversion (URL + output-affecting options)
///
/// The verbose flag is not part of the key: it changes diagnostics only,
/// never the bytes subscribers receive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    /// Normalized upstream URL
    pub url: String,
    /// RTSP transport mode
    pub transport: Transport,
    /// Output container
    pub format: OutputFormat,
    /// Additional converter flags, in order
    pub flags: Vec<String>,
}

impl StreamKey {
    /// Derive the key for `url` opened with `options`
    pub fn new(url: &Url, options: &StreamOptions) -> Self {
        Self {
            url: url.as_str().to_string(),
            transport: options.transport,
            format: options.format,
            flags: options.additional_flags.clone(),
        }
    }

    /// URL with any password removed, for logs
    pub fn redacted_url(&self) -> String {
        match Url::parse(&self.url) {
            Ok(mut url) if url.password().is_some() => {
                let _ = url.set_password(Some("***"));
                url.to_string()
            }
            _ => self.url.clone(),
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}/{}", self.redacted_url(), self.transport, self.format)?;
        for flag in &self.flags {
            write!(f, " {}", flag)?;
        }
        write!(f, ")")
    }
}
