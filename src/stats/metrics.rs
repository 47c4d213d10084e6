//! Statistics for relay sessions and connections

use std::time::{Duration, Instant};

/// Per-session relay statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// When the session was created
    pub started_at: Instant,
    /// Chunks read from the converter
    pub chunks_relayed: u64,
    /// Bytes read from the converter
    pub bytes_relayed: u64,
    /// Chunk deliveries skipped because a subscriber queue was full
    pub chunks_dropped: u64,
    /// Subscribers ever attached
    pub total_subscribers: u64,
    /// Largest number of simultaneous subscribers
    pub peak_subscribers: usize,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            chunks_relayed: 0,
            bytes_relayed: 0,
            chunks_dropped: 0,
            total_subscribers: 0,
            peak_subscribers: 0,
        }
    }

    /// Record one converter chunk
    pub fn on_chunk(&mut self, size: usize) {
        self.chunks_relayed += 1;
        self.bytes_relayed += size as u64;
    }

    /// Record a subscriber joining, given the new subscriber count
    pub fn on_subscribe(&mut self, current: usize) {
        self.total_subscribers += 1;
        self.peak_subscribers = self.peak_subscribers.max(current);
    }

    /// Time since the session started
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Average upstream bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration().as_secs();
        if secs > 0 {
            (self.bytes_relayed * 8) / secs
        } else {
            0
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection delivery statistics
#[derive(Debug, Clone, Default)]
pub struct SubscriberStats {
    /// Chunks written to the connection
    pub chunks_sent: u64,
    /// Bytes written to the connection
    pub bytes_sent: u64,
    /// Connection duration
    pub duration: Duration,
}

impl SubscriberStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one chunk written
    pub fn on_sent(&mut self, size: usize) {
        self.chunks_sent += 1;
        self.bytes_sent += size as u64;
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Total connections accepted
    pub total_connections: u64,
    /// Currently open connections
    pub active_connections: u64,
    /// Connections refused by the connection limit
    pub rejected_connections: u64,
    /// Live sessions
    pub active_sessions: u64,
    /// Converter processes launched
    pub launches: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }
}
