//! Session lifecycle state
//!
//! ```text
//!   Creating ──► Active ──► Terminated
//!       │
//!       └──────► Failed
//! ```
//!
//! `Terminated` and `Failed` are terminal.

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Converter launch in progress
    Creating,
    /// Converter running, accepting subscribers
    Active,
    /// Torn down; converter closed or closing
    Terminated,
    /// Converter launch failed
    Failed,
}

impl SessionPhase {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Terminated | SessionPhase::Failed)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: SessionPhase) -> bool {
        matches!(
            (self, next),
            (SessionPhase::Creating, SessionPhase::Active)
                | (SessionPhase::Creating, SessionPhase::Failed)
                | (SessionPhase::Active, SessionPhase::Terminated)
        )
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Creating => "creating",
            SessionPhase::Active => "active",
            SessionPhase::Terminated => "terminated",
            SessionPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a subscriber's stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The converter exited
    UpstreamEnded,
    /// The relay is shutting down
    Shutdown,
    /// The subscriber fell too far behind
    SlowConsumer,
    /// The subscriber left on its own
    Unsubscribed,
}

impl EndReason {
    /// Short text for a close frame
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::UpstreamEnded => "upstream stream ended",
            EndReason::Shutdown => "server shutting down",
            EndReason::SlowConsumer => "client too slow",
            EndReason::Unsubscribed => "unsubscribed",
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
