//! Error taxonomy for reconciliation loops.

use thiserror::Error;

/// Errors raised by a sync firing or a startup step.
///
/// Periodic firings swallow every variant at the firing boundary: the next
/// tick recomputes full state, so there is nothing to retry locally. Startup
/// treats `Transport` and `Validation` as fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Network failure, timeout, or a non-success status code.
    #[error("{call} failed{}: {message}", status_suffix(.status))]
    Transport {
        call: String,
        status: Option<u16>,
        message: String,
    },

    /// A local controller failed to compute or apply a diff.
    #[error("convergence failed: {0}")]
    Convergence(String),

    /// A control plane response failed a local sanity check.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The event source terminated.
    #[error("event channel closed")]
    ChannelClosed,
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (status={code})"),
        None => String::new(),
    }
}

impl SyncError {
    /// Transport failure without a response (connect error, timeout, decode error).
    pub fn transport(call: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SyncError::Transport {
            call: call.into(),
            status: None,
            message: err.to_string(),
        }
    }

    /// The control plane answered with a non-success status.
    pub fn status(call: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        SyncError::Transport {
            call: call.into(),
            status: Some(status),
            message: body.into(),
        }
    }

    pub fn convergence(err: impl std::fmt::Display) -> Self {
        SyncError::Convergence(err.to_string())
    }

    /// Short label for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Transport { .. } => "transport",
            SyncError::Convergence(_) => "convergence",
            SyncError::Validation(_) => "validation",
            SyncError::ChannelClosed => "channel_closed",
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport { .. })
    }

    /// Status code of a non-success response, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            SyncError::Transport { status, .. } => *status,
            _ => None,
        }
    }
}
