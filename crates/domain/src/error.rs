//! Shared error type used across all voice-relay crates.
//!
//! Variants double as the wire-level error codes sent to clients (§7 of the
//! spec): the `code()` accessor returns the exact token, e.g.
//! `"UPSTREAM_CONNECT"`, so the relay core never needs a separate
//! client-facing error type.

/// Whether an error ends the session or is recoverable (the session
/// continues after the client is notified).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recoverable {
    Yes,
    No,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("tenant over quota: {tenant_id}")]
    TenantOverQuota { tenant_id: String },

    #[error("session already active: {session_id}")]
    SessionAlreadyActive { session_id: String },

    #[error("session start failed: {0}")]
    SessionStartFailed(String),

    #[error("no active session: {session_id}")]
    NoActiveSession { session_id: String },

    #[error("upstream connect failed: {0}")]
    UpstreamConnect(String),

    #[error("agent disconnected: {0}")]
    AgentDisconnected(String),

    #[error("message processing error: {0}")]
    MessageProcessingError(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The wire token sent in an `error` control message's `code` field.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) | Error::Json(_) | Error::Config(_) | Error::Other(_) => "INTERNAL",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::TenantOverQuota { .. } => "TENANT_OVER_QUOTA",
            Error::SessionAlreadyActive { .. } => "SESSION_ALREADY_ACTIVE",
            Error::SessionStartFailed(_) => "SESSION_START_FAILED",
            Error::NoActiveSession { .. } => "NO_ACTIVE_SESSION",
            Error::UpstreamConnect(_) => "UPSTREAM_CONNECT",
            Error::AgentDisconnected(_) => "AGENT_DISCONNECTED",
            Error::MessageProcessingError(_) => "MESSAGE_PROCESSING_ERROR",
            Error::UnknownMessageType(_) => "UNKNOWN_MESSAGE_TYPE",
        }
    }

    /// Whether this error kind is fatal for the session (§7 propagation policy).
    pub fn recoverable(&self) -> Recoverable {
        match self {
            Error::MessageProcessingError(_) | Error::UnknownMessageType(_) => Recoverable::Yes,
            _ => Recoverable::No,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
