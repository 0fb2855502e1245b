use std::fmt;

use thiserror::Error;

/// Why a remote query against the hosting service failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFailure {
    Transport,
    /// The response body did not have the expected shape.
    Decode,
    Authentication,
    RateLimited,
    Api(u16),
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteFailure::Transport => write!(f, "transport failure"),
            RemoteFailure::Decode => write!(f, "unexpected response"),
            RemoteFailure::Authentication => write!(f, "authentication failed"),
            RemoteFailure::RateLimited => write!(f, "rate limited"),
            RemoteFailure::Api(status) => write!(f, "HTTP {status}"),
        }
    }
}

/// Distinguishes an explicit cancel from an expired deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => write!(f, "request cancelled"),
            CancelReason::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Every way a single dispatch can fail.
///
/// The `Display` text is what the chat user sees, so it stays on one line.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("{operation} failed ({failure}): {message}")]
    RemoteQuery {
        operation: &'static str,
        failure: RemoteFailure,
        message: String,
    },

    #[error("template '{template}': {reason}")]
    Template { template: String, reason: String },

    #[error("{0}")]
    Cancelled(CancelReason),

    #[error("no such action: '{0}'")]
    UnknownAction(String),
}

impl ActionError {
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ActionError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn template(template: impl Into<String>, reason: impl Into<String>) -> Self {
        ActionError::Template {
            template: template.into(),
            reason: reason.into(),
        }
    }
}

/// Problems found while assembling the action table at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("action '{0}' is registered more than once")]
    DuplicateAction(String),

    #[error("trigger '{pattern}' refers to unknown action '{action}'")]
    UnknownTriggerAction { pattern: String, action: String },
}
