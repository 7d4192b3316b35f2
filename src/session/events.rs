use serde::Serialize;

use crate::errors::RefreshFailure;

/// Lifecycle notifications for host applications.
///
/// `Ended` is the signal to route to the unauthenticated entry point. It is
/// sent once per logout and once per failed refresh cycle, never per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A login or registration stored a new token pair.
    Established { app: String },
    /// A refresh cycle stored a new access token.
    Refreshed { app: String },
    /// The session was torn down.
    Ended { app: String, reason: EndReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EndReason {
    Logout,
    RefreshFailed { status: Option<u16>, message: String },
}

impl SessionEvent {
    pub fn app(&self) -> &str {
        match self {
            SessionEvent::Established { app }
            | SessionEvent::Refreshed { app }
            | SessionEvent::Ended { app, .. } => app,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, SessionEvent::Ended { .. })
    }
}

impl From<&RefreshFailure> for EndReason {
    fn from(failure: &RefreshFailure) -> Self {
        EndReason::RefreshFailed {
            status: failure.status,
            message: failure.message.clone(),
        }
    }
}
