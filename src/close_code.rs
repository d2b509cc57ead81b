//! Close status codes and how the connection manager reacts to them.
//!
//! Standard WebSocket codes live below 4000; the match server uses the
//! private 4000–4999 range for its own meanings. Rejected HTTP upgrades are
//! folded into the same range as `4000 + status` so a refused handshake and a
//! close frame go through one classification.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::VersusError;

/// A machine-readable close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Normal closure.
    pub const NORMAL: Self = Self(1000);
    /// Endpoint is going away (server restart, tab closed).
    pub const GOING_AWAY: Self = Self(1001);
    /// Close frame carried no status code.
    pub const NO_STATUS: Self = Self(1005);
    /// Connection dropped without a close frame.
    pub const ABNORMAL: Self = Self(1006);
    /// Credential rejected.
    pub const UNAUTHORIZED: Self = Self(4401);
    /// The invite exists but this user may not use it.
    pub const INVITE_FORBIDDEN: Self = Self(4403);
    /// The invite or lobby is unknown to the server.
    pub const INVITE_NOT_FOUND: Self = Self(4404);
    /// The invite was already used or timed out.
    pub const INVITE_EXPIRED: Self = Self(4410);

    /// Map a rejected handshake's HTTP status into the private close range.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            100..=999 => Self(4000 + status),
            _ => Self::ABNORMAL,
        }
    }

    /// Decide what the connection manager does after a close with this code.
    ///
    /// No-status and abnormal closures are grouped with explicit
    /// unauthorized closes: many environments cannot tell a rejected
    /// handshake apart from a network drop.
    pub fn disposition(self) -> CloseDisposition {
        match self {
            Self::UNAUTHORIZED | Self::NO_STATUS | Self::ABNORMAL => CloseDisposition::AuthRetry,
            Self::INVITE_FORBIDDEN => CloseDisposition::Terminal(InviteRejection::Forbidden),
            Self::INVITE_NOT_FOUND => CloseDisposition::Terminal(InviteRejection::NotFound),
            Self::INVITE_EXPIRED => CloseDisposition::Terminal(InviteRejection::Expired),
            _ => CloseDisposition::Retry,
        }
    }

    /// Returns a short description of the code.
    pub fn description(self) -> &'static str {
        match self {
            Self::NORMAL => "The connection was closed normally.",
            Self::GOING_AWAY => "The server or client is going away.",
            Self::NO_STATUS => "The connection closed without a status code.",
            Self::ABNORMAL => "The connection dropped without a close handshake.",
            Self::UNAUTHORIZED => "The credential was rejected. A fresh token is required.",
            Self::INVITE_FORBIDDEN => "This invite cannot be used by the current account.",
            Self::INVITE_NOT_FOUND => "The invite or lobby could not be found.",
            Self::INVITE_EXPIRED => "The invite has expired or was already used.",
            _ => "The connection closed with an unrecognized status.",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to do after a connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    /// Force a credential refresh and retry once, then fall back to backoff.
    AuthRetry,
    /// Give up permanently.
    Terminal(InviteRejection),
    /// Retry with exponential backoff.
    Retry,
}

/// Invite-specific reasons the server refuses a join for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteRejection {
    Forbidden,
    NotFound,
    Expired,
}

impl InviteRejection {
    /// Message suitable for showing to the player.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Forbidden => "You are not allowed to join this match.",
            Self::NotFound => "This match invite could not be found.",
            Self::Expired => "This match invite has expired.",
        }
    }
}

/// A close status reported by a transport or synthesized by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseStatus {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// A drop without a close handshake.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::ABNORMAL, reason)
    }

    /// Classify a failed connect attempt.
    pub fn from_connect_error(err: &VersusError) -> Self {
        match err {
            VersusError::HandshakeRejected { status } => {
                Self::new(CloseCode::from_http_status(*status), err.to_string())
            }
            other => Self::abnormal(other.to_string()),
        }
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn auth_like_codes_trigger_auth_retry() {
        for code in [CloseCode::UNAUTHORIZED, CloseCode::NO_STATUS, CloseCode::ABNORMAL] {
            assert_eq!(code.disposition(), CloseDisposition::AuthRetry, "{code}");
        }
    }

    #[test]
    fn invite_codes_are_terminal() {
        assert_eq!(
            CloseCode::INVITE_FORBIDDEN.disposition(),
            CloseDisposition::Terminal(InviteRejection::Forbidden)
        );
        assert_eq!(
            CloseCode::INVITE_NOT_FOUND.disposition(),
            CloseDisposition::Terminal(InviteRejection::NotFound)
        );
        assert_eq!(
            CloseCode::INVITE_EXPIRED.disposition(),
            CloseDisposition::Terminal(InviteRejection::Expired)
        );
    }

    #[test]
    fn other_codes_back_off() {
        for code in [CloseCode::NORMAL, CloseCode::GOING_AWAY, CloseCode(4000), CloseCode(4503)] {
            assert_eq!(code.disposition(), CloseDisposition::Retry, "{code}");
        }
    }

    #[test]
    fn http_statuses_fold_into_private_range() {
        assert_eq!(CloseCode::from_http_status(401), CloseCode::UNAUTHORIZED);
        assert_eq!(CloseCode::from_http_status(410), CloseCode::INVITE_EXPIRED);
        assert_eq!(CloseCode::from_http_status(503), CloseCode(4503));
        assert_eq!(CloseCode::from_http_status(0), CloseCode::ABNORMAL);
    }

    #[test]
    fn connect_errors_classify() {
        let rejected = CloseStatus::from_connect_error(&VersusError::HandshakeRejected { status: 404 });
        assert_eq!(rejected.code, CloseCode::INVITE_NOT_FOUND);

        let refused = CloseStatus::from_connect_error(&VersusError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        assert_eq!(refused.code, CloseCode::ABNORMAL);
    }

    #[test]
    fn every_rejection_has_a_message() {
        for r in [InviteRejection::Forbidden, InviteRejection::NotFound, InviteRejection::Expired] {
            assert!(!r.user_message().is_empty());
        }
    }
}
