//! Events emitted by a running match client.

use crate::board::BoardUpdate;
use crate::close_code::InviteRejection;
use crate::protocol::{ConnectionAckPayload, MatchId};
use crate::rematch::RematchView;

/// Identity of one physical connection attempt. Strictly increasing per view.
pub type SocketId = u64;

/// Lifecycle of the logical connection for one match view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying.
    Idle,
    /// A physical attempt is in progress.
    Connecting,
    Open,
    /// The last attempt closed; a retry may be scheduled.
    Closed,
    /// Gave up. Only an explicit connect or match switch leaves this state.
    Terminal,
}

/// Why a view gave up for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// No invite and no stored session key; nothing was opened.
    MissingCredential { lobby_id: String },
    /// The server refused the invite.
    InviteRejected(InviteRejection),
    /// Backoff retries ran out.
    ReconnectExhausted { attempts: u32 },
}

impl Termination {
    /// Message suitable for showing to the player.
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingCredential { .. } => {
                "This match link is missing its invite. Ask for a new one.".to_string()
            }
            Self::InviteRejected(rejection) => rejection.user_message().to_string(),
            Self::ReconnectExhausted { attempts } => {
                format!("Lost connection to the match after {attempts} attempts.")
            }
        }
    }
}

/// Everything the UI layer needs to follow a match view.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchEvent {
    /// The connection state changed.
    StateChanged {
        state: ConnectionState,
        socket_id: SocketId,
    },
    /// The server acknowledged the connection.
    Acknowledged(ConnectionAckPayload),
    /// A validated board snapshot or update.
    Board(BoardUpdate),
    /// The invite was exchanged for a session key.
    SessionPromoted { lobby_id: String, persisted: bool },
    /// Rematch state changed.
    Rematch(RematchView),
    /// A new match was created by a rematch; the view is moving to it.
    RematchStarted { match_id: MatchId },
    /// The server reported an error. The connection stays up.
    ServerError {
        message: String,
        code: Option<String>,
    },
    /// The view gave up.
    Terminated(Termination),
}
