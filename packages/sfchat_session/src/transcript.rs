//! Chat turns and the presentation seam.
//!
//! The session never keeps turns around; it hands them to a [`Presenter`]
//! as [`PresentCommand`]s. [`Transcript`] is a plain in-memory model of what
//! a presenter shows, used by the terminal client and by tests.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::mode::Mode;
use crate::session::ConnectionState;

/// Who wrote a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    LocalUser,
    RemotePeer,
}

/// Session-assigned turn identifier, increasing in display order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TurnId(pub u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: TurnId,
    pub origin: Origin,
    /// Message text; may embed `![image N](ref)` markers for attached media.
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// User-visible notices. Rendering (toast, stderr line, ...) is up to the presenter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    /// Explicit connect with no server address.
    MissingEndpoint,
    /// The endpoint could not be turned into a socket URL.
    InvalidEndpoint(String),
    Connected,
    ConnectTimeout,
    CredentialRejected,
    ConnectionLost,
    ConnectionFailed,
    /// Application error reported by the server.
    ServerError(String),
    /// Tried to send while no transport is open.
    NotConnected,
    /// Background retries stopped after too many rejected credentials.
    RetriesExhausted,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::MissingEndpoint => f.write_str("enter a server address first"),
            Notice::InvalidEndpoint(reason) => write!(f, "invalid server address: {reason}"),
            Notice::Connected => f.write_str("connected"),
            Notice::ConnectTimeout => {
                f.write_str("connection timed out, check the address and port")
            }
            Notice::CredentialRejected => f.write_str("password rejected"),
            Notice::ConnectionLost => f.write_str("connection closed"),
            Notice::ConnectionFailed => {
                f.write_str("connection failed, make sure the server is running")
            }
            Notice::ServerError(content) => write!(f, "server error: {content}"),
            Notice::NotConnected => f.write_str("not connected to a server"),
            Notice::RetriesExhausted => {
                f.write_str("password rejected too many times, stopped retrying")
            }
        }
    }
}

/// Instructions from the session to the presentation collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresentCommand {
    AppendTurn {
        turn: ChatTurn,
        /// Last local turn, for scroll anchoring. Not owned.
        scroll_anchor: Option<TurnId>,
    },
    ClearTranscript,
    /// Show or hide the "waiting for reply" indicator.
    Pending(bool),
    Notice(Notice),
    Status(ConnectionState),
    ModeChanged(Mode),
}

/// Presentation collaborator.
pub trait Presenter: Send + 'static {
    fn present(&mut self, command: PresentCommand);
}

/// What the session asks the settings collaborator to store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub endpoint: Option<Endpoint>,
    pub mode: Mode,
    pub credential: String,
    pub user_id: String,
}

/// Settings collaborator.
pub trait SettingsSink: Send + 'static {
    fn persist(&mut self, state: &PersistedState) -> anyhow::Result<()>;
}

/// In-memory view of the visible transcript.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    turns: Vec<ChatTurn>,
    pending: bool,
    scroll_anchor: Option<TurnId>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a command. Commands that don't touch the transcript are ignored.
    pub fn apply(&mut self, command: &PresentCommand) {
        match command {
            PresentCommand::AppendTurn {
                turn,
                scroll_anchor,
            } => {
                self.turns.push(turn.clone());
                self.scroll_anchor = *scroll_anchor;
            }
            PresentCommand::ClearTranscript => {
                self.turns.clear();
                self.scroll_anchor = None;
            }
            PresentCommand::Pending(pending) => self.pending = *pending,
            PresentCommand::Notice(_)
            | PresentCommand::Status(_)
            | PresentCommand::ModeChanged(_) => {}
        }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// `(origin, body)` pairs, handy for comparisons.
    pub fn entries(&self) -> Vec<(Origin, &str)> {
        self.turns
            .iter()
            .map(|t| (t.origin, t.body.as_str()))
            .collect()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn scroll_anchor(&self) -> Option<TurnId> {
        self.scroll_anchor
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Local clear (the "clear page" action); does not touch the server.
    pub fn clear(&mut self) {
        self.apply(&PresentCommand::ClearTranscript);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(id: u64, origin: Origin, body: &str) -> ChatTurn {
        ChatTurn {
            id: TurnId(id),
            origin,
            body: body.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn append_and_clear() {
        let mut t = Transcript::new();
        t.apply(&PresentCommand::AppendTurn {
            turn: turn(1, Origin::LocalUser, "hi"),
            scroll_anchor: Some(TurnId(1)),
        });
        t.apply(&PresentCommand::AppendTurn {
            turn: turn(2, Origin::RemotePeer, "hello"),
            scroll_anchor: Some(TurnId(1)),
        });
        assert_eq!(
            t.entries(),
            vec![(Origin::LocalUser, "hi"), (Origin::RemotePeer, "hello")]
        );
        assert_eq!(t.scroll_anchor(), Some(TurnId(1)));

        t.apply(&PresentCommand::ClearTranscript);
        assert!(t.is_empty());
        assert_eq!(t.scroll_anchor(), None);
    }

    #[test]
    fn pending_flag_tracks_commands() {
        let mut t = Transcript::new();
        t.apply(&PresentCommand::Pending(true));
        assert!(t.is_pending());
        t.apply(&PresentCommand::Notice(Notice::Connected));
        assert!(t.is_pending());
        t.apply(&PresentCommand::Pending(false));
        assert!(!t.is_pending());
    }

    #[test]
    fn notice_text() {
        assert_eq!(
            Notice::ServerError("boom".into()).to_string(),
            "server error: boom"
        );
        assert_eq!(Notice::CredentialRejected.to_string(), "password rejected");
    }
}
