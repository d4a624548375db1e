//! Mode/history coordination.
//!
//! History snapshots are not tagged with the mode that asked for them, so a
//! slow reply for an old mode still replaces the transcript after a switch.
//! That matches the server's behaviour; a request id would need a protocol
//! change on both ends.

use chrono::Utc;

use crate::mode::Mode;
use crate::protocol::{HistoryEntry, OutboundFrame};
use crate::transcript::{ChatTurn, Origin, PresentCommand, TurnId};

/// Owns the active mode and turns history snapshots into presentation commands.
#[derive(Clone, Debug, Default)]
pub struct ModeCoordinator {
    active: Mode,
}

impl ModeCoordinator {
    pub fn new(active: Mode) -> Self {
        Self { active }
    }

    pub fn active(&self) -> Mode {
        self.active
    }

    /// Advance to the next mode in the cycle and return it.
    pub fn advance(&mut self) -> Mode {
        self.active = self.active.next();
        self.active
    }

    pub fn history_request(&self, user_id: &str) -> OutboundFrame {
        OutboundFrame::LoadHistory {
            user_id: user_id.to_string(),
            mode: self.active,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Replace the transcript with `snapshot`.
    ///
    /// Always starts with a clear, so applying the same snapshot twice yields
    /// the same transcript. `turns` hands out turn ids; `last_local` is
    /// updated as user turns go by.
    pub fn apply_snapshot(
        &self,
        snapshot: Vec<HistoryEntry>,
        turns: &mut TurnCounter,
        last_local: &mut Option<TurnId>,
    ) -> Vec<PresentCommand> {
        *last_local = None;
        let mut commands = Vec::with_capacity(snapshot.len() + 1);
        commands.push(PresentCommand::ClearTranscript);
        for entry in snapshot {
            let id = turns.next_id();
            if entry.origin == Origin::LocalUser {
                *last_local = Some(id);
            }
            commands.push(PresentCommand::AppendTurn {
                turn: ChatTurn {
                    id,
                    origin: entry.origin,
                    body: entry.content,
                    timestamp: Utc::now(),
                },
                scroll_anchor: *last_local,
            });
        }
        commands
    }
}

/// Hands out increasing [`TurnId`]s.
#[derive(Clone, Debug, Default)]
pub struct TurnCounter(u64);

impl TurnCounter {
    pub fn next_id(&mut self) -> TurnId {
        self.0 += 1;
        TurnId(self.0)
    }
}
