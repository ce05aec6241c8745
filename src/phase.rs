//! Match lifecycle phases and the transitions between them.
//!
//! The phase machine is a pure function of (current phase, message type):
//! it performs no I/O and touches nothing but its stored phase. The
//! session feeds it every inbound message type and consults it before
//! sending, so all phase-legality decisions live in one place.

use tracing::trace;

use crate::error::SessionError;

/// A named stage of the match lifecycle the client can be in.
///
/// Exactly one phase is current per session; it is mutated only by
/// [`SessionPhaseMachine`] on accepted transitions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// Waiting for the server to acknowledge our `connect`.
    #[default]
    Connecting,
    /// Connected and waiting to be matched with an opponent.
    Matchmaking,
    /// Choosing a fighter from the server's initial options.
    FighterSelection,
    /// Buying, selling and refreshing between fights.
    Shop,
    /// The server is simulating the fight batch.
    Fighting,
    /// Stepping through streamed fight replays.
    ReplayViewing,
    /// The connection is gone; a fresh `connect` starts over.
    Disconnected,
}

/// Outcome of feeding one inbound message type to the phase machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// The message is legal here; the machine now holds the given phase
    /// (which may equal the previous one).
    Accepted(Phase),
    /// The message type is known but has no meaning in the current phase.
    /// Tolerated, not an error: servers may repeat or race messages.
    Ignored,
    /// The message type is not part of the protocol at all.
    Rejected {
        /// Why the message was rejected.
        reason: String,
    },
}

/// Message types that never change phase, whatever the current phase is.
const STATUS_TYPES: &[&str] = &[
    "status",
    "error",
    "waiting_for_opponent",
    "opponent_ready",
    "opponent_connected",
    "player_update",
    "game_ended",
    "batch_completed",
];

/// Every inbound message type this client understands.
const KNOWN_TYPES: &[&str] = &[
    "connected",
    "connection_error",
    "disconnected",
    "opponent_disconnected",
    "matchmaking_started",
    "match_found",
    "fighter_selection_ready",
    "initial_shop_ready",
    "fight_starting",
    "replay_data",
    "replay_next",
    "replay_previous",
    "shop_phase_start",
    "options",
    "purchase_result",
    "refresh_result",
    "sell_result",
    "status",
    "error",
    "waiting_for_opponent",
    "opponent_ready",
    "opponent_connected",
    "player_update",
    "game_ended",
    "batch_completed",
];

/// Tracks where the client is in the match lifecycle and decides which
/// inbound message types may change it.
#[derive(Debug, Default)]
pub struct SessionPhaseMachine {
    phase: Phase,
}

impl SessionPhaseMachine {
    /// Creates a machine in the initial [`Phase::Connecting`] state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Feeds one inbound message type through the transition table.
    ///
    /// Known types with no entry for the current phase are `Ignored`;
    /// only entirely unknown type strings are `Rejected`. Status
    /// messages are accepted in any phase without changing it.
    pub fn handle(&mut self, message_type: &str) -> TransitionResult {
        if !KNOWN_TYPES.contains(&message_type) {
            return TransitionResult::Rejected {
                reason: format!("unknown message type '{}'", message_type),
            };
        }

        // Recovery transitions apply from any phase.
        match message_type {
            "opponent_disconnected" => return self.transition(Phase::Matchmaking),
            "disconnected" | "connection_error" => return self.transition(Phase::Disconnected),
            _ => {}
        }

        if STATUS_TYPES.contains(&message_type) {
            return TransitionResult::Accepted(self.phase);
        }

        let next = match (self.phase, message_type) {
            (Phase::Connecting, "connected") => Some(Phase::Matchmaking),

            (Phase::Matchmaking, "matchmaking_started" | "match_found") => Some(Phase::Matchmaking),
            (Phase::Matchmaking, "fighter_selection_ready") => Some(Phase::FighterSelection),
            (Phase::Matchmaking, "initial_shop_ready") => Some(Phase::Shop),

            (Phase::FighterSelection, "options" | "purchase_result") => {
                Some(Phase::FighterSelection)
            }
            (Phase::FighterSelection, "shop_phase_start") => Some(Phase::Shop),
            (Phase::FighterSelection, "fight_starting") => Some(Phase::Fighting),

            (
                Phase::Shop,
                "shop_phase_start" | "options" | "purchase_result" | "refresh_result"
                | "sell_result",
            ) => Some(Phase::Shop),
            (Phase::Shop, "fight_starting") => Some(Phase::Fighting),

            (Phase::Fighting, "fight_starting") => Some(Phase::Fighting),
            (Phase::Fighting, "replay_data") => Some(Phase::ReplayViewing),

            (Phase::ReplayViewing, "replay_data" | "replay_next" | "replay_previous") => {
                Some(Phase::ReplayViewing)
            }
            (Phase::ReplayViewing, "shop_phase_start") => Some(Phase::Shop),

            _ => None,
        };

        match next {
            Some(phase) => self.transition(phase),
            None => {
                trace!(
                    message_type,
                    phase = ?self.phase,
                    "message has no transition entry for current phase"
                );
                TransitionResult::Ignored
            }
        }
    }

    /// Checks whether an outbound request type is legal in the current phase.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::PhaseViolation`] when the request must not
    /// be sent from the current phase.
    pub fn check_outbound(&self, message_type: &str) -> Result<(), SessionError> {
        let allowed = match message_type {
            "connect" => matches!(self.phase, Phase::Connecting | Phase::Disconnected),
            "disconnect" => true,
            "fighter_selected" => self.phase == Phase::FighterSelection,
            "purchase_option" | "request_options" => {
                matches!(self.phase, Phase::FighterSelection | Phase::Shop)
            }
            "refresh_shop" | "sell_item" | "shop_phase_complete" => self.phase == Phase::Shop,
            "replay_viewed" | "request_next_replay" | "request_previous_replay" => {
                self.phase == Phase::ReplayViewing
            }
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(SessionError::PhaseViolation {
                phase: self.phase,
                message_type: message_type.to_owned(),
            })
        }
    }

    /// Records a client-initiated disconnect. Inbound `disconnected`
    /// messages reach the same state through [`handle`](Self::handle).
    pub fn disconnect(&mut self) {
        self.phase = Phase::Disconnected;
    }

    fn transition(&mut self, next: Phase) -> TransitionResult {
        if next != self.phase {
            trace!(from = ?self.phase, to = ?next, "phase transition");
        }
        self.phase = next;
        TransitionResult::Accepted(next)
    }
}
