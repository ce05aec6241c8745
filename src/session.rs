//! The protocol session orchestrator.
//!
//! [`ProtocolSession`] owns the transport, the phase machine, the
//! playback scheduler and the shop tracker. Inbound flow: the transport
//! hands over raw JSON text, the session decodes it once, runs the type
//! through the phase machine, and routes the payload to whichever
//! component consumes it, queueing [`SessionEvent`]s for downstream
//! collaborators. Outbound flow: request methods validate phase
//! legality, serialize, and hand the text to the transport, failing fast
//! when it reports not-connected.
//!
//! Everything is single-threaded and event-driven; the transport's
//! receive path and the scheduler's tick are the only two sources of
//! externally triggered work, and [`ProtocolSession::poll`] serializes
//! both onto the caller's loop.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::{debug, trace, warn};
use web_time::Instant;

use crate::error::SessionError;
use crate::event_drain::EventDrain;
use crate::message::{peek_message_type, ClientMessage, ReplayEnvelope, ServerMessage};
use crate::phase::{Phase, SessionPhaseMachine, TransitionResult};
use crate::replay::playback::PlaybackScheduler;
use crate::replay::{decode_replay, ReplayMetadata};
use crate::shop::{ShopTransactionTracker, TransactionKind};
use crate::{MessageTransport, SessionConfig};

/// Notifications queued by the session for downstream collaborators,
/// drained via [`ProtocolSession::events`]. Playback progress is drained
/// separately from the scheduler.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SessionEvent {
    /// The phase machine accepted a transition to a different phase.
    PhaseChanged {
        /// Phase before the transition.
        from: Phase,
        /// Phase after the transition.
        to: Phase,
    },
    /// The server acknowledged our connect.
    Connected {
        /// The session identity in effect (server-assigned when provided).
        client_id: String,
    },
    /// An opponent was found.
    MatchFound {
        /// Display identifier of the opponent.
        opponent: Option<String>,
    },
    /// A fight batch is starting.
    FightStarting {
        /// Server-side batch identifier.
        batch_id: Option<i64>,
        /// Number of fights in the batch.
        total_fights: Option<u32>,
        /// Display identifier of the opponent.
        opponent: Option<String>,
    },
    /// A fight batch finished simulating.
    BatchCompleted {
        /// Fights won.
        wins: u32,
        /// Fights lost.
        losses: u32,
        /// Win ratio over the batch.
        win_rate: f64,
    },
    /// A replay decoded successfully and is loaded in the scheduler.
    ReplayLoaded {
        /// Position of this replay within the batch.
        replay_index: u32,
        /// Number of replays in the batch.
        total_replays: u32,
        /// Whether this is the last replay of the batch.
        is_final_replay: bool,
    },
    /// A replay payload failed to decode and was discarded. The previously
    /// loaded replay, if any, is untouched.
    ReplayDiscarded {
        /// What was wrong with the payload.
        context: String,
    },
    /// The offer list or economy snapshot was replaced.
    ShopUpdated,
    /// A purchase request was answered.
    PurchaseResolved {
        /// The item or fighter the result referred to.
        item_id: String,
        /// Whether the purchase went through.
        success: bool,
        /// Confirmed gold balance after resolution.
        gold: i64,
        /// Failure reason when `success` is false.
        reason: Option<String>,
    },
    /// A refresh request was answered.
    RefreshResolved {
        /// Whether the refresh went through.
        success: bool,
        /// Informational text from the server.
        message: Option<String>,
    },
    /// A sell request was answered.
    SellResolved {
        /// The item the result referred to.
        item_id: String,
        /// Whether the sale went through.
        success: bool,
        /// Confirmed gold balance after resolution.
        gold: i64,
    },
    /// A pending transaction was invalidated by timeout or disconnect.
    TransactionFailed {
        /// The item the request referred to; empty for refreshes.
        item_id: String,
        /// The request kind.
        kind: TransactionKind,
    },
    /// The opponent dropped; the session returned to matchmaking.
    OpponentDisconnected,
    /// The server closed this session.
    Disconnected {
        /// Optional reason.
        message: Option<String>,
    },
    /// The match is over.
    GameEnded {
        /// Winning player identifier, if any.
        winner: Option<String>,
    },
    /// Informational server status text.
    Status {
        /// Status text.
        message: Option<String>,
    },
    /// The server reported an error with a prior request.
    ServerError {
        /// Error text.
        message: Option<String>,
        /// Machine-readable error code.
        error_code: Option<i64>,
    },
    /// An inbound message was dropped as malformed or out-of-protocol.
    ProtocolError {
        /// What was wrong with the message.
        context: String,
    },
}

/// The orchestrator tying transport, phases, replay playback and the
/// shop ledger together. See the module docs for the data flow.
pub struct ProtocolSession {
    transport: Box<dyn MessageTransport>,
    phase_machine: SessionPhaseMachine,
    playback: PlaybackScheduler,
    shop: ShopTransactionTracker,
    client_id: String,
    config: SessionConfig,
    event_queue: VecDeque<SessionEvent>,
    replay_metadata: Option<ReplayMetadata>,
}

impl ProtocolSession {
    /// Creates a session over the given transport with default configuration.
    #[must_use]
    pub fn new(transport: Box<dyn MessageTransport>) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    /// Creates a session over the given transport.
    #[must_use]
    pub fn with_config(transport: Box<dyn MessageTransport>, config: SessionConfig) -> Self {
        Self {
            transport,
            phase_machine: SessionPhaseMachine::new(),
            playback: PlaybackScheduler::new(),
            shop: ShopTransactionTracker::new(),
            client_id: crate::rng::session_token(),
            config,
            event_queue: VecDeque::new(),
            replay_metadata: None,
        }
    }

    /// The current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase_machine.phase()
    }

    /// The session identity: a locally generated token until the server
    /// assigns one on `connected`.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Read access to the playback scheduler.
    #[must_use]
    pub fn playback(&self) -> &PlaybackScheduler {
        &self.playback
    }

    /// Mutable access to the playback scheduler, for play/pause/seek/speed
    /// control and for draining playback events.
    pub fn playback_mut(&mut self) -> &mut PlaybackScheduler {
        &mut self.playback
    }

    /// Read access to the shop economy mirror.
    #[must_use]
    pub fn shop(&self) -> &ShopTransactionTracker {
        &self.shop
    }

    /// Metadata of the currently loaded replay, if any.
    #[must_use]
    pub fn replay_metadata(&self) -> Option<&ReplayMetadata> {
        self.replay_metadata.as_ref()
    }

    /// Drains all queued session events.
    pub fn events(&mut self) -> EventDrain<'_, SessionEvent> {
        EventDrain::from_drain(self.event_queue.drain(..))
    }

    /// Drives the session: drains the transport's received messages in
    /// arrival order, ticks the playback scheduler, and expires stale
    /// pending transactions.
    pub fn poll(&mut self, now: Instant) {
        for text in self.transport.receive_all_messages() {
            self.handle_incoming(&text);
        }
        self.playback.tick(now);
        for tx in self.shop.expire(now, self.config.transaction_timeout) {
            warn!(item_id = %tx.item_id, "pending transaction timed out");
            self.push_event(SessionEvent::TransactionFailed {
                item_id: tx.item_id,
                kind: tx.kind,
            });
        }
    }

    /// Processes one raw inbound message.
    ///
    /// Malformed text, a missing `type` field, or an unrecognized message
    /// shape each surface a [`SessionEvent::ProtocolError`] and drop the
    /// message without touching any state.
    pub fn handle_incoming(&mut self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "dropping unparseable message");
                self.push_event(SessionEvent::ProtocolError {
                    context: format!("unparseable message: {}", e),
                });
                return;
            }
        };
        let message_type = match peek_message_type(&value) {
            Ok(t) => t.to_owned(),
            Err(e) => {
                warn!(error = %e, "dropping message without a type");
                self.push_event(SessionEvent::ProtocolError {
                    context: e.to_string(),
                });
                return;
            }
        };
        // Decode before running the phase machine so a malformed payload
        // cannot move the phase.
        let message: ServerMessage = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(e) => {
                warn!(message_type = %message_type, error = %e, "dropping unrecognized message");
                self.push_event(SessionEvent::ProtocolError {
                    context: format!("unrecognized message '{}': {}", message_type, e),
                });
                return;
            }
        };

        let previous_phase = self.phase_machine.phase();
        match self.phase_machine.handle(&message_type) {
            TransitionResult::Rejected { reason } => {
                warn!(message_type = %message_type, reason = %reason, "phase machine rejected message");
                self.push_event(SessionEvent::ProtocolError { context: reason });
                return;
            }
            TransitionResult::Ignored => {
                trace!(message_type = %message_type, phase = ?previous_phase, "message ignored for phase");
            }
            TransitionResult::Accepted(_) => {}
        }
        let phase = self.phase_machine.phase();
        if phase != previous_phase {
            self.push_event(SessionEvent::PhaseChanged {
                from: previous_phase,
                to: phase,
            });
        }

        self.dispatch(message);
    }

    fn dispatch(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Connected { client_id, .. } => {
                if let Some(id) = client_id {
                    debug!(client_id = %id, "server assigned session identity");
                    self.client_id = id;
                }
                let client_id = self.client_id.clone();
                self.push_event(SessionEvent::Connected { client_id });
            }
            ServerMessage::MatchFound { opponent } => {
                self.push_event(SessionEvent::MatchFound { opponent });
            }
            ServerMessage::FightStarting {
                batch_id,
                total_fights,
                opponent,
            } => {
                self.push_event(SessionEvent::FightStarting {
                    batch_id,
                    total_fights,
                    opponent,
                });
            }
            ServerMessage::BatchCompleted {
                wins,
                losses,
                win_rate,
            } => {
                self.push_event(SessionEvent::BatchCompleted {
                    wins,
                    losses,
                    win_rate,
                });
            }
            ServerMessage::ReplayData(envelope)
            | ServerMessage::ReplayNext(envelope)
            | ServerMessage::ReplayPrevious(envelope) => self.load_replay(envelope),
            ServerMessage::ShopPhaseStart(state) | ServerMessage::Options(state) => {
                self.shop.apply_shop_state(
                    state.data,
                    state.client_gold,
                    state.refresh_cost,
                    state.inventory,
                );
                self.push_event(SessionEvent::ShopUpdated);
            }
            ServerMessage::PurchaseResult {
                success,
                item_id,
                fighter_id,
                cost,
                remaining_gold,
                reason,
            } => {
                let item_id = item_id.or(fighter_id).unwrap_or_default();
                let resolved = self
                    .shop
                    .resolve_purchase(&item_id, success, cost, remaining_gold);
                if resolved.is_none() {
                    let mismatch = SessionError::TransactionMismatch {
                        item_id: item_id.clone(),
                    };
                    debug!(error = %mismatch, "ignoring unmatched purchase result");
                }
                let gold = self.shop.gold();
                self.push_event(SessionEvent::PurchaseResolved {
                    item_id,
                    success,
                    gold,
                    reason,
                });
            }
            ServerMessage::RefreshResult {
                success,
                data,
                remaining_gold,
                message,
            } => {
                self.shop.resolve_refresh(success, data, remaining_gold);
                self.push_event(SessionEvent::RefreshResolved { success, message });
            }
            ServerMessage::SellResult {
                success,
                item_id,
                remaining_gold,
                ..
            } => {
                let item_id = item_id.unwrap_or_default();
                self.shop.resolve_sell(&item_id, success, remaining_gold);
                let gold = self.shop.gold();
                self.push_event(SessionEvent::SellResolved {
                    item_id,
                    success,
                    gold,
                });
            }
            ServerMessage::OpponentDisconnected { .. } => {
                // The shop context is gone with the opponent; outstanding
                // requests can no longer be answered meaningfully.
                self.fail_pending_transactions();
                self.push_event(SessionEvent::OpponentDisconnected);
            }
            ServerMessage::Disconnected { message } => {
                self.fail_pending_transactions();
                self.push_event(SessionEvent::Disconnected { message });
            }
            ServerMessage::ConnectionError { message } => {
                self.fail_pending_transactions();
                self.push_event(SessionEvent::Disconnected { message });
            }
            ServerMessage::GameEnded { winner } => {
                self.push_event(SessionEvent::GameEnded { winner });
            }
            ServerMessage::Status { message } => {
                self.push_event(SessionEvent::Status { message });
            }
            ServerMessage::Error {
                message,
                error_code,
            } => {
                self.push_event(SessionEvent::ServerError {
                    message,
                    error_code,
                });
            }
            ServerMessage::MatchmakingStarted {}
            | ServerMessage::FighterSelectionReady {}
            | ServerMessage::InitialShopReady {}
            | ServerMessage::WaitingForOpponent {}
            | ServerMessage::OpponentReady {}
            | ServerMessage::OpponentConnected {}
            | ServerMessage::PlayerUpdate {} => {
                trace!("no payload to dispatch");
            }
        }
    }

    fn load_replay(&mut self, envelope: ReplayEnvelope) {
        match decode_replay(&envelope.replay_data) {
            Ok(decoded) => {
                self.replay_metadata = Some(decoded.metadata);
                self.playback.load(decoded.frames);
                self.push_event(SessionEvent::ReplayLoaded {
                    replay_index: envelope.replay_index,
                    total_replays: envelope.total_replays,
                    is_final_replay: envelope.is_final_replay,
                });
            }
            Err(e) => {
                warn!(error = %e, "discarding undecodable replay");
                self.push_event(SessionEvent::ReplayDiscarded {
                    context: e.to_string(),
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Outbound requests
    // ------------------------------------------------------------------

    /// Serializes a request and hands it to the transport.
    ///
    /// # Errors
    ///
    /// Fails fast with [`SessionError::NotConnected`] when the transport
    /// reports not-connected (the request is not retried), or with
    /// [`SessionError::PhaseViolation`] when the request is illegal in
    /// the current phase.
    pub fn send(&mut self, message: &ClientMessage) -> Result<(), SessionError> {
        self.phase_machine.check_outbound(message.message_type())?;
        if !self.transport.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let wire = message.to_wire()?;
        trace!(message_type = message.message_type(), "sending request");
        self.transport.send_message(&wire)
    }

    /// Opens the session, presenting the client identity token.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn connect(&mut self) -> Result<(), SessionError> {
        let message = ClientMessage::Connect {
            client_id: self.client_id.clone(),
        };
        self.send(&message)
    }

    /// Closes the session. All pending transactions are treated as failed.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send). Local teardown happens even when the
    /// transport refuses the farewell message.
    pub fn disconnect(&mut self) -> Result<(), SessionError> {
        let result = self.send(&ClientMessage::Disconnect {});
        let previous_phase = self.phase_machine.phase();
        self.phase_machine.disconnect();
        if previous_phase != Phase::Disconnected {
            self.push_event(SessionEvent::PhaseChanged {
                from: previous_phase,
                to: Phase::Disconnected,
            });
        }
        self.fail_pending_transactions();
        result
    }

    /// Commits to a fighter from the presented options.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn select_fighter(&mut self, option_id: &str) -> Result<(), SessionError> {
        self.send(&ClientMessage::FighterSelected {
            option_id: option_id.to_owned(),
        })
    }

    /// Asks the server for the current option list.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn request_options(&mut self) -> Result<(), SessionError> {
        self.send(&ClientMessage::RequestOptions {})
    }

    /// Buys one shop option and records the pending transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidRequest`] when the option is not in
    /// the current offer list; otherwise see [`send`](Self::send).
    pub fn purchase_option(
        &mut self,
        option_id: &str,
        auto_equip: bool,
        now: Instant,
    ) -> Result<(), SessionError> {
        let cost = self
            .shop
            .offer_cost(option_id)
            .ok_or_else(|| SessionError::InvalidRequest {
                info: format!("'{}' is not in the current offer list", option_id),
            })?;
        self.send(&ClientMessage::PurchaseOption {
            option_id: option_id.to_owned(),
            auto_equip,
        })?;
        self.shop.record_purchase(option_id, cost, now);
        Ok(())
    }

    /// Requests a shop refresh and records the pending transaction.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn refresh_shop(&mut self, now: Instant) -> Result<(), SessionError> {
        self.send(&ClientMessage::RefreshShop {})?;
        self.shop.record_refresh(now);
        Ok(())
    }

    /// Sells an owned item and records the pending transaction.
    /// `expected_gain` is the quoted sale price; the server's balance wins
    /// when the result carries one.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn sell_item(
        &mut self,
        item_id: &str,
        expected_gain: i64,
        now: Instant,
    ) -> Result<(), SessionError> {
        self.send(&ClientMessage::SellItem {
            item_id: item_id.to_owned(),
        })?;
        self.shop.record_sell(item_id, expected_gain, now);
        Ok(())
    }

    /// Signals the shop phase is done on our side.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn shop_phase_complete(&mut self) -> Result<(), SessionError> {
        self.send(&ClientMessage::ShopPhaseComplete {})
    }

    /// Acknowledges the current replay was watched.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn replay_viewed(&mut self) -> Result<(), SessionError> {
        self.send(&ClientMessage::ReplayViewed {})
    }

    /// Asks for the next replay in the batch.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn request_next_replay(&mut self) -> Result<(), SessionError> {
        self.send(&ClientMessage::RequestNextReplay {})
    }

    /// Asks for the previous replay in the batch.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn request_previous_replay(&mut self) -> Result<(), SessionError> {
        self.send(&ClientMessage::RequestPreviousReplay {})
    }

    fn fail_pending_transactions(&mut self) {
        for tx in self.shop.fail_all() {
            self.push_event(SessionEvent::TransactionFailed {
                item_id: tx.item_id,
                kind: tx.kind,
            });
        }
    }

    fn push_event(&mut self, event: SessionEvent) {
        if self.event_queue.len() >= self.config.max_event_queue {
            warn!("event queue full; dropping oldest event");
            self.event_queue.pop_front();
        }
        self.event_queue.push_back(event);
    }
}

impl std::fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("phase", &self.phase_machine.phase())
            .field("client_id", &self.client_id)
            .field("pending_events", &self.event_queue.len())
            .field("loaded_frames", &self.playback.total_frames())
            .finish_non_exhaustive()
    }
}
