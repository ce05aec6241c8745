//! Wire message catalogue.
//!
//! The wire protocol is newline-free JSON text over a persistent
//! connection; every message carries a mandatory `type` string. Messages
//! are decoded exactly once, at the transport boundary, into the tagged
//! enums below; everything past that point works with typed payloads.
//! Unknown fields inside a known message are ignored for forward
//! compatibility, while an unknown `type` is surfaced to the caller
//! before typed decoding is even attempted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionError;
use crate::shop::ShopOffer;

/// Messages the server sends to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The server acknowledged our `connect`.
    Connected {
        /// Server-assigned identity that replaces the locally generated token.
        #[serde(default)]
        client_id: Option<String>,
        /// Optional human-readable greeting.
        #[serde(default)]
        message: Option<String>,
    },
    /// The connection attempt failed server-side.
    ConnectionError {
        /// What went wrong.
        #[serde(default)]
        message: Option<String>,
    },
    /// The server closed this session.
    Disconnected {
        /// Optional reason.
        #[serde(default)]
        message: Option<String>,
    },
    /// An opponent joined the match.
    OpponentConnected {},
    /// The opponent dropped; the session returns to matchmaking.
    OpponentDisconnected {
        /// Optional reason.
        #[serde(default)]
        message: Option<String>,
    },
    /// The server began looking for an opponent.
    MatchmakingStarted {},
    /// An opponent was found.
    MatchFound {
        /// Display identifier of the opponent.
        #[serde(default)]
        opponent: Option<String>,
    },
    /// Initial fighter options are ready to be requested.
    FighterSelectionReady {},
    /// The first shop is open without a separate fighter-selection step.
    InitialShopReady {},
    /// The opponent is still busy; no action required.
    WaitingForOpponent {},
    /// The opponent finished their current step.
    OpponentReady {},
    /// A fight batch is starting.
    FightStarting {
        /// Server-side identifier of the batch.
        #[serde(default)]
        batch_id: Option<i64>,
        /// Number of fights simulated in the batch.
        #[serde(default)]
        total_fights: Option<u32>,
        /// Display identifier of the opponent.
        #[serde(default)]
        opponent: Option<String>,
    },
    /// A fight batch finished simulating.
    BatchCompleted {
        /// Fights won.
        #[serde(default)]
        wins: u32,
        /// Fights lost.
        #[serde(default)]
        losses: u32,
        /// Win ratio over the batch.
        #[serde(default)]
        win_rate: f64,
    },
    /// A recorded fight, streamed for playback.
    ReplayData(ReplayEnvelope),
    /// The next recorded fight, after a navigation request.
    ReplayNext(ReplayEnvelope),
    /// The previous recorded fight, after a navigation request.
    ReplayPrevious(ReplayEnvelope),
    /// A shop phase opened.
    ShopPhaseStart(ShopState),
    /// The current option list, sent on request or on phase entry.
    Options(ShopState),
    /// Result of a `purchase_option` request.
    PurchaseResult {
        /// Whether the purchase went through.
        #[serde(default)]
        success: bool,
        /// Purchased item, for item purchases.
        #[serde(default)]
        item_id: Option<String>,
        /// Purchased fighter, for fighter purchases.
        #[serde(default)]
        fighter_id: Option<String>,
        /// What the server charged.
        #[serde(default)]
        cost: Option<i64>,
        /// Authoritative gold balance after the purchase.
        #[serde(default)]
        remaining_gold: Option<i64>,
        /// Failure reason when `success` is false.
        #[serde(default)]
        reason: Option<String>,
    },
    /// Result of a `refresh_shop` request.
    RefreshResult {
        /// Whether the refresh went through.
        #[serde(default)]
        success: bool,
        /// Replacement offer list on success.
        #[serde(default)]
        data: Option<Vec<ShopOffer>>,
        /// Authoritative gold balance after the refresh.
        #[serde(default)]
        remaining_gold: Option<i64>,
        /// Failure reason or informational text.
        #[serde(default)]
        message: Option<String>,
    },
    /// Result of a `sell_item` request.
    SellResult {
        /// Whether the sale went through.
        #[serde(default)]
        success: bool,
        /// The item sold.
        #[serde(default)]
        item_id: Option<String>,
        /// Authoritative gold balance after the sale.
        #[serde(default)]
        remaining_gold: Option<i64>,
        /// Failure reason when `success` is false.
        #[serde(default)]
        reason: Option<String>,
    },
    /// Opponent or self stats changed outside a shop result.
    PlayerUpdate {},
    /// The match is over.
    GameEnded {
        /// Winning player identifier, if any.
        #[serde(default)]
        winner: Option<String>,
    },
    /// Informational server status.
    Status {
        /// Status text.
        #[serde(default)]
        message: Option<String>,
    },
    /// The server reports an error with a prior request.
    Error {
        /// Error text.
        #[serde(default)]
        message: Option<String>,
        /// Machine-readable error code.
        #[serde(default)]
        error_code: Option<i64>,
    },
}

/// Replay payload plus its position within the streamed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEnvelope {
    /// The raw replay payload; decoded by the replay codec, not serde,
    /// because reconstruction is stateful.
    #[serde(default)]
    pub replay_data: Value,
    /// Position of this replay within the batch.
    #[serde(default)]
    pub replay_index: u32,
    /// Number of replays in the batch.
    #[serde(default)]
    pub total_replays: u32,
    /// Whether this is the last replay of the batch.
    #[serde(default)]
    pub is_final_replay: bool,
}

/// Offer list and economy snapshot carried by `shop_phase_start` and `options`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShopState {
    /// Offers for the current refresh cycle. Replaces any previous list wholesale.
    #[serde(default)]
    pub data: Vec<ShopOffer>,
    /// Authoritative gold balance.
    #[serde(default)]
    pub client_gold: Option<i64>,
    /// Cost of the next refresh.
    #[serde(default)]
    pub refresh_cost: Option<i64>,
    /// Item ids currently owned. Absent means "unchanged", not "empty".
    #[serde(default)]
    pub inventory: Option<Vec<String>>,
    /// Opaque training configuration, passed through to collaborators.
    #[serde(default)]
    pub learning_parameters: Option<Value>,
}

impl ServerMessage {
    /// The wire `type` string of this message.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::ConnectionError { .. } => "connection_error",
            ServerMessage::Disconnected { .. } => "disconnected",
            ServerMessage::OpponentConnected {} => "opponent_connected",
            ServerMessage::OpponentDisconnected { .. } => "opponent_disconnected",
            ServerMessage::MatchmakingStarted {} => "matchmaking_started",
            ServerMessage::MatchFound { .. } => "match_found",
            ServerMessage::FighterSelectionReady {} => "fighter_selection_ready",
            ServerMessage::InitialShopReady {} => "initial_shop_ready",
            ServerMessage::WaitingForOpponent {} => "waiting_for_opponent",
            ServerMessage::OpponentReady {} => "opponent_ready",
            ServerMessage::FightStarting { .. } => "fight_starting",
            ServerMessage::BatchCompleted { .. } => "batch_completed",
            ServerMessage::ReplayData(_) => "replay_data",
            ServerMessage::ReplayNext(_) => "replay_next",
            ServerMessage::ReplayPrevious(_) => "replay_previous",
            ServerMessage::ShopPhaseStart(_) => "shop_phase_start",
            ServerMessage::Options(_) => "options",
            ServerMessage::PurchaseResult { .. } => "purchase_result",
            ServerMessage::RefreshResult { .. } => "refresh_result",
            ServerMessage::SellResult { .. } => "sell_result",
            ServerMessage::PlayerUpdate {} => "player_update",
            ServerMessage::GameEnded { .. } => "game_ended",
            ServerMessage::Status { .. } => "status",
            ServerMessage::Error { .. } => "error",
        }
    }
}

/// Messages the client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens a session, presenting the client identity token.
    Connect {
        /// Locally generated token, replaced by the server on `connected`.
        client_id: String,
    },
    /// Closes the session.
    Disconnect {},
    /// Commits to a fighter from the presented options.
    FighterSelected {
        /// The chosen fighter option.
        option_id: String,
    },
    /// Asks the server for the current option list.
    RequestOptions {},
    /// Buys one shop option.
    PurchaseOption {
        /// The offer to buy.
        option_id: String,
        /// Whether the server should equip the item immediately.
        auto_equip: bool,
    },
    /// Replaces the offer list for a fee.
    RefreshShop {},
    /// Sells an owned item back to the shop.
    SellItem {
        /// The item to sell.
        item_id: String,
    },
    /// Signals the shop phase is done on our side.
    ShopPhaseComplete {},
    /// Acknowledges the current replay was watched.
    ReplayViewed {},
    /// Asks for the next replay in the batch.
    RequestNextReplay {},
    /// Asks for the previous replay in the batch.
    RequestPreviousReplay {},
}

impl ClientMessage {
    /// The wire `type` string of this message.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::Connect { .. } => "connect",
            ClientMessage::Disconnect {} => "disconnect",
            ClientMessage::FighterSelected { .. } => "fighter_selected",
            ClientMessage::RequestOptions {} => "request_options",
            ClientMessage::PurchaseOption { .. } => "purchase_option",
            ClientMessage::RefreshShop {} => "refresh_shop",
            ClientMessage::SellItem { .. } => "sell_item",
            ClientMessage::ShopPhaseComplete {} => "shop_phase_complete",
            ClientMessage::ReplayViewed {} => "replay_viewed",
            ClientMessage::RequestNextReplay {} => "request_next_replay",
            ClientMessage::RequestPreviousReplay {} => "request_previous_replay",
        }
    }

    /// Serializes this message to its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Protocol`] if serialization fails, which
    /// only happens on pathological payload contents.
    pub fn to_wire(&self) -> Result<String, SessionError> {
        serde_json::to_string(self).map_err(|e| SessionError::Protocol {
            context: format!("failed to serialize outbound message: {}", e),
        })
    }
}

/// Extracts the `type` discriminator from raw message text without
/// committing to a typed decode.
///
/// # Errors
///
/// Returns [`SessionError::Protocol`] if the text is not a JSON object or
/// has no string `type` field.
pub fn peek_message_type(value: &Value) -> Result<&str, SessionError> {
    value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| SessionError::Protocol {
            context: "message has no string 'type' field".to_owned(),
        })
}
