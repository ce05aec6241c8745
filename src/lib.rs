//! # Arena Session
//!
//! Arena Session is the client-side protocol engine for a networked,
//! round-based auto-battler: a server matches two players, runs shop
//! phases, simulates fights server-side, and streams each finished fight
//! back as a replay. This crate owns everything with real invariants on
//! the client:
//!
//! - [`SessionPhaseMachine`] tracks where the client is in the match
//!   lifecycle and decides which inbound and outbound messages are legal.
//! - The replay codec ([`decode_replay`]) reconstructs full per-frame
//!   fight state from a delta-compressed, key-shortened wire format.
//! - [`PlaybackScheduler`] drives time-accurate, seekable playback of the
//!   decoded frames.
//! - [`ProtocolSession`] orchestrates the transport, the phase machine,
//!   playback and shop state, and emits events for downstream consumers.
//! - [`ShopTransactionTracker`] keeps a ledger of economy requests
//!   awaiting server confirmation; nothing mutates speculatively.
//!
//! Rendering, animation, audio and asset loading are deliberately absent:
//! presentation layers consume the decoded frames and session events this
//! crate emits, and originate user-intent requests through
//! [`ProtocolSession`]'s request methods.
//!
//! ## Example
//!
//! ```no_run
//! use arena_session::{MessageTransport, ProtocolSession, SessionError, SessionEvent};
//! use web_time::Instant;
//!
//! struct MySocket;
//!
//! impl MessageTransport for MySocket {
//!     fn send_message(&mut self, message: &str) -> Result<(), SessionError> {
//!         // hand the text to your websocket here
//!         # let _ = message;
//!         Ok(())
//!     }
//!     fn receive_all_messages(&mut self) -> Vec<String> {
//!         // return every message received since the last call
//!         Vec::new()
//!     }
//!     fn is_connected(&self) -> bool {
//!         true
//!     }
//! }
//!
//! let mut session = ProtocolSession::new(Box::new(MySocket));
//! session.connect()?;
//! loop {
//!     session.poll(Instant::now());
//!     for event in session.events() {
//!         if let SessionEvent::PhaseChanged { from, to } = event {
//!             println!("{from:?} -> {to:?}");
//!         }
//!     }
//!     # break;
//! }
//! # Ok::<(), SessionError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use web_time::Duration;

pub use error::SessionError;
pub use event_drain::EventDrain;
pub use message::{ClientMessage, ReplayEnvelope, ServerMessage, ShopState};
pub use phase::{Phase, SessionPhaseMachine, TransitionResult};
pub use replay::playback::{
    PlaybackEvent, PlaybackScheduler, PlaybackState, FRAME_DURATION, FRAME_RATE,
    MAX_PLAYBACK_SPEED, MIN_PLAYBACK_SPEED,
};
pub use replay::{
    decode_replay, DecodeError, DecodedReplay, Frame, PlayerFrameState, ReplayMetadata,
    StateFlags, SubState, PLAYER_SLOTS, STATE_FLAGS_MASK,
};
pub use session::{ProtocolSession, SessionEvent};
pub use shop::{
    ItemPath, PendingTransaction, ShopOffer, ShopTransactionTracker, TransactionKind,
};

pub mod error;
pub mod event_drain;
pub mod message;
pub mod phase;
pub mod replay;
mod rng;
pub mod session;
pub mod shop;

/// Tunable session behavior.
///
/// New fields may be added in future versions; construct instances with
/// the `..SessionConfig::default()` pattern to stay source-compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long an economy request may stay unanswered before it is
    /// treated as failed.
    ///
    /// Default: 10 seconds
    pub transaction_timeout: Duration,

    /// Upper bound on queued session events. When the queue is full the
    /// oldest event is dropped; consumers that drain every poll never
    /// get near this.
    ///
    /// Default: 256
    pub max_event_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transaction_timeout: Duration::from_secs(10),
            max_event_queue: 256,
        }
    }
}

impl SessionConfig {
    /// Creates a new `SessionConfig` with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Abstraction over the persistent connection carrying newline-free JSON
/// text messages, both directions.
///
/// Implement this for your socket of choice (websocket, TCP, an
/// in-memory pair in tests). The session never blocks on the transport:
/// [`receive_all_messages`](Self::receive_all_messages) returns whatever
/// arrived since the last call, in arrival order, and
/// [`send_message`](Self::send_message) either hands the text off or
/// fails fast.
pub trait MessageTransport {
    /// Sends one serialized message.
    ///
    /// # Errors
    ///
    /// Implementations should return [`SessionError::NotConnected`] when
    /// the connection is gone rather than buffering silently.
    fn send_message(&mut self, message: &str) -> Result<(), SessionError>;

    /// Returns all messages received since the last call, in arrival order.
    fn receive_all_messages(&mut self) -> Vec<String>;

    /// Whether the connection is currently usable for sending.
    fn is_connected(&self) -> bool;
}
