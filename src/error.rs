//! Crate-wide error taxonomy.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::phase::Phase;
use crate::replay::DecodeError;

/// This enum contains all error messages this library can return. Most API functions will generally return a [`Result<(), SessionError>`].
///
/// Nothing in this crate is fatal: the worst case behavior on any error is
/// that one message or one replay is discarded and the session continues.
///
/// [`Result<(), SessionError>`]: std::result::Result
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// A send was attempted while the transport reported not-connected. The request is not retried.
    NotConnected,
    /// A message was valid JSON but is not legal in the current phase. Inbound messages
    /// with this error are silently ignored; outbound requests surface it to the caller.
    PhaseViolation {
        /// The phase the session was in when the message arrived or was sent.
        phase: Phase,
        /// The message type that was illegal for that phase.
        message_type: String,
    },
    /// A message could not be parsed or carried no recognizable `type` discriminator.
    /// The message is dropped and logged; the session continues.
    Protocol {
        /// Further specifies what was malformed.
        context: String,
    },
    /// A replay payload was missing required blocks or carried malformed frame data.
    /// Loading that replay is aborted; prior session state is left intact.
    Decode(DecodeError),
    /// A result message arrived with no corresponding pending request. Logged and
    /// treated as a no-op, since a stray server message should never crash the client.
    TransactionMismatch {
        /// The item id the result referred to.
        item_id: String,
    },
    /// An item identifier did not follow the `category_subcategory_name` grammar.
    InvalidItemId {
        /// The offending identifier.
        id: String,
    },
    /// You made an invalid request, usually by using wrong parameters for function calls.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        info: String,
    },
}

impl Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotConnected => {
                write!(f, "The transport is not connected; the request was not sent.")
            }
            SessionError::PhaseViolation {
                phase,
                message_type,
            } => {
                write!(
                    f,
                    "Message type '{}' is not legal in phase {:?}",
                    message_type, phase
                )
            }
            SessionError::Protocol { context } => {
                write!(f, "Protocol error: {}", context)
            }
            SessionError::Decode(err) => {
                write!(f, "Replay decode error: {}", err)
            }
            SessionError::TransactionMismatch { item_id } => {
                write!(f, "No pending transaction for item '{}'", item_id)
            }
            SessionError::InvalidItemId { id } => {
                write!(f, "Item id '{}' does not follow category_subcategory_name", id)
            }
            SessionError::InvalidRequest { info } => {
                write!(f, "Invalid Request: {}", info)
            }
        }
    }
}

impl Error for SessionError {}

impl From<DecodeError> for SessionError {
    fn from(err: DecodeError) -> Self {
        SessionError::Decode(err)
    }
}
