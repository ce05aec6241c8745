//! Replay decoding.
//!
//! The server streams a finished fight as a replay payload: a metadata
//! object with shortened keys plus a `frames` array of delta frames. Each
//! delta frame only carries the per-player fields that changed since the
//! previous tick, so decoding is stateful and strictly sequential: frame
//! *i* cannot be reconstructed without having reconstructed frames
//! `0..i-1` in order. The decoder keeps one accumulator per player slot,
//! overwrites the fields a delta names, and leaves every other field at
//! its previous value. A frame that omits a player slot entirely inherits
//! that slot's full previous state.

pub mod playback;
pub mod state_flags;

use std::error::Error;
use std::fmt;

use serde_json::{Map, Value};
use tracing::trace;

pub use state_flags::{StateFlags, SubState, STATE_FLAGS_MASK};

/// Number of player slots in every fight. The wire format keys them `"1"` and `"2"`.
pub const PLAYER_SLOTS: usize = 2;

/// Short metadata keys and the full names they expand to. Keys not in this
/// table pass through unchanged, so a newer server can add fields without
/// breaking older clients.
const METADATA_KEYS: &[(&str, &str)] = &[
    ("v", "version"),
    ("aw", "arena_width"),
    ("ah", "arena_height"),
    ("gl", "ground_level"),
    ("mf", "max_frames"),
    ("ts", "timestamp_start"),
    ("te", "timestamp_end"),
    ("tf", "total_frames"),
    ("d", "duration_seconds"),
    ("w", "winner"),
    ("p1", "player1_fighter"),
    ("p2", "player2_fighter"),
];

/// Error type for replay decoding.
///
/// Any of these aborts loading the replay in question and leaves prior
/// session state intact; none of them is fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// The payload was not a JSON object.
    NotAnObject,
    /// The payload had no `metadata` object.
    MissingMetadata,
    /// The payload had no `frames` array.
    MissingFrames,
    /// A frame entry was not an object, or a player slot was not an object.
    MalformedFrame {
        /// Position of the frame in the `frames` array.
        index: usize,
    },
    /// A delta field held a value of the wrong JSON type.
    FieldValue {
        /// Position of the frame in the `frames` array.
        index: usize,
        /// The short key whose value was malformed.
        key: String,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::NotAnObject => write!(f, "replay payload is not a JSON object"),
            DecodeError::MissingMetadata => write!(f, "replay payload has no metadata block"),
            DecodeError::MissingFrames => write!(f, "replay payload has no frames array"),
            DecodeError::MalformedFrame { index } => {
                write!(f, "frame {} is not a well-formed delta frame", index)
            }
            DecodeError::FieldValue { index, key } => {
                write!(f, "frame {} field '{}' has a malformed value", index, key)
            }
        }
    }
}

impl Error for DecodeError {}

/// Fight-level information decoded from the replay's metadata block.
///
/// Immutable once decoded. Fields the server did not send stay `None`;
/// keys the client does not recognize are preserved in [`extra`](Self::extra).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReplayMetadata {
    /// Replay format version string.
    pub version: Option<String>,
    /// Arena width in world units.
    pub arena_width: Option<f64>,
    /// Arena height in world units.
    pub arena_height: Option<f64>,
    /// Y coordinate of the ground plane.
    pub ground_level: Option<f64>,
    /// Frame cap the fight was simulated with.
    pub max_frames: Option<u64>,
    /// ISO-8601 timestamp at which recording started.
    pub timestamp_start: Option<String>,
    /// ISO-8601 timestamp at which recording ended.
    pub timestamp_end: Option<String>,
    /// Number of frames actually recorded.
    pub total_frames: Option<u64>,
    /// Fight duration in seconds.
    pub duration_seconds: Option<f64>,
    /// Winning player slot (1 or 2), 0 for a draw.
    pub winner: Option<i64>,
    /// Fighter identifier for player slot 1.
    pub player1_fighter: Option<String>,
    /// Fighter identifier for player slot 2.
    pub player2_fighter: Option<String>,
    /// Keys the expansion table does not know, passed through unchanged.
    pub extra: Map<String, Value>,
}

impl ReplayMetadata {
    fn from_wire(raw: &Map<String, Value>) -> Self {
        let mut meta = ReplayMetadata::default();
        for (key, value) in raw {
            let full = METADATA_KEYS
                .iter()
                .find(|(short, _)| short == key)
                .map_or(key.as_str(), |(_, full)| *full);
            match full {
                "version" => meta.version = value_to_string(value),
                "arena_width" => meta.arena_width = value.as_f64(),
                "arena_height" => meta.arena_height = value.as_f64(),
                "ground_level" => meta.ground_level = value.as_f64(),
                "max_frames" => meta.max_frames = value.as_u64(),
                "timestamp_start" => meta.timestamp_start = value_to_string(value),
                "timestamp_end" => meta.timestamp_end = value_to_string(value),
                "total_frames" => meta.total_frames = value.as_u64(),
                "duration_seconds" => meta.duration_seconds = value.as_f64(),
                "winner" => meta.winner = value.as_i64(),
                "player1_fighter" => meta.player1_fighter = value_to_string(value),
                "player2_fighter" => meta.player2_fighter = value_to_string(value),
                _ => {
                    meta.extra.insert(full.to_owned(), value.clone());
                }
            }
        }
        meta
    }
}

/// A version string may arrive as `"1.0"` or as a bare number.
fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The fully expanded state of one player at one frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerFrameState {
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
    /// Horizontal velocity.
    pub velocity_x: f64,
    /// Vertical velocity.
    pub velocity_y: f64,
    /// Remaining health, never below zero.
    pub health: f64,
    /// Whether the player faces right.
    pub facing_right: bool,
    /// Coarse action id driving animation selection downstream.
    pub action: u16,
    /// Frames spent in the current action state.
    pub state_frame: u32,
    /// Whether the player is standing on the ground.
    pub grounded: bool,
    /// Frames until the next attack is available.
    pub attack_cooldown: u32,
    /// Frames until the next block is available.
    pub block_cooldown: u32,
    /// Frames until the next jump is available.
    pub jump_cooldown: u32,
    /// Remaining stun frames.
    pub stun_frames: u32,
    /// Decoded state flags.
    pub flags: StateFlags,
}

impl PlayerFrameState {
    /// Overwrites the fields named by `delta` on top of this state.
    /// Keys absent from the delta keep their previous value.
    fn apply_delta(
        &mut self,
        delta: &Map<String, Value>,
        frame_index: usize,
    ) -> Result<(), DecodeError> {
        for (key, value) in delta {
            let bad = || DecodeError::FieldValue {
                index: frame_index,
                key: key.clone(),
            };
            match key.as_str() {
                "x" => self.x = value.as_f64().ok_or_else(bad)?,
                "y" => self.y = value.as_f64().ok_or_else(bad)?,
                "vx" => self.velocity_x = value.as_f64().ok_or_else(bad)?,
                "vy" => self.velocity_y = value.as_f64().ok_or_else(bad)?,
                "h" => self.health = value.as_f64().ok_or_else(bad)?.max(0.0),
                "fr" => self.facing_right = value.as_bool().ok_or_else(bad)?,
                "a" => self.action = u16::try_from(value.as_u64().ok_or_else(bad)?)
                    .map_err(|_| bad())?,
                "sf" => self.state_frame = field_u32(value).ok_or_else(bad)?,
                "g" => self.grounded = value.as_bool().ok_or_else(bad)?,
                "ac" => self.attack_cooldown = field_u32(value).ok_or_else(bad)?,
                "bc" => self.block_cooldown = field_u32(value).ok_or_else(bad)?,
                "jc" => self.jump_cooldown = field_u32(value).ok_or_else(bad)?,
                "st" => self.stun_frames = field_u32(value).ok_or_else(bad)?,
                // "flags" is the uncompressed spelling some tools emit
                "fl" | "flags" => {
                    let raw = value.as_u64().ok_or_else(bad)?;
                    self.flags = StateFlags::from_bits((raw & u64::from(u16::MAX)) as u16);
                }
                unknown => {
                    trace!(key = unknown, frame = frame_index, "ignoring unknown delta key");
                }
            }
        }
        Ok(())
    }
}

fn field_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|v| u32::try_from(v).ok())
}

/// One fully reconstructed tick of the fight.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Ordered frame number as recorded by the server.
    pub index: u64,
    /// Expanded state for both player slots, slot 1 first.
    pub players: [PlayerFrameState; PLAYER_SLOTS],
}

/// A replay payload decoded into metadata plus fully expanded frames.
///
/// The frame sequence is owned by whichever session loaded it and is
/// read-only to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReplay {
    /// Fight-level metadata.
    pub metadata: ReplayMetadata,
    /// Every frame of the fight, fully expanded, in order.
    pub frames: Vec<Frame>,
}

/// Decodes a replay payload into metadata and fully expanded frames.
///
/// # Errors
///
/// Returns a [`DecodeError`] if the payload is not an object, the metadata
/// block or frames array is absent, or a delta field holds a value of the
/// wrong type. A frame that merely omits a player slot is not an error:
/// the slot inherits its previous state, since ticks may skip a player
/// that did not change.
pub fn decode_replay(payload: &Value) -> Result<DecodedReplay, DecodeError> {
    let root = payload.as_object().ok_or(DecodeError::NotAnObject)?;
    let meta_raw = root
        .get("metadata")
        .and_then(Value::as_object)
        .ok_or(DecodeError::MissingMetadata)?;
    let frames_raw = root
        .get("frames")
        .and_then(Value::as_array)
        .ok_or(DecodeError::MissingFrames)?;

    let metadata = ReplayMetadata::from_wire(meta_raw);

    // Per-slot accumulators; frame 0 carries every field, later frames
    // overwrite only what changed.
    let mut accumulator: [PlayerFrameState; PLAYER_SLOTS] = Default::default();
    let mut frames = Vec::with_capacity(frames_raw.len());

    for (i, raw_frame) in frames_raw.iter().enumerate() {
        let frame_obj = raw_frame
            .as_object()
            .ok_or(DecodeError::MalformedFrame { index: i })?;
        let index = frame_obj
            .get("f")
            .and_then(Value::as_u64)
            .unwrap_or(i as u64);

        if let Some(slots) = frame_obj.get("p").and_then(Value::as_object) {
            for (slot, wire_key) in ["1", "2"].iter().enumerate() {
                if let Some(delta) = slots.get(*wire_key) {
                    let delta_obj = delta
                        .as_object()
                        .ok_or(DecodeError::MalformedFrame { index: i })?;
                    accumulator[slot].apply_delta(delta_obj, i)?;
                }
            }
        }

        frames.push(Frame {
            index,
            players: accumulator.clone(),
        });
    }

    trace!(
        frames = frames.len(),
        winner = ?metadata.winner,
        "decoded replay payload"
    );

    Ok(DecodedReplay { metadata, frames })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(frames: Value) -> Value {
        json!({
            "metadata": {
                "v": "1.0",
                "aw": 800,
                "ah": 600,
                "gl": 500,
                "mf": 600,
                "tf": 3,
                "d": 0.05,
                "w": 1,
                "p1": "warrior",
                "p2": "ninja"
            },
            "frames": frames
        })
    }

    #[test]
    fn metadata_short_keys_expand() {
        let decoded = decode_replay(&payload(json!([]))).unwrap();
        let meta = decoded.metadata;
        assert_eq!(meta.version.as_deref(), Some("1.0"));
        assert_eq!(meta.arena_width, Some(800.0));
        assert_eq!(meta.arena_height, Some(600.0));
        assert_eq!(meta.ground_level, Some(500.0));
        assert_eq!(meta.max_frames, Some(600));
        assert_eq!(meta.total_frames, Some(3));
        assert_eq!(meta.duration_seconds, Some(0.05));
        assert_eq!(meta.winner, Some(1));
        assert_eq!(meta.player1_fighter.as_deref(), Some("warrior"));
        assert_eq!(meta.player2_fighter.as_deref(), Some("ninja"));
    }

    #[test]
    fn unknown_metadata_keys_pass_through() {
        let mut value = payload(json!([]));
        value["metadata"]["server_build"] = json!("abc123");
        let decoded = decode_replay(&value).unwrap();
        assert_eq!(
            decoded.metadata.extra.get("server_build"),
            Some(&json!("abc123"))
        );
    }

    #[test]
    fn full_metadata_names_are_accepted_too() {
        let value = json!({
            "metadata": { "arena_width": 1024, "winner": 2 },
            "frames": []
        });
        let decoded = decode_replay(&value).unwrap();
        assert_eq!(decoded.metadata.arena_width, Some(1024.0));
        assert_eq!(decoded.metadata.winner, Some(2));
    }

    #[test]
    fn delta_overwrites_only_named_fields() {
        let frames = json!([
            {"f": 0, "p": {
                "1": {"x": 0.0, "y": 0.0, "h": 100.0},
                "2": {"x": 600.0, "y": 0.0, "h": 80.0}
            }},
            {"f": 1, "p": {"1": {"x": 5.0}, "2": {}}}
        ]);
        let decoded = decode_replay(&payload(frames)).unwrap();
        let p1 = &decoded.frames[1].players[0];
        assert_eq!(p1.x, 5.0);
        assert_eq!(p1.y, 0.0);
        assert_eq!(p1.health, 100.0);
    }

    #[test]
    fn missing_player_slot_inherits_previous_state() {
        let frames = json!([
            {"f": 0, "p": {
                "1": {"x": 1.0, "h": 100.0},
                "2": {"x": 2.0, "h": 80.0, "fr": false}
            }},
            {"f": 1, "p": {"1": {"x": 3.0}, "2": {"x": 4.0}}},
            {"f": 2, "p": {"1": {"x": 5.0}}}
        ]);
        let decoded = decode_replay(&payload(frames)).unwrap();
        assert_eq!(decoded.frames[2].players[1], decoded.frames[1].players[1]);
    }

    #[test]
    fn frame_numbers_come_from_the_wire() {
        let frames = json!([
            {"f": 10, "p": {"1": {"x": 1.0}}},
            {"f": 11, "p": {"1": {"x": 2.0}}}
        ]);
        let decoded = decode_replay(&payload(frames)).unwrap();
        assert_eq!(decoded.frames[0].index, 10);
        assert_eq!(decoded.frames[1].index, 11);
    }

    #[test]
    fn flags_decode_through_the_masked_path() {
        let frames = json!([
            {"f": 0, "p": {"1": {"fl": 1 | (2 << 3) | (1 << 9)}}}
        ]);
        let decoded = decode_replay(&payload(frames)).unwrap();
        let flags = decoded.frames[0].players[0].flags;
        assert_eq!(flags.attack_state(), Some(SubState::Startup));
        assert_eq!(flags.block_state(), Some(SubState::Active));
        assert!(flags.stunned());
    }

    #[test]
    fn long_form_flags_key_is_accepted() {
        let frames = json!([{"f": 0, "p": {"1": {"flags": 4}}}]);
        let decoded = decode_replay(&payload(frames)).unwrap();
        assert_eq!(
            decoded.frames[0].players[0].flags.attack_state(),
            Some(SubState::Wait)
        );
    }

    #[test]
    fn health_is_clamped_at_zero() {
        let frames = json!([{"f": 0, "p": {"1": {"h": -12.5}}}]);
        let decoded = decode_replay(&payload(frames)).unwrap();
        assert_eq!(decoded.frames[0].players[0].health, 0.0);
    }

    #[test]
    fn unknown_delta_keys_are_ignored() {
        let frames = json!([{"f": 0, "p": {"1": {"x": 1.0, "zz": 42}}}]);
        let decoded = decode_replay(&payload(frames)).unwrap();
        assert_eq!(decoded.frames[0].players[0].x, 1.0);
    }

    #[test]
    fn rejects_non_object_payload() {
        assert_eq!(
            decode_replay(&json!([1, 2, 3])).unwrap_err(),
            DecodeError::NotAnObject
        );
    }

    #[test]
    fn rejects_missing_metadata() {
        assert_eq!(
            decode_replay(&json!({"frames": []})).unwrap_err(),
            DecodeError::MissingMetadata
        );
    }

    #[test]
    fn rejects_missing_frames() {
        assert_eq!(
            decode_replay(&json!({"metadata": {}})).unwrap_err(),
            DecodeError::MissingFrames
        );
    }

    #[test]
    fn rejects_malformed_frame_entry() {
        let err = decode_replay(&payload(json!(["nope"]))).unwrap_err();
        assert_eq!(err, DecodeError::MalformedFrame { index: 0 });
    }

    #[test]
    fn rejects_wrongly_typed_field() {
        let frames = json!([{"f": 0, "p": {"1": {"x": "fast"}}}]);
        let err = decode_replay(&payload(frames)).unwrap_err();
        assert_eq!(
            err,
            DecodeError::FieldValue {
                index: 0,
                key: "x".to_owned()
            }
        );
    }
}
