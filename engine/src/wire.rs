//! Wire codec for the event channel.
//!
//! Inbound frames are `{kind, payload}` JSON envelopes; outbound commands are
//! `{action, ...}` envelopes. The transport performs no interpretation: it
//! hands raw frames to the pump, which decodes here. A frame that fails to
//! decode is a [`WireError`] — the caller drops and logs it, leaving the
//! store untouched until the next snapshot heals whatever the event carried.

use crate::types::{Booking, ConsumerId, OwnerId, Slot, SlotId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error decoding or encoding a wire frame
#[derive(Error, Debug)]
pub enum WireError {
    /// The frame was not a well-formed event envelope
    #[error("malformed event: {0}")]
    MalformedEvent(#[from] serde_json::Error),
}

/// An inbound event from the server
///
/// Events are hints, not a totally-ordered log: the server offers no
/// exactly-once or in-order guarantee, so every handler of these values must
/// be idempotent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A slot became available
    #[serde(rename_all = "camelCase")]
    SlotAdded {
        /// The new slot
        slot: Slot,
    },

    /// A slot was withdrawn
    #[serde(rename_all = "camelCase")]
    SlotRemoved {
        /// The withdrawn slot's id
        slot_id: SlotId,
    },

    /// The server committed a booking
    #[serde(rename_all = "camelCase")]
    BookingConfirmed {
        /// The committed booking
        booking: Booking,
    },

    /// Advisory count of an owner's slots; triggers a re-fetch on mismatch
    #[serde(rename_all = "camelCase")]
    SlotCountHint {
        /// The owner the count refers to
        owner_id: OwnerId,
        /// The server's count
        count: usize,
    },

    /// The server refused a command
    #[serde(rename_all = "camelCase")]
    CommandRejected {
        /// The slot the rejected command referred to, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slot_id: Option<SlotId>,
        /// Human-readable rejection reason (e.g. `SlotAlreadyTaken`)
        reason: String,
    },
}

/// An outbound command to the server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientCommand {
    /// Reserve a slot for a consumer
    #[serde(rename_all = "camelCase")]
    Reserve {
        /// The slot to reserve
        slot_id: SlotId,
        /// The reserving consumer
        consumer_id: ConsumerId,
    },

    /// Publish a new slot (owner sessions)
    ///
    /// Carries the provisional id so the optimistic local entry can be
    /// correlated; the server assigns the persistent id.
    #[serde(rename_all = "camelCase")]
    PublishSlot {
        /// The slot to publish, under its provisional id
        #[serde(flatten)]
        slot: Slot,
    },

    /// Withdraw a published slot (owner sessions)
    #[serde(rename_all = "camelCase")]
    RetractSlot {
        /// The slot to withdraw
        slot_id: SlotId,
    },
}

/// Decode one inbound frame
///
/// # Errors
///
/// Returns [`WireError::MalformedEvent`] when the frame is not a well-formed
/// event envelope; the caller drops the frame.
pub fn decode_event(frame: &str) -> Result<ServerEvent, WireError> {
    Ok(serde_json::from_str(frame)?)
}

/// Encode one outbound command
///
/// # Errors
///
/// Returns [`WireError::MalformedEvent`] if serialization fails (practically
/// unreachable for these types).
pub fn encode_command(command: &ClientCommand) -> Result<String, WireError> {
    Ok(serde_json::to_string(command)?)
}
