//! Domain types for the slot synchronization engine.
//!
//! This module contains all value objects and entities the engine projects:
//! owners who publish availability, consumers who reserve it, slots, and
//! bookings. Identity types are UUID newtypes; `SlotId` additionally
//! distinguishes server-assigned ids from locally-generated provisional ids
//! so an unconfirmed optimistic slot can never collide with server state.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an owner (the party publishing availability)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(Uuid);

impl OwnerId {
    /// Creates a new random `OwnerId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `OwnerId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a consumer (the party reserving availability)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerId(Uuid);

impl ConsumerId {
    /// Creates a new random `ConsumerId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ConsumerId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a booking
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BookingId(Uuid);

impl BookingId {
    /// Creates a new random `BookingId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `BookingId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for BookingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a slot
///
/// A slot persisted by the server carries a server-assigned id. A slot that
/// exists only as a local optimistic insert (an owner's just-published
/// window, not yet confirmed) carries a provisional id. The two spaces can
/// never collide: provisional ids render and parse with a `temp_` prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotId {
    /// Server-assigned identity
    Server(Uuid),
    /// Locally-generated identity for an unconfirmed optimistic slot
    Provisional(Uuid),
}

impl SlotId {
    /// Wrap a server-assigned id
    #[must_use]
    pub const fn server(uuid: Uuid) -> Self {
        Self::Server(uuid)
    }

    /// Generate a fresh provisional id
    #[must_use]
    pub fn provisional() -> Self {
        Self::Provisional(Uuid::new_v4())
    }

    /// True for provisional (unconfirmed, local-only) ids
    #[must_use]
    pub const fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(uuid) => write!(f, "{uuid}"),
            Self::Provisional(uuid) => write!(f, "temp_{uuid}"),
        }
    }
}

/// Error parsing a [`SlotId`] from its wire form
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid slot id: {0}")]
pub struct SlotIdParseError(String);

impl FromStr for SlotId {
    type Err = SlotIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(raw) = s.strip_prefix("temp_") {
            let uuid = Uuid::parse_str(raw).map_err(|e| SlotIdParseError(e.to_string()))?;
            Ok(Self::Provisional(uuid))
        } else {
            let uuid = Uuid::parse_str(s).map_err(|e| SlotIdParseError(e.to_string()))?;
            Ok(Self::Server(uuid))
        }
    }
}

impl Serialize for SlotId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Time window value object
// ============================================================================

/// Error constructing domain value objects
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The window's end does not come strictly after its start
    #[error("window end {end} must be strictly after start {start}")]
    InvalidWindow {
        /// Requested start time
        start: NaiveTime,
        /// Requested end time
        end: NaiveTime,
    },
}

/// Raw serde shape for [`TimeWindow`], used to validate on deserialization.
#[derive(Deserialize)]
struct RawTimeWindow {
    #[serde(rename = "startTime")]
    start: NaiveTime,
    #[serde(rename = "endTime")]
    end: NaiveTime,
}

/// A same-day wall-clock window with `start` strictly before `end`
///
/// The invariant is enforced at construction and on deserialization, so a
/// `TimeWindow` in the store is always well-formed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawTimeWindow")]
pub struct TimeWindow {
    #[serde(rename = "startTime")]
    start: NaiveTime,
    #[serde(rename = "endTime")]
    end: NaiveTime,
}

impl TimeWindow {
    /// Create a window, validating that `end` is strictly after `start`
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidWindow`] when `end <= start`.
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, DomainError> {
        if end <= start {
            return Err(DomainError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Window start
    #[must_use]
    pub const fn start(&self) -> NaiveTime {
        self.start
    }

    /// Window end
    #[must_use]
    pub const fn end(&self) -> NaiveTime {
        self.end
    }
}

impl TryFrom<RawTimeWindow> for TimeWindow {
    type Error = DomainError;

    fn try_from(raw: RawTimeWindow) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

// ============================================================================
// Entities
// ============================================================================

/// One offered time window
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    /// Slot identity (server-assigned, or provisional while unconfirmed)
    pub id: SlotId,
    /// The owner who published this slot
    pub owner_id: OwnerId,
    /// Calendar date, no time component
    pub date: NaiveDate,
    /// Wall-clock window within the date
    #[serde(flatten)]
    pub window: TimeWindow,
    /// Whether the server has committed a booking for this slot
    ///
    /// Transitions `false → true` exactly once; the engine never un-books.
    pub is_booked: bool,
}

impl Slot {
    /// Create an unbooked slot
    #[must_use]
    pub const fn new(id: SlotId, owner_id: OwnerId, date: NaiveDate, window: TimeWindow) -> Self {
        Self {
            id,
            owner_id,
            date,
            window,
            is_booked: false,
        }
    }

    /// Sort key giving the deterministic `(date, start, id)` order
    #[must_use]
    pub fn ordering_key(&self) -> (NaiveDate, NaiveTime, SlotId) {
        (self.date, self.window.start(), self.id)
    }
}

/// Booking lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    /// Requested but not yet committed by the server
    Pending,
    /// Committed by the server
    Confirmed,
    /// Terminally canceled
    Canceled,
}

impl BookingStatus {
    /// Convergence rank: a projection never moves a booking backwards
    /// (pending < confirmed < canceled).
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Confirmed => 1,
            Self::Canceled => 2,
        }
    }
}

/// Payment flag on a booking; opaque to the engine beyond its value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Not yet paid
    Unpaid,
    /// Paid
    Paid,
}

/// A confirmed or pending reservation binding a slot to a consumer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    /// Booking identity
    pub id: BookingId,
    /// The reserved slot
    pub slot_id: SlotId,
    /// The reserving consumer
    pub consumer_id: ConsumerId,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Payment flag (settlement happens outside the engine)
    pub payment_status: PaymentStatus,
}

/// An owner as listed by the directory query
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    /// Owner identity
    pub id: OwnerId,
    /// Display name
    pub name: String,
    /// Taught subject
    pub subject: String,
}

// ============================================================================
// Engine-local state records
// ============================================================================

/// Connectivity of the engine's event channel
///
/// Not persisted; rebuilt on every engine start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No channel
    #[default]
    Disconnected,
    /// A connection attempt is in flight
    Connecting,
    /// The channel is live
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Ephemeral record of one in-flight optimistic reservation
///
/// Created when a reserve command is issued, destroyed on confirmation,
/// rejection, or timeout. At most one exists per consumer session. The
/// withdrawn slot is kept so a rejection can restore it exactly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingReservation {
    /// The slot being reserved
    pub slot_id: SlotId,
    /// The reserving consumer
    pub consumer_id: ConsumerId,
    /// When the command was issued
    pub requested_at: DateTime<Utc>,
    /// The slot as it was when optimistically removed from the projection
    pub withdrawn: Option<Slot>,
}

/// The identity a session runs as
///
/// One engine instance serves exactly one participant; switching identities
/// means tearing the engine down and starting a new one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Participant {
    /// An owner session (manages its own slots)
    Owner(OwnerId),
    /// A consumer session (watches one owner, reserves slots)
    Consumer(ConsumerId),
}

impl Participant {
    /// The owner id, for owner sessions
    #[must_use]
    pub const fn owner_id(&self) -> Option<OwnerId> {
        match self {
            Self::Owner(id) => Some(*id),
            Self::Consumer(_) => None,
        }
    }

    /// The consumer id, for consumer sessions
    #[must_use]
    pub const fn consumer_id(&self) -> Option<ConsumerId> {
        match self {
            Self::Consumer(id) => Some(*id),
            Self::Owner(_) => None,
        }
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner(id) => write!(f, "owner/{id}"),
            Self::Consumer(id) => write!(f, "consumer/{id}"),
        }
    }
}

/// Opaque reference to a payment order created for a booking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef(pub String);

/// Opaque proof handed back by the payment provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProof(pub String);
