//! Error taxonomy for the engine.
//!
//! No error here is fatal to the process: transport failures degrade to the
//! next snapshot fetch, reservation failures roll the projection back, and
//! malformed events are dropped where they are decoded.

use crate::transport::TransportError;
use crate::types::{DomainError, SlotId};
use slotsync_runtime::StoreError;
use thiserror::Error;

/// Errors surfaced by engine lifecycle and query/command operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// The server could not be reached; retried/polled, never fatal
    #[error("transport unavailable: {0}")]
    TransportUnavailable(#[from] TransportError),

    /// A domain value was invalid (e.g. an empty publish window)
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Only owner sessions may publish or retract slots
    #[error("operation requires an owner session")]
    NotAnOwner,

    /// Only consumer sessions may watch an owner
    #[error("operation requires a consumer session")]
    NotAConsumer,

    /// The underlying store rejected the operation
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcomes of a failed `reserve` attempt
#[derive(Error, Debug)]
pub enum ReserveError {
    /// The server rejected the reservation because another consumer won
    #[error("slot {0} is already taken")]
    SlotAlreadyTaken(SlotId),

    /// The server rejected the reservation for another reason
    #[error("reservation rejected: {0}")]
    Rejected(String),

    /// A reservation is already in flight for this consumer; no state changed
    #[error("a reservation is already in flight for this consumer")]
    AlreadyInFlight,

    /// No confirmation or rejection arrived within the timeout window.
    ///
    /// The outcome is unknown; the engine has already forced a snapshot
    /// re-fetch and the projection will converge to whichever way the server
    /// decided. Check `bookings()` after the next refresh.
    #[error("no server response before timeout; projection re-synced from server")]
    Unresolved,

    /// Only consumer sessions can reserve slots
    #[error("only consumer sessions can reserve slots")]
    NotAConsumer,

    /// The underlying store rejected the operation
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn errors_display_their_context() {
        let id = SlotId::server(Uuid::nil());
        let err = ReserveError::SlotAlreadyTaken(id);
        assert!(err.to_string().contains(&id.to_string()));

        let err = ReserveError::Rejected("closed for holiday".into());
        assert!(err.to_string().contains("closed for holiday"));
    }
}
