//! Transport contracts and the reconnecting event channel.
//!
//! The transport owns no business logic. It maintains a logical duplex
//! channel that re-establishes itself after failure, plus a stateless
//! request/response query surface for snapshot fetches. All inbound frames
//! are decoded and handed to the store in arrival order; interpretation
//! happens in the reducer.

use crate::reconciler::{SyncAction, SyncStore};
use crate::types::{
    Booking, BookingId, ConnectionState, ConsumerId, OrderRef, Owner, OwnerId, PaymentProof,
    PaymentStatus, Participant, Slot,
};
use crate::wire::{self, ClientCommand};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::BoxStream;
use futures::StreamExt;
use slotsync_runtime::retry::RetryPolicy;
use slotsync_runtime::StoreError;
use thiserror::Error;
use tokio::sync::watch;

/// Errors raised by transport implementations
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Establishing the duplex channel failed
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// A best-effort send could not be handed to the channel
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A snapshot query could not reach the server
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// The channel ended
    #[error("channel closed")]
    Closed,
}

/// A stream of raw inbound frames from one connection
///
/// Yields until the connection drops; an `Err` item or stream end both mean
/// the connection is gone and the reconnect loop takes over.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// One logical duplex channel endpoint
///
/// Implementations perform a single connection attempt per call; reconnection
/// policy lives in [`ReconnectingChannel`], not here.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Attempt to establish the channel for a participant
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectFailed`] when the attempt fails; the
    /// caller backs off and retries.
    async fn connect(&self, participant: Participant) -> Result<FrameStream, TransportError>;
}

/// Best-effort outbound command path
///
/// Delivery is not guaranteed and the send call proves nothing: callers
/// detect loss with timeouts, never with the send result.
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Send a command toward the server
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SendFailed`] when the command could not be
    /// handed off at all. Even `Ok` does not imply delivery.
    async fn send(&self, command: ClientCommand) -> Result<(), TransportError>;
}

/// Stateless snapshot and directory queries
///
/// All methods are idempotent and safe to race against the event stream.
/// The payment methods are opaque pass-throughs the engine never interprets
/// beyond a booking's payment flag.
#[async_trait]
pub trait SlotApi: Send + Sync {
    /// List the owner directory
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::FetchFailed`] when the server is
    /// unreachable.
    async fn list_owners(&self) -> Result<Vec<Owner>, TransportError>;

    /// Fetch an owner's slots; `date` omitted means all future slots
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::FetchFailed`] when the server is
    /// unreachable.
    async fn fetch_slots(
        &self,
        owner_id: OwnerId,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Slot>, TransportError>;

    /// Fetch a consumer's bookings, any status
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::FetchFailed`] when the server is
    /// unreachable.
    async fn fetch_bookings(&self, consumer_id: ConsumerId) -> Result<Vec<Booking>, TransportError>;

    /// Create a payment order for a booking (opaque to the engine)
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::FetchFailed`] when the server is
    /// unreachable.
    async fn create_payment_order(
        &self,
        booking_id: BookingId,
        amount_cents: u64,
        currency: &str,
    ) -> Result<OrderRef, TransportError>;

    /// Verify a payment against its order (opaque to the engine)
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::FetchFailed`] when the server is
    /// unreachable.
    async fn verify_payment(
        &self,
        order: OrderRef,
        proof: PaymentProof,
    ) -> Result<PaymentStatus, TransportError>;
}

/// The reconnect loop around an [`EventChannel`]
///
/// Owns exactly one pump: reconnection recreates the frame stream, never the
/// handler, so no reconnect cycle can duplicate event delivery paths or leak
/// subscriptions. Emits `connecting → connected → disconnected → connecting…`
/// transitions into the store and decodes every inbound frame; malformed
/// frames are dropped and logged, and the store is left to the next snapshot.
pub struct ReconnectingChannel {
    channel: std::sync::Arc<dyn EventChannel>,
    participant: Participant,
    policy: RetryPolicy,
}

impl ReconnectingChannel {
    /// Create the loop; nothing runs until [`Self::run`] is spawned
    #[must_use]
    pub fn new(
        channel: std::sync::Arc<dyn EventChannel>,
        participant: Participant,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            channel,
            participant,
            policy,
        }
    }

    /// Drive the channel until `stop` flips or the store shuts down
    ///
    /// The attempt counter resets on every successful connection, so an
    /// engine that stays connected for a while backs off from the start
    /// after the next drop. The loop itself never gives up.
    pub async fn run(self, store: SyncStore, mut stop: watch::Receiver<bool>) {
        let mut attempt: usize = 0;

        loop {
            if *stop.borrow() {
                break;
            }

            if Self::emit(&store, ConnectionState::Connecting).await.is_err() {
                break;
            }

            match self.channel.connect(self.participant).await {
                Ok(frames) => {
                    attempt = 0;
                    tracing::info!(participant = %self.participant, "event channel connected");
                    if Self::emit(&store, ConnectionState::Connected).await.is_err() {
                        break;
                    }
                    let stopped = Self::pump(&store, frames, &mut stop).await;
                    if Self::emit(&store, ConnectionState::Disconnected).await.is_err() || stopped {
                        break;
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, attempt, "event channel connect failed");
                    if Self::emit(&store, ConnectionState::Disconnected).await.is_err() {
                        break;
                    }
                },
            }

            let delay = self.policy.jittered_delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                () = tokio::time::sleep(delay) => {},
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                },
            }
        }

        tracing::debug!("event channel loop stopped");
    }

    /// Forward frames into the store until the connection drops.
    ///
    /// Returns true when the stop signal ended the pump.
    async fn pump(
        store: &SyncStore,
        mut frames: FrameStream,
        stop: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            tokio::select! {
                frame = frames.next() => match frame {
                    Some(Ok(text)) => match wire::decode_event(&text) {
                        Ok(event) => {
                            let action = SyncAction::from(event);
                            tracing::debug!(kind = action.kind(), "inbound event");
                            if let Err(err) = store.send(action).await {
                                tracing::debug!(error = %err, "store rejected inbound event");
                                return true;
                            }
                        },
                        Err(err) => {
                            // Dropped, not fatal: the consistency poller heals
                            // whatever this frame carried.
                            tracing::warn!(error = %err, frame = %text, "dropping malformed event");
                        },
                    },
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "event channel errored; reconnecting");
                        return false;
                    },
                    None => {
                        tracing::info!("event channel closed; reconnecting");
                        return false;
                    },
                },
                _ = stop.changed() => {
                    if *stop.borrow() {
                        return true;
                    }
                },
            }
        }
    }

    async fn emit(store: &SyncStore, state: ConnectionState) -> Result<(), StoreError> {
        store
            .send(SyncAction::ConnectionChanged { state })
            .await
            .map(|_| ())
    }
}
