//! The event reconciler and booking pipeline.
//!
//! One reducer over one owned state implements both: every inbound server
//! event, every snapshot application, and every arm of the optimistic
//! reservation state machine. Events are treated as hints, not a
//! totally-ordered log — there is no exactly-once or in-order delivery
//! guarantee — so every arm here is idempotent and every optimistic mutation
//! is reversible. Convergence, not trust in any single message.

use crate::config::EngineConfig;
use crate::store::SlotStore;
use crate::transport::{CommandSink, SlotApi};
use crate::types::{
    Booking, BookingId, ConnectionState, OwnerId, Participant, PendingReservation, Slot, SlotId,
    TimeWindow,
};
use crate::wire::{ClientCommand, ServerEvent};
use chrono::NaiveDate;
use slotsync_core::effect::Effect;
use slotsync_core::environment::Clock;
use slotsync_core::reducer::{Effects, Reducer};
use slotsync_core::smallvec;
use slotsync_macros::Action;
use std::collections::HashSet;
use std::sync::Arc;

/// The runtime store type the engine is built on
pub type SyncStore = slotsync_runtime::Store<EngineState, SyncAction, SyncEnvironment, SyncReducer>;

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// All inputs to the sync reducer
///
/// Commands express local intent (reserve, publish, refresh); events are
/// facts — either decoded from the inbound wire or produced by effect
/// feedback (snapshot results, timeouts).
#[derive(Action, Clone, Debug)]
pub enum SyncAction {
    // Commands
    /// Reserve a slot for this session's consumer
    #[command]
    Reserve {
        /// The slot to reserve
        slot_id: SlotId,
    },

    /// Publish a new slot under a pre-generated provisional id (owner)
    #[command]
    PublishSlot {
        /// Provisional identity for the optimistic entry
        slot_id: SlotId,
        /// Slot date
        date: NaiveDate,
        /// Slot window
        window: TimeWindow,
    },

    /// Withdraw a slot (owner)
    #[command]
    RetractSlot {
        /// The slot to withdraw
        slot_id: SlotId,
    },

    /// Point this consumer session at an owner's availability
    #[command]
    WatchOwner {
        /// The owner to watch
        owner_id: OwnerId,
    },

    /// Force a full snapshot re-fetch for the active scope
    #[command]
    RefreshSnapshot,

    /// The bounded reservation timeout fired
    #[command]
    ReservationTimedOut {
        /// The slot the reservation targeted
        slot_id: SlotId,
    },

    /// The transport's connectivity changed
    #[command]
    ConnectionChanged {
        /// The new connection state
        state: ConnectionState,
    },

    // Events
    /// A slot became available
    #[event]
    SlotAdded {
        /// The new slot
        slot: Slot,
    },

    /// A slot was withdrawn
    #[event]
    SlotRemoved {
        /// The withdrawn slot's id
        slot_id: SlotId,
    },

    /// The server committed a booking
    #[event]
    BookingConfirmed {
        /// The committed booking
        booking: Booking,
    },

    /// Advisory slot count for an owner
    #[event]
    SlotCountHint {
        /// The owner the count refers to
        owner_id: OwnerId,
        /// The server's count
        count: usize,
    },

    /// The server refused a command
    #[event]
    CommandRejected {
        /// The slot the rejected command referred to, when known
        slot_id: Option<SlotId>,
        /// Rejection reason
        reason: String,
    },

    /// A reserve command was refused locally (another attempt in flight)
    #[event]
    ReserveRefused {
        /// The slot the refused attempt targeted
        slot_id: SlotId,
    },

    /// A snapshot fetch returned
    #[event]
    SnapshotFetched {
        /// The owner the slot list was fetched for; `None` when only
        /// bookings were fetched
        owner_id: Option<OwnerId>,
        /// The scope's slots as the server sees them
        slots: Vec<Slot>,
        /// The consumer's bookings, when fetched
        bookings: Option<Vec<Booking>>,
    },

    /// A snapshot fetch failed; the projection stays as-is until the next
    /// poller cycle
    #[event]
    SnapshotFailed {
        /// Failure description
        reason: String,
    },
}

impl From<ServerEvent> for SyncAction {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::SlotAdded { slot } => Self::SlotAdded { slot },
            ServerEvent::SlotRemoved { slot_id } => Self::SlotRemoved { slot_id },
            ServerEvent::BookingConfirmed { booking } => Self::BookingConfirmed { booking },
            ServerEvent::SlotCountHint { owner_id, count } => {
                Self::SlotCountHint { owner_id, count }
            },
            ServerEvent::CommandRejected { slot_id, reason } => {
                Self::CommandRejected { slot_id, reason }
            },
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// The state one engine instance owns for one participant session
#[derive(Clone, Debug)]
pub struct EngineState {
    /// The identity this session runs as
    pub participant: Participant,
    /// The slot/booking projection
    pub store: SlotStore,
    /// The at-most-one in-flight optimistic reservation
    pub pending: Option<PendingReservation>,
    /// Transport connectivity
    pub connection: ConnectionState,
    /// The owner a consumer session is watching (owners watch themselves)
    pub watched_owner: Option<OwnerId>,
    /// The most recent surfaced failure, cleared on the next success
    pub last_error: Option<String>,
}

impl EngineState {
    /// Fresh state for a participant; owners are pinned to their own scope
    #[must_use]
    pub fn new(participant: Participant) -> Self {
        Self {
            participant,
            store: SlotStore::new(),
            pending: None,
            connection: ConnectionState::Disconnected,
            watched_owner: participant.owner_id(),
            last_error: None,
        }
    }

    /// The owner whose slots this session projects, if any
    #[must_use]
    pub fn scope_owner(&self) -> Option<OwnerId> {
        self.participant.owner_id().or(self.watched_owner)
    }

    /// True when `slot_id` is covered by the in-flight reservation
    fn pending_covers(&self, slot_id: SlotId) -> bool {
        self.pending.as_ref().is_some_and(|p| p.slot_id == slot_id)
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies injected into the sync reducer
#[derive(Clone)]
pub struct SyncEnvironment {
    /// Clock for pending-reservation timestamps
    pub clock: Arc<dyn Clock>,
    /// Best-effort outbound command path
    pub commands: Arc<dyn CommandSink>,
    /// Stateless snapshot queries
    pub api: Arc<dyn SlotApi>,
    /// Timeouts and delays
    pub config: EngineConfig,
}

impl SyncEnvironment {
    /// Creates a new `SyncEnvironment`
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        commands: Arc<dyn CommandSink>,
        api: Arc<dyn SlotApi>,
        config: EngineConfig,
    ) -> Self {
        Self {
            clock,
            commands,
            api,
            config,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer implementing the merge rules and the reservation state machine
#[derive(Clone, Debug, Default)]
pub struct SyncReducer;

impl SyncReducer {
    /// Creates a new `SyncReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Effect: hand a command to the sink.
    ///
    /// Send is best-effort by contract; a failed send is logged and left to
    /// the reservation timeout / poller to surface, never treated as an
    /// outcome.
    fn send_command(env: &SyncEnvironment, command: ClientCommand) -> Effect<SyncAction> {
        let sink = Arc::clone(&env.commands);
        Effect::future(async move {
            if let Err(err) = sink.send(command).await {
                tracing::warn!(error = %err, "command send failed; timeout or poller will reconcile");
            }
            None
        })
    }

    /// Effect: fetch the scope's slots and the consumer's bookings, feeding
    /// the result back as `SnapshotFetched` / `SnapshotFailed`.
    fn refresh_effect(state: &EngineState, env: &SyncEnvironment) -> Effect<SyncAction> {
        let owner_id = state.scope_owner();
        let consumer_id = state.participant.consumer_id();
        let api = Arc::clone(&env.api);

        Effect::future(async move {
            let slots = match owner_id {
                Some(owner) => match api.fetch_slots(owner, None).await {
                    Ok(slots) => Some(slots),
                    Err(err) => {
                        return Some(SyncAction::SnapshotFailed {
                            reason: err.to_string(),
                        });
                    },
                },
                None => None,
            };

            let bookings = match consumer_id {
                Some(consumer) => match api.fetch_bookings(consumer).await {
                    Ok(bookings) => Some(bookings),
                    Err(err) => {
                        return Some(SyncAction::SnapshotFailed {
                            reason: err.to_string(),
                        });
                    },
                },
                None => None,
            };

            if slots.is_none() && bookings.is_none() {
                return None;
            }

            Some(SyncAction::SnapshotFetched {
                owner_id,
                slots: slots.unwrap_or_default(),
                bookings,
            })
        })
    }

    /// Effect: resolve a refused reserve attempt through the feedback loop so
    /// a waiting caller observes it.
    fn refuse_reserve(slot_id: SlotId) -> Effect<SyncAction> {
        Effect::future(async move { Some(SyncAction::ReserveRefused { slot_id }) })
    }

    /// Apply a fetched snapshot: remote-present entries are upserted,
    /// local-only entries removed, with two exceptions — the slot covered by
    /// the in-flight pending reservation is never touched, and provisional
    /// entries are replaced wholesale by server truth.
    fn apply_snapshot(
        state: &mut EngineState,
        owner_id: Option<OwnerId>,
        slots: Vec<Slot>,
        bookings: Option<Vec<Booking>>,
    ) {
        if let Some(owner) = owner_id {
            if state.scope_owner() == Some(owner) {
                state.store.drop_provisional_for(owner);

                let pending_slot = state.pending.as_ref().map(|p| p.slot_id);
                let mut remote_ids: HashSet<SlotId> = HashSet::with_capacity(slots.len());
                for slot in slots {
                    remote_ids.insert(slot.id);
                    if Some(slot.id) == pending_slot {
                        continue;
                    }
                    state.store.upsert_slot(slot);
                }

                for id in state.store.slot_ids_for(owner) {
                    if remote_ids.contains(&id) || Some(id) == pending_slot {
                        continue;
                    }
                    state.store.remove_slot(&id);
                }
            } else {
                tracing::debug!(owner = %owner, "discarding snapshot for unwatched owner");
            }
        }

        if let Some(consumer) = state.participant.consumer_id() {
            if let Some(remote) = bookings {
                let remote_ids: HashSet<BookingId> = remote.iter().map(|b| b.id).collect();
                for booking in remote {
                    state.store.upsert_booking(booking);
                }
                for booking in state.store.bookings_for(consumer) {
                    if !remote_ids.contains(&booking.id) {
                        state.store.remove_booking(&booking.id);
                    }
                }
            }
        }

        state.last_error = None;
    }
}

impl Reducer for SyncReducer {
    type State = EngineState;
    type Action = SyncAction;
    type Environment = SyncEnvironment;

    #[allow(clippy::too_many_lines)] // One arm per merge rule and pipeline transition
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Effects<Self::Action> {
        match action {
            // ========== Booking pipeline ==========
            SyncAction::Reserve { slot_id } => {
                let Some(consumer_id) = state.participant.consumer_id() else {
                    tracing::warn!(slot = %slot_id, "reserve issued on a non-consumer session");
                    return smallvec![Self::refuse_reserve(slot_id)];
                };

                if state.pending.is_some() {
                    tracing::warn!(slot = %slot_id, "reserve refused: attempt already in flight");
                    return smallvec![Self::refuse_reserve(slot_id)];
                }

                // Optimistic removal: the slot leaves the available
                // projection immediately so no second local attempt targets
                // it. Pure latency hide; the server stays the arbiter.
                let withdrawn = state.store.remove_slot(&slot_id);
                state.pending = Some(PendingReservation {
                    slot_id,
                    consumer_id,
                    requested_at: env.clock.now(),
                    withdrawn,
                });

                tracing::info!(slot = %slot_id, consumer = %consumer_id, "reservation requested");
                smallvec![
                    Self::send_command(
                        env,
                        ClientCommand::Reserve {
                            slot_id,
                            consumer_id,
                        },
                    ),
                    Effect::delay(
                        env.config.reserve_timeout,
                        SyncAction::ReservationTimedOut { slot_id },
                    ),
                ]
            },

            SyncAction::ReservationTimedOut { slot_id } => {
                if state.pending_covers(slot_id) {
                    // Outcome unknown: neither success nor failure is
                    // assumed. Clear the pending record and re-sync both the
                    // slot list and the bookings from the server.
                    tracing::warn!(slot = %slot_id, "no reservation outcome before timeout; re-syncing");
                    state.pending = None;
                    smallvec![Self::refresh_effect(state, env)]
                } else {
                    // Already resolved; a stale timer is a no-op.
                    smallvec![]
                }
            },

            SyncAction::BookingConfirmed { booking } => {
                if !state.store.mark_booked(&booking.slot_id) && state.pending_covers(booking.slot_id)
                {
                    // Our own optimistic removal hid the slot; restore it in
                    // its committed form so booked views stay complete.
                    if let Some(mut slot) = state
                        .pending
                        .as_ref()
                        .and_then(|p| p.withdrawn.clone())
                    {
                        slot.is_booked = true;
                        state.store.upsert_slot(slot);
                    }
                }

                state.store.upsert_booking(booking.clone());

                if state.pending_covers(booking.slot_id) {
                    tracing::info!(slot = %booking.slot_id, "pending reservation confirmed");
                    state.pending = None;
                }

                state.last_error = None;
                smallvec![]
            },

            SyncAction::CommandRejected { slot_id, reason } => {
                // A rejection with no slot id can only refer to the single
                // in-flight command.
                let target = slot_id.or_else(|| state.pending.as_ref().map(|p| p.slot_id));

                if let Some(target) = target {
                    if state.pending_covers(target) {
                        tracing::warn!(slot = %target, %reason, "reservation rejected; rolling back");
                        if let Some(pending) = state.pending.take() {
                            if let Some(withdrawn) = pending.withdrawn {
                                state.store.upsert_slot(withdrawn);
                            }
                        }
                    } else if target.is_provisional() {
                        // A refused publish: the optimistic entry has no
                        // server counterpart, drop it.
                        tracing::warn!(slot = %target, %reason, "publish rejected; dropping provisional slot");
                        state.store.remove_slot(&target);
                    }
                }

                state.last_error = Some(reason);
                smallvec![]
            },

            SyncAction::ReserveRefused { .. } => {
                // Exists so a waiting caller observes the refusal; no state
                // was changed when it was produced.
                smallvec![]
            },

            // ========== Owner slot publication ==========
            SyncAction::PublishSlot {
                slot_id,
                date,
                window,
            } => {
                let Some(owner_id) = state.participant.owner_id() else {
                    tracing::warn!("publish issued on a non-owner session");
                    return smallvec![];
                };

                let slot = Slot::new(slot_id, owner_id, date, window);
                state.store.upsert_slot(slot.clone());

                tracing::info!(slot = %slot_id, %date, %window, "slot published optimistically");
                smallvec![
                    Self::send_command(env, ClientCommand::PublishSlot { slot }),
                    // Reconciling re-fetch shortly after, replacing the
                    // provisional entry with server truth.
                    Effect::delay(env.config.publish_refetch_delay, SyncAction::RefreshSnapshot),
                ]
            },

            SyncAction::RetractSlot { slot_id } => {
                if state.participant.owner_id().is_none() {
                    tracing::warn!("retract issued on a non-owner session");
                    return smallvec![];
                }

                state.store.remove_slot(&slot_id);
                if slot_id.is_provisional() {
                    // Never reached the server; nothing to retract remotely.
                    smallvec![]
                } else {
                    smallvec![Self::send_command(env, ClientCommand::RetractSlot { slot_id })]
                }
            },

            // ========== Scope ==========
            SyncAction::WatchOwner { owner_id } => {
                if state.participant.consumer_id().is_none() {
                    tracing::warn!("watch issued on an owner session; owners watch themselves");
                    return smallvec![];
                }
                if state.watched_owner == Some(owner_id) {
                    return smallvec![];
                }

                state.watched_owner = Some(owner_id);
                state.store.clear_slots();
                smallvec![Self::refresh_effect(state, env)]
            },

            SyncAction::RefreshSnapshot => {
                smallvec![Self::refresh_effect(state, env)]
            },

            // ========== Inbound events (hints, all idempotent) ==========
            SyncAction::SlotAdded { slot } => {
                let in_scope = state.scope_owner() == Some(slot.owner_id);
                if !in_scope {
                    tracing::debug!(slot = %slot.id, owner = %slot.owner_id, "ignoring out-of-scope slot");
                    return smallvec![];
                }
                if state.pending_covers(slot.id) {
                    // The booking pipeline owns this slot until it resolves.
                    return smallvec![];
                }

                // A server echo of our own optimistic publish: same owner,
                // date, and window under a fresh server id.
                if let Some(twin) = state.store.provisional_twin(&slot) {
                    state.store.remove_slot(&twin);
                }

                state.store.upsert_slot(slot);
                smallvec![]
            },

            SyncAction::SlotRemoved { slot_id } => {
                state.store.remove_slot(&slot_id);
                smallvec![]
            },

            SyncAction::SlotCountHint { owner_id, count } => {
                // Advisory only: a mismatch schedules an out-of-band
                // re-fetch, the count itself is never applied.
                if state.scope_owner() == Some(owner_id) {
                    let local = state.store.slot_count_for(owner_id);
                    if local != count {
                        tracing::info!(local, remote = count, "slot count mismatch; re-fetching");
                        return smallvec![Self::refresh_effect(state, env)];
                    }
                }
                smallvec![]
            },

            SyncAction::SnapshotFetched {
                owner_id,
                slots,
                bookings,
            } => {
                Self::apply_snapshot(state, owner_id, slots, bookings);
                smallvec![]
            },

            SyncAction::SnapshotFailed { reason } => {
                tracing::warn!(%reason, "snapshot fetch failed; projection unchanged until next cycle");
                state.last_error = Some(reason);
                smallvec![]
            },

            SyncAction::ConnectionChanged { state: connection } => {
                if state.connection != connection {
                    tracing::info!(from = %state.connection, to = %connection, "connection state changed");
                }
                state.connection = connection;
                smallvec![]
            },
        }
    }
}
