//! The synchronization engine: composition root wiring the store, the
//! reconnecting event channel, and the consistency poller into one unit.
//!
//! One engine instance exclusively owns one participant session's projection
//! for its whole lifetime. Switching identities means shutting the engine
//! down and starting a fresh one — state is never shared across sessions, so
//! a new session can never observe a stale pending reservation.

use crate::config::EngineConfig;
use crate::error::{EngineError, ReserveError};
use crate::poller;
use crate::reconciler::{EngineState, SyncAction, SyncEnvironment, SyncReducer, SyncStore};
use crate::transport::{CommandSink, EventChannel, ReconnectingChannel, SlotApi};
use crate::types::{
    Booking, ConnectionState, Owner, OwnerId, Participant, PendingReservation, Slot, SlotId,
    TimeWindow,
};
use chrono::NaiveDate;
use slotsync_core::environment::SystemClock;
use slotsync_runtime::{HealthCheck, StoreConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The slot synchronization engine
///
/// External collaborators read snapshots and issue commands through this
/// surface; they never touch the projection directly.
pub struct SyncEngine {
    store: SyncStore,
    api: Arc<dyn SlotApi>,
    participant: Participant,
    config: EngineConfig,
    stop: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Serializes `reserve` callers: one attempt per consumer at a time.
    reserve_gate: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    /// Start an engine for one participant session
    ///
    /// Wires the store, spawns the reconnecting event channel and the
    /// consistency poller, and issues the initial snapshot fetch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the initial fetch cannot be issued
    /// (only possible if the store is already shutting down, which cannot
    /// happen here in practice).
    pub async fn start(
        config: EngineConfig,
        participant: Participant,
        channel: Arc<dyn EventChannel>,
        commands: Arc<dyn CommandSink>,
        api: Arc<dyn SlotApi>,
    ) -> Result<Self, EngineError> {
        tracing::info!(%participant, "starting sync engine");

        let environment = SyncEnvironment::new(
            Arc::new(SystemClock),
            commands,
            Arc::clone(&api),
            config.clone(),
        );
        let store = SyncStore::with_config(
            EngineState::new(participant),
            SyncReducer::new(),
            environment,
            StoreConfig::default().with_broadcast_capacity(config.broadcast_capacity),
        );

        let (stop, stop_rx) = watch::channel(false);

        // Subscribe before the channel can emit its first transition, so the
        // poller never misses the initial connect.
        let transitions = store.subscribe_actions();
        let channel_task = tokio::spawn(
            ReconnectingChannel::new(channel, participant, config.reconnect_policy())
                .run(store.clone(), stop_rx.clone()),
        );
        let poller_task = tokio::spawn(poller::run(
            store.clone(),
            config.poll_interval,
            transitions,
            stop_rx,
        ));

        // Seed the projection before the first event arrives.
        store.send(SyncAction::RefreshSnapshot).await?;

        Ok(Self {
            store,
            api,
            participant,
            config,
            stop,
            tasks: Mutex::new(vec![channel_task, poller_task]),
            reserve_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// The identity this engine runs as
    #[must_use]
    pub const fn participant(&self) -> Participant {
        self.participant
    }

    /// Current connectivity of the event channel
    pub async fn connection_state(&self) -> ConnectionState {
        self.store.state(|s| s.connection).await
    }

    /// Unbooked slots in the active scope, optionally filtered by date,
    /// in deterministic `(date, start)` order
    pub async fn available_slots(&self, date: Option<NaiveDate>) -> Vec<Slot> {
        self.store.state(move |s| s.store.list_available(date)).await
    }

    /// Booked slots in the active scope (owner view)
    pub async fn booked_slots(&self) -> Vec<Slot> {
        self.store.state(|s| s.store.list_booked()).await
    }

    /// This session's bookings: the consumer's own, or — for an owner
    /// session — every booking projected for the owner's slots
    pub async fn bookings(&self) -> Vec<Booking> {
        let participant = self.participant;
        self.store
            .state(move |s| match participant.consumer_id() {
                Some(consumer) => s.store.bookings_for(consumer),
                None => s.store.all_bookings(),
            })
            .await
    }

    /// The in-flight optimistic reservation, if any
    pub async fn pending_reservation(&self) -> Option<PendingReservation> {
        self.store.state(|s| s.pending.clone()).await
    }

    /// The most recent surfaced failure, cleared by the next success
    pub async fn last_error(&self) -> Option<String> {
        self.store.state(|s| s.last_error.clone()).await
    }

    /// Store health (dead-letter pressure)
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        self.store.health()
    }

    /// List the owner directory (stateless pass-through query)
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TransportUnavailable`] when the server cannot
    /// be reached; safe to retry.
    pub async fn list_owners(&self) -> Result<Vec<Owner>, EngineError> {
        Ok(self.api.list_owners().await?)
    }

    /// Point this consumer session at an owner's availability
    ///
    /// Clears the slot projection and fetches the new scope's snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotAConsumer`] on owner sessions (owners watch
    /// themselves), or [`EngineError::Store`] during shutdown.
    pub async fn watch_owner(&self, owner_id: OwnerId) -> Result<(), EngineError> {
        if self.participant.consumer_id().is_none() {
            return Err(EngineError::NotAConsumer);
        }
        self.store.send(SyncAction::WatchOwner { owner_id }).await?;
        Ok(())
    }

    /// Force a full snapshot re-fetch for the active scope
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] during shutdown.
    pub async fn refresh(&self) -> Result<(), EngineError> {
        self.store.send(SyncAction::RefreshSnapshot).await?;
        Ok(())
    }

    /// Reserve a slot for this session's consumer
    ///
    /// Applies the optimistic removal immediately, sends the reservation
    /// command, and waits — bounded — for the server's verdict:
    ///
    /// - confirmation resolves with the committed [`Booking`];
    /// - rejection rolls the projection back and surfaces the reason;
    /// - silence beyond the timeout resolves [`ReserveError::Unresolved`]
    ///   after forcing a re-sync: the outcome is unknown until the
    ///   projection converges, not assumed either way.
    ///
    /// At most one reservation may be in flight per consumer; concurrent
    /// calls fail fast with [`ReserveError::AlreadyInFlight`].
    ///
    /// # Errors
    ///
    /// See [`ReserveError`] for the full taxonomy.
    pub async fn reserve(&self, slot_id: SlotId) -> Result<Booking, ReserveError> {
        if self.participant.consumer_id().is_none() {
            return Err(ReserveError::NotAConsumer);
        }

        // Fail fast instead of queuing: a second caller must not compound an
        // unresolved first attempt. The reducer enforces the same invariant
        // for anything reaching the store by other paths.
        let Ok(_attempt) = self.reserve_gate.try_lock() else {
            return Err(ReserveError::AlreadyInFlight);
        };
        if self.store.state(|s| s.pending.is_some()).await {
            return Err(ReserveError::AlreadyInFlight);
        }

        // The reducer's own timeout fires at reserve_timeout; the extra
        // slack only covers delivery of the resulting action.
        let wait_timeout = self.config.reserve_timeout + Duration::from_secs(2);

        let outcome = self
            .store
            .send_and_wait_for(
                SyncAction::Reserve { slot_id },
                |action| match action {
                    SyncAction::BookingConfirmed { booking } => booking.slot_id == slot_id,
                    SyncAction::CommandRejected { slot_id: rejected, .. } => {
                        rejected.is_none() || *rejected == Some(slot_id)
                    },
                    SyncAction::ReservationTimedOut { slot_id: timed_out }
                    | SyncAction::ReserveRefused { slot_id: timed_out } => *timed_out == slot_id,
                    _ => false,
                },
                wait_timeout,
            )
            .await;

        match outcome {
            Ok(SyncAction::BookingConfirmed { booking }) => Ok(booking),
            Ok(SyncAction::CommandRejected { reason, .. }) => {
                if reason == "SlotAlreadyTaken" {
                    Err(ReserveError::SlotAlreadyTaken(slot_id))
                } else {
                    Err(ReserveError::Rejected(reason))
                }
            },
            Ok(SyncAction::ReserveRefused { .. }) => Err(ReserveError::AlreadyInFlight),
            // A matched timeout action, or the wait's own deadline: either
            // way the outcome is unknown and the re-sync is already running.
            Ok(_) => Err(ReserveError::Unresolved),
            Err(slotsync_runtime::StoreError::Timeout) => Err(ReserveError::Unresolved),
            Err(err) => Err(ReserveError::Store(err)),
        }
    }

    /// Publish a new availability window (owner sessions)
    ///
    /// The slot appears in the projection immediately under the returned
    /// provisional id; a reconciling re-fetch shortly after replaces it with
    /// the server-assigned entry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotAnOwner`] on consumer sessions, or
    /// [`EngineError::Store`] during shutdown.
    pub async fn publish_slot(
        &self,
        date: NaiveDate,
        window: TimeWindow,
    ) -> Result<SlotId, EngineError> {
        if self.participant.owner_id().is_none() {
            return Err(EngineError::NotAnOwner);
        }

        let slot_id = SlotId::provisional();
        self.store
            .send(SyncAction::PublishSlot {
                slot_id,
                date,
                window,
            })
            .await?;
        Ok(slot_id)
    }

    /// Withdraw a published slot (owner sessions)
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotAnOwner`] on consumer sessions, or
    /// [`EngineError::Store`] during shutdown.
    pub async fn retract_slot(&self, slot_id: SlotId) -> Result<(), EngineError> {
        if self.participant.owner_id().is_none() {
            return Err(EngineError::NotAnOwner);
        }
        self.store.send(SyncAction::RetractSlot { slot_id }).await?;
        Ok(())
    }

    /// Shut the engine down
    ///
    /// Stops the poller, closes the channel loop, and cancels pending
    /// timeout effects. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] when in-flight effects outlive the
    /// shutdown timeout; they are aborted regardless, so no pending
    /// reservation can leak into a later session.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        tracing::info!(participant = %self.participant, "shutting down sync engine");
        let _ = self.stop.send(true);

        let result = self.store.shutdown(self.config.shutdown_timeout).await;

        let tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        for task in tasks {
            task.abort();
        }

        result.map_err(EngineError::from)
    }
}
