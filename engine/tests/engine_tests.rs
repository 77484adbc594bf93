//! End-to-end engine tests over in-memory transport fakes.

#![allow(clippy::unwrap_used)]

mod common;

use common::{test_config, wait_until, FakeApi, FakeChannel, RecordingSink};
use chrono::{NaiveDate, NaiveTime};
use slotsync_engine::{
    Booking, BookingId, BookingStatus, ClientCommand, ConnectionState, ConsumerId, OwnerId,
    Participant, PaymentStatus, ReserveError, ServerEvent, Slot, SlotId, SyncEngine, TimeWindow,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn window(start_h: u32) -> TimeWindow {
    TimeWindow::new(
        NaiveTime::from_hms_opt(start_h, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(start_h, 30, 0).unwrap(),
    )
    .unwrap()
}

fn server_slot(owner: OwnerId, start_h: u32) -> Slot {
    Slot::new(SlotId::server(Uuid::new_v4()), owner, date(), window(start_h))
}

fn confirmed_booking(slot_id: SlotId, consumer: ConsumerId) -> Booking {
    Booking {
        id: BookingId::new(),
        slot_id,
        consumer_id: consumer,
        status: BookingStatus::Confirmed,
        payment_status: PaymentStatus::Unpaid,
    }
}

struct Harness {
    engine: Arc<SyncEngine>,
    channel: Arc<FakeChannel>,
    sink: Arc<RecordingSink>,
    api: Arc<FakeApi>,
}

async fn start_consumer(consumer: ConsumerId, channel: Arc<FakeChannel>) -> Harness {
    let sink = RecordingSink::new();
    let api = FakeApi::new();
    let engine = SyncEngine::start(
        test_config(),
        Participant::Consumer(consumer),
        channel.clone(),
        sink.clone(),
        api.clone(),
    )
    .await
    .unwrap();
    Harness {
        engine: Arc::new(engine),
        channel,
        sink,
        api,
    }
}

async fn start_owner(owner: OwnerId) -> Harness {
    let channel = FakeChannel::new();
    let sink = RecordingSink::new();
    let api = FakeApi::new();
    let engine = SyncEngine::start(
        test_config(),
        Participant::Owner(owner),
        channel.clone(),
        sink.clone(),
        api.clone(),
    )
    .await
    .unwrap();
    Harness {
        engine: Arc::new(engine),
        channel,
        sink,
        api,
    }
}

async fn wait_connected(harness: &Harness) {
    let engine = harness.engine.clone();
    wait_until(Duration::from_secs(3), move || {
        let engine = engine.clone();
        async move { engine.connection_state().await == ConnectionState::Connected }
    })
    .await;
}

#[tokio::test]
async fn confirmed_reservation_end_to_end() {
    common::init_tracing();
    let owner = OwnerId::new();
    let consumer = ConsumerId::new();
    let harness = start_consumer(consumer, FakeChannel::new()).await;
    let slot = server_slot(owner, 10);
    harness.api.put_slot(slot.clone());

    wait_connected(&harness).await;
    harness.engine.watch_owner(owner).await.unwrap();

    let engine = harness.engine.clone();
    wait_until(Duration::from_secs(3), move || {
        let engine = engine.clone();
        async move { engine.available_slots(None).await.len() == 1 }
    })
    .await;

    // Reserve concurrently; the engine waits for the server's verdict.
    let reserving = {
        let engine = harness.engine.clone();
        let slot_id = slot.id;
        tokio::spawn(async move { engine.reserve(slot_id).await })
    };

    // The optimistic removal and the outbound command land before any reply.
    let sink = harness.sink.clone();
    wait_until(Duration::from_secs(3), move || {
        let sink = sink.clone();
        async move { sink.reserve_count() == 1 }
    })
    .await;
    assert!(harness.engine.available_slots(None).await.is_empty());
    assert!(harness.engine.pending_reservation().await.is_some());
    assert!(matches!(
        harness.sink.commands()[0],
        ClientCommand::Reserve { slot_id, consumer_id } if slot_id == slot.id && consumer_id == consumer
    ));

    // Server commits, then confirms over the event stream.
    let booking = confirmed_booking(slot.id, consumer);
    harness.api.mark_booked(slot.id);
    harness.api.put_booking(booking.clone());
    harness
        .channel
        .send_event(&ServerEvent::BookingConfirmed {
            booking: booking.clone(),
        });

    let resolved = reserving.await.unwrap().unwrap();
    assert_eq!(resolved.id, booking.id);
    assert_eq!(resolved.status, BookingStatus::Confirmed);

    assert!(harness.engine.available_slots(None).await.is_empty());
    assert!(harness.engine.pending_reservation().await.is_none());
    let bookings = harness.engine.bookings().await;
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].slot_id, slot.id);
    assert_eq!(harness.engine.booked_slots().await.len(), 1);

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn rejected_reservation_rolls_back_and_allows_retry() {
    let owner = OwnerId::new();
    let consumer = ConsumerId::new();
    let harness = start_consumer(consumer, FakeChannel::new()).await;
    let slot = server_slot(owner, 10);
    harness.api.put_slot(slot.clone());

    wait_connected(&harness).await;
    harness.engine.watch_owner(owner).await.unwrap();
    let engine = harness.engine.clone();
    wait_until(Duration::from_secs(3), move || {
        let engine = engine.clone();
        async move { engine.available_slots(None).await.len() == 1 }
    })
    .await;

    let reserving = {
        let engine = harness.engine.clone();
        let slot_id = slot.id;
        tokio::spawn(async move { engine.reserve(slot_id).await })
    };

    let sink = harness.sink.clone();
    wait_until(Duration::from_secs(3), move || {
        let sink = sink.clone();
        async move { sink.reserve_count() == 1 }
    })
    .await;

    harness.channel.send_event(&ServerEvent::CommandRejected {
        slot_id: Some(slot.id),
        reason: "SlotAlreadyTaken".to_string(),
    });

    let outcome = reserving.await.unwrap();
    assert!(matches!(outcome, Err(ReserveError::SlotAlreadyTaken(id)) if id == slot.id));

    // The slot reappears and the pipeline is free for another attempt.
    assert_eq!(harness.engine.available_slots(None).await, vec![slot.clone()]);
    assert!(harness.engine.pending_reservation().await.is_none());

    let retrying = {
        let engine = harness.engine.clone();
        let slot_id = slot.id;
        tokio::spawn(async move { engine.reserve(slot_id).await })
    };
    let sink = harness.sink.clone();
    wait_until(Duration::from_secs(3), move || {
        let sink = sink.clone();
        async move { sink.reserve_count() == 2 }
    })
    .await;

    let booking = confirmed_booking(slot.id, consumer);
    harness.api.mark_booked(slot.id);
    harness.api.put_booking(booking.clone());
    harness
        .channel
        .send_event(&ServerEvent::BookingConfirmed { booking });
    assert!(retrying.await.unwrap().is_ok());

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn timeout_heals_projection_from_server_snapshot() {
    let owner = OwnerId::new();
    let consumer = ConsumerId::new();
    let harness = start_consumer(consumer, FakeChannel::new()).await;
    let contested = server_slot(owner, 10);
    let free = server_slot(owner, 11);
    harness.api.put_slot(contested.clone());
    harness.api.put_slot(free.clone());

    wait_connected(&harness).await;
    harness.engine.watch_owner(owner).await.unwrap();
    let engine = harness.engine.clone();
    wait_until(Duration::from_secs(3), move || {
        let engine = engine.clone();
        async move { engine.available_slots(None).await.len() == 2 }
    })
    .await;

    // Another consumer wins server-side while our command goes unanswered.
    harness.api.mark_booked(contested.id);

    let outcome = harness.engine.reserve(contested.id).await;
    assert!(matches!(outcome, Err(ReserveError::Unresolved)));

    // The timeout-forced re-fetch reconciles the projection to server truth:
    // no orphan pending reservation, no duplicate, the contested slot booked.
    let engine = harness.engine.clone();
    let free_id = free.id;
    wait_until(Duration::from_secs(3), move || {
        let engine = engine.clone();
        async move {
            let available = engine.available_slots(None).await;
            available.len() == 1 && available[0].id == free_id
        }
    })
    .await;
    assert!(harness.engine.pending_reservation().await.is_none());
    let booked = harness.engine.booked_slots().await;
    assert_eq!(booked.len(), 1);
    assert_eq!(booked[0].id, contested.id);

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn concurrent_reserve_fails_fast_with_already_in_flight() {
    let owner = OwnerId::new();
    let consumer = ConsumerId::new();
    let harness = start_consumer(consumer, FakeChannel::new()).await;
    let first = server_slot(owner, 10);
    let second = server_slot(owner, 11);
    harness.api.put_slot(first.clone());
    harness.api.put_slot(second.clone());

    wait_connected(&harness).await;
    harness.engine.watch_owner(owner).await.unwrap();
    let engine = harness.engine.clone();
    wait_until(Duration::from_secs(3), move || {
        let engine = engine.clone();
        async move { engine.available_slots(None).await.len() == 2 }
    })
    .await;

    let reserving = {
        let engine = harness.engine.clone();
        let slot_id = first.id;
        tokio::spawn(async move { engine.reserve(slot_id).await })
    };
    let sink = harness.sink.clone();
    wait_until(Duration::from_secs(3), move || {
        let sink = sink.clone();
        async move { sink.reserve_count() == 1 }
    })
    .await;

    // Second attempt while the first is in flight: immediate caller error,
    // no state change, no second command.
    let outcome = harness.engine.reserve(second.id).await;
    assert!(matches!(outcome, Err(ReserveError::AlreadyInFlight)));
    assert_eq!(harness.sink.reserve_count(), 1);
    assert_eq!(harness.engine.available_slots(None).await.len(), 1);

    let _ = reserving.await.unwrap();
    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn reconnect_backs_off_and_repolls() {
    let owner = OwnerId::new();
    let consumer = ConsumerId::new();
    let channel = FakeChannel::failing_first(2);
    let harness = start_consumer(consumer, channel).await;
    let slot = server_slot(owner, 10);
    harness.api.put_slot(slot.clone());

    // The loop retries through the failures and lands connected.
    wait_connected(&harness).await;
    assert!(harness.channel.connect_attempts() >= 3);

    // The on-connect re-fetch pulls the scope snapshot once watching.
    harness.engine.watch_owner(owner).await.unwrap();
    let engine = harness.engine.clone();
    wait_until(Duration::from_secs(3), move || {
        let engine = engine.clone();
        async move { engine.available_slots(None).await.len() == 1 }
    })
    .await;

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_disruption() {
    let owner = OwnerId::new();
    let consumer = ConsumerId::new();
    let harness = start_consumer(consumer, FakeChannel::new()).await;

    wait_connected(&harness).await;
    harness.engine.watch_owner(owner).await.unwrap();

    harness.channel.send_frame("not json at all");
    harness.channel.send_frame(r#"{"kind":"mystery","payload":{}}"#);

    // A valid event after the garbage still applies.
    let slot = server_slot(owner, 10);
    harness.api.put_slot(slot.clone());
    harness
        .channel
        .send_event(&ServerEvent::SlotAdded { slot: slot.clone() });

    let engine = harness.engine.clone();
    wait_until(Duration::from_secs(3), move || {
        let engine = engine.clone();
        let expected = vec![slot.clone()];
        async move { engine.available_slots(None).await == expected }
    })
    .await;
    assert_eq!(
        harness.engine.connection_state().await,
        ConnectionState::Connected
    );

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn slot_count_hint_mismatch_heals_projection() {
    let owner = OwnerId::new();
    let consumer = ConsumerId::new();
    let harness = start_consumer(consumer, FakeChannel::new()).await;
    let kept = server_slot(owner, 10);
    let dropped = server_slot(owner, 11);
    harness.api.put_slot(kept.clone());
    harness.api.put_slot(dropped.clone());

    wait_connected(&harness).await;
    harness.engine.watch_owner(owner).await.unwrap();
    let engine = harness.engine.clone();
    wait_until(Duration::from_secs(3), move || {
        let engine = engine.clone();
        async move { engine.available_slots(None).await.len() == 2 }
    })
    .await;

    // The server lost a slot without an event reaching us; only the count
    // hint gives it away.
    harness.api.remove_slot(dropped.id);
    harness.channel.send_event(&ServerEvent::SlotCountHint {
        owner_id: owner,
        count: 1,
    });

    let engine = harness.engine.clone();
    let kept_id = kept.id;
    wait_until(Duration::from_secs(3), move || {
        let engine = engine.clone();
        async move {
            let available = engine.available_slots(None).await;
            available.len() == 1 && available[0].id == kept_id
        }
    })
    .await;

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn fresh_session_never_resurrects_stale_pending_state() {
    let owner = OwnerId::new();
    let consumer = ConsumerId::new();
    let channel = FakeChannel::new();
    let harness = start_consumer(consumer, channel.clone()).await;
    let slot = server_slot(owner, 10);
    harness.api.put_slot(slot.clone());

    wait_connected(&harness).await;
    harness.engine.watch_owner(owner).await.unwrap();
    let engine = harness.engine.clone();
    wait_until(Duration::from_secs(3), move || {
        let engine = engine.clone();
        async move { engine.available_slots(None).await.len() == 1 }
    })
    .await;

    // Leave a reservation dangling and tear the engine down mid-flight.
    let dangling = {
        let engine = harness.engine.clone();
        let slot_id = slot.id;
        tokio::spawn(async move { engine.reserve(slot_id).await })
    };
    let sink = harness.sink.clone();
    wait_until(Duration::from_secs(3), move || {
        let sink = sink.clone();
        async move { sink.reserve_count() == 1 }
    })
    .await;
    assert!(harness.engine.pending_reservation().await.is_some());
    harness.engine.shutdown().await.unwrap();
    let _ = dangling.await.unwrap();

    // A fresh session shares nothing with the old one.
    let fresh = start_consumer(consumer, channel).await;
    fresh.api.put_slot(slot.clone());
    wait_connected(&fresh).await;
    fresh.engine.watch_owner(owner).await.unwrap();
    assert!(fresh.engine.pending_reservation().await.is_none());

    let engine = fresh.engine.clone();
    wait_until(Duration::from_secs(3), move || {
        let engine = engine.clone();
        async move { engine.available_slots(None).await.len() == 1 }
    })
    .await;

    let reserving = {
        let engine = fresh.engine.clone();
        let slot_id = slot.id;
        tokio::spawn(async move { engine.reserve(slot_id).await })
    };
    let sink = fresh.sink.clone();
    wait_until(Duration::from_secs(3), move || {
        let sink = sink.clone();
        async move { sink.reserve_count() == 1 }
    })
    .await;
    let booking = confirmed_booking(slot.id, consumer);
    fresh.api.mark_booked(slot.id);
    fresh.api.put_booking(booking.clone());
    fresh
        .channel
        .send_event(&ServerEvent::BookingConfirmed { booking });
    assert!(reserving.await.unwrap().is_ok());

    fresh.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn owner_publish_reconciles_provisional_with_server_truth() {
    let owner = OwnerId::new();
    let harness = start_owner(owner).await;
    wait_connected(&harness).await;

    let published = harness
        .engine
        .publish_slot(date(), window(14))
        .await
        .unwrap();
    assert!(published.is_provisional());

    // Visible immediately under the provisional id.
    let engine = harness.engine.clone();
    wait_until(Duration::from_secs(3), move || {
        let engine = engine.clone();
        async move {
            let available = engine.available_slots(None).await;
            available.len() == 1 && available[0].id == published
        }
    })
    .await;
    assert!(matches!(
        harness.sink.commands().last(),
        Some(ClientCommand::PublishSlot { slot }) if slot.id == published
    ));

    // The server commits the slot under its own id; the scheduled re-fetch
    // replaces the provisional entry.
    let committed = Slot::new(SlotId::server(Uuid::new_v4()), owner, date(), window(14));
    harness.api.put_slot(committed.clone());

    let engine = harness.engine.clone();
    let committed_id = committed.id;
    wait_until(Duration::from_secs(3), move || {
        let engine = engine.clone();
        async move {
            let available = engine.available_slots(None).await;
            available.len() == 1 && available[0].id == committed_id
        }
    })
    .await;

    // Retraction mirrors the optimistic path (the server drops it too, so
    // the next poll cannot resurrect it).
    harness.api.remove_slot(committed.id);
    harness.engine.retract_slot(committed.id).await.unwrap();
    let engine = harness.engine.clone();
    wait_until(Duration::from_secs(3), move || {
        let engine = engine.clone();
        async move { engine.available_slots(None).await.is_empty() }
    })
    .await;
    assert!(matches!(
        harness.sink.commands().last(),
        Some(ClientCommand::RetractSlot { slot_id }) if *slot_id == committed.id
    ));

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn role_checks_guard_commands() {
    let owner = OwnerId::new();
    let harness = start_owner(owner).await;
    wait_connected(&harness).await;

    assert!(matches!(
        harness.engine.reserve(SlotId::server(Uuid::new_v4())).await,
        Err(ReserveError::NotAConsumer)
    ));
    assert!(harness.engine.watch_owner(OwnerId::new()).await.is_err());

    harness.engine.shutdown().await.unwrap();
}
