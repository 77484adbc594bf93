//! Property tests for the slot store's merge rules.
//!
//! The store's two primitives (upsert, remove) are the only operations the
//! event stream and the snapshot path reduce to, so the convergence
//! guarantees live or die here: idempotence, commutativity of snapshot vs.
//! live event, and the single-confirmed-booking projection.

#![allow(clippy::unwrap_used)]

use chrono::{NaiveDate, NaiveTime};
use proptest::prelude::*;
use slotsync_engine::{
    Booking, BookingId, BookingStatus, ConsumerId, OwnerId, PaymentStatus, Slot, SlotId,
    SlotStore, TimeWindow,
};
use uuid::Uuid;

/// A bounded pool of identities so generated events collide often.
fn slot_id_strategy() -> impl Strategy<Value = SlotId> {
    (0u128..8).prop_map(|n| SlotId::server(Uuid::from_u128(n + 1)))
}

fn owner_strategy() -> impl Strategy<Value = OwnerId> {
    (0u128..3).prop_map(|n| OwnerId::from_uuid(Uuid::from_u128(0x1000 + n)))
}

fn consumer_strategy() -> impl Strategy<Value = ConsumerId> {
    (0u128..4).prop_map(|n| ConsumerId::from_uuid(Uuid::from_u128(0x2000 + n)))
}

fn slot_strategy() -> impl Strategy<Value = Slot> {
    (slot_id_strategy(), owner_strategy(), 1u32..28, 8u32..18, any::<bool>()).prop_map(
        |(id, owner, day, start_h, is_booked)| {
            let mut slot = Slot::new(
                id,
                owner,
                NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
                TimeWindow::new(
                    NaiveTime::from_hms_opt(start_h, 0, 0).unwrap(),
                    NaiveTime::from_hms_opt(start_h + 1, 0, 0).unwrap(),
                )
                .unwrap(),
            );
            slot.is_booked = is_booked;
            slot
        },
    )
}

fn booking_strategy() -> impl Strategy<Value = Booking> {
    (0u128..6, slot_id_strategy(), consumer_strategy()).prop_map(|(n, slot_id, consumer_id)| {
        Booking {
            id: BookingId::from_uuid(Uuid::from_u128(0x3000 + n)),
            slot_id,
            consumer_id,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Unpaid,
        }
    })
}

/// One event in the shape the reconciler reduces everything to.
#[derive(Clone, Debug)]
enum StoreEvent {
    SlotAdded(Slot),
    SlotRemoved(SlotId),
    BookingConfirmed(Booking),
}

fn event_strategy() -> impl Strategy<Value = StoreEvent> {
    prop_oneof![
        slot_strategy().prop_map(StoreEvent::SlotAdded),
        slot_id_strategy().prop_map(StoreEvent::SlotRemoved),
        booking_strategy().prop_map(StoreEvent::BookingConfirmed),
    ]
}

fn apply(store: &mut SlotStore, event: &StoreEvent) {
    match event {
        StoreEvent::SlotAdded(slot) => store.upsert_slot(slot.clone()),
        StoreEvent::SlotRemoved(id) => {
            store.remove_slot(id);
        },
        StoreEvent::BookingConfirmed(booking) => {
            store.mark_booked(&booking.slot_id);
            store.upsert_booking(booking.clone());
        },
    }
}

fn observable(store: &SlotStore) -> (Vec<Slot>, Vec<Slot>, Vec<Booking>) {
    (
        store.list_available(None),
        store.list_booked(),
        store.all_bookings(),
    )
}

proptest! {
    /// For all event sequences, at most one confirmed booking exists per
    /// slot id.
    #[test]
    fn no_double_booking_projection(events in proptest::collection::vec(event_strategy(), 0..40)) {
        let mut store = SlotStore::new();
        for event in &events {
            apply(&mut store, event);
        }

        let confirmed: Vec<_> = store
            .all_bookings()
            .into_iter()
            .filter(|b| b.status == BookingStatus::Confirmed)
            .collect();
        for booking in &confirmed {
            let same_slot = confirmed.iter().filter(|b| b.slot_id == booking.slot_id).count();
            prop_assert_eq!(same_slot, 1, "slot {} has {} confirmed bookings", booking.slot_id, same_slot);
        }
    }

    /// Applying the same event twice yields the same store state as applying
    /// it once, at any point in any sequence.
    #[test]
    fn event_application_is_idempotent(
        prefix in proptest::collection::vec(event_strategy(), 0..20),
        event in event_strategy(),
    ) {
        let mut once = SlotStore::new();
        for e in &prefix {
            apply(&mut once, e);
        }
        apply(&mut once, &event);

        let mut twice = SlotStore::new();
        for e in &prefix {
            apply(&mut twice, e);
        }
        apply(&mut twice, &event);
        apply(&mut twice, &event);

        prop_assert_eq!(observable(&once), observable(&twice));
    }

    /// A snapshot upsert and a live booking event for the same slot converge
    /// to the same state in either order.
    #[test]
    fn snapshot_and_booking_event_commute(slot in slot_strategy(), booking in booking_strategy()) {
        let mut snapshot_slot = slot.clone();
        snapshot_slot.is_booked = false;
        let booking = Booking { slot_id: slot.id, ..booking };

        let mut event_first = SlotStore::new();
        apply(&mut event_first, &StoreEvent::BookingConfirmed(booking.clone()));
        event_first.upsert_slot(snapshot_slot.clone());

        let mut snapshot_first = SlotStore::new();
        snapshot_first.upsert_slot(snapshot_slot);
        apply(&mut snapshot_first, &StoreEvent::BookingConfirmed(booking));

        prop_assert_eq!(observable(&event_first), observable(&snapshot_first));
    }

    /// Removal is idempotent and commutes with itself.
    #[test]
    fn removal_is_idempotent(slot in slot_strategy()) {
        let mut store = SlotStore::new();
        store.upsert_slot(slot.clone());
        store.remove_slot(&slot.id);
        let after_one = observable(&store);
        store.remove_slot(&slot.id);
        prop_assert_eq!(after_one, observable(&store));
    }
}
