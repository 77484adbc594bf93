//! The Slot Store: the engine's best-known projection of slots and bookings.
//!
//! All mutation methods are designed to commute and to be idempotent, because
//! they are driven from two racing sources — the live event stream and
//! point-in-time snapshot fetches — with no ordering guarantee between them.
//! Atomicity with respect to readers comes from the runtime `Store` lock; the
//! methods here are plain synchronous state transitions.

use crate::types::{Booking, BookingId, BookingStatus, ConsumerId, OwnerId, PaymentStatus, Slot, SlotId};
use std::collections::HashMap;

/// The authoritative local projection of slot and booking entities
#[derive(Clone, Debug, Default)]
pub struct SlotStore {
    slots: HashMap<SlotId, Slot>,
    bookings: HashMap<BookingId, Booking>,
}

impl SlotStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge a slot
    ///
    /// Insert if absent. If present, confirmed attributes win over a stale
    /// re-insert: a slot the server has committed as booked is never
    /// un-booked by an older snapshot (booked-ness is monotonic), so applying
    /// a live `bookingConfirmed` and a pre-booking snapshot in either order
    /// converges to the same state. The rule also consults the booking
    /// projection, covering the order where the booking landed before the
    /// slot itself was ever seen.
    pub fn upsert_slot(&mut self, mut slot: Slot) {
        if self.has_confirmed_booking(&slot.id) {
            slot.is_booked = true;
        }
        match self.slots.get_mut(&slot.id) {
            Some(existing) => {
                let was_booked = existing.is_booked;
                *existing = slot;
                existing.is_booked |= was_booked;
            },
            None => {
                self.slots.insert(slot.id, slot);
            },
        }
    }

    fn has_confirmed_booking(&self, slot_id: &SlotId) -> bool {
        self.bookings
            .values()
            .any(|b| b.slot_id == *slot_id && b.status == BookingStatus::Confirmed)
    }

    /// Remove a slot; removing an absent id is a no-op, not an error
    ///
    /// Returns the removed slot so an optimistic removal can be restored
    /// verbatim on rollback.
    pub fn remove_slot(&mut self, id: &SlotId) -> Option<Slot> {
        self.slots.remove(id)
    }

    /// Mark a slot booked in place; true if the slot was present
    pub fn mark_booked(&mut self, id: &SlotId) -> bool {
        match self.slots.get_mut(id) {
            Some(slot) => {
                slot.is_booked = true;
                true
            },
            None => false,
        }
    }

    /// Look up a slot
    #[must_use]
    pub fn slot(&self, id: &SlotId) -> Option<&Slot> {
        self.slots.get(id)
    }

    /// Insert or merge a booking, converging toward server truth
    ///
    /// Status never moves backwards on the same booking (a stale snapshot
    /// cannot demote `confirmed` to `pending`), paid-ness is sticky, and
    /// confirming a booking cancels any other non-canceled booking projected
    /// for the same slot — the server allows at most one.
    pub fn upsert_booking(&mut self, booking: Booking) {
        let id = booking.id;
        match self.bookings.get_mut(&id) {
            Some(existing) => {
                let paid = existing.payment_status == PaymentStatus::Paid
                    || booking.payment_status == PaymentStatus::Paid;
                if booking.status.rank() >= existing.status.rank() {
                    *existing = booking;
                }
                if paid {
                    existing.payment_status = PaymentStatus::Paid;
                }
            },
            None => {
                self.bookings.insert(id, booking);
            },
        }

        // The stored (merged) entry decides: a booking that lands confirmed
        // supersedes every other non-canceled booking for its slot. A stale
        // duplicate that lost the merge supersedes nothing.
        let confirmed_slot = self
            .bookings
            .get(&id)
            .filter(|b| b.status == BookingStatus::Confirmed)
            .map(|b| b.slot_id);
        if let Some(slot_id) = confirmed_slot {
            for other in self.bookings.values_mut() {
                if other.slot_id == slot_id && other.id != id && other.status != BookingStatus::Canceled
                {
                    tracing::debug!(
                        superseded = %other.id,
                        winner = %id,
                        slot = %slot_id,
                        "superseding conflicting booking projection"
                    );
                    other.status = BookingStatus::Canceled;
                }
            }
        }
    }

    /// Remove a booking; absent ids are a no-op
    pub fn remove_booking(&mut self, id: &BookingId) {
        self.bookings.remove(id);
    }

    /// Unbooked slots, optionally filtered by date, in `(date, start, id)`
    /// order — a stable, total order for deterministic reads
    #[must_use]
    pub fn list_available(&self, date: Option<chrono::NaiveDate>) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self
            .slots
            .values()
            .filter(|slot| !slot.is_booked)
            .filter(|slot| date.is_none_or(|d| slot.date == d))
            .cloned()
            .collect();
        slots.sort_by_key(Slot::ordering_key);
        slots
    }

    /// Booked slots in the same `(date, start, id)` order (owner view)
    #[must_use]
    pub fn list_booked(&self) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self
            .slots
            .values()
            .filter(|slot| slot.is_booked)
            .cloned()
            .collect();
        slots.sort_by_key(Slot::ordering_key);
        slots
    }

    /// A consumer's bookings, any status, in stable id order
    #[must_use]
    pub fn bookings_for(&self, consumer_id: ConsumerId) -> Vec<Booking> {
        let mut bookings: Vec<Booking> = self
            .bookings
            .values()
            .filter(|booking| booking.consumer_id == consumer_id)
            .cloned()
            .collect();
        bookings.sort_by_key(|booking| booking.id);
        bookings
    }

    /// All bookings, in stable id order
    #[must_use]
    pub fn all_bookings(&self) -> Vec<Booking> {
        let mut bookings: Vec<Booking> = self.bookings.values().cloned().collect();
        bookings.sort_by_key(|booking| booking.id);
        bookings
    }

    /// Count of an owner's slots, for `slotCountHint` comparison
    #[must_use]
    pub fn slot_count_for(&self, owner_id: OwnerId) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.owner_id == owner_id)
            .count()
    }

    /// Ids of an owner's slots, for snapshot diffing
    #[must_use]
    pub fn slot_ids_for(&self, owner_id: OwnerId) -> Vec<SlotId> {
        self.slots
            .values()
            .filter(|slot| slot.owner_id == owner_id)
            .map(|slot| slot.id)
            .collect()
    }

    /// Find an owner's provisional slot matching a server slot's shape
    ///
    /// Used to replace an optimistic publish with its server-confirmed twin.
    #[must_use]
    pub fn provisional_twin(&self, slot: &Slot) -> Option<SlotId> {
        self.slots
            .values()
            .filter(|candidate| candidate.id.is_provisional())
            .find(|candidate| {
                candidate.owner_id == slot.owner_id
                    && candidate.date == slot.date
                    && candidate.window == slot.window
            })
            .map(|candidate| candidate.id)
    }

    /// Drop all provisional slots for an owner
    ///
    /// Called when a fresh snapshot for that owner lands: server truth
    /// replaces every optimistic placeholder.
    pub fn drop_provisional_for(&mut self, owner_id: OwnerId) {
        self.slots
            .retain(|id, slot| !(id.is_provisional() && slot.owner_id == owner_id));
    }

    /// Drop every slot (scope change); bookings are kept
    pub fn clear_slots(&mut self) {
        self.slots.clear();
    }
}
