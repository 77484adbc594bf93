//! In-memory transport fakes shared by the engine integration tests.

#![allow(clippy::unwrap_used, dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use slotsync_engine::{
    Booking, BookingId, ClientCommand, ConsumerId, EngineConfig, EventChannel, FrameStream,
    OrderRef, Owner, OwnerId, Participant, PaymentProof, PaymentStatus, ServerEvent, Slot,
    CommandSink, SlotApi, TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Opt into log output for a test run (`RUST_LOG=debug cargo test`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine config with test-sized timeouts.
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_reserve_timeout(Duration::from_millis(150))
        .with_poll_interval(Duration::from_millis(250))
        .with_publish_refetch_delay(Duration::from_millis(50))
        .with_reconnect_delays(Duration::from_millis(10), Duration::from_millis(100))
        .with_shutdown_timeout(Duration::from_secs(1))
}

/// Poll `check` until it passes or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// An in-memory event channel.
///
/// Every successful `connect` subscribes to the same frame feed; the first
/// `fail_connects` attempts are refused, which drives the reconnect loop in
/// tests.
pub struct FakeChannel {
    frames: broadcast::Sender<String>,
    fail_connects: AtomicUsize,
    connects: AtomicUsize,
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        let (frames, _) = broadcast::channel(64);
        Arc::new(Self {
            frames,
            fail_connects: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn failing_first(attempts: usize) -> Arc<Self> {
        let channel = Self::new();
        channel.fail_connects.store(attempts, Ordering::SeqCst);
        channel
    }

    /// Number of connection attempts observed.
    pub fn connect_attempts(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Push a raw frame to every live connection.
    pub fn send_frame(&self, frame: impl Into<String>) {
        let _ = self.frames.send(frame.into());
    }

    /// Push a typed event to every live connection.
    pub fn send_event(&self, event: &ServerEvent) {
        self.send_frame(serde_json::to_string(event).unwrap());
    }
}

#[async_trait]
impl EventChannel for FakeChannel {
    async fn connect(&self, _participant: Participant) -> Result<FrameStream, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::ConnectFailed("refused by fake".into()));
        }

        let rx = self.frames.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => return Some((Ok(frame), rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => {},
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed();
        Ok(stream)
    }
}

/// A command sink that records everything it is handed.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<ClientCommand>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn commands(&self) -> Vec<ClientCommand> {
        self.sent.lock().unwrap().clone()
    }

    pub fn reserve_count(&self) -> usize {
        self.commands()
            .iter()
            .filter(|c| matches!(c, ClientCommand::Reserve { .. }))
            .count()
    }
}

#[async_trait]
impl CommandSink for RecordingSink {
    async fn send(&self, command: ClientCommand) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(command);
        Ok(())
    }
}

/// A snapshot API backed by mutable in-memory server state.
#[derive(Default)]
pub struct FakeApi {
    pub owners: Mutex<Vec<Owner>>,
    pub slots: Mutex<Vec<Slot>>,
    pub bookings: Mutex<Vec<Booking>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_slot(&self, slot: Slot) {
        let mut slots = self.slots.lock().unwrap();
        slots.retain(|s| s.id != slot.id);
        slots.push(slot);
    }

    pub fn remove_slot(&self, id: slotsync_engine::SlotId) {
        self.slots.lock().unwrap().retain(|s| s.id != id);
    }

    pub fn mark_booked(&self, id: slotsync_engine::SlotId) {
        for slot in self.slots.lock().unwrap().iter_mut() {
            if slot.id == id {
                slot.is_booked = true;
            }
        }
    }

    pub fn put_booking(&self, booking: Booking) {
        let mut bookings = self.bookings.lock().unwrap();
        bookings.retain(|b| b.id != booking.id);
        bookings.push(booking);
    }
}

#[async_trait]
impl SlotApi for FakeApi {
    async fn list_owners(&self) -> Result<Vec<Owner>, TransportError> {
        Ok(self.owners.lock().unwrap().clone())
    }

    async fn fetch_slots(
        &self,
        owner_id: OwnerId,
        date: Option<chrono::NaiveDate>,
    ) -> Result<Vec<Slot>, TransportError> {
        Ok(self
            .slots
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.owner_id == owner_id)
            .filter(|s| date.is_none_or(|d| s.date == d))
            .cloned()
            .collect())
    }

    async fn fetch_bookings(&self, consumer_id: ConsumerId) -> Result<Vec<Booking>, TransportError> {
        Ok(self
            .bookings
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.consumer_id == consumer_id)
            .cloned()
            .collect())
    }

    async fn create_payment_order(
        &self,
        booking_id: BookingId,
        _amount_cents: u64,
        _currency: &str,
    ) -> Result<OrderRef, TransportError> {
        Ok(OrderRef(format!("order-{booking_id}")))
    }

    async fn verify_payment(
        &self,
        _order: OrderRef,
        _proof: PaymentProof,
    ) -> Result<PaymentStatus, TransportError> {
        Ok(PaymentStatus::Paid)
    }
}
