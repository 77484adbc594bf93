//! Slot synchronization engine
//!
//! A client-side engine that keeps a locally-optimistic projection of a
//! shared, highly contended resource — bookable time slots — correctly
//! converging to server truth under concurrent, out-of-order, and possibly
//! lost events.
//!
//! # Architecture
//!
//! ```text
//!                       ┌──────────────────────┐
//!   queries/commands ──▶│      SyncEngine      │ (composition root)
//!                       └──────────┬───────────┘
//!                                  │
//!            ┌─────────────────────┼──────────────────────┐
//!            ▼                     ▼                      ▼
//!   ┌────────────────┐   ┌─────────────────┐    ┌──────────────────┐
//!   │ Reconnecting   │   │  Store runtime  │    │   Consistency    │
//!   │ event channel  │──▶│  (SyncReducer   │◀───│      poller      │
//!   │ (backoff loop) │   │ over SlotStore) │    │ (interval + on   │
//!   └────────────────┘   └─────────────────┘    │    reconnect)    │
//!            │                     │            └──────────────────┘
//!            ▼                     ▼
//!      wire decode          effects: send command,
//!   (malformed → drop)      arm timeout, fetch snapshot
//! ```
//!
//! # Key properties
//!
//! - **Events are hints.** Delivery is at-least-once at best, unordered at
//!   worst; every reducer arm is idempotent, and snapshot application
//!   commutes with live events.
//! - **Optimism is reversible.** A reservation removes its slot from the
//!   available projection immediately, but the removal is a latency hide,
//!   not a correctness mechanism: rejection restores it, a timeout forces a
//!   re-sync, and the server remains the sole arbiter of who won a slot.
//! - **Divergence heals.** A low-frequency poller re-fetches the full scope
//!   snapshot on an interval and after every reconnect, diffing it into the
//!   projection without ever touching the slot covered by an in-flight
//!   reservation.
//!
//! # Usage
//!
//! ```ignore
//! use slotsync_engine::{EngineConfig, Participant, SyncEngine};
//!
//! let engine = SyncEngine::start(
//!     EngineConfig::from_env(),
//!     Participant::Consumer(consumer_id),
//!     channel,   // Arc<dyn EventChannel>
//!     commands,  // Arc<dyn CommandSink>
//!     api,       // Arc<dyn SlotApi>
//! )
//! .await?;
//!
//! engine.watch_owner(owner_id).await?;
//! let slots = engine.available_slots(None).await;
//! let booking = engine.reserve(slots[0].id).await?;
//! engine.shutdown().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod poller;
pub mod reconciler;
pub mod store;
pub mod transport;
pub mod types;
pub mod wire;

pub use config::EngineConfig;
pub use engine::SyncEngine;
pub use error::{EngineError, ReserveError};
pub use reconciler::{EngineState, SyncAction, SyncEnvironment, SyncReducer, SyncStore};
pub use store::SlotStore;
pub use transport::{CommandSink, EventChannel, FrameStream, SlotApi, TransportError};
pub use types::*;
pub use wire::{ClientCommand, ServerEvent, WireError};
