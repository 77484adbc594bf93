//! # Slotsync Testing
//!
//! Testing utilities and helpers for the slotsync engine.
//!
//! Provides [`ReducerTest`], a fluent Given/When/Then harness for reducer
//! unit tests, plus effect assertions. Reducers are pure, so these tests run
//! synchronously with no runtime.
//!
//! # Example
//!
//! ```ignore
//! use slotsync_testing::{assertions, ReducerTest};
//!
//! ReducerTest::new(SyncReducer::new())
//!     .with_env(test_environment())
//!     .given_state(EngineState::new(participant))
//!     .when_action(SyncAction::SlotAdded { slot })
//!     .then_state(|state| assert_eq!(state.store.list_available(None).len(), 1))
//!     .then_effects(assertions::assert_no_effects)
//!     .run();
//! ```


pub use reducer_test::{assertions, ReducerTest};
