//! # Slotsync Runtime
//!
//! Runtime implementation for the slotsync engine.
//!
//! This crate provides the Store runtime that coordinates reducer execution
//! and effect handling.
//!
//! ## Core Components
//!
//! - **Store**: the runtime that manages state and executes effects
//! - **Effect executor**: executes effect descriptions and feeds actions back
//!   to the reducer
//! - **Retry**: exponential backoff with jitter for transient failures
//!
//! The Store is the mutual-exclusion boundary of the engine: the reducer runs
//! under the state write lock, so concurrent senders serialize and a reader
//! never observes a partially-applied mutation.
//!
//! ## Example
//!
//! ```ignore
//! use slotsync_runtime::Store;
//!
//! let store = Store::new(initial_state, my_reducer, environment);
//!
//! // Send an action
//! store.send(Action::DoSomething).await?;
//!
//! // Read state
//! let value = store.state(|s| s.some_field.clone()).await;
//! ```

use slotsync_core::effect::Effect;
use slotsync_core::reducer::{Effects, Reducer};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Notify, RwLock};

/// Retry logic with exponential backoff
pub mod retry;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// A task join error occurred during effect execution
        ///
        /// This typically means a spawned effect panicked.
        #[error("Task failed during effect execution: {0}")]
        TaskJoinError(#[from] tokio::task::JoinError),

        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for terminal action
        ///
        /// Returned by `send_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

/// Health check status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component is operational but experiencing issues (e.g., high DLQ size)
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    pub message: Option<String>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// A failed effect captured for later inspection
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Description of the failed work
    pub description: String,

    /// The error message
    pub error: String,

    /// When the failure was recorded
    pub failed_at: chrono::DateTime<chrono::Utc>,
}

/// Bounded queue of failed effects
///
/// Effect execution is fire-and-forget; when a spawned effect panics the
/// failure lands here instead of crashing the store. The queue is bounded:
/// the oldest entry is dropped when full.
#[derive(Debug, Clone)]
pub struct DeadLetterQueue {
    inner: Arc<Mutex<VecDeque<DeadLetter>>>,
    max_size: usize,
}

impl DeadLetterQueue {
    /// Create a queue holding at most `max_size` entries
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            max_size,
        }
    }

    /// Record a failure
    pub fn push(&self, description: impl Into<String>, error: impl Into<String>) {
        let letter = DeadLetter {
            description: description.into(),
            error: error.into(),
            failed_at: chrono::Utc::now(),
        };
        if let Ok(mut queue) = self.inner.lock() {
            if queue.len() >= self.max_size {
                queue.pop_front();
            }
            queue.push_back(letter);
        }
        metrics::counter!("store.dlq.pushed").increment(1);
    }

    /// Number of recorded failures
    ///
    /// # Panics
    ///
    /// Never panics in practice; a poisoned lock reports zero.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// True when no failures are recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of retained entries
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Remove and return all recorded failures
    #[must_use]
    pub fn drain(&self) -> Vec<DeadLetter> {
        self.inner
            .lock()
            .map(|mut q| q.drain(..).collect())
            .unwrap_or_default()
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Configuration for a [`Store`]
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Action broadcast channel capacity
    pub broadcast_capacity: usize,

    /// Maximum dead letter queue size
    pub dlq_max_size: usize,
}

impl StoreConfig {
    /// Set the action broadcast capacity
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Set the maximum dead letter queue size
    #[must_use]
    pub const fn with_dlq_max_size(mut self, size: usize) -> Self {
        self.dlq_max_size = size;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 64,
            dlq_max_size: 100,
        }
    }
}

/// Handle for waiting on the effects started by one `send`
///
/// `send()` returns after starting effect execution, not completion. The
/// handle resolves when every effect of that send (including feedback
/// actions they produced) has finished.
#[derive(Debug)]
pub struct EffectHandle {
    rx: Option<oneshot::Receiver<()>>,
}

impl EffectHandle {
    /// A handle whose effects already completed (no effects were produced)
    #[must_use]
    pub const fn completed() -> Self {
        Self { rx: None }
    }

    /// Wait for all effects to complete
    pub async fn wait(&mut self) {
        if let Some(rx) = self.rx.take() {
            // A dropped sender also means the effects are done.
            let _ = rx.await;
        }
    }

    /// Wait for all effects to complete, up to `timeout`
    ///
    /// # Errors
    ///
    /// Returns `Err(())` if the timeout elapses first.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), ()> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(()),
        }
    }
}

/// The Store runtime
///
/// The Store manages:
/// 1. State (behind `RwLock` for concurrent access)
/// 2. Reducer (business logic)
/// 3. Environment (injected dependencies)
/// 4. Effect execution (with feedback loop)
///
/// # Concurrency
///
/// - The reducer executes synchronously while holding a write lock
/// - Effects execute asynchronously in spawned tasks
/// - Multiple concurrent `send()` calls serialize at the reducer level
/// - Every reduced action is broadcast to observers, enabling
///   request/response waits via [`Store::send_and_wait_for`]
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    state: Arc<RwLock<S>>,
    reducer: R,
    environment: E,
    dlq: DeadLetterQueue,
    shutdown: Arc<AtomicBool>,
    shutdown_signal: Arc<Notify>,
    pending_effects: Arc<AtomicUsize>,
    action_broadcast: broadcast::Sender<A>,
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
    A: Send + Sync + Clone + std::fmt::Debug + 'static,
    S: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a new store with initial state, reducer, and environment
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self::with_config(initial_state, reducer, environment, StoreConfig::default())
    }

    /// Create a new store with custom configuration
    #[must_use]
    pub fn with_config(initial_state: S, reducer: R, environment: E, config: StoreConfig) -> Self {
        let (action_broadcast, _) = broadcast::channel(config.broadcast_capacity);

        Self {
            state: Arc::new(RwLock::new(initial_state)),
            reducer,
            environment,
            dlq: DeadLetterQueue::new(config.dlq_max_size),
            shutdown: Arc::new(AtomicBool::new(false)),
            shutdown_signal: Arc::new(Notify::new()),
            pending_effects: Arc::new(AtomicUsize::new(0)),
            action_broadcast,
        }
    }

    /// Get access to the dead letter queue
    #[must_use]
    pub fn dlq(&self) -> DeadLetterQueue {
        self.dlq.clone()
    }

    /// Perform a health check on the Store
    ///
    /// Degraded when the dead letter queue is over half full, unhealthy when
    /// it is full.
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        let dlq_size = self.dlq.len();
        let dlq_capacity = self.dlq.max_size();

        if dlq_size >= dlq_capacity {
            HealthCheck::unhealthy("store", "dead letter queue is full")
        } else if dlq_size * 2 > dlq_capacity {
            HealthCheck::degraded(
                "store",
                format!("dead letter queue at {dlq_size}/{dlq_capacity}"),
            )
        } else {
            HealthCheck::healthy("store")
        }
    }

    /// Send an action to the store
    ///
    /// This is the primary way to interact with the store:
    /// 1. Acquires write lock on state
    /// 2. Calls reducer with (state, action, environment)
    /// 3. Broadcasts the action to observers
    /// 4. Executes returned effects asynchronously
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting
    /// down.
    pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(StoreError::ShutdownInProgress);
        }

        metrics::counter!("store.send").increment(1);
        let effects = self.reduce_and_broadcast(action).await;

        if effects.is_empty() {
            return Ok(EffectHandle::completed());
        }

        let (tx, rx) = oneshot::channel();
        let store = self.clone();
        self.pending_effects.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            store.run_effects(effects).await;
            store.pending_effects.fetch_sub(1, Ordering::AcqRel);
            let _ = tx.send(());
        });

        Ok(EffectHandle { rx: Some(rx) })
    }

    /// Send an action and wait for a matching result action
    ///
    /// Designed for request/response flows: subscribe to the action
    /// broadcast BEFORE sending (avoids races), send the initial action, then
    /// wait for the first action matching the predicate. Matching actions may
    /// come from effect feedback or from any other sender (e.g. a transport
    /// pump delivering a server event).
    ///
    /// # Errors
    ///
    /// - [`StoreError::Timeout`]: timeout expired before a matching action
    /// - [`StoreError::ChannelClosed`]: the broadcast channel closed
    /// - [`StoreError::ShutdownInProgress`]: the store is shutting down
    pub async fn send_and_wait_for<F>(
        &self,
        action: A,
        predicate: F,
        timeout: Duration,
    ) -> Result<A, StoreError>
    where
        F: Fn(&A) -> bool,
    {
        let mut receiver = self.action_broadcast.subscribe();
        self.send(action).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(StoreError::Timeout);
            }

            match tokio::time::timeout(remaining, receiver.recv()).await {
                Ok(Ok(candidate)) => {
                    if predicate(&candidate) {
                        return Ok(candidate);
                    }
                },
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "action observer lagged behind broadcast");
                },
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(StoreError::ChannelClosed);
                },
                Err(_) => return Err(StoreError::Timeout),
            }
        }
    }

    /// Subscribe to all actions processed by the store
    #[must_use]
    pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
        self.action_broadcast.subscribe()
    }

    /// Read a value derived from the current state
    ///
    /// Takes a read lock; concurrent with effect execution but serialized
    /// against reducers.
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let guard = self.state.read().await;
        f(&guard)
    }

    /// Initiate graceful shutdown of the store
    ///
    /// Sets the shutdown flag (rejecting new actions), wakes any delay
    /// effects so they cancel instead of firing, and waits for running
    /// effects to finish.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if the timeout expires before
    /// all pending effects complete.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        tracing::info!("initiating store shutdown");
        metrics::counter!("store.shutdown").increment(1);

        self.shutdown.store(true, Ordering::Release);
        self.shutdown_signal.notify_waiters();

        let start = tokio::time::Instant::now();
        let poll_interval = Duration::from_millis(20);

        loop {
            let pending = self.pending_effects.load(Ordering::Acquire);
            if pending == 0 {
                tracing::debug!("all effects completed, shutdown done");
                return Ok(());
            }
            if start.elapsed() >= timeout {
                tracing::warn!(pending, "shutdown timed out with effects still running");
                return Err(StoreError::ShutdownTimeout(pending));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Reduce one action under the write lock and broadcast it.
    async fn reduce_and_broadcast(&self, action: A) -> Effects<A> {
        let effects = {
            let mut state = self.state.write().await;
            self.reducer.reduce(&mut state, action.clone(), &self.environment)
        };
        // An error only means there are no observers right now.
        let _ = self.action_broadcast.send(action);
        effects
    }

    /// Execute a batch of effects, joining spawned children.
    async fn run_effects(&self, effects: Effects<A>) {
        let mut handles = Vec::with_capacity(effects.len());
        for effect in effects {
            let store = self.clone();
            handles.push(tokio::spawn(
                async move { store.execute_effect(effect).await },
            ));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "effect task failed");
                self.dlq.push("effect", err.to_string());
            }
        }
    }

    /// Execute a single effect, feeding any produced action back into the
    /// reducer. Boxed for recursion through `Parallel`/`Sequential`.
    fn execute_effect(&self, effect: Effect<A>) -> Pin<Box<dyn Future<Output = ()> + Send>>
    where
        Self: Sized,
    {
        let store = self.clone();
        Box::pin(async move {
            match effect {
                Effect::None => {},
                Effect::Parallel(children) => {
                    let mut handles = Vec::with_capacity(children.len());
                    for child in children {
                        let store = store.clone();
                        handles.push(tokio::spawn(async move {
                            store.execute_effect(child).await;
                        }));
                    }
                    for handle in handles {
                        if let Err(err) = handle.await {
                            tracing::error!(error = %err, "parallel effect failed");
                            store.dlq.push("parallel effect", err.to_string());
                        }
                    }
                },
                Effect::Sequential(children) => {
                    for child in children {
                        store.execute_effect(child).await;
                    }
                },
                Effect::Delay { duration, action } => {
                    tokio::select! {
                        () = tokio::time::sleep(duration) => {
                            store.feedback(*action).await;
                        },
                        () = store.shutdown_signal.notified() => {
                            tracing::debug!("delay effect cancelled by shutdown");
                        },
                    }
                },
                Effect::Future(future) => {
                    if let Some(action) = future.await {
                        store.feedback(action).await;
                    }
                },
            }
        })
    }

    /// Feed an effect-produced action back into the reducer.
    ///
    /// Runs inline (within the surrounding effect task) so the pending-effect
    /// counter covers the whole feedback chain.
    async fn feedback(&self, action: A) {
        if self.shutdown.load(Ordering::Acquire) {
            tracing::debug!(?action, "dropping feedback action during shutdown");
            return;
        }
        let effects = self.reduce_and_broadcast(action).await;
        if !effects.is_empty() {
            self.run_effects(effects).await;
        }
    }
}

impl<S, A, E, R> Clone for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            reducer: self.reducer.clone(),
            environment: self.environment.clone(),
            dlq: self.dlq.clone(),
            shutdown: Arc::clone(&self.shutdown),
            shutdown_signal: Arc::clone(&self.shutdown_signal),
            pending_effects: Arc::clone(&self.pending_effects),
            action_broadcast: self.action_broadcast.clone(),
        }
    }
}
