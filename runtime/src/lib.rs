//! # Visitgate Runtime
//!
//! The [`Store`] that hosts one admission aggregate: it owns the state, runs
//! the reducer under a write lock and executes the returned effects.
//!
//! ## Ordering
//!
//! Each store has a single background effect worker fed by an unbounded
//! channel. Effects are enqueued while the state lock is still held, so the
//! order in which events reach the event store matches the order in which
//! the reducer accepted the commands that produced them.
//!
//! ## Example
//!
//! ```ignore
//! use visitgate_runtime::Store;
//!
//! let store = Store::new(LedgerState::default(), LedgerReducer, env);
//!
//! let rejection = store
//!     .send_and_read(LedgerAction::TryReserve { date, category }, |s| s.last_error.clone())
//!     .await?;
//!
//! store.settle().await;
//! ```

use visitgate_core::{effect::Effect, reducer::Reducer};

/// Retry logic with exponential backoff
pub mod retry;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// The effect worker is gone, so effects can no longer be executed
        #[error("Effect worker stopped")]
        WorkerStopped,
    }
}

pub use error::StoreError;
pub use retry::RetryPolicy;

/// Store module - the runtime for a single reducer
pub mod store {
    use super::{Effect, Reducer, RetryPolicy, StoreError, retry};
    use futures::future::{BoxFuture, join_all};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Weak};
    use std::time::Duration;
    use tokio::sync::{Notify, RwLock, mpsc};
    use visitgate_core::effect::{EventBusOperation, EventStoreOperation};

    struct Shared<S, A, E, R> {
        state: RwLock<S>,
        reducer: R,
        environment: E,
        retry_policy: RetryPolicy,
        effects: mpsc::UnboundedSender<Effect<A>>,
        /// Effects enqueued or spawned but not yet finished.
        pending: AtomicUsize,
        idle: Notify,
        shutdown: AtomicBool,
    }

    /// The Store - runtime coordinator for a reducer
    ///
    /// Cloning a store is cheap and every clone refers to the same state.
    /// Actions sent to one store are reduced one at a time, which makes
    /// every command on the aggregate linearizable.
    ///
    /// # Type Parameters
    ///
    /// - `S`: State type
    /// - `A`: Action type
    /// - `E`: Environment type
    /// - `R`: Reducer implementation
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        shared: Arc<Shared<S, A, E, R>>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a new store with the default retry policy.
        ///
        /// Must be called from within a Tokio runtime: the effect worker is
        /// spawned here.
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_retry_policy(initial_state, reducer, environment, RetryPolicy::default())
        }

        /// Create a new store with a custom retry policy for persistence
        /// and publication effects.
        #[must_use]
        pub fn with_retry_policy(
            initial_state: S,
            reducer: R,
            environment: E,
            retry_policy: RetryPolicy,
        ) -> Self {
            let (effects, receiver) = mpsc::unbounded_channel();
            let shared = Arc::new(Shared {
                state: RwLock::new(initial_state),
                reducer,
                environment,
                retry_policy,
                effects,
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
                shutdown: AtomicBool::new(false),
            });

            tokio::spawn(run_effect_worker(Arc::downgrade(&shared), receiver));

            Self { shared }
        }

        /// Send an action to the store.
        ///
        /// The reducer runs under the write lock; its effects are queued for
        /// the background worker before the lock is released.
        ///
        /// # Errors
        ///
        /// - [`StoreError::ShutdownInProgress`]: `shutdown` has been called
        /// - [`StoreError::WorkerStopped`]: the effect worker has exited
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<(), StoreError> {
            self.send_and_read(action, |_| ()).await
        }

        /// Send an action and read the resulting state under the same lock.
        ///
        /// No other action can run between the reducer and `read`, so the
        /// caller sees exactly the outcome of its own action.
        ///
        /// # Errors
        ///
        /// Same as [`Store::send`].
        pub async fn send_and_read<F, T>(&self, action: A, read: F) -> Result<T, StoreError>
        where
            F: FnOnce(&S) -> T,
        {
            if self.shared.shutdown.load(Ordering::Acquire) {
                return Err(StoreError::ShutdownInProgress);
            }

            let mut state = self.shared.state.write().await;
            let effects = self
                .shared
                .reducer
                .reduce(&mut state, action, &self.shared.environment);

            for effect in effects {
                if effect.is_none() {
                    continue;
                }
                self.enqueue(effect)?;
            }

            Ok(read(&state))
        }

        /// Read from the current state.
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.shared.state.read().await;
            f(&state)
        }

        /// Wait until every queued effect, and every action those effects
        /// fed back, has finished.
        pub async fn settle(&self) {
            loop {
                let notified = self.shared.idle.notified();
                if self.shared.pending.load(Ordering::Acquire) == 0 {
                    return;
                }
                notified.await;
            }
        }

        /// Stop accepting actions and wait for in-flight effects.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if effects are still
        /// running when `timeout` elapses.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            tracing::info!("Initiating graceful shutdown");
            self.shared.shutdown.store(true, Ordering::Release);

            if tokio::time::timeout(timeout, self.settle()).await.is_ok() {
                tracing::info!("All effects completed, shutdown successful");
                Ok(())
            } else {
                let pending = self.shared.pending.load(Ordering::Acquire);
                tracing::error!(pending_effects = pending, "Shutdown timed out");
                Err(StoreError::ShutdownTimeout(pending))
            }
        }

        /// Number of effects not yet finished.
        #[must_use]
        pub fn pending_effects(&self) -> usize {
            self.shared.pending.load(Ordering::Acquire)
        }

        fn enqueue(&self, effect: Effect<A>) -> Result<(), StoreError> {
            self.shared.pending.fetch_add(1, Ordering::AcqRel);
            if self.shared.effects.send(effect).is_err() {
                self.finish_one();
                tracing::error!("Effect worker stopped, dropping effect");
                return Err(StoreError::WorkerStopped);
            }
            Ok(())
        }

        fn finish_one(&self) {
            if self.shared.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                self.shared.idle.notify_waiters();
            }
        }

        async fn feed_back(&self, action: Option<A>) {
            let Some(action) = action else {
                return;
            };
            if let Err(error) = self.send(action).await {
                tracing::warn!(error = %error, "Dropped action produced by an effect");
            }
        }

        /// Execute one effect tree.
        ///
        /// Persistence and publication run inline so the worker preserves
        /// their order. `Future` and `Delay` effects are spawned.
        fn execute(&self, effect: Effect<A>) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                match effect {
                    Effect::None => {
                        metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                    },
                    Effect::Parallel(effects) => {
                        metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                        join_all(effects.into_iter().map(|effect| self.execute(effect))).await;
                    },
                    Effect::Sequential(effects) => {
                        metrics::counter!("store.effects.executed", "type" => "sequential").increment(1);
                        for effect in effects {
                            self.execute(effect).await;
                        }
                    },
                    Effect::Future(future) => {
                        metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                        let store = self.clone();
                        self.spawn_tracked(async move {
                            store.feed_back(future.await).await;
                        });
                    },
                    Effect::Delay { duration, action } => {
                        metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                        let store = self.clone();
                        self.spawn_tracked(async move {
                            tokio::time::sleep(duration).await;
                            store.feed_back(Some(*action)).await;
                        });
                    },
                    Effect::EventStore(operation) => {
                        metrics::counter!("store.effects.executed", "type" => "event_store").increment(1);
                        self.execute_event_store(operation).await;
                    },
                    Effect::PublishEvent(operation) => {
                        metrics::counter!("store.effects.executed", "type" => "publish_event").increment(1);
                        self.execute_publish(operation).await;
                    },
                }
            })
        }

        async fn execute_event_store(&self, operation: EventStoreOperation<A>) {
            let EventStoreOperation::AppendEvents {
                event_store,
                stream_id,
                expected_version,
                events,
                on_success,
                on_error,
            } = operation;

            let count = events.len();
            let result = retry::retry_with_predicate(
                &self.shared.retry_policy,
                "append_events",
                || event_store.append_events(stream_id.clone(), expected_version, events.clone()),
                visitgate_core::event_store::EventStoreError::is_transient,
            )
            .await;

            let next = match result {
                Ok(version) => {
                    tracing::debug!(stream = %stream_id, events = count, version = %version, "Events appended");
                    on_success(version)
                },
                Err(error) => {
                    tracing::error!(stream = %stream_id, error = %error, "Failed to append events");
                    on_error(error)
                },
            };
            self.feed_back(next).await;
        }

        async fn execute_publish(&self, operation: EventBusOperation<A>) {
            let EventBusOperation::Publish {
                event_bus,
                topic,
                event,
                on_success,
                on_error,
            } = operation;

            let result = retry::retry_with_backoff(&self.shared.retry_policy, "publish_event", || {
                event_bus.publish(&topic, &event)
            })
            .await;

            let next = match result {
                Ok(()) => {
                    tracing::trace!(topic = %topic, event_type = %event.event_type, "Event published");
                    on_success(())
                },
                Err(error) => {
                    tracing::error!(topic = %topic, error = %error, "Failed to publish event");
                    on_error(error)
                },
            };
            self.feed_back(next).await;
        }

        fn spawn_tracked<F>(&self, future: F)
        where
            F: std::future::Future<Output = ()> + Send + 'static,
        {
            self.shared.pending.fetch_add(1, Ordering::AcqRel);
            let store = self.clone();
            tokio::spawn(async move {
                future.await;
                store.finish_one();
            });
        }
    }

    async fn run_effect_worker<S, A, E, R>(
        shared: Weak<Shared<S, A, E, R>>,
        mut receiver: mpsc::UnboundedReceiver<Effect<A>>,
    ) where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        while let Some(effect) = receiver.recv().await {
            let Some(shared) = shared.upgrade() else {
                break;
            };
            let store = Store { shared };
            store.execute(effect).await;
            store.finish_one();
        }
        tracing::debug!("Effect worker exiting");
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        fn clone(&self) -> Self {
            Self {
                shared: Arc::clone(&self.shared),
            }
        }
    }
}

pub use store::Store;
