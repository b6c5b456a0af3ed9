//! # Visitgate Core
//!
//! Shared abstractions for the visitgate admission crates.
//!
//! Every stateful part of the admission subsystem (capacity ledger, slot
//! allocator, credential issuer, queue manager) is written as a reducer:
//!
//! - **State**: owned, cloneable domain state for one aggregate
//! - **Action**: commands (requests) and events (facts) in one enum
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: a description of I/O for the runtime to perform
//! - **Environment**: injected dependencies (clock, event store, event bus)
//!
//! ## Example
//!
//! ```ignore
//! use visitgate_core::*;
//!
//! impl Reducer for LedgerReducer {
//!     type State = LedgerState;
//!     type Action = LedgerAction;
//!     type Environment = LedgerEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut LedgerState,
//!         action: LedgerAction,
//!         env: &LedgerEnvironment,
//!     ) -> SmallVec<[Effect<LedgerAction>; 4]> {
//!         // validate, apply, describe effects
//!         SmallVec::new()
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

pub mod event;
pub mod event_bus;
pub mod event_store;
pub mod stream;

mod effect_macros;

/// Reducer module - the trait every aggregate implements
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// A reducer validates an action against the current state, mutates the
    /// state in place, and returns descriptions of the side effects that
    /// should follow. It performs no I/O itself.
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for QueueReducer {
    ///     type State = QueueState;
    ///     type Action = QueueAction;
    ///     type Environment = QueueEnvironment;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut QueueState,
    ///         action: QueueAction,
    ///         env: &QueueEnvironment,
    ///     ) -> SmallVec<[Effect<QueueAction>; 4]> {
    ///         match action {
    ///             QueueAction::CallNext { category } => { /* ... */ }
    ///             _ => SmallVec::new(),
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// Most reducers produce at most a handful of effects (persist,
        /// publish), so the inline capacity of 4 avoids a heap allocation
        /// on the hot path.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - side effect descriptions
///
/// Effects are values returned by reducers. The runtime's `Store` executes
/// them after the state lock has been released.
pub mod effect {
    use crate::event::SerializedEvent;
    use crate::event_bus::{EventBus, EventBusError};
    use crate::event_store::{EventStore, EventStoreError};
    use crate::stream::{StreamId, Version};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::time::Duration;

    /// Callback invoked with the outcome of an operation.
    ///
    /// Returning `Some(action)` feeds that action back into the reducer.
    pub type Callback<T, Action> = Box<dyn FnOnce(T) -> Option<Action> + Send>;

    /// Effect type - describes a side effect to be executed
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Run effects sequentially
        Sequential(Vec<Effect<Action>>),

        /// Delayed action (for timeouts, retries)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),

        /// Event store operation (durable log)
        EventStore(EventStoreOperation<Action>),

        /// Event bus operation (notifications)
        PublishEvent(EventBusOperation<Action>),
    }

    /// Operations against an [`EventStore`].
    pub enum EventStoreOperation<Action> {
        /// Append events to a stream
        AppendEvents {
            /// Target store
            event_store: Arc<dyn EventStore>,
            /// Stream to append to
            stream_id: StreamId,
            /// Optimistic concurrency check (`None` appends unconditionally)
            expected_version: Option<Version>,
            /// Events to append, oldest first
            events: Vec<SerializedEvent>,
            /// Called with the new stream version
            on_success: Callback<Version, Action>,
            /// Called once retries are exhausted
            on_error: Callback<EventStoreError, Action>,
        },
    }

    /// Operations against an [`EventBus`].
    pub enum EventBusOperation<Action> {
        /// Publish one event to a topic
        Publish {
            /// Target bus
            event_bus: Arc<dyn EventBus>,
            /// Topic name
            topic: String,
            /// Event to publish
            event: SerializedEvent,
            /// Called after a successful publish
            on_success: Callback<(), Action>,
            /// Called once retries are exhausted
            on_error: Callback<EventBusError, Action>,
        },
    }

    // Manual Debug implementation since futures and callbacks don't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
                Effect::EventStore(EventStoreOperation::AppendEvents {
                    stream_id, events, ..
                }) => f
                    .debug_struct("Effect::EventStore::AppendEvents")
                    .field("stream_id", stream_id)
                    .field("events", &events.len())
                    .finish(),
                Effect::PublishEvent(EventBusOperation::Publish { topic, event, .. }) => f
                    .debug_struct("Effect::PublishEvent")
                    .field("topic", topic)
                    .field("event_type", &event.event_type)
                    .finish(),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// `true` for [`Effect::None`]
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Environment module - dependency injection traits
pub mod environment {
    use chrono::{DateTime, NaiveDate, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Production code uses [`SystemClock`]; tests use a fixed clock they
    /// can move across day boundaries.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;

        /// Current calendar date (UTC)
        fn today(&self) -> NaiveDate {
            self.now().date_naive()
        }
    }

    /// Wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
