//! Declarative macros for building persistence and notification effects.
//!
//! Every admission aggregate ends a successful command the same way: append
//! the event to its stream, then publish a notification. These macros keep
//! that boilerplate out of the reducers.

/// Create an `Effect::EventStore` with an `AppendEvents` operation
///
/// # Example
///
/// ```rust,ignore
/// use visitgate_core::append_events;
///
/// append_events! {
///     store: env.event_store,
///     stream: "capacity-ledger",
///     expected_version: None,
///     events: vec![serialized],
///     on_success: |_version| None,
///     on_error: |error| Some(LedgerAction::PersistenceFailed { error: error.to_string() })
/// }
/// ```
#[macro_export]
macro_rules! append_events {
    (
        store: $store:expr,
        stream: $stream:expr,
        expected_version: $expected:expr,
        events: $events:expr,
        on_success: |$success_param:ident| $success_body:expr,
        on_error: |$error_param:ident| $error_body:expr
    ) => {
        $crate::effect::Effect::EventStore(
            $crate::effect::EventStoreOperation::AppendEvents {
                event_store: ::std::sync::Arc::clone(&$store),
                stream_id: $crate::stream::StreamId::new($stream),
                expected_version: $expected,
                events: $events,
                on_success: ::std::boxed::Box::new(move |$success_param| $success_body),
                on_error: ::std::boxed::Box::new(move |$error_param| $error_body),
            }
        )
    };
}

/// Create an `Effect::PublishEvent` operation
///
/// # Example
///
/// ```rust,ignore
/// use visitgate_core::publish_event;
///
/// publish_event! {
///     bus: env.event_bus,
///     topic: "visit-notifications",
///     event: serialized,
///     on_success: || None,
///     on_error: |error| Some(QueueAction::PersistenceFailed { error: error.to_string() })
/// }
/// ```
#[macro_export]
macro_rules! publish_event {
    (
        bus: $bus:expr,
        topic: $topic:expr,
        event: $event:expr,
        on_success: || $success_body:expr,
        on_error: |$error_param:ident| $error_body:expr
    ) => {
        $crate::effect::Effect::PublishEvent(
            $crate::effect::EventBusOperation::Publish {
                event_bus: ::std::sync::Arc::clone(&$bus),
                topic: $topic.to_string(),
                event: $event,
                on_success: ::std::boxed::Box::new(move |()| $success_body),
                on_error: ::std::boxed::Box::new(move |$error_param| $error_body),
            }
        )
    };
}
