//! Domain events and their in-process delivery.
//!
//! - [`Event`] / [`EventKinds`]: typed domain events and tagged decoding with an
//!   explicit unknown variant
//! - [`EventEnvelope`]: an appended event with its stream metadata
//! - [`ChangeNotifier`] / [`ChangeHandler`]: the batch-of-events notification
//!   raised by a store after every successful append
//! - [`EventRelay`]: partitions batches per stream, checks contiguity and hands
//!   ordered streams to [`StreamHandler`]s with per-stream failure isolation
//! - [`NotificationProducer`]: forwards events across aggregate boundaries
//!   through publisher/subscriber pairs

pub mod envelope;
pub mod event;
pub mod handler;
pub mod notification;
pub mod notifier;
pub mod projection;
pub mod relay;

pub use envelope::EventEnvelope;
pub use event::{decode_event, DecodeError, Decoded, Event, EventKinds};
pub use handler::StreamHandler;
pub use notification::{
    NotificationError, NotificationProducer, NotificationProducerBuilder, PublishedEvent,
    Publisher, Subscriber,
};
pub use notifier::{
    BatchReceiver, ChangeBatch, ChangeHandler, ChangeNotifier, ChannelForwarder,
    InMemoryChangeNotifier, SubscriptionId,
};
pub use projection::Projection;
pub use relay::{
    partition, verify_contiguous, DispatchReport, EventRelay, EventRelayBuilder, ProcessingError,
    RelayConfig, RelayError, RelayState, StreamPartition,
};
