//! Aggregate root traits for event-sourced domain models.

use crate::error::{DomainError, DomainResult};
use crate::id::{AggregateId, StreamName};

/// Aggregate root marker + minimal interface.
///
/// This is intentionally small so domain modules can decide how they model
/// state transitions without bringing in any infrastructure concerns.
pub trait AggregateRoot {
    /// Stable aggregate type name (e.g. "fleet.car").
    ///
    /// Used as the entity type of every event in the aggregate's stream and as
    /// the key under which the aggregate is registered in the domain factory.
    const AGGREGATE_TYPE: &'static str;

    /// Returns the aggregate identifier.
    fn id(&self) -> &AggregateId;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// For event-sourced aggregates this is the number of events applied, which
    /// equals the version of the last event in the stream.
    fn version(&self) -> u64;

    /// Name of the stream holding this aggregate's events.
    fn stream_name(&self) -> StreamName {
        StreamName::for_aggregate(Self::AGGREGATE_TYPE, self.id())
    }
}

/// Optimistic concurrency expectation for an aggregate stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (useful for idempotent commands, migrations, etc.).
    Any,
    /// Require the stream to be empty.
    NoStream,
    /// Require the stream to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => actual == 0,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }

    /// Expectation for an aggregate whose last known version is `version`.
    pub fn from_base(version: u64) -> Self {
        if version == 0 {
            ExpectedVersion::NoStream
        } else {
            ExpectedVersion::Exact(version)
        }
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` returns events.
/// - **State mutation**: `apply(&mut self, event)` evolves state.
///
/// Aggregates must not perform IO or side effects. They should only return events
/// describing what happened.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event.
    ///
    /// Implementations must remain deterministic and bump `version()` by one
    /// per applied event.
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    ///
    /// This must not mutate state. State evolution is done through `apply`.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

/// An aggregate together with the events it has produced since it was loaded.
///
/// `base_version` is the stream version the aggregate was rehydrated at; the
/// store uses it as the optimistic concurrency expectation when the
/// uncommitted events are saved.
#[derive(Debug, Clone)]
pub struct EventSourced<A>
where
    A: Aggregate,
{
    aggregate: A,
    base_version: u64,
    uncommitted: Vec<A::Event>,
}

impl<A> EventSourced<A>
where
    A: Aggregate,
{
    /// Wrap a (rehydrated or fresh) aggregate with no pending events.
    pub fn new(aggregate: A) -> Self {
        let base_version = aggregate.version();
        Self {
            aggregate,
            base_version,
            uncommitted: Vec::new(),
        }
    }

    pub fn aggregate(&self) -> &A {
        &self.aggregate
    }

    pub fn into_aggregate(self) -> A {
        self.aggregate
    }

    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    /// Current in-memory version (base version + uncommitted events).
    pub fn version(&self) -> u64 {
        self.aggregate.version()
    }

    pub fn uncommitted(&self) -> &[A::Event] {
        &self.uncommitted
    }

    pub fn has_uncommitted(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Decide and apply: run `command`, evolve state, and queue the resulting
    /// events for the next save. Returns the newly produced events.
    pub fn execute(&mut self, command: &A::Command) -> Result<&[A::Event], A::Error> {
        let events = self.aggregate.handle(command)?;
        let start = self.uncommitted.len();
        for ev in &events {
            self.aggregate.apply(ev);
        }
        self.uncommitted.extend(events);
        Ok(&self.uncommitted[start..])
    }

    /// Apply and queue an already-decided event.
    pub fn record(&mut self, event: A::Event) {
        self.aggregate.apply(&event);
        self.uncommitted.push(event);
    }

    /// Forget pending events after they were durably appended.
    pub fn mark_committed(&mut self) {
        self.uncommitted.clear();
        self.base_version = self.aggregate.version();
    }
}
