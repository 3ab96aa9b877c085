use serde_json::Value as JsonValue;

use crate::{EventEnvelope, EventKinds};

/// A projection builds a read model from ordered event streams.
///
/// Projections implement the **CQRS read model pattern**: they transform events
/// (write model) into queryable state (read model).
///
/// ## Idempotency
///
/// Delivery is at-least-once: after a crash between the read-model write and
/// the checkpoint write, the same event is applied again on re-delivery. Apply
/// must therefore be idempotent (field assignments / upserts, never blind
/// increments).
///
/// ## Disposability
///
/// Read models are **disposable**: `clear` drops them so they can be rebuilt by
/// replaying the streams. Events are the source of truth.
///
/// Checkpointing and skip logic live in the infra `ReadModelProjector`; a
/// projection only maps decoded events onto its rows.
pub trait Projection: Send + Sync {
    /// The event sum type this projection decodes.
    type Ev: EventKinds;

    /// Stable projection name; checkpoints are stored under it.
    fn name(&self) -> &str;

    /// Whether streams of `aggregate_type` feed this projection.
    fn handles(&self, aggregate_type: &str) -> bool;

    /// Apply one decoded event to the read model.
    fn apply(&self, envelope: &EventEnvelope<JsonValue>, event: &Self::Ev) -> anyhow::Result<()>;

    /// Drop every read-model row (rebuild support).
    fn clear(&self) -> anyhow::Result<()>;
}
