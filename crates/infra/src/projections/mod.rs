//! Projection implementations (read model builders).
//!
//! Projections consume domain events and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: can be reconstructed from the event streams
//! - **Checkpointed**: one applied-version checkpoint per (projector, stream)
//! - **Idempotent**: safe for at-least-once delivery

pub mod checkpoint_store;
pub mod fleet_cars;
pub mod projector;
pub mod replay;

pub use checkpoint_store::{CheckpointError, CheckpointStore, InMemoryCheckpointStore};
pub use fleet_cars::{CarListError, CarListProjection, CarListRow};
pub use projector::{ProjectionOutcome, ProjectorError, ReadModelProjector};
pub use replay::{redrive, replay_projector, ReplayError, ReplayFailure, ReplayMode, ReplayReport};
