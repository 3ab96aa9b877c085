//! Projection checkpoint persistence.
//!
//! A checkpoint is the last version a projector applied for one stream. It
//! enables:
//! - Idempotent projection (re-delivered events at or below it are skipped)
//! - Resume after crash (re-drive continues from the last applied version)
//! - Deterministic rebuilds (clear checkpoints and replay from scratch)

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use fleetstream_core::StreamName;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("checkpoint for '{projector}' on '{stream}' cannot move back from {current} to {attempted}")]
    Regression {
        projector: String,
        stream: StreamName,
        current: u64,
        attempted: u64,
    },

    #[error("checkpoint storage unavailable: {0}")]
    Unavailable(String),
}

/// Per (projector, stream) checkpoint persistence.
pub trait CheckpointStore: Send + Sync {
    /// Last applied version, `None` before the first applied event.
    fn load_checkpoint(&self, projector: &str, stream: &StreamName) -> Result<Option<u64>, CheckpointError>;

    /// Record `position` as applied; a lower position than the stored one is rejected.
    fn save_checkpoint(
        &self,
        projector: &str,
        stream: &StreamName,
        position: u64,
    ) -> Result<(), CheckpointError>;

    /// Forget every checkpoint of `projector` (rebuild support).
    fn clear(&self, projector: &str) -> Result<(), CheckpointError>;

    /// Every checkpoint of `projector`, sorted by stream name.
    fn checkpoints(&self, projector: &str) -> Result<Vec<(StreamName, u64)>, CheckpointError>;
}

impl<S> CheckpointStore for Arc<S>
where
    S: CheckpointStore + ?Sized,
{
    fn load_checkpoint(&self, projector: &str, stream: &StreamName) -> Result<Option<u64>, CheckpointError> {
        (**self).load_checkpoint(projector, stream)
    }

    fn save_checkpoint(
        &self,
        projector: &str,
        stream: &StreamName,
        position: u64,
    ) -> Result<(), CheckpointError> {
        (**self).save_checkpoint(projector, stream, position)
    }

    fn clear(&self, projector: &str) -> Result<(), CheckpointError> {
        (**self).clear(projector)
    }

    fn checkpoints(&self, projector: &str) -> Result<Vec<(StreamName, u64)>, CheckpointError> {
        (**self).checkpoints(projector)
    }
}

/// In-memory checkpoint store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    inner: RwLock<HashMap<(String, StreamName), u64>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> CheckpointError {
    CheckpointError::Unavailable("lock poisoned".to_string())
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load_checkpoint(&self, projector: &str, stream: &StreamName) -> Result<Option<u64>, CheckpointError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(&(projector.to_string(), stream.clone())).copied())
    }

    fn save_checkpoint(
        &self,
        projector: &str,
        stream: &StreamName,
        position: u64,
    ) -> Result<(), CheckpointError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        let slot = map.entry((projector.to_string(), stream.clone())).or_insert(0);
        if position < *slot {
            return Err(CheckpointError::Regression {
                projector: projector.to_string(),
                stream: stream.clone(),
                current: *slot,
                attempted: position,
            });
        }
        *slot = position;
        Ok(())
    }

    fn clear(&self, projector: &str) -> Result<(), CheckpointError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.retain(|(p, _), _| p != projector);
        Ok(())
    }

    fn checkpoints(&self, projector: &str) -> Result<Vec<(StreamName, u64)>, CheckpointError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        let mut out: Vec<(StreamName, u64)> = map
            .iter()
            .filter(|((p, _), _)| p == projector)
            .map(|((_, s), v)| (s.clone(), *v))
            .collect();
        out.sort();
        Ok(out)
    }
}
