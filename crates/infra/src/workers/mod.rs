//! Background workers.

pub mod relay_worker;

pub use relay_worker::{RelayWorker, WorkerHandle};
