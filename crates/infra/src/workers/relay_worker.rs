use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use fleetstream_events::{BatchReceiver, EventRelay};

/// Handle to control and join a background relay worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    processed: Arc<AtomicU64>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Batches handed to the relay so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// Batches already queued are drained before the thread exits.
    pub fn shutdown(mut self) -> u64 {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                warn!(worker = %self.name, "relay worker thread panicked");
            }
        }
        self.processed()
    }
}

/// Queued delivery: a thread that feeds batches from a
/// [`ChannelForwarder`](fleetstream_events::ChannelForwarder) into a relay.
///
/// The appending thread only enqueues; stream handlers run on the worker.
#[derive(Debug)]
pub struct RelayWorker;

impl RelayWorker {
    pub fn spawn(
        name: impl Into<String>,
        batches: BatchReceiver,
        relay: Arc<EventRelay>,
    ) -> std::io::Result<WorkerHandle> {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let processed = Arc::new(AtomicU64::new(0));

        let join = {
            let name = name.clone();
            let processed = processed.clone();
            thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&name, batches, shutdown_rx, &relay, &processed))?
        };

        info!(worker = %name, "relay worker started");
        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
            processed,
        })
    }
}

fn worker_loop(
    name: &str,
    batches: BatchReceiver,
    shutdown_rx: mpsc::Receiver<()>,
    relay: &EventRelay,
    processed: &AtomicU64,
) {
    let tick = Duration::from_millis(50);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            while let Ok(batch) = batches.try_recv() {
                relay.dispatch(batch);
                processed.fetch_add(1, Ordering::AcqRel);
            }
            break;
        }

        match batches.recv_timeout(tick) {
            Ok(batch) => {
                debug!(worker = name, events = batch.len(), "relay worker received batch");
                relay.dispatch(batch);
                processed.fetch_add(1, Ordering::AcqRel);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(worker = name, processed = processed.load(Ordering::Acquire), "relay worker stopped");
}
