//! Per-key serialized execution
//!
//! Work is submitted to a [`Lane`]. Jobs on one lane run strictly in submission order;
//! different lanes run concurrently. A lane's queue and drain task exist only while the
//! lane has work, so idle devices and characteristics cost nothing.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, Notify};

use crate::types::{CharacteristicKey, DeviceId};

type Job = BoxFuture<'static, ()>;

/// Serialization domain of a unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Session lifecycle, scanning, retrieval and disconnect-all
    Control,
    /// Connect, disconnect and teardown of one device
    Device(DeviceId),
    /// Reads, writes, subscriptions and value changes of one characteristic
    Characteristic(CharacteristicKey),
    /// Advertisement handling for one device
    Advertisement(DeviceId),
    /// Local services and advertising
    Peripheral,
}

struct LaneInner {
    queues: DashMap<Lane, mpsc::UnboundedSender<Job>>,
    /// Jobs submitted but not yet finished
    pending: AtomicUsize,
    idle: Notify,
}

impl LaneInner {
    fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Runs jobs on per-key ordered lanes
#[derive(Clone)]
pub struct LaneScheduler {
    inner: Arc<LaneInner>,
}

impl Default for LaneScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LaneScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaneScheduler")
            .field("active_lanes", &self.active_lanes())
            .field("pending", &self.pending())
            .finish()
    }
}

impl LaneScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LaneInner {
                queues: DashMap::new(),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Queue a job behind everything already submitted to `lane`. Never blocks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F>(&self, lane: Lane, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let job: Job = Box::pin(job);

        let receiver = match self.inner.queues.entry(lane.clone()) {
            Entry::Occupied(entry) => {
                if entry.get().send(job).is_err() {
                    tracing::error!("Lane {:?} lost its drain task", lane);
                    entry.remove();
                    self.inner.finish();
                }
                return;
            }
            Entry::Vacant(entry) => {
                let (sender, receiver) = mpsc::unbounded_channel();
                // The receiver is alive, so this cannot fail
                let _ = sender.send(job);
                entry.insert(sender);
                receiver
            }
        };

        tokio::spawn(drain(self.inner.clone(), lane, receiver));
    }

    /// Wait until every submitted job has finished
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    pub fn active_lanes(&self) -> usize {
        self.inner.queues.len()
    }
}

/// Run a lane's jobs in order, retiring the lane once its queue is empty
async fn drain(inner: Arc<LaneInner>, lane: Lane, mut receiver: mpsc::UnboundedReceiver<Job>) {
    loop {
        let job = match receiver.try_recv() {
            Ok(job) => job,
            Err(_) => {
                // Submitters send while holding the entry, so an empty queue observed
                // under the entry lock stays empty until the lane is removed
                match inner.queues.entry(lane.clone()) {
                    Entry::Occupied(entry) => match receiver.try_recv() {
                        Ok(job) => job,
                        Err(_) => {
                            entry.remove();
                            return;
                        }
                    },
                    Entry::Vacant(_) => return,
                }
            }
        };

        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            tracing::error!("Job on lane {:?} panicked", lane);
        }
        inner.finish();
    }
}
