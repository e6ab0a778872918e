//! Runtime for dispatching inbound events
//!
//! Each active user gets a worker task fed by its own channel, so events from
//! one user are processed strictly in arrival order while different users
//! proceed concurrently.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::EventProcessor;
pub use traits::*;

use crate::directory::UserIdentity;
use crate::session::SessionStore;
use crate::transport::{InboundEvent, TelegramTransport};
use chrono::Utc;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Type alias for the production dispatcher with concrete implementations
pub type ProductionDispatcher = DispatchManager<DatabaseDirectory, TelegramTransport>;

/// Handle to a running per-user worker
struct WorkerHandle {
    event_tx: mpsc::UnboundedSender<InboundEvent>,
    /// Events sent to the worker and not yet processed
    pending: Arc<AtomicUsize>,
}

impl WorkerHandle {
    /// Queue an event, handing it back if the worker is gone
    fn submit(&self, event: InboundEvent) -> Result<(), InboundEvent> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.event_tx.send(event).map_err(|mpsc::error::SendError(event)| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            event
        })
    }

    fn is_idle(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0
    }
}

/// Manager for all per-user workers
pub struct DispatchManager<D, T>
where
    D: Directory + 'static,
    T: Transport + 'static,
{
    processor: Arc<EventProcessor<D, T>>,
    workers: RwLock<HashMap<UserIdentity, WorkerHandle>>,
}

impl<D, T> DispatchManager<D, T>
where
    D: Directory + 'static,
    T: Transport + 'static,
{
    pub fn new(processor: EventProcessor<D, T>) -> Self {
        Self {
            processor: Arc::new(processor),
            workers: RwLock::new(HashMap::new()),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        self.processor.sessions()
    }

    /// Route an event to its user's worker, starting one if needed
    pub async fn dispatch(&self, event: InboundEvent) {
        let user = event.user;

        // Fast path: worker already running
        let event = {
            let workers = self.workers.read().await;
            match workers.get(&user) {
                Some(handle) => match handle.submit(event) {
                    Ok(()) => return,
                    Err(event) => event,
                },
                None => event,
            }
        };

        let mut workers = self.workers.write().await;

        // Another dispatch may have started a worker while we waited
        let event = match workers.get(&user) {
            Some(handle) => match handle.submit(event) {
                Ok(()) => return,
                Err(event) => {
                    tracing::warn!(user = %user, "Worker gone, restarting it");
                    event
                }
            },
            None => event,
        };

        let handle = self.spawn_worker(user);
        if handle.submit(event).is_err() {
            tracing::error!(user = %user, "Fresh worker rejected event, dropping it");
        }
        workers.insert(user, handle);
    }

    fn spawn_worker(&self, user: UserIdentity) -> WorkerHandle {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<InboundEvent>();
        let pending = Arc::new(AtomicUsize::new(0));
        let processor = Arc::clone(&self.processor);
        let worker_pending = Arc::clone(&pending);

        tokio::spawn(async move {
            tracing::debug!(user = %user, "Worker started");
            while let Some(event) = event_rx.recv().await {
                processor.handle(event).await;
                worker_pending.fetch_sub(1, Ordering::SeqCst);
            }
            tracing::debug!(user = %user, "Worker stopped");
        });

        WorkerHandle { event_tx, pending }
    }

    /// Dispatch every event from the stream until it ends
    pub async fn run<S>(self: Arc<Self>, mut events: S)
    where
        S: Stream<Item = InboundEvent> + Unpin,
    {
        while let Some(event) = events.next().await {
            self.dispatch(event).await;
        }
        tracing::info!("Inbound event stream ended");
    }

    /// Stop idle workers and, with a TTL, evict stale sessions
    pub async fn sweep(&self, ttl: Option<chrono::Duration>) {
        let stopped = {
            let mut workers = self.workers.write().await;
            let before = workers.len();
            workers.retain(|_, handle| !handle.is_idle());
            before - workers.len()
        };

        let evicted = match ttl {
            Some(ttl) => self.sessions().evict_stale(ttl, Utc::now()).await.len(),
            None => 0,
        };

        if stopped > 0 || evicted > 0 {
            tracing::info!(stopped, evicted, "Sweep completed");
        }
    }

    /// Run [`Self::sweep`] every `interval` until cancelled
    pub fn start_session_sweeper(
        self: &Arc<Self>,
        ttl: Option<chrono::Duration>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::debug!("Session sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => manager.sweep(ttl).await,
                }
            }
        })
    }
}
