//! Scoped owner of a [`TaskStore`] and its realtime subscription.
//!
//! Every mutation and every realtime reload goes through one action queue
//! and runs to completion before the next one starts, so a reload can never
//! land in the middle of a mutation's remote call.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::datastore::{ChangeFeed, RemoteStore};
use crate::error::{StoreError, StoreResult};
use crate::notice::Notice;
use crate::store::{OptimisticPolicy, TaskStore};
use crate::task::{Priority, Task, TaskId, TaskPatch};

const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub policy: OptimisticPolicy,
    pub queue_capacity: usize,
    /// Subscribe to the remote change feed and reload on every event.
    pub realtime: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            policy: OptimisticPolicy::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            realtime: true,
        }
    }
}

type Reply<T> = oneshot::Sender<StoreResult<T>>;

enum Action {
    Reload {
        reply: Option<Reply<usize>>,
    },
    Create {
        title: String,
        due_date: String,
        priority: Priority,
        reply: Reply<Task>,
    },
    Toggle {
        id: TaskId,
        reply: Reply<Option<Task>>,
    },
    Update {
        id: TaskId,
        patch: TaskPatch,
        reply: Reply<Task>,
    },
    Delete {
        id: TaskId,
        reply: Reply<()>,
    },
    Shutdown,
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::Reload { .. } => "reload",
            Action::Create { .. } => "create",
            Action::Toggle { .. } => "toggle",
            Action::Update { .. } => "update",
            Action::Delete { .. } => "delete",
            Action::Shutdown => "shutdown",
        }
    }
}

/// Cheap, cloneable front door to a running session.
pub struct SessionHandle<R> {
    store: Arc<TaskStore<R>>,
    actions: mpsc::Sender<Action>,
}

impl<R> Clone for SessionHandle<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            actions: self.actions.clone(),
        }
    }
}

impl<R: RemoteStore> SessionHandle<R> {
    /// Read access and local-only operations (filters, reorder).
    #[must_use]
    pub fn store(&self) -> &TaskStore<R> {
        &self.store
    }

    pub async fn reload(&self) -> StoreResult<usize> {
        self.request(|reply| Action::Reload { reply: Some(reply) })
            .await
    }

    pub async fn create(
        &self,
        title: impl Into<String>,
        due_date: impl Into<String>,
        priority: Priority,
    ) -> StoreResult<Task> {
        let title = title.into();
        let due_date = due_date.into();
        self.request(|reply| Action::Create {
            title,
            due_date,
            priority,
            reply,
        })
        .await
    }

    pub async fn toggle_completion(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        let id = id.clone();
        self.request(|reply| Action::Toggle { id, reply }).await
    }

    pub async fn update(&self, id: &TaskId, patch: TaskPatch) -> StoreResult<Task> {
        let id = id.clone();
        self.request(|reply| Action::Update { id, patch, reply })
            .await
    }

    pub async fn delete(&self, id: &TaskId) -> StoreResult<()> {
        let id = id.clone();
        self.request(|reply| Action::Delete { id, reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Action) -> StoreResult<T> {
        let (tx, rx) = oneshot::channel();
        self.actions
            .send(build(tx))
            .await
            .map_err(|_| StoreError::SessionClosed)?;
        rx.await.map_err(|_| StoreError::SessionClosed)?
    }
}

pub struct Session<R> {
    handle: SessionHandle<R>,
    worker: Option<JoinHandle<()>>,
    forwarder: Option<JoinHandle<()>>,
    cancel: Option<oneshot::Sender<()>>,
    // subscribed before the initial load so its outcome is not lost
    startup_notices: Option<broadcast::Receiver<Notice>>,
}

impl<R: RemoteStore> Session<R> {
    /// Subscribes to the change feed (when enabled), starts the worker and
    /// performs the initial load.
    ///
    /// A failed initial load leaves the session running with an empty
    /// collection; a failed subscription aborts the start.
    #[instrument(skip(remote))]
    pub async fn start(remote: Arc<R>, options: SessionOptions) -> StoreResult<Self> {
        let feed = if options.realtime {
            Some(remote.subscribe().await?)
        } else {
            None
        };

        let store = Arc::new(TaskStore::new(remote, options.policy));
        let startup_notices = store.notices();
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let worker = tokio::spawn(run_worker(Arc::clone(&store), rx));

        let (cancel, forwarder) = match feed {
            Some(feed) => {
                let (cancel_tx, cancel_rx) = oneshot::channel();
                let forwarder = tokio::spawn(forward_changes(feed, tx.clone(), cancel_rx));
                (Some(cancel_tx), Some(forwarder))
            }
            None => (None, None),
        };

        let session = Self {
            handle: SessionHandle { store, actions: tx },
            worker: Some(worker),
            forwarder,
            cancel,
            startup_notices: Some(startup_notices),
        };

        if let Err(err) = session.handle.reload().await {
            warn!(error = %err, "initial load failed; starting with an empty collection");
        }
        info!(realtime = options.realtime, "task session started");
        Ok(session)
    }

    #[must_use]
    pub fn handle(&self) -> SessionHandle<R> {
        self.handle.clone()
    }

    #[must_use]
    pub fn store(&self) -> &TaskStore<R> {
        self.handle.store()
    }

    /// The first call returns a receiver that already holds the notice of
    /// the initial load. Later calls subscribe from now on.
    pub fn notices(&mut self) -> broadcast::Receiver<Notice> {
        self.startup_notices
            .take()
            .unwrap_or_else(|| self.handle.store().notices())
    }

    /// Releases the subscription, lets queued actions finish and stops the
    /// worker. Handles still held elsewhere report `SessionClosed` afterwards.
    #[instrument(skip(self))]
    pub async fn shutdown(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(forwarder) = self.forwarder.take()
            && let Err(err) = forwarder.await
        {
            warn!(error = %err, "change forwarder ended abnormally");
        }

        if self.handle.actions.send(Action::Shutdown).await.is_err() {
            debug!("worker already gone");
        }
        if let Some(worker) = self.worker.take()
            && let Err(err) = worker.await
        {
            warn!(error = %err, "session worker ended abnormally");
        }
        info!("task session stopped");
    }
}

impl<R> Drop for Session<R> {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn run_worker<R: RemoteStore>(store: Arc<TaskStore<R>>, mut actions: mpsc::Receiver<Action>) {
    while let Some(action) = actions.recv().await {
        debug!(action = action.name(), "running session action");
        match action {
            Action::Reload { reply } => {
                let result = store.load().await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            warn!(error = %err, "realtime reload failed");
                        }
                    }
                }
            }
            Action::Create {
                title,
                due_date,
                priority,
                reply,
            } => {
                let _ = reply.send(store.create(&title, &due_date, priority).await);
            }
            Action::Toggle { id, reply } => {
                let _ = reply.send(store.toggle_completion(&id).await);
            }
            Action::Update { id, patch, reply } => {
                let _ = reply.send(store.update(&id, patch).await);
            }
            Action::Delete { id, reply } => {
                let _ = reply.send(store.delete(&id).await);
            }
            Action::Shutdown => break,
        }
    }
    debug!("session worker exiting");
}

async fn forward_changes(
    mut feed: ChangeFeed,
    actions: mpsc::Sender<Action>,
    mut cancel: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut cancel => {
                debug!("realtime subscription cancelled");
                break;
            }
            event = feed.recv() => {
                let Some(event) = event else {
                    warn!("change feed ended; realtime reloads stop");
                    break;
                };
                debug!(kind = %event.kind, task_id = ?event.task_id, "change notification; queueing reload");
                if actions.send(Action::Reload { reply: None }).await.is_err() {
                    break;
                }
            }
        }
    }
}
