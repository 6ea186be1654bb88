use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{ChangeEvent, ChangeFeed, ChangeKind, RemoteStore};
use crate::error::RemoteError;
use crate::task::{NewTask, Task, TaskId, TaskPatch};

/// Remote operation names, used to target injected failures and gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    FetchAll,
    Insert,
    Update,
    Delete,
    Subscribe,
}

/// One request as the memory remote received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    FetchAll,
    Insert(NewTask),
    Update(TaskId, TaskPatch),
    Delete(TaskId),
    Subscribe,
}

/// In-process task table with the same contract as the hosted one.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    table: Mutex<Table>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChangeEvent>>>,
}

#[derive(Debug, Default)]
struct Table {
    // newest first
    rows: Vec<Task>,
    calls: Vec<RemoteCall>,
    failures: HashMap<RemoteOp, VecDeque<String>>,
    gates: HashMap<RemoteOp, VecDeque<Gate>>,
}

#[derive(Debug)]
struct Gate {
    entered: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// Test-side handle of a gate installed with [`MemoryRemote::gate`].
#[derive(Debug)]
pub struct GateHandle {
    entered: oneshot::Receiver<()>,
    release: oneshot::Sender<()>,
}

impl GateHandle {
    /// Resolves once the gated request has reached the remote.
    pub async fn entered(&mut self) {
        let _ = (&mut self.entered).await;
    }

    /// Lets the gated request continue.
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the table. Rows are kept newest `created_at` first.
    #[must_use]
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let mut rows = tasks;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Self {
            table: Mutex::new(Table {
                rows,
                ..Table::default()
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Makes the next `op` request fail with a rejection carrying `message`.
    pub fn fail_next(&self, op: RemoteOp, message: impl Into<String>) {
        self.table
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(message.into());
    }

    /// Holds the next `op` request until the returned handle is released.
    pub fn gate(&self, op: RemoteOp) -> GateHandle {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.table.lock().gates.entry(op).or_default().push_back(Gate {
            entered: entered_tx,
            release: release_rx,
        });
        GateHandle {
            entered: entered_rx,
            release: release_tx,
        }
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.table.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.table.lock().calls.clear();
    }

    #[must_use]
    pub fn rows(&self) -> Vec<Task> {
        self.table.lock().rows.clone()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    async fn enter(&self, op: RemoteOp, call: RemoteCall) -> Result<(), RemoteError> {
        let gate = {
            let mut table = self.table.lock();
            table.calls.push(call);
            table.gates.get_mut(&op).and_then(VecDeque::pop_front)
        };

        if let Some(gate) = gate {
            debug!(?op, "request held at gate");
            let _ = gate.entered.send(());
            let _ = gate.release.await;
        }

        let failure = self
            .table
            .lock()
            .failures
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(message) => {
                debug!(?op, message = %message, "injected remote failure");
                Err(RemoteError::Rejected(message))
            }
            None => Ok(()),
        }
    }

    fn publish(&self, event: ChangeEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        debug!(
            kind = %event.kind,
            subscribers = subscribers.len(),
            "published change event"
        );
    }
}

impl RemoteStore for MemoryRemote {
    #[instrument(skip(self))]
    async fn fetch_all(&self) -> Result<Vec<Task>, RemoteError> {
        self.enter(RemoteOp::FetchAll, RemoteCall::FetchAll).await?;
        Ok(self.table.lock().rows.clone())
    }

    #[instrument(skip(self, task), fields(title_len = task.title.len()))]
    async fn insert(&self, task: &NewTask) -> Result<Task, RemoteError> {
        self.enter(RemoteOp::Insert, RemoteCall::Insert(task.clone()))
            .await?;

        let now = Utc::now();
        let row = Task {
            id: TaskId::new(Uuid::new_v4().to_string()),
            title: task.title.clone(),
            due_date: task.due_date.clone(),
            priority: task.priority,
            completed: task.completed,
            created_at: now,
            updated_at: now,
        };
        self.table.lock().rows.insert(0, row.clone());

        info!(id = %row.id, "inserted task row");
        self.publish(ChangeEvent::new(ChangeKind::Insert, Some(row.id.clone())));
        Ok(row)
    }

    #[instrument(skip(self, patch), fields(id = %id))]
    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<(), RemoteError> {
        self.enter(
            RemoteOp::Update,
            RemoteCall::Update(id.clone(), patch.clone()),
        )
        .await?;

        {
            let mut table = self.table.lock();
            let row = table
                .rows
                .iter_mut()
                .find(|row| &row.id == id)
                .ok_or_else(|| RemoteError::NotFound(id.clone()))?;
            row.apply_patch(patch);
            row.updated_at = Utc::now();
        }

        self.publish(ChangeEvent::new(ChangeKind::Update, Some(id.clone())));
        Ok(())
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn delete(&self, id: &TaskId) -> Result<(), RemoteError> {
        self.enter(RemoteOp::Delete, RemoteCall::Delete(id.clone()))
            .await?;

        {
            let mut table = self.table.lock();
            let idx = table
                .rows
                .iter()
                .position(|row| &row.id == id)
                .ok_or_else(|| RemoteError::NotFound(id.clone()))?;
            table.rows.remove(idx);
        }

        self.publish(ChangeEvent::new(ChangeKind::Delete, Some(id.clone())));
        Ok(())
    }

    #[instrument(skip(self))]
    async fn subscribe(&self) -> Result<ChangeFeed, RemoteError> {
        self.enter(RemoteOp::Subscribe, RemoteCall::Subscribe).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        Ok(ChangeFeed::new(rx))
    }
}
