//! Remote datastore contract and its implementations.
//!
//! [`memory::MemoryRemote`] keeps the table in-process and is what tests and
//! `--memory` sessions run against. [`rest::RestRemote`] talks to a
//! PostgREST-style HTTP endpoint.

pub mod memory;
pub mod rest;

use std::fmt;
use std::future::Future;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::RemoteError;
use crate::task::{NewTask, Task, TaskId, TaskPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Insert => f.write_str("insert"),
            ChangeKind::Update => f.write_str("update"),
            ChangeKind::Delete => f.write_str("delete"),
        }
    }
}

/// Notification that the task table changed. Consumers only rely on the
/// fact that something changed; `task_id` is informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub task_id: Option<TaskId>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, task_id: Option<TaskId>) -> Self {
        Self { kind, task_id }
    }
}

/// Stream of change notifications for one subscriber.
///
/// Dropping the feed stops any background producer attached to it.
#[derive(Debug)]
pub struct ChangeFeed {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    producer: Option<JoinHandle<()>>,
}

impl ChangeFeed {
    pub fn new(events: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self {
            events,
            producer: None,
        }
    }

    pub fn with_producer(
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        producer: JoinHandle<()>,
    ) -> Self {
        Self {
            events,
            producer: Some(producer),
        }
    }

    /// Waits for the next event. `None` once the remote side has gone away.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.events.close();
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

/// Request/response and publish/subscribe contract of the hosted task table.
pub trait RemoteStore: Send + Sync + 'static {
    /// Every task, newest `created_at` first.
    fn fetch_all(&self) -> impl Future<Output = Result<Vec<Task>, RemoteError>> + Send;

    /// Inserts a row and returns it with the server-assigned fields.
    fn insert(&self, task: &NewTask) -> impl Future<Output = Result<Task, RemoteError>> + Send;

    fn update(
        &self,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn delete(&self, id: &TaskId) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Opens a change feed covering inserts, updates and deletes.
    fn subscribe(&self) -> impl Future<Output = Result<ChangeFeed, RemoteError>> + Send;
}
