//! The task store: single owner of the task collection.
//!
//! Reads are synchronous snapshots of local state. Writes go through the
//! remote first (`create`, `update`, `delete`) or are applied optimistically
//! and confirmed afterwards (`toggle_completion`). Local state lives behind
//! a mutex that is never held across a remote call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

use crate::datastore::RemoteStore;
use crate::datetime::normalize_due_date;
use crate::error::{StoreError, StoreResult};
use crate::filter::{PriorityFilter, PrioritySelection, StatusCounts, StatusFilter, TaskFilter};
use crate::notice::{Notice, Notifier};
use crate::task::{NewTask, Priority, Task, TaskId, TaskPatch};

/// What to do with an optimistic completion flip when the remote rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimisticPolicy {
    pub rollback_on_failure: bool,
}

impl Default for OptimisticPolicy {
    fn default() -> Self {
        Self {
            rollback_on_failure: true,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    task: Task,
    // revision of the last local write to `completed`
    completed_revision: u64,
}

/// Identifies the `completed` value an optimistic patch produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PatchToken {
    generation: u64,
    completed_revision: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    entries: Vec<Entry>,
    filter: TaskFilter,
    loads_in_flight: usize,
    // bumped whenever a load replaces the whole collection
    generation: u64,
    next_revision: u64,
}

impl StoreState {
    fn bump_revision(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }

    fn position(&self, id: &TaskId) -> Option<usize> {
        self.entries.iter().position(|entry| &entry.task.id == id)
    }

    fn replace_all(&mut self, tasks: Vec<Task>) {
        let mut seen = HashSet::with_capacity(tasks.len());
        let mut entries = Vec::with_capacity(tasks.len());
        for task in tasks {
            if !seen.insert(task.id.clone()) {
                warn!(id = %task.id, "remote returned duplicate task id; keeping first");
                continue;
            }
            let completed_revision = self.bump_revision();
            entries.push(Entry {
                task,
                completed_revision,
            });
        }
        self.entries = entries;
        self.generation += 1;
    }

    fn insert_front(&mut self, task: Task) {
        if let Some(idx) = self.position(&task.id) {
            self.entries.remove(idx);
        }
        let completed_revision = self.bump_revision();
        self.entries.insert(
            0,
            Entry {
                task,
                completed_revision,
            },
        );
    }

    fn patch(&mut self, id: &TaskId, patch: &TaskPatch) -> Option<(Task, PatchToken)> {
        let idx = self.position(id)?;
        let revision = self.bump_revision();
        let generation = self.generation;
        let entry = &mut self.entries[idx];
        entry.task.apply_patch(patch);
        if patch.completed.is_some() {
            entry.completed_revision = revision;
        }
        Some((
            entry.task.clone(),
            PatchToken {
                generation,
                completed_revision: entry.completed_revision,
            },
        ))
    }

    /// Applies `patch` only if no reload and no later local write to
    /// `completed` happened since `token` was issued. Edits to other fields
    /// do not count.
    fn patch_if_current(&mut self, id: &TaskId, patch: &TaskPatch, token: PatchToken) -> bool {
        if self.generation != token.generation {
            return false;
        }
        match self.position(id) {
            Some(idx) if self.entries[idx].completed_revision == token.completed_revision => {
                self.patch(id, patch);
                true
            }
            _ => false,
        }
    }

    fn remove(&mut self, id: &TaskId) -> Option<Task> {
        let idx = self.position(id)?;
        Some(self.entries.remove(idx).task)
    }

    fn tasks(&self) -> Vec<Task> {
        self.entries.iter().map(|entry| entry.task.clone()).collect()
    }
}

struct LoadingGuard<'a> {
    state: &'a Mutex<StoreState>,
}

impl<'a> LoadingGuard<'a> {
    fn enter(state: &'a Mutex<StoreState>) -> Self {
        state.lock().loads_in_flight += 1;
        Self { state }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.loads_in_flight = state.loads_in_flight.saturating_sub(1);
    }
}

pub struct TaskStore<R> {
    remote: Arc<R>,
    state: Mutex<StoreState>,
    policy: OptimisticPolicy,
    notifier: Notifier,
    generations: watch::Sender<u64>,
}

impl<R: RemoteStore> TaskStore<R> {
    pub fn new(remote: Arc<R>, policy: OptimisticPolicy) -> Self {
        Self {
            remote,
            state: Mutex::new(StoreState::default()),
            policy,
            notifier: Notifier::default(),
            generations: watch::Sender::new(0),
        }
    }

    #[must_use]
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    #[must_use]
    pub fn policy(&self) -> OptimisticPolicy {
        self.policy
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notifier.subscribe()
    }

    /// Fires after every successful load with the new generation.
    pub fn generations(&self) -> watch::Receiver<u64> {
        self.generations.subscribe()
    }

    /// Replaces the collection with the remote's view.
    ///
    /// On failure the previous collection stays in place.
    #[instrument(skip(self))]
    pub async fn load(&self) -> StoreResult<usize> {
        let fetched = {
            let _loading = LoadingGuard::enter(&self.state);
            self.remote.fetch_all().await
        };

        match fetched {
            Ok(tasks) => {
                let count = tasks.len();
                let generation = {
                    let mut state = self.state.lock();
                    state.replace_all(tasks);
                    state.generation
                };
                self.generations.send_replace(generation);
                info!(count, generation, "loaded tasks");
                Ok(count)
            }
            Err(err) => {
                warn!(error = %err, "failed to load tasks; keeping last known state");
                self.notifier
                    .publish(Notice::error(format!("Could not load tasks: {err}")));
                Err(err.into())
            }
        }
    }

    #[instrument(skip(self, title), fields(title_len = title.len()))]
    pub async fn create(&self, title: &str, due_date: &str, priority: Priority) -> StoreResult<Task> {
        let result = self.create_inner(title, due_date, priority).await;
        match &result {
            Ok(task) => {
                info!(id = %task.id, "created task");
                self.notifier
                    .publish(Notice::success(format!("Created \"{}\"", task.title)));
            }
            Err(err) => {
                warn!(error = %err, "create failed");
                self.notifier
                    .publish(Notice::error(format!("Could not create task: {err}")));
            }
        }
        result
    }

    async fn create_inner(&self, title: &str, due_date: &str, priority: Priority) -> StoreResult<Task> {
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::validation("title is required"));
        }
        if due_date.trim().is_empty() {
            return Err(StoreError::validation("due date is required"));
        }
        let due_date = normalize_due_date(due_date)?;

        let new_task = NewTask::new(title, Some(due_date), priority);
        let created = self.remote.insert(&new_task).await?;
        self.state.lock().insert_front(created.clone());
        Ok(created)
    }

    /// Flips `completed` locally, then confirms with the remote.
    ///
    /// Unknown ids are a no-op returning `Ok(None)`. When the remote rejects
    /// the flip and the policy asks for it, the flip is undone unless a reload
    /// or a newer local write to `completed` has already replaced it.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn toggle_completion(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        let flipped = {
            let mut state = self.state.lock();
            let Some(idx) = state.position(id) else {
                debug!("toggle targets unknown task; ignoring");
                return Ok(None);
            };
            let completed = !state.entries[idx].task.completed;
            state
                .patch(id, &TaskPatch::completed(completed))
                .map(|(task, token)| (task, token, completed))
        };
        let Some((task, token, completed)) = flipped else {
            return Ok(None);
        };

        match self.remote.update(id, &TaskPatch::completed(completed)).await {
            Ok(()) => {
                debug!(completed, "completion confirmed by remote");
                let verb = if completed { "Completed" } else { "Reopened" };
                self.notifier
                    .publish(Notice::success(format!("{verb} \"{}\"", task.title)));
                Ok(Some(task))
            }
            Err(err) => {
                if self.policy.rollback_on_failure {
                    let rolled_back = self.state.lock().patch_if_current(
                        id,
                        &TaskPatch::completed(!completed),
                        token,
                    );
                    warn!(error = %err, rolled_back, "remote rejected completion toggle");
                } else {
                    warn!(error = %err, "remote rejected completion toggle; keeping local flip");
                }
                self.notifier
                    .publish(Notice::error(format!("Could not update task: {err}")));
                Err(err.into())
            }
        }
    }

    /// Write-through partial update. Local state changes only after the
    /// remote accepted the normalized patch.
    #[instrument(skip(self, patch), fields(id = %id))]
    pub async fn update(&self, id: &TaskId, patch: TaskPatch) -> StoreResult<Task> {
        let result = self.update_inner(id, patch).await;
        match &result {
            Ok(task) => {
                info!("updated task");
                self.notifier
                    .publish(Notice::success(format!("Updated \"{}\"", task.title)));
            }
            Err(err) => {
                warn!(error = %err, "update failed");
                self.notifier
                    .publish(Notice::error(format!("Could not update task: {err}")));
            }
        }
        result
    }

    async fn update_inner(&self, id: &TaskId, patch: TaskPatch) -> StoreResult<Task> {
        let patch = normalize_patch(patch)?;
        let Some(snapshot) = self.task(id) else {
            return Err(StoreError::NotFound(id.clone()));
        };

        self.remote.update(id, &patch).await?;
        Ok(self.commit_update(id, &patch, snapshot))
    }

    /// Merges an accepted patch into local state. When a reload dropped the
    /// task meanwhile, the write still stands and the patched snapshot is
    /// returned.
    fn commit_update(&self, id: &TaskId, patch: &TaskPatch, mut snapshot: Task) -> Task {
        if let Some((task, _)) = self.state.lock().patch(id, patch) {
            return task;
        }
        debug!("task left the local collection while its update was in flight");
        snapshot.apply_patch(patch);
        snapshot
    }

    /// Deletes remotely, then locally. The id does not have to be known
    /// locally; the remote decides whether it exists.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn delete(&self, id: &TaskId) -> StoreResult<()> {
        match self.remote.delete(id).await {
            Ok(()) => {
                let removed = self.state.lock().remove(id);
                info!(was_local = removed.is_some(), "deleted task");
                let label = removed.map_or_else(|| id.to_string(), |task| task.title);
                self.notifier
                    .publish(Notice::success(format!("Deleted \"{label}\"")));
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "delete failed");
                self.notifier
                    .publish(Notice::error(format!("Could not delete task: {err}")));
                Err(err.into())
            }
        }
    }

    /// Local-only reordering. `new_order` must be a permutation of the
    /// current ids.
    #[instrument(skip(self, new_order), fields(len = new_order.len()))]
    pub fn reorder(&self, new_order: &[TaskId]) -> StoreResult<()> {
        let mut state = self.state.lock();
        if new_order.len() != state.entries.len() {
            return Err(StoreError::validation(format!(
                "reorder expects {} ids, got {}",
                state.entries.len(),
                new_order.len()
            )));
        }

        let positions: HashMap<&TaskId, usize> = state
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (&entry.task.id, idx))
            .collect();
        let mut seen = HashSet::with_capacity(new_order.len());
        let mut order = Vec::with_capacity(new_order.len());
        for id in new_order {
            let Some(&idx) = positions.get(id) else {
                return Err(StoreError::validation(format!(
                    "reorder mentions unknown id {id}"
                )));
            };
            if !seen.insert(idx) {
                return Err(StoreError::validation(format!(
                    "reorder repeats id {id}"
                )));
            }
            order.push(idx);
        }

        let mut slots: Vec<Option<Entry>> =
            std::mem::take(&mut state.entries).into_iter().map(Some).collect();
        state.entries = order
            .into_iter()
            .filter_map(|idx| slots[idx].take())
            .collect();
        debug!("reordered tasks");
        Ok(())
    }

    pub fn set_priority_filter(&self, filter: PriorityFilter) {
        self.state.lock().filter.priority = filter;
    }

    pub fn toggle_priority_filter(&self, selection: PrioritySelection) -> PriorityFilter {
        let mut state = self.state.lock();
        state.filter.priority.toggle(selection);
        state.filter.priority.clone()
    }

    pub fn set_status_filter(&self, status: StatusFilter) {
        self.state.lock().filter.status = status;
    }

    #[must_use]
    pub fn priority_filter(&self) -> PriorityFilter {
        self.state.lock().filter.priority.clone()
    }

    #[must_use]
    pub fn status_filter(&self) -> StatusFilter {
        self.state.lock().filter.status
    }

    /// Tasks matching the current status and priority filters, in
    /// collection order.
    #[must_use]
    pub fn filtered_view(&self) -> Vec<Task> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .filter(|entry| state.filter.matches(&entry.task))
            .map(|entry| entry.task.clone())
            .collect()
    }

    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.state.lock().tasks()
    }

    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        let state = self.state.lock();
        state.position(id).map(|idx| state.entries[idx].task.clone())
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.lock().loads_in_flight > 0
    }

    #[must_use]
    pub fn status_counts(&self) -> StatusCounts {
        StatusCounts::tally(&self.state.lock().tasks())
    }

    /// Number of times the collection has been replaced by a load.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}

fn normalize_patch(mut patch: TaskPatch) -> StoreResult<TaskPatch> {
    if patch.is_empty() {
        return Err(StoreError::validation("update carries no fields"));
    }

    if let Some(title) = patch.title.as_mut() {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            return Err(StoreError::validation("title cannot be empty"));
        }
        *title = trimmed.to_string();
    }

    if let Some(Some(due_date)) = patch.due_date.as_mut() {
        if due_date.trim().is_empty() {
            return Err(StoreError::validation(
                "due date cannot be empty; clear it instead",
            ));
        }
        *due_date = normalize_due_date(due_date)?;
    }

    Ok(patch)
}
