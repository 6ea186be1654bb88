use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::calendar::MonthGrid;
use crate::cli::Command;
use crate::config::Config;
use crate::datastore::RemoteStore;
use crate::datetime::today_in;
use crate::filter::{PriorityFilter, StatusFilter};
use crate::notice::Notice;
use crate::render::Renderer;
use crate::session::{Session, SessionHandle};
use crate::task::{Priority, TaskId, TaskPatch};

/// Starts a session against `remote`, runs one command and shuts the
/// session down again.
#[instrument(skip(remote, cfg, renderer, command))]
pub async fn dispatch<R: RemoteStore>(
    remote: Arc<R>,
    cfg: &Config,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let tz = cfg.timezone();
    let mut options = cfg.session_options();
    options.realtime = matches!(command, Command::Watch);

    let mut session = Session::start(remote, options)
        .await
        .context("failed to start task session")?;
    let handle = session.handle();
    let mut notices = session.notices();

    debug!(?command, realtime = options.realtime, "dispatching command");
    let result = run_command(&handle, renderer, tz, command).await;

    drain_notices(&mut notices, renderer);
    session.shutdown().await;
    result
}

async fn run_command<R: RemoteStore>(
    handle: &SessionHandle<R>,
    renderer: &Renderer,
    tz: Tz,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::List { status, priorities } => {
            ensure_loaded(handle)?;
            cmd_list(handle, renderer, tz, status, PriorityFilter::from_selection(priorities))
        }
        Command::Add {
            title,
            due,
            priority,
        } => cmd_add(handle, title, due, priority).await,
        Command::Toggle { id } => {
            ensure_loaded(handle)?;
            cmd_toggle(handle, TaskId::new(id)).await
        }
        Command::Edit {
            id,
            title,
            due,
            clear_due,
            priority,
            completed,
        } => {
            ensure_loaded(handle)?;
            let patch = build_patch(title, due, clear_due, priority, completed)?;
            cmd_edit(handle, renderer, TaskId::new(id), patch).await
        }
        Command::Delete { id } => cmd_delete(handle, TaskId::new(id)).await,
        Command::Calendar { month } => {
            ensure_loaded(handle)?;
            cmd_calendar(handle, renderer, tz, month.as_deref())
        }
        Command::Counts => {
            ensure_loaded(handle)?;
            info!("command counts");
            renderer.print_counts(handle.store().status_counts())
        }
        Command::Watch => {
            ensure_loaded(handle)?;
            cmd_watch(handle, renderer, tz).await
        }
    }
}

fn ensure_loaded<R: RemoteStore>(handle: &SessionHandle<R>) -> anyhow::Result<()> {
    if handle.store().generation() == 0 {
        return Err(anyhow!("could not load tasks from the remote datastore"));
    }
    Ok(())
}

#[instrument(skip(handle, renderer, tz))]
fn cmd_list<R: RemoteStore>(
    handle: &SessionHandle<R>,
    renderer: &Renderer,
    tz: Tz,
    status: StatusFilter,
    priority: PriorityFilter,
) -> anyhow::Result<()> {
    info!("command list");
    let store = handle.store();
    store.set_status_filter(status);
    store.set_priority_filter(priority);
    renderer.print_task_table(&store.filtered_view(), today_in(&tz, Utc::now()))
}

#[instrument(skip(handle, title, due))]
async fn cmd_add<R: RemoteStore>(
    handle: &SessionHandle<R>,
    title: String,
    due: String,
    priority: Priority,
) -> anyhow::Result<()> {
    info!("command add");
    let task = handle.create(title, due, priority).await?;
    println!("Created task {}.", task.id);
    Ok(())
}

#[instrument(skip(handle))]
async fn cmd_delete<R: RemoteStore>(handle: &SessionHandle<R>, id: TaskId) -> anyhow::Result<()> {
    info!("command delete");
    handle.delete(&id).await?;
    println!("Deleted task {id}.");
    Ok(())
}

#[instrument(skip(handle))]
async fn cmd_toggle<R: RemoteStore>(handle: &SessionHandle<R>, id: TaskId) -> anyhow::Result<()> {
    info!("command toggle");
    match handle.toggle_completion(&id).await? {
        Some(task) => {
            let state = if task.completed { "completed" } else { "in progress" };
            println!("Task {} is now {state}.", task.id);
        }
        None => println!("No task with id {id}."),
    }
    Ok(())
}

#[instrument(skip(handle, renderer, patch))]
async fn cmd_edit<R: RemoteStore>(
    handle: &SessionHandle<R>,
    renderer: &Renderer,
    id: TaskId,
    patch: TaskPatch,
) -> anyhow::Result<()> {
    info!("command edit");
    let task = handle.update(&id, patch).await?;
    renderer.print_task_info(&task)
}

fn build_patch(
    title: Option<String>,
    due: Option<String>,
    clear_due: bool,
    priority: Option<Priority>,
    completed: Option<bool>,
) -> anyhow::Result<TaskPatch> {
    let mut patch = TaskPatch::default();
    if let Some(title) = title {
        patch = patch.with_title(title);
    }
    if clear_due {
        patch = patch.clearing_due_date();
    } else if let Some(due) = due {
        patch = patch.with_due_date(due);
    }
    if let Some(priority) = priority {
        patch = patch.with_priority(priority);
    }
    if let Some(completed) = completed {
        patch = patch.with_completed(completed);
    }
    if patch.is_empty() {
        return Err(anyhow!(
            "edit: nothing to change (use --title, --due, --clear-due, --priority or --completed)"
        ));
    }
    Ok(patch)
}

#[instrument(skip(handle, renderer, tz))]
fn cmd_calendar<R: RemoteStore>(
    handle: &SessionHandle<R>,
    renderer: &Renderer,
    tz: Tz,
    month: Option<&str>,
) -> anyhow::Result<()> {
    info!("command calendar");
    let today = today_in(&tz, Utc::now());
    let (year, month) = match month {
        Some(raw) => parse_month(raw)?,
        None => (today.year(), today.month()),
    };
    let grid = MonthGrid::build(year, month, &handle.store().tasks(), today)?;
    renderer.print_calendar(&grid)
}

fn parse_month(raw: &str) -> anyhow::Result<(i32, u32)> {
    let date = NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d")
        .with_context(|| format!("invalid month '{raw}', expected YYYY-MM"))?;
    Ok((date.year(), date.month()))
}

#[instrument(skip(handle, renderer, tz))]
async fn cmd_watch<R: RemoteStore>(
    handle: &SessionHandle<R>,
    renderer: &Renderer,
    tz: Tz,
) -> anyhow::Result<()> {
    info!("command watch");
    let store = handle.store();
    let mut generations = store.generations();
    renderer.print_task_table(&store.filtered_view(), today_in(&tz, Utc::now()))?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal.context("failed to listen for Ctrl-C")?;
                info!("interrupted; stopping watch");
                break;
            }
            changed = generations.changed() => {
                if changed.is_err() {
                    warn!("task store went away; stopping watch");
                    break;
                }
                let generation = *generations.borrow_and_update();
                debug!(generation, "collection reloaded");
                println!();
                renderer.print_task_table(&store.filtered_view(), today_in(&tz, Utc::now()))?;
            }
        }
    }
    Ok(())
}

fn drain_notices(notices: &mut broadcast::Receiver<Notice>, renderer: &Renderer) {
    loop {
        match notices.try_recv() {
            Ok(notice) => {
                if let Err(err) = renderer.print_notice(&notice) {
                    warn!(error = %err, "failed to print notice");
                }
            }
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                debug!(skipped, "notice receiver lagged");
            }
            Err(_) => break,
        }
    }
}
