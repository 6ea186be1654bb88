pub mod calendar;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod error;
pub mod filter;
pub mod notice;
pub mod render;
pub mod session;
pub mod store;
pub mod task;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

pub use datastore::memory::MemoryRemote;
pub use datastore::rest::RestRemote;
pub use datastore::{ChangeEvent, ChangeFeed, ChangeKind, RemoteStore};
pub use error::{RemoteError, StoreError, StoreResult};
pub use filter::{PriorityFilter, PrioritySelection, StatusCounts, StatusFilter, TaskFilter};
pub use notice::{Notice, NoticeLevel};
pub use session::{Session, SessionHandle, SessionOptions};
pub use store::{OptimisticPolicy, TaskStore};
pub use task::{NewTask, Priority, Task, TaskId, TaskPatch};

#[tracing::instrument(skip_all)]
pub fn run(raw_args: Vec<OsString>) -> anyhow::Result<()> {
    let cli = cli::GlobalCli::parse_from(raw_args);

    cli::init_tracing(cli.verbose, cli.quiet)?;

    info!(
        verbose = cli.verbose,
        quiet = cli.quiet,
        memory = cli.memory,
        "starting taskdeck CLI"
    );

    let mut cfg = config::Config::load(cli.config.as_deref())?;
    cfg.apply_overrides(cli.rc_overrides.into_iter().map(|kv| (kv.key, kv.value)))?;
    debug!(files = ?cfg.loaded_files, "config resolved");

    let renderer = render::Renderer::new(std::env::var_os("NO_COLOR").is_none());
    let command = cli.command.unwrap_or(cli::Command::List {
        status: StatusFilter::All,
        priorities: Vec::new(),
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async {
        if cli.memory {
            commands::dispatch(Arc::new(MemoryRemote::new()), &cfg, &renderer, command).await
        } else {
            let settings = cfg.rest_settings()?;
            let remote = RestRemote::new(&settings)
                .with_context(|| format!("failed to set up remote at {}", settings.url))?;
            commands::dispatch(Arc::new(remote), &cfg, &renderer, command).await
        }
    })?;

    info!("done");
    Ok(())
}
