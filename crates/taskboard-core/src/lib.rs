pub mod blobs;
pub mod board;
pub mod bucket;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod drag;
pub mod error;
pub mod filter;
pub mod memory;
pub mod mirror;
pub mod mutation;
pub mod render;
pub mod session;
pub mod store;
pub mod task;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

pub use board::{
  Board,
  Collaborators,
  Notice,
  NoticeLevel
};
pub use error::BoardError;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting taskboard CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.rc_file.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let mut ctx =
    commands::CommandContext::open(
      cfg, &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open board at {}",
        data_dir.display()
      )
    })?;

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .build()
      .context(
        "failed to start async runtime"
      )?;
  runtime.block_on(commands::dispatch(
    &mut ctx,
    cli.command
  ))?;

  info!("done");
  Ok(())
}
