mod config;
mod files;
mod output;

use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures::future::join_all;
use tracing::{debug, info, warn};

use logsift_logs::{
    FilterChain, JsonLinesParser, LevelVisibility, LoadCoordinator, LoadEvent, LoadHandle,
    LoadMode, LoadOptions, LoadOutcome, QuickSearch, ViewFilter, load_filter_file,
    save_filter_file,
};
use logsift_types::{Severity, SourceId};

use config::Settings;

/// logsift - load, merge and filter structured log files
#[derive(Parser, Debug)]
#[command(name = "logsift")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log files or directories of log files (JSON lines)
    #[arg(value_name = "PATH", required = true)]
    paths: Vec<PathBuf>,

    /// Settings file
    #[arg(long, value_name = "TOML")]
    config: Option<PathBuf>,

    /// Filter file, added to any filters from the settings file
    #[arg(long, value_name = "TOML")]
    filters: Option<PathBuf>,

    /// Write the combined filter set to this file
    #[arg(long, value_name = "TOML")]
    save_filters: Option<PathBuf>,

    /// single: keep only the last loaded source; multi: merge all sources
    #[arg(long, value_name = "MODE")]
    mode: Option<LoadMode>,

    /// Hide a severity (repeatable)
    #[arg(long = "hide", value_name = "LEVEL")]
    hide: Vec<Severity>,

    /// Case-insensitive substring search on one field (repeatable)
    #[arg(long = "search", value_name = "FIELD=TEXT")]
    search: Vec<String>,

    /// Maximum number of records to print
    #[arg(long)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    let view = build_view(&args, &settings)?;

    let inputs = files::expand_inputs(&args.paths)?;
    if inputs.is_empty() {
        bail!("no log files found");
    }

    let options = LoadOptions {
        mode: args.mode.unwrap_or(settings.mode),
        cancel_check_interval: settings.cancel_check_interval,
    };
    let (coordinator, mut events) = LoadCoordinator::new(Arc::new(JsonLinesParser), options);

    let handles: Vec<LoadHandle> = inputs
        .iter()
        .map(|path| coordinator.start_load(SourceId::from_path(path), path.clone()))
        .collect();
    info!(sources = handles.len(), mode = %options.mode, "loading");

    let waiting = join_all(handles.into_iter().map(LoadHandle::wait));
    tokio::pin!(waiting);
    let finished = tokio::select! {
        results = &mut waiting => Some(results),
        _ = tokio::signal::ctrl_c() => None,
    };
    let results = match finished {
        Some(results) => results,
        None => {
            warn!("interrupted, cancelling loads");
            coordinator.cancel_all();
            waiting.await
        }
    };

    let cancelled = results
        .iter()
        .filter(|r| matches!(r, Ok(LoadOutcome::Cancelled)))
        .count();
    if cancelled > 0 {
        debug!(cancelled, "loads cancelled");
    }

    let mut failures = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            LoadEvent::Failed { source, error } => {
                failures += 1;
                eprintln!("{}: {}", source, error);
            }
            LoadEvent::Settled(snapshot) => {
                debug!(revision = snapshot.revision(), records = snapshot.len(), "settled");
            }
        }
    }

    let snapshot = coordinator.snapshot();
    let filtered = view.apply(&snapshot);
    let show_source = coordinator.sources().len() > 1;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    output::write_report(
        &mut out,
        &snapshot,
        &filtered,
        args.limit.or(settings.limit),
        show_source,
    )
    .context("failed to write output")?;
    out.flush().context("failed to write output")?;

    if failures == inputs.len() {
        bail!("all {} inputs failed to load", failures);
    }
    Ok(())
}

/// Combine settings, filter file and flags into one view filter
fn build_view(args: &Args, settings: &Settings) -> Result<ViewFilter> {
    let mut specs = settings
        .filter_specs()
        .context("invalid filter in settings")?;
    if let Some(path) = &args.filters {
        specs.extend(load_filter_file(path)?);
    }
    let chain = FilterChain::from_specs(specs.iter().cloned())?;
    if let Some(path) = &args.save_filters {
        save_filter_file(path, &specs)?;
        info!(path = %path.display(), filters = specs.len(), "filters saved");
    }

    let hidden = settings.hidden_levels.iter().chain(&args.hide).copied();
    let mut view = ViewFilter::new(chain).with_levels(LevelVisibility::hiding(hidden));
    for arg in &args.search {
        let search = QuickSearch::parse(arg).with_context(|| format!("bad --search '{}'", arg))?;
        view.set_search(search);
    }
    Ok(view)
}
