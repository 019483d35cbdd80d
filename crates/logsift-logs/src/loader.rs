//! Concurrent per-source loading with cooperative cancellation.
//!
//! Every load runs as its own task and parses on the blocking pool. A shared
//! pending counter tracks the loads of the current generation; whichever load
//! brings it back to zero runs post-processing, so a burst of loads settles
//! into exactly one published snapshot.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use logsift_types::SourceId;

use crate::interner::FieldInterner;
use crate::merged::{MergeMode, MergedSet, Snapshot};
use crate::parser::{ParseError, RecordParser};
use crate::post::PostProcessor;

/// Records parsed between two cancellation checks
pub const DEFAULT_CANCEL_CHECK_INTERVAL: usize = 1000;

// ============================================================================
// Options
// ============================================================================

/// Whether a new load replaces everything or joins what is already loaded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// One source at a time; a new load cancels the previous one
    Single,
    /// Sources accumulate; reloading a source replaces only its records
    #[default]
    Multi,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Single => "single",
            LoadMode::Multi => "multi",
        }
    }

    fn merge_mode(self) -> MergeMode {
        match self {
            LoadMode::Single => MergeMode::Replace,
            LoadMode::Multi => MergeMode::Union,
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(LoadMode::Single),
            "multi" | "multiple" => Ok(LoadMode::Multi),
            other => Err(format!("unknown load mode '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LoadOptions {
    pub mode: LoadMode,

    /// Records between cancellation checks; zero is treated as one
    pub cancel_check_interval: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            mode: LoadMode::default(),
            cancel_check_interval: DEFAULT_CANCEL_CHECK_INTERVAL,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// How a load ended when it did not fail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The batch was merged
    Merged { records: usize },
    /// Cancelled or superseded before merging; nothing was merged
    Cancelled,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The parser panicked or the task was torn down
    #[error("load aborted: {0}")]
    Aborted(String),
}

/// Notifications for whoever presents the merged records
#[derive(Clone, Debug)]
pub enum LoadEvent {
    /// A generation settled and a new snapshot was published
    Settled(Arc<Snapshot>),
    /// One source failed; siblings are unaffected
    Failed { source: SourceId, error: String },
}

/// Handle to one running load
#[derive(Debug)]
pub struct LoadHandle {
    source: SourceId,
    task: JoinHandle<Result<LoadOutcome, LoadError>>,
}

impl LoadHandle {
    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the load, including its bookkeeping, to finish
    pub async fn wait(self) -> Result<LoadOutcome, LoadError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(LoadError::Aborted(e.to_string())),
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Latest load registered for a source
#[derive(Debug)]
struct InFlight {
    ticket: u64,
    token: CancellationToken,
}

#[derive(Debug)]
struct CoordinatorState {
    /// Loads started in this generation that have not completed
    pending: usize,

    /// Parent of every per-load token in this generation
    generation: CancellationToken,

    in_flight: HashMap<SourceId, InFlight>,
    next_ticket: u64,
    mode: LoadMode,
}

struct Inner {
    parser: Arc<dyn RecordParser>,
    cancel_check_interval: usize,

    /// Root of every generation; cancelled when the last handle drops
    root: CancellationToken,

    state: Mutex<CoordinatorState>,
    merged: MergedSet,
    events: mpsc::UnboundedSender<LoadEvent>,
    passes: AtomicUsize,
}

/// Runs loads concurrently and publishes a snapshot whenever all of them
/// have finished.
///
/// Cloning yields another handle to the same coordinator. Dropping the last
/// handle cancels every in-flight load.
#[derive(Clone)]
pub struct LoadCoordinator {
    inner: Arc<Inner>,
    _cancel_on_drop: Arc<DropGuard>,
}

impl LoadCoordinator {
    /// Create a coordinator and the receiver its events are delivered on
    pub fn new(
        parser: Arc<dyn RecordParser>,
        options: LoadOptions,
    ) -> (Self, mpsc::UnboundedReceiver<LoadEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let root = CancellationToken::new();
        let state = CoordinatorState {
            pending: 0,
            generation: root.child_token(),
            in_flight: HashMap::new(),
            next_ticket: 0,
            mode: options.mode,
        };
        let inner = Arc::new(Inner {
            parser,
            cancel_check_interval: options.cancel_check_interval.max(1),
            root: root.clone(),
            state: Mutex::new(state),
            merged: MergedSet::new(),
            events,
            passes: AtomicUsize::new(0),
        });
        let coordinator = Self {
            inner,
            _cancel_on_drop: Arc::new(root.drop_guard()),
        };
        (coordinator, rx)
    }

    /// Start loading `path` as `source`.
    ///
    /// Any in-flight load of the same source is cancelled and can no longer
    /// merge. Must be called from within a tokio runtime.
    pub fn start_load(&self, source: SourceId, path: impl Into<PathBuf>) -> LoadHandle {
        let path = path.into();
        let (ticket, token, mode) = {
            let mut state = self.inner.state.lock();
            if state.mode == LoadMode::Single {
                state.generation.cancel();
                state.generation = self.inner.root.child_token();
            }
            state.pending += 1;
            state.next_ticket += 1;
            let ticket = state.next_ticket;
            let token = state.generation.child_token();
            let latest = InFlight {
                ticket,
                token: token.clone(),
            };
            if let Some(previous) = state.in_flight.insert(source.clone(), latest) {
                debug!(source = %source, "superseding in-flight load");
                previous.token.cancel();
            }
            debug!(source = %source, pending = state.pending, "load started");
            (ticket, token, state.mode)
        };

        let inner = Arc::clone(&self.inner);
        let task_source = source.clone();
        let task = tokio::spawn(async move {
            inner
                .run_load(task_source, path, ticket, token, mode)
                .await
        });

        LoadHandle { source, task }
    }

    /// Cancel the source's in-flight load, drop its records and re-publish
    /// if nothing else is loading
    pub fn remove_source(&self, source: &SourceId) {
        if let Some(in_flight) = self.inner.state.lock().in_flight.remove(source) {
            in_flight.token.cancel();
        }

        if !self.inner.merged.remove(source) {
            return;
        }
        debug!(source = %source, "source removed");

        // Checked after the removal: a load still pending will settle over
        // the set without this source, otherwise nobody else will settle
        let idle = self.inner.state.lock().pending == 0;
        if idle {
            self.inner.settle();
        }
    }

    /// Cancel the source's in-flight load, keeping anything already merged
    pub fn cancel_source(&self, source: &SourceId) {
        if let Some(in_flight) = self.inner.state.lock().in_flight.remove(source) {
            debug!(source = %source, "load cancelled");
            in_flight.token.cancel();
        }
    }

    /// Cancel every load of the current generation
    pub fn cancel_all(&self) {
        let mut state = self.inner.state.lock();
        state.generation.cancel();
        state.generation = self.inner.root.child_token();
        state.in_flight.clear();
        debug!(pending = state.pending, "all loads cancelled");
    }

    /// Cancel everything and drop all merged records
    pub fn shutdown(&self) {
        self.cancel_all();
        self.inner.merged.clear();
    }

    pub fn set_mode(&self, mode: LoadMode) {
        self.inner.state.lock().mode = mode;
    }

    pub fn mode(&self) -> LoadMode {
        self.inner.state.lock().mode
    }

    /// Loads that have not completed yet
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending
    }

    pub fn is_loading(&self) -> bool {
        self.pending() > 0
    }

    /// Last published snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.merged.snapshot()
    }

    /// Sources currently holding merged records
    pub fn sources(&self) -> Vec<SourceId> {
        self.inner.merged.sources()
    }

    /// Number of post-processing passes run so far
    pub fn post_process_passes(&self) -> usize {
        self.inner.passes.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for LoadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("LoadCoordinator")
            .field("mode", &state.mode)
            .field("pending", &state.pending)
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

impl Inner {
    async fn run_load(
        self: Arc<Self>,
        source: SourceId,
        path: PathBuf,
        ticket: u64,
        token: CancellationToken,
        mode: LoadMode,
    ) -> Result<LoadOutcome, LoadError> {
        let worker = Arc::clone(&self);
        let worker_source = source.clone();
        let result = tokio::task::spawn_blocking(move || {
            worker.load_batch(&worker_source, &path, &token, mode)
        })
        .await
        .unwrap_or_else(|e| Err(LoadError::Aborted(e.to_string())));

        self.complete(&source, ticket, &result);
        result
    }

    /// Parse, intern and merge one source. Runs on the blocking pool.
    fn load_batch(
        &self,
        source: &SourceId,
        path: &Path,
        token: &CancellationToken,
        mode: LoadMode,
    ) -> Result<LoadOutcome, LoadError> {
        debug!(source = %source, path = %path.display(), "parsing");
        let stream = self.parser.parse(path)?;

        let mut interner = FieldInterner::new();
        let mut batch = Vec::new();
        for (count, record) in stream.enumerate() {
            if count % self.cancel_check_interval == 0 && token.is_cancelled() {
                debug!(source = %source, parsed = count, "load cancelled while parsing");
                return Ok(LoadOutcome::Cancelled);
            }
            let mut record = interner.intern_record(record?);
            record.source = source.clone();
            record.id = None;
            batch.push(record);
        }

        let records = batch.len();
        if !self
            .merged
            .merge(source.clone(), batch, mode.merge_mode(), token)
        {
            debug!(source = %source, "load cancelled before merge");
            return Ok(LoadOutcome::Cancelled);
        }
        debug!(source = %source, records, "batch merged");
        Ok(LoadOutcome::Merged { records })
    }

    /// Completion continuation, run once per load whatever its result
    fn complete(&self, source: &SourceId, ticket: u64, result: &Result<LoadOutcome, LoadError>) {
        if let Err(error) = result {
            warn!(source = %source, error = %error, "load failed");
            let _ = self.events.send(LoadEvent::Failed {
                source: source.clone(),
                error: error.to_string(),
            });
        }

        let settled = {
            let mut state = self.state.lock();
            state.pending = state.pending.saturating_sub(1);
            if state
                .in_flight
                .get(source)
                .is_some_and(|latest| latest.ticket == ticket)
            {
                state.in_flight.remove(source);
            }

            if state.pending > 0 {
                debug!(pending = state.pending, "delaying post-processing");
                false
            } else {
                let finished = std::mem::replace(&mut state.generation, self.root.child_token());
                finished.cancel();
                true
            }
        };

        if settled {
            self.settle();
        }
    }

    /// Post-process the merged set and publish the result if it is new
    fn settle(&self) {
        self.passes.fetch_add(1, Ordering::SeqCst);
        let snapshot = PostProcessor::run(&self.merged);
        let revision = snapshot.revision();

        let published = self.merged.publish(snapshot, |published| {
            info!(
                revision,
                records = published.len(),
                errors = published.counts().error,
                "snapshot published"
            );
            let _ = self.events.send(LoadEvent::Settled(Arc::clone(published)));
        });

        if !published {
            debug!(revision, "merged set unchanged, nothing to publish");
        }
    }
}
