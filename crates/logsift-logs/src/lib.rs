//! Log loading, merging and filtering for logsift
//!
//! Sources are parsed concurrently by the [`LoadCoordinator`], merged into a
//! single set, and published as timestamp-sorted [`Snapshot`]s. Filters and
//! view settings are applied on top of a snapshot.

mod filter;
mod interner;
mod loader;
mod merged;
mod parser;
mod persist;
mod post;
mod view;

pub use filter::{
    Filter, FilterChain, FilterError, FilterMode, FilterResult, FilterSpec, StringFilterSpec,
    StringRelation, TimeFilterSpec, TimeRelation,
};
pub use interner::FieldInterner;
pub use loader::{
    DEFAULT_CANCEL_CHECK_INTERVAL, LoadCoordinator, LoadError, LoadEvent, LoadHandle, LoadMode,
    LoadOptions, LoadOutcome,
};
pub use merged::{MergeMode, MergedSet, Snapshot};
pub use parser::{JsonLinesParser, ParseError, RecordParser, RecordStream};
pub use persist::{
    PersistedFilter, load_filter_file, parse_filters, render_filters, save_filter_file,
};
pub use post::PostProcessor;
pub use view::{DISPLAY_TIME_FORMAT, FilteredView, LevelVisibility, QuickSearch, ViewFilter};

// Re-export types used in our public API
pub use logsift_types::{Record, Severity, SeverityCounts, SourceId};
