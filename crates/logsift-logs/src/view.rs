use logsift_types::{Field, Record, Severity, SeverityCounts};

use crate::filter::{FilterChain, FilterError};
use crate::merged::Snapshot;

/// Timestamp format used for display and for quick search on time fields
pub const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

// ============================================================================
// Level Visibility
// ============================================================================

/// One visibility toggle per severity; everything is visible by default
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelVisibility {
    pub debug: bool,
    pub info: bool,
    pub warn: bool,
    pub error: bool,
    pub fatal: bool,
}

impl Default for LevelVisibility {
    fn default() -> Self {
        Self {
            debug: true,
            info: true,
            warn: true,
            error: true,
            fatal: true,
        }
    }
}

impl LevelVisibility {
    pub fn is_visible(&self, severity: Severity) -> bool {
        match severity {
            Severity::Debug => self.debug,
            Severity::Info => self.info,
            Severity::Warn => self.warn,
            Severity::Error => self.error,
            Severity::Fatal => self.fatal,
        }
    }

    pub fn set(&mut self, severity: Severity, visible: bool) {
        let slot = match severity {
            Severity::Debug => &mut self.debug,
            Severity::Info => &mut self.info,
            Severity::Warn => &mut self.warn,
            Severity::Error => &mut self.error,
            Severity::Fatal => &mut self.fatal,
        };
        *slot = visible;
    }

    /// Everything visible except `hidden`
    pub fn hiding<I>(hidden: I) -> Self
    where
        I: IntoIterator<Item = Severity>,
    {
        let mut levels = Self::default();
        for severity in hidden {
            levels.set(severity, false);
        }
        levels
    }
}

// ============================================================================
// Quick Search
// ============================================================================

/// Case-insensitive substring search on one column
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuickSearch {
    field: Field,
    /// Lowercased needle
    needle: String,
}

impl QuickSearch {
    pub fn new(field: Field, text: &str) -> Self {
        Self {
            field,
            needle: text.to_lowercase(),
        }
    }

    /// Parse a `field=text` argument
    pub fn parse(arg: &str) -> Result<Self, FilterError> {
        let Some((name, text)) = arg.split_once('=') else {
            return Err(FilterError::MissingValue {
                property: arg.to_string(),
                what: "search text",
            });
        };
        let field =
            Field::from_name(name).ok_or_else(|| FilterError::UnknownField(name.to_string()))?;
        Ok(Self::new(field, text))
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn matches(&self, record: &Record) -> bool {
        if self.needle.is_empty() {
            return true;
        }
        match self.field {
            Field::Text(field) => record.text(field).to_lowercase().contains(&self.needle),
            Field::Time(field) => record
                .time(field)
                .format(DISPLAY_TIME_FORMAT)
                .to_string()
                .contains(&self.needle),
        }
    }
}

// ============================================================================
// View Filter
// ============================================================================

/// Records admitted by a view, with counts over just those records
#[derive(Clone, Debug, Default)]
pub struct FilteredView {
    pub records: Vec<Record>,
    pub counts: SeverityCounts,
}

impl FilteredView {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Presentation-side admission: level toggles, then quick searches, then
/// the filter chain
#[derive(Clone, Debug, Default)]
pub struct ViewFilter {
    pub levels: LevelVisibility,
    searches: Vec<QuickSearch>,
    chain: FilterChain,
}

impl ViewFilter {
    pub fn new(chain: FilterChain) -> Self {
        Self {
            chain,
            ..Self::default()
        }
    }

    pub fn with_levels(mut self, levels: LevelVisibility) -> Self {
        self.levels = levels;
        self
    }

    /// Add a quick search; a later search on the same field replaces it
    pub fn with_search(mut self, search: QuickSearch) -> Self {
        self.set_search(search);
        self
    }

    pub fn set_search(&mut self, search: QuickSearch) {
        self.searches.retain(|s| s.field != search.field);
        self.searches.push(search);
    }

    pub fn clear_searches(&mut self) {
        self.searches.clear();
    }

    pub fn searches(&self) -> &[QuickSearch] {
        &self.searches
    }

    pub fn chain(&self) -> &FilterChain {
        &self.chain
    }

    pub fn set_chain(&mut self, chain: FilterChain) {
        self.chain = chain;
    }

    pub fn admits(&self, record: &Record) -> bool {
        self.levels.is_visible(record.severity)
            && self.searches.iter().all(|s| s.matches(record))
            && self.chain.evaluate(record)
    }

    pub fn apply(&self, snapshot: &Snapshot) -> FilteredView {
        let records: Vec<Record> = snapshot
            .iter()
            .filter(|r| self.admits(r))
            .cloned()
            .collect();
        let counts = records.iter().collect();
        FilteredView { records, counts }
    }
}
