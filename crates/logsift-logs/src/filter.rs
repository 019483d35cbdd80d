use chrono::{DateTime, Utc};
use regex::Regex;
use std::borrow::Cow;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use logsift_types::{FieldKind, Record, TextField, TimeField};

/// Configuration errors raised while building or loading filters.
///
/// Evaluation itself never fails: anything that could go wrong is checked
/// when the filter is constructed.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("unknown property '{0}'")]
    UnknownField(String),

    #[error("relation '{relation}' cannot be applied to {kind} property '{property}'")]
    RelationMismatch {
        property: String,
        relation: String,
        kind: FieldKind,
    },

    #[error("unknown relation '{0}'")]
    UnknownRelation(String),

    #[error("unknown filter mode '{0}'")]
    UnknownMode(String),

    #[error("filter on '{property}' is missing {what}")]
    MissingValue {
        property: String,
        what: &'static str,
    },

    #[error("invalid time value '{value}' for property '{property}'")]
    InvalidTime { property: String, value: String },

    #[error("invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to read filter file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse filter file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to serialize filters: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ============================================================================
// Filter Specs
// ============================================================================

/// Whether a matching filter admits or rejects a record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Include,
    Exclude,
}

impl FilterMode {
    pub fn from_name(s: &str) -> Option<Self> {
        match normalize(s).as_str() {
            "include" => Some(Self::Include),
            "exclude" => Some(Self::Exclude),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Include => "Include",
            Self::Exclude => "Exclude",
        }
    }
}

/// Outcome of a single filter applied to a record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterResult {
    /// Drop the record regardless of any other filter
    Exclude,
    /// Drop the record unless an include filter admits it
    CanExclude,
    /// Keep the record unless an exclude filter already dropped it
    Include,
    /// No opinion
    Ignore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StringRelation {
    Is,
    IsNot,
    BeginsWith,
    EndsWith,
    Contains,
    Excludes,
    MatchesRegex,
}

impl StringRelation {
    pub fn from_name(s: &str) -> Option<Self> {
        match normalize(s).as_str() {
            "is" | "equals" => Some(Self::Is),
            "isnot" | "notequals" => Some(Self::IsNot),
            "beginswith" | "startswith" => Some(Self::BeginsWith),
            "endswith" => Some(Self::EndsWith),
            "contains" => Some(Self::Contains),
            "excludes" | "notcontains" => Some(Self::Excludes),
            "matchesregex" | "regex" => Some(Self::MatchesRegex),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Is => "Is",
            Self::IsNot => "IsNot",
            Self::BeginsWith => "BeginsWith",
            Self::EndsWith => "EndsWith",
            Self::Contains => "Contains",
            Self::Excludes => "Excludes",
            Self::MatchesRegex => "MatchesRegex",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeRelation {
    Before,
    After,
    /// Requires `value <= value2`; a reversed range matches nothing
    Between,
}

impl TimeRelation {
    pub fn from_name(s: &str) -> Option<Self> {
        match normalize(s).as_str() {
            "before" => Some(Self::Before),
            "after" => Some(Self::After),
            "between" => Some(Self::Between),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "Before",
            Self::After => "After",
            Self::Between => "Between",
        }
    }
}

/// Predicate over a string field
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringFilterSpec {
    pub field: TextField,
    pub relation: StringRelation,
    pub value: String,
    pub case_insensitive: bool,
    pub mode: FilterMode,
}

impl StringFilterSpec {
    /// Case-insensitive spec
    pub fn new(
        field: TextField,
        relation: StringRelation,
        value: impl Into<String>,
        mode: FilterMode,
    ) -> Self {
        Self {
            field,
            relation,
            value: value.into(),
            case_insensitive: true,
            mode,
        }
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_insensitive = false;
        self
    }
}

/// Predicate over a time field
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeFilterSpec {
    pub field: TimeField,
    pub relation: TimeRelation,
    pub value: DateTime<Utc>,
    /// Upper bound, only used by `Between`
    pub value2: Option<DateTime<Utc>>,
    pub inclusive: bool,
    pub mode: FilterMode,
}

/// Declarative filter configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterSpec {
    String(StringFilterSpec),
    Time(TimeFilterSpec),
}

impl FilterSpec {
    pub fn mode(&self) -> FilterMode {
        match self {
            Self::String(spec) => spec.mode,
            Self::Time(spec) => spec.mode,
        }
    }
}

impl From<StringFilterSpec> for FilterSpec {
    fn from(spec: StringFilterSpec) -> Self {
        Self::String(spec)
    }
}

impl From<TimeFilterSpec> for FilterSpec {
    fn from(spec: TimeFilterSpec) -> Self {
        Self::Time(spec)
    }
}

/// Lower-case and drop separators so `begins_with`, `BeginsWith` and
/// `begins-with` all resolve the same way
fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

// ============================================================================
// Compiled Filters
// ============================================================================

#[derive(Clone)]
enum Matcher {
    Text {
        field: TextField,
        relation: StringRelation,
        /// Already case-folded when matching is case-insensitive
        needle: String,
        case_insensitive: bool,
        regex: Option<Regex>,
    },
    Time {
        field: TimeField,
        relation: TimeRelation,
        value: DateTime<Utc>,
        value2: DateTime<Utc>,
        inclusive: bool,
    },
}

/// A validated, ready-to-evaluate filter
#[derive(Clone)]
pub struct Filter {
    spec: FilterSpec,
    matcher: Matcher,
}

impl Filter {
    /// Build a filter, compiling any regex up front
    pub fn new(spec: impl Into<FilterSpec>) -> Result<Self, FilterError> {
        let spec = spec.into();
        let matcher = match &spec {
            FilterSpec::String(s) => {
                let regex = match s.relation {
                    StringRelation::MatchesRegex => {
                        Some(compile_regex(&s.value, s.case_insensitive)?)
                    }
                    _ => None,
                };
                let needle = if s.case_insensitive {
                    s.value.to_lowercase()
                } else {
                    s.value.clone()
                };
                Matcher::Text {
                    field: s.field,
                    relation: s.relation,
                    needle,
                    case_insensitive: s.case_insensitive,
                    regex,
                }
            }
            FilterSpec::Time(t) => {
                let value2 = match (t.relation, t.value2) {
                    (TimeRelation::Between, Some(upper)) => upper,
                    (TimeRelation::Between, None) => {
                        return Err(FilterError::MissingValue {
                            property: t.field.name().to_string(),
                            what: "an upper bound (value2)",
                        });
                    }
                    (_, upper) => upper.unwrap_or(t.value),
                };
                Matcher::Time {
                    field: t.field,
                    relation: t.relation,
                    value: t.value,
                    value2,
                    inclusive: t.inclusive,
                }
            }
        };
        Ok(Self { spec, matcher })
    }

    pub fn mode(&self) -> FilterMode {
        self.spec.mode()
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    /// Check the predicate alone, ignoring the mode
    pub fn matches(&self, record: &Record) -> bool {
        match &self.matcher {
            Matcher::Text {
                field,
                relation,
                needle,
                case_insensitive,
                regex,
            } => {
                let raw = record.text(*field);
                if let Some(re) = regex {
                    return re.is_match(raw);
                }
                let value: Cow<'_, str> = if *case_insensitive {
                    Cow::Owned(raw.to_lowercase())
                } else {
                    Cow::Borrowed(raw)
                };
                match relation {
                    StringRelation::Is => value == needle.as_str(),
                    StringRelation::IsNot => value != needle.as_str(),
                    StringRelation::BeginsWith => value.starts_with(needle.as_str()),
                    StringRelation::EndsWith => value.ends_with(needle.as_str()),
                    StringRelation::Contains => value.contains(needle.as_str()),
                    StringRelation::Excludes => !value.contains(needle.as_str()),
                    // Always compiled in `new`
                    StringRelation::MatchesRegex => false,
                }
            }
            Matcher::Time {
                field,
                relation,
                value,
                value2,
                inclusive,
            } => {
                let current = record.time(*field);
                match (relation, inclusive) {
                    (TimeRelation::Before, true) => current <= *value,
                    (TimeRelation::Before, false) => current < *value,
                    (TimeRelation::After, true) => current >= *value,
                    (TimeRelation::After, false) => current > *value,
                    (TimeRelation::Between, true) => *value <= current && current <= *value2,
                    (TimeRelation::Between, false) => *value < current && current < *value2,
                }
            }
        }
    }

    /// Apply the filter, combining the predicate with the mode
    pub fn apply(&self, record: &Record) -> FilterResult {
        match (self.mode(), self.matches(record)) {
            (FilterMode::Exclude, true) => FilterResult::Exclude,
            (FilterMode::Exclude, false) => FilterResult::Ignore,
            (FilterMode::Include, true) => FilterResult::Include,
            (FilterMode::Include, false) => FilterResult::CanExclude,
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter").field("spec", &self.spec).finish()
    }
}

fn compile_regex(pattern: &str, case_insensitive: bool) -> Result<Regex, FilterError> {
    let source = if case_insensitive {
        format!("(?i){}", pattern)
    } else {
        pattern.to_string()
    };
    Regex::new(&source).map_err(|source| FilterError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

// ============================================================================
// Filter Chain
// ============================================================================

/// Ordered set of filters evaluated with exclude-before-include precedence
#[derive(Clone, Debug, Default)]
pub struct FilterChain {
    /// Exclude-mode filters first, otherwise in insertion order
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn new(filters: Vec<Filter>) -> Self {
        let mut chain = Self { filters };
        chain.reorder();
        chain
    }

    /// Build a chain from specs, failing on the first invalid one
    pub fn from_specs<I>(specs: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = FilterSpec>,
    {
        let filters = specs
            .into_iter()
            .map(Filter::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(filters))
    }

    pub fn push(&mut self, filter: Filter) {
        self.filters.push(filter);
        self.reorder();
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn specs(&self) -> Vec<FilterSpec> {
        self.filters.iter().map(|f| f.spec().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Decide whether a record belongs in the view
    pub fn evaluate(&self, record: &Record) -> bool {
        fold_results(self.filters.iter().map(|f| f.apply(record)))
    }

    /// Evaluate an unordered slice of filters, excludes first
    pub fn evaluate_all(record: &Record, filters: &[Filter]) -> bool {
        let excludes = filters.iter().filter(|f| f.mode() == FilterMode::Exclude);
        let includes = filters.iter().filter(|f| f.mode() == FilterMode::Include);
        fold_results(excludes.chain(includes).map(|f| f.apply(record)))
    }

    fn reorder(&mut self) {
        // Stable: relative order inside each mode is kept
        self.filters.sort_by_key(|f| f.mode() != FilterMode::Exclude);
    }
}

/// Exclude wins outright, then include; a pending weak veto drops the
/// record; with no opinion at all the record is kept
fn fold_results(results: impl Iterator<Item = FilterResult>) -> bool {
    let mut can_exclude = false;
    for result in results {
        match result {
            FilterResult::Exclude => return false,
            FilterResult::Include => return true,
            FilterResult::CanExclude => can_exclude = true,
            FilterResult::Ignore => {}
        }
    }
    !can_exclude
}

#[cfg(test)]
mod tests {
    use super::*;
    use logsift_types::Severity;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap()
    }

    fn entry(logger: &str) -> Record {
        Record::new(at(10, 0), Severity::Info, "message").with_logger(logger.to_string())
    }

    fn logger(relation: StringRelation, value: &str, mode: FilterMode) -> Filter {
        Filter::new(StringFilterSpec::new(TextField::Logger, relation, value, mode)).unwrap()
    }

    fn time(
        relation: TimeRelation,
        value: DateTime<Utc>,
        value2: Option<DateTime<Utc>>,
        inclusive: bool,
    ) -> Filter {
        Filter::new(TimeFilterSpec {
            field: TimeField::Timestamp,
            relation,
            value,
            value2,
            inclusive,
            mode: FilterMode::Include,
        })
        .unwrap()
    }

    #[test]
    fn test_apply_mode_table() {
        let record = entry("Audit");
        let hit = StringRelation::Is;

        let apply = |value, mode| logger(hit, value, mode).apply(&record);

        assert_eq!(apply("audit", FilterMode::Exclude), FilterResult::Exclude);
        assert_eq!(apply("other", FilterMode::Exclude), FilterResult::Ignore);
        assert_eq!(apply("audit", FilterMode::Include), FilterResult::Include);
        assert_eq!(apply("other", FilterMode::Include), FilterResult::CanExclude);
    }

    #[test]
    fn test_string_relations_case_insensitive() {
        let record = entry("Db.Pool.Sql");
        let m = |relation, value| logger(relation, value, FilterMode::Include).matches(&record);

        assert!(m(StringRelation::Is, "db.pool.sql"));
        assert!(m(StringRelation::IsNot, "db"));
        assert!(m(StringRelation::BeginsWith, "DB.POOL"));
        assert!(m(StringRelation::EndsWith, ".sql"));
        assert!(m(StringRelation::Contains, "pool"));
        assert!(m(StringRelation::Excludes, "cache"));
        assert!(!m(StringRelation::Excludes, "POOL"));
        assert!(m(StringRelation::MatchesRegex, r"^db\.\w+\.sql$"));
    }

    #[test]
    fn test_case_sensitive_spec() {
        let spec = StringFilterSpec::new(
            TextField::Logger,
            StringRelation::Is,
            "audit",
            FilterMode::Include,
        )
        .case_sensitive();
        let filter = Filter::new(spec).unwrap();
        assert!(!filter.matches(&entry("Audit")));
        assert!(filter.matches(&entry("audit")));
    }

    #[test]
    fn test_invalid_regex_is_configuration_error() {
        let spec = StringFilterSpec::new(
            TextField::Message,
            StringRelation::MatchesRegex,
            "(unclosed",
            FilterMode::Include,
        );
        assert!(matches!(Filter::new(spec), Err(FilterError::InvalidRegex { .. })));
    }

    #[test]
    fn test_absent_optional_field_reads_empty() {
        let spec =
            StringFilterSpec::new(TextField::Host, StringRelation::Is, "", FilterMode::Include);
        assert!(Filter::new(spec).unwrap().matches(&entry("x")));
    }

    #[test]
    fn test_time_relations_boundaries() {
        let record = entry("x"); // 10:00
        let boundary = at(10, 0);

        assert!(time(TimeRelation::Before, boundary, None, true).matches(&record));
        assert!(!time(TimeRelation::Before, boundary, None, false).matches(&record));
        assert!(time(TimeRelation::After, boundary, None, true).matches(&record));
        assert!(!time(TimeRelation::After, boundary, None, false).matches(&record));
        assert!(time(TimeRelation::After, at(9, 0), None, false).matches(&record));

        assert!(time(TimeRelation::Between, at(10, 0), Some(at(11, 0)), true).matches(&record));
        assert!(!time(TimeRelation::Between, at(10, 0), Some(at(11, 0)), false).matches(&record));
        assert!(time(TimeRelation::Between, at(9, 0), Some(at(11, 0)), false).matches(&record));
        // Reversed range matches nothing
        assert!(!time(TimeRelation::Between, at(11, 0), Some(at(9, 0)), true).matches(&record));
    }

    #[test]
    fn test_between_without_upper_bound_is_rejected() {
        let result = Filter::new(TimeFilterSpec {
            field: TimeField::Timestamp,
            relation: TimeRelation::Between,
            value: at(9, 0),
            value2: None,
            inclusive: true,
            mode: FilterMode::Include,
        });
        assert!(matches!(result, Err(FilterError::MissingValue { .. })));
    }

    #[test]
    fn test_empty_chain_keeps_everything() {
        assert!(FilterChain::default().evaluate(&entry("anything")));
    }

    #[test]
    fn test_exclude_only_chain() {
        let chain = FilterChain::new(vec![
            logger(StringRelation::Contains, "sql", FilterMode::Exclude),
            logger(StringRelation::Is, "noise", FilterMode::Exclude),
        ]);
        assert!(!chain.evaluate(&entry("db.sql")));
        assert!(!chain.evaluate(&entry("noise")));
        assert!(chain.evaluate(&entry("web")));
    }

    #[test]
    fn test_include_only_chain_is_a_whitelist() {
        let chain = FilterChain::new(vec![
            logger(StringRelation::Is, "audit", FilterMode::Include),
            logger(StringRelation::BeginsWith, "web", FilterMode::Include),
        ]);
        assert!(chain.evaluate(&entry("Audit")));
        assert!(chain.evaluate(&entry("web.http")));
        assert!(!chain.evaluate(&entry("db")));
    }

    #[test]
    fn test_exclude_wins_regardless_of_order() {
        let include = logger(StringRelation::Contains, "audit", FilterMode::Include);
        let exclude = logger(StringRelation::Contains, "sql", FilterMode::Exclude);
        let record = entry("SqlAudit");

        let include_first = vec![include.clone(), exclude.clone()];
        let exclude_first = vec![exclude, include];

        assert!(!FilterChain::new(include_first.clone()).evaluate(&record));
        assert!(!FilterChain::new(exclude_first.clone()).evaluate(&record));
        assert!(!FilterChain::evaluate_all(&record, &include_first));
        assert!(!FilterChain::evaluate_all(&record, &exclude_first));
    }

    #[test]
    fn test_sql_exclude_audit_include_scenario() {
        let chain = FilterChain::from_specs([
            FilterSpec::from(StringFilterSpec::new(
                TextField::Logger,
                StringRelation::Contains,
                "Sql",
                FilterMode::Exclude,
            )),
            FilterSpec::from(StringFilterSpec::new(
                TextField::Logger,
                StringRelation::Is,
                "Audit",
                FilterMode::Include,
            )),
        ])
        .unwrap();

        assert!(!chain.evaluate(&entry("SqlAudit")));
        assert!(chain.evaluate(&entry("Audit")));
        // Neither matches: the include filter's weak veto drops it
        assert!(!chain.evaluate(&entry("Web")));
    }

    #[test]
    fn test_chain_orders_excludes_first_stably() {
        let chain = FilterChain::new(vec![
            logger(StringRelation::Is, "a", FilterMode::Include),
            logger(StringRelation::Is, "b", FilterMode::Exclude),
            logger(StringRelation::Is, "c", FilterMode::Include),
            logger(StringRelation::Is, "d", FilterMode::Exclude),
        ]);
        let values: Vec<String> = chain
            .specs()
            .into_iter()
            .map(|spec| match spec {
                FilterSpec::String(s) => s.value,
                FilterSpec::Time(_) => unreachable!(),
            })
            .collect();
        assert_eq!(values, ["b", "d", "a", "c"]);
    }

    #[test]
    fn test_relation_names_are_forgiving() {
        assert_eq!(StringRelation::from_name("begins_with"), Some(StringRelation::BeginsWith));
        assert_eq!(StringRelation::from_name("MatchesRegex"), Some(StringRelation::MatchesRegex));
        assert_eq!(TimeRelation::from_name("BETWEEN"), Some(TimeRelation::Between));
        assert_eq!(FilterMode::from_name("exclude"), Some(FilterMode::Exclude));
        assert_eq!(FilterMode::from_name("maybe"), None);
    }
}
