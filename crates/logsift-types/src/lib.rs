//! Shared types for logsift
//!
//! This crate contains the record model and the field accessor table used by
//! the ingestion, filtering and presentation layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

// ============================================================================
// Severity
// ============================================================================

/// Log severity level, ordered from least to most severe
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// All severities in ascending order
    pub const ALL: [Severity; 5] = [
        Self::Debug,
        Self::Info,
        Self::Warn,
        Self::Error,
        Self::Fatal,
    ];

    /// Parse a severity from common spellings, `None` if unrecognized
    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" | "trc" | "verbose" | "debug" | "dbg" | "debg" => Some(Self::Debug),
            "info" | "inf" | "information" | "notice" => Some(Self::Info),
            "warn" | "warning" | "wrn" => Some(Self::Warn),
            "error" | "err" | "erro" => Some(Self::Error),
            "fatal" | "panic" | "critical" | "crit" | "ftl" => Some(Self::Fatal),
            _ => None,
        }
    }

    /// Parse a severity, treating anything unrecognized as info
    pub fn from_name_lossy(s: &str) -> Self {
        Self::from_name(s).unwrap_or_default()
    }

    /// Upper-case display name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown severity '{}'", s))
    }
}

// ============================================================================
// Sources
// ============================================================================

/// Identity of a loaded source (the path it was read from)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(Arc<str>);

impl SourceId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn from_path(path: &Path) -> Self {
        Self(path.to_string_lossy().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self(Arc::from(""))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&Path> for SourceId {
    fn from(path: &Path) -> Self {
        Self::from_path(path)
    }
}

// ============================================================================
// Field Accessor Table
// ============================================================================

/// String-typed record fields
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextField {
    Level,
    Logger,
    Thread,
    Message,
    Source,
    Host,
    Machine,
    User,
    Application,
    Class,
    Method,
}

impl TextField {
    pub const ALL: [TextField; 11] = [
        Self::Level,
        Self::Logger,
        Self::Thread,
        Self::Message,
        Self::Source,
        Self::Host,
        Self::Machine,
        Self::User,
        Self::Application,
        Self::Class,
        Self::Method,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Level => "level",
            Self::Logger => "logger",
            Self::Thread => "thread",
            Self::Message => "message",
            Self::Source => "source",
            Self::Host => "host",
            Self::Machine => "machine",
            Self::User => "user",
            Self::Application => "application",
            Self::Class => "class",
            Self::Method => "method",
        }
    }
}

/// Time-typed record fields
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeField {
    Timestamp,
}

impl TimeField {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
        }
    }
}

/// Value type of a field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Time,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("string"),
            Self::Time => f.write_str("time"),
        }
    }
}

/// Any filterable record field, tagged with its value type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Text(TextField),
    Time(TimeField),
}

impl Field {
    /// Resolve a property name as written in filter files or on the command line.
    ///
    /// Matching is case-insensitive and accepts the long-form aliases used by
    /// common log viewers (`TimeStamp`, `HostName`, `UserName`, `App`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let field = match name.trim().to_lowercase().as_str() {
            "timestamp" | "time" | "date" => Self::Time(TimeField::Timestamp),
            "level" | "severity" => Self::Text(TextField::Level),
            "logger" => Self::Text(TextField::Logger),
            "thread" => Self::Text(TextField::Thread),
            "message" | "msg" => Self::Text(TextField::Message),
            "source" | "path" | "file" => Self::Text(TextField::Source),
            "host" | "hostname" => Self::Text(TextField::Host),
            "machine" | "machinename" => Self::Text(TextField::Machine),
            "user" | "username" => Self::Text(TextField::User),
            "application" | "app" => Self::Text(TextField::Application),
            "class" => Self::Text(TextField::Class),
            "method" => Self::Text(TextField::Method),
            _ => return None,
        };
        Some(field)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Text(f) => f.name(),
            Self::Time(f) => f.name(),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Text(_) => FieldKind::Text,
            Self::Time(_) => FieldKind::Time,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Records
// ============================================================================

/// A single log record
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Position in the merged, sorted set. `None` until post-processing
    /// assigns it; only valid until the next post-processing pass.
    pub id: Option<u64>,

    pub timestamp: DateTime<Utc>,

    /// Normalized severity
    pub severity: Severity,

    /// Level text as written by the source
    pub level: Arc<str>,

    pub logger: Arc<str>,
    pub thread: Arc<str>,
    pub message: Arc<str>,

    /// Source the record was loaded from
    pub source: SourceId,

    pub host: Option<Arc<str>>,
    pub machine: Option<Arc<str>>,
    pub user: Option<Arc<str>>,
    pub application: Option<Arc<str>>,
    pub class: Option<Arc<str>>,
    pub method: Option<Arc<str>>,
}

impl Record {
    /// Create a record with the required fields; everything else is empty
    pub fn new(timestamp: DateTime<Utc>, severity: Severity, message: impl Into<Arc<str>>) -> Self {
        Self {
            id: None,
            timestamp,
            severity,
            level: Arc::from(severity.as_str()),
            logger: Arc::from(""),
            thread: Arc::from(""),
            message: message.into(),
            source: SourceId::default(),
            host: None,
            machine: None,
            user: None,
            application: None,
            class: None,
            method: None,
        }
    }

    /// Set the level text, deriving the severity from it
    pub fn with_level(mut self, level: impl Into<Arc<str>>) -> Self {
        self.level = level.into();
        self.severity = Severity::from_name_lossy(&self.level);
        self
    }

    pub fn with_logger(mut self, logger: impl Into<Arc<str>>) -> Self {
        self.logger = logger.into();
        self
    }

    pub fn with_thread(mut self, thread: impl Into<Arc<str>>) -> Self {
        self.thread = thread.into();
        self
    }

    pub fn with_source(mut self, source: SourceId) -> Self {
        self.source = source;
        self
    }

    pub fn with_host(mut self, host: impl Into<Arc<str>>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<Arc<str>>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Read a string field. Absent optional fields read as empty.
    pub fn text(&self, field: TextField) -> &str {
        fn optional(value: &Option<Arc<str>>) -> &str {
            value.as_deref().unwrap_or("")
        }

        match field {
            TextField::Level => &self.level,
            TextField::Logger => &self.logger,
            TextField::Thread => &self.thread,
            TextField::Message => &self.message,
            TextField::Source => self.source.as_str(),
            TextField::Host => optional(&self.host),
            TextField::Machine => optional(&self.machine),
            TextField::User => optional(&self.user),
            TextField::Application => optional(&self.application),
            TextField::Class => optional(&self.class),
            TextField::Method => optional(&self.method),
        }
    }

    /// Read a time field
    pub fn time(&self, field: TimeField) -> DateTime<Utc> {
        match field {
            TimeField::Timestamp => self.timestamp,
        }
    }
}

// ============================================================================
// Counters
// ============================================================================

/// Record counts per severity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    pub debug: usize,
    pub info: usize,
    pub warn: usize,
    pub error: usize,
    pub fatal: usize,
}

impl SeverityCounts {
    pub fn increment(&mut self, severity: Severity) {
        match severity {
            Severity::Debug => self.debug += 1,
            Severity::Info => self.info += 1,
            Severity::Warn => self.warn += 1,
            Severity::Error => self.error += 1,
            Severity::Fatal => self.fatal += 1,
        }
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Debug => self.debug,
            Severity::Info => self.info,
            Severity::Warn => self.warn,
            Severity::Error => self.error,
            Severity::Fatal => self.fatal,
        }
    }

    pub fn total(&self) -> usize {
        self.debug + self.info + self.warn + self.error + self.fatal
    }
}

impl<'a> FromIterator<&'a Record> for SeverityCounts {
    fn from_iter<I: IntoIterator<Item = &'a Record>>(iter: I) -> Self {
        let mut counts = Self::default();
        for record in iter {
            counts.increment(record.severity);
        }
        counts
    }
}
