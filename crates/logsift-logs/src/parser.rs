use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use logsift_types::{Record, Severity, SourceId};

/// Errors raised while reading a source
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}:{line}: {reason}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Lazily produced records of one source
pub type RecordStream = Box<dyn Iterator<Item = Result<Record, ParseError>> + Send>;

/// Turns a source path into records.
///
/// Implementations are shared between concurrently running loads and must
/// not keep per-call mutable state.
pub trait RecordParser: Send + Sync + 'static {
    fn parse(&self, path: &Path) -> Result<RecordStream, ParseError>;
}

/// Parser for newline-delimited JSON log files
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonLinesParser;

const TIMESTAMP_KEYS: [&str; 5] = ["timestamp", "time", "@timestamp", "ts", "date"];
const LEVEL_KEYS: [&str; 6] = ["level", "lvl", "severity", "log.level", "loglevel", "log_level"];
const MESSAGE_KEYS: [&str; 4] = ["message", "msg", "text", "body"];

impl RecordParser for JsonLinesParser {
    fn parse(&self, path: &Path) -> Result<RecordStream, ParseError> {
        let file = File::open(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let path = path.to_path_buf();
        let source = SourceId::from_path(&path);

        let records = BufReader::new(file)
            .lines()
            .enumerate()
            .filter_map(move |(index, line)| {
                let line_number = index + 1;
                let line = match line {
                    Ok(line) => line,
                    Err(source) => {
                        return Some(Err(ParseError::Io {
                            path: path.clone(),
                            source,
                        }));
                    }
                };
                if line.trim().is_empty() {
                    return None;
                }
                Some(
                    JsonLinesParser::parse_line(&line)
                        .map(|record| record.with_source(source.clone()))
                        .map_err(|reason| ParseError::Malformed {
                            path: path.clone(),
                            line: line_number,
                            reason,
                        }),
                )
            });

        Ok(Box::new(records))
    }
}

impl JsonLinesParser {
    /// Parse one JSON object line into a record
    pub fn parse_line(line: &str) -> Result<Record, String> {
        let value: Value =
            serde_json::from_str(line.trim()).map_err(|e| format!("invalid JSON: {}", e))?;
        let Value::Object(fields) = value else {
            return Err("expected a JSON object".to_string());
        };

        let timestamp = Self::extract_timestamp(&fields)?;
        let level = Self::first_text(&fields, &LEVEL_KEYS);
        let severity = level
            .as_deref()
            .map(Severity::from_name_lossy)
            .unwrap_or_default();
        let message = Self::first_text(&fields, &MESSAGE_KEYS).unwrap_or_default();

        let mut record = Record::new(timestamp, severity, message);
        if let Some(level) = level {
            record.level = Arc::from(level);
        }
        if let Some(logger) = Self::first_text(&fields, &["logger", "logger_name", "target"]) {
            record.logger = Arc::from(logger);
        }
        if let Some(thread) = Self::first_text(&fields, &["thread", "thread_name"]) {
            record.thread = Arc::from(thread);
        }
        record.host = Self::first_text(&fields, &["host", "hostname"]).map(Arc::from);
        record.machine = Self::first_text(&fields, &["machine", "machine_name"]).map(Arc::from);
        record.user = Self::first_text(&fields, &["user", "username"]).map(Arc::from);
        record.application = Self::first_text(&fields, &["app", "application"]).map(Arc::from);
        record.class = Self::first_text(&fields, &["class"]).map(Arc::from);
        record.method = Self::first_text(&fields, &["method"]).map(Arc::from);

        Ok(record)
    }

    fn extract_timestamp(fields: &Map<String, Value>) -> Result<DateTime<Utc>, String> {
        let Some(raw) = Self::first_text(fields, &TIMESTAMP_KEYS) else {
            return Err("missing timestamp".to_string());
        };
        Self::parse_timestamp(&raw).ok_or_else(|| format!("invalid timestamp '{}'", raw))
    }

    /// Accepts RFC 3339 or a naive `YYYY-MM-DD HH:MM:SS[.fff]` taken as UTC
    pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }

    /// First present key rendered as text (numbers and booleans included)
    fn first_text(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| match fields.get(*key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_json_line() {
        let line = r#"{"timestamp":"2024-01-15T10:30:00Z","level":"warning","logger":"db","thread":"7","msg":"slow query","host":"web-1"}"#;
        let record = JsonLinesParser::parse_line(line).unwrap();
        assert_eq!(record.severity, Severity::Warn);
        assert_eq!(&*record.level, "warning");
        assert_eq!(&*record.logger, "db");
        assert_eq!(&*record.thread, "7");
        assert_eq!(&*record.message, "slow query");
        assert_eq!(record.host.as_deref(), Some("web-1"));
        assert_eq!(record.user, None);
    }

    #[test]
    fn test_parse_naive_timestamp() {
        let ts = JsonLinesParser::parse_timestamp("2024-01-15 10:30:00.250").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-15T10:30:00.250+00:00");
    }

    #[test]
    fn test_missing_timestamp_is_rejected() {
        let err = JsonLinesParser::parse_line(r#"{"msg":"x"}"#).unwrap_err();
        assert!(err.contains("missing timestamp"));
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(JsonLinesParser::parse_line("[1,2,3]").is_err());
        assert!(JsonLinesParser::parse_line("plain text").is_err());
    }

    #[test]
    fn test_parse_file_skips_blank_lines_and_stamps_source() {
        let file = write_file(concat!(
            r#"{"time":"2024-01-15T10:00:00Z","level":"info","msg":"a"}"#,
            "\n\n",
            r#"{"time":"2024-01-15T10:00:01Z","level":"error","msg":"b"}"#,
            "\n"
        ));
        let records: Vec<Record> = JsonLinesParser
            .parse(file.path())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].severity, Severity::Error);
        assert_eq!(records[0].source, SourceId::from_path(file.path()));
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let file = write_file(concat!(
            r#"{"time":"2024-01-15T10:00:00Z","msg":"a"}"#,
            "\n",
            "not json\n"
        ));
        let err = JsonLinesParser
            .parse(file.path())
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap_err();

        match err {
            ParseError::Malformed { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = JsonLinesParser.parse(Path::new("/definitely/not/here.log"));
        assert!(matches!(result, Err(ParseError::Io { .. })));
    }
}
