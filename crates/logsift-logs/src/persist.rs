//! Flat on-disk form of filter specs
//!
//! Filters are stored as a TOML list of `[[filter]]` tables:
//!
//! ```toml
//! [[filter]]
//! property = "Logger"
//! relation = "Contains"
//! mode = "Exclude"
//! value = "Sql"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::filter::{
    Filter, FilterError, FilterMode, FilterSpec, StringFilterSpec, StringRelation,
    TimeFilterSpec, TimeRelation,
};
use crate::parser::JsonLinesParser;
use logsift_types::{Field, FieldKind};

/// One persisted filter, before validation against the record schema
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedFilter {
    pub property: String,
    pub relation: String,
    pub mode: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<String>,
    /// String filters only; matching is case-insensitive when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
    /// Time filters only; defaults to inclusive for include-mode filters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusive: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FilterFile {
    #[serde(default, rename = "filter")]
    filters: Vec<PersistedFilter>,
}

impl TryFrom<&PersistedFilter> for FilterSpec {
    type Error = FilterError;

    fn try_from(p: &PersistedFilter) -> Result<Self, Self::Error> {
        let field = Field::from_name(&p.property)
            .ok_or_else(|| FilterError::UnknownField(p.property.clone()))?;
        let mode =
            FilterMode::from_name(&p.mode).ok_or_else(|| FilterError::UnknownMode(p.mode.clone()))?;

        match field {
            Field::Text(field) => {
                let relation = StringRelation::from_name(&p.relation)
                    .ok_or_else(|| relation_error(p, FieldKind::Text))?;
                let spec = FilterSpec::String(StringFilterSpec {
                    field,
                    relation,
                    value: p.value.clone(),
                    case_insensitive: !p.case_sensitive.unwrap_or(false),
                    mode,
                });
                // Compiles the pattern of regex relations
                Filter::new(spec.clone())?;
                Ok(spec)
            }
            Field::Time(field) => {
                let relation = TimeRelation::from_name(&p.relation)
                    .ok_or_else(|| relation_error(p, FieldKind::Time))?;
                let value = parse_time(&p.property, &p.value)?;
                let value2 = p
                    .value2
                    .as_deref()
                    .map(|raw| parse_time(&p.property, raw))
                    .transpose()?;
                Ok(FilterSpec::Time(TimeFilterSpec {
                    field,
                    relation,
                    value,
                    value2,
                    inclusive: p.inclusive.unwrap_or(mode == FilterMode::Include),
                    mode,
                }))
            }
        }
    }
}

impl From<&FilterSpec> for PersistedFilter {
    fn from(spec: &FilterSpec) -> Self {
        match spec {
            FilterSpec::String(s) => Self {
                property: s.field.name().to_string(),
                relation: s.relation.as_str().to_string(),
                mode: s.mode.as_str().to_string(),
                value: s.value.clone(),
                value2: None,
                case_sensitive: (!s.case_insensitive).then_some(true),
                inclusive: None,
            },
            FilterSpec::Time(t) => Self {
                property: t.field.name().to_string(),
                relation: t.relation.as_str().to_string(),
                mode: t.mode.as_str().to_string(),
                value: t.value.to_rfc3339(),
                value2: t.value2.map(|v| v.to_rfc3339()),
                case_sensitive: None,
                inclusive: Some(t.inclusive),
            },
        }
    }
}

/// A relation that belongs to the other field type is a mismatch, anything
/// else is simply unknown
fn relation_error(p: &PersistedFilter, kind: FieldKind) -> FilterError {
    let other_kind_knows_it = match kind {
        FieldKind::Text => TimeRelation::from_name(&p.relation).is_some(),
        FieldKind::Time => StringRelation::from_name(&p.relation).is_some(),
    };
    if other_kind_knows_it {
        FilterError::RelationMismatch {
            property: p.property.clone(),
            relation: p.relation.clone(),
            kind,
        }
    } else {
        FilterError::UnknownRelation(p.relation.clone())
    }
}

fn parse_time(property: &str, raw: &str) -> Result<chrono::DateTime<chrono::Utc>, FilterError> {
    JsonLinesParser::parse_timestamp(raw).ok_or_else(|| FilterError::InvalidTime {
        property: property.to_string(),
        value: raw.to_string(),
    })
}

/// Parse and validate a TOML filter document
pub fn parse_filters(text: &str) -> Result<Vec<FilterSpec>, FilterError> {
    let file: FilterFile = toml::from_str(text)?;
    file.filters.iter().map(FilterSpec::try_from).collect()
}

/// Load and validate the filter file at `path`
pub fn load_filter_file(path: &Path) -> Result<Vec<FilterSpec>, FilterError> {
    let text = fs::read_to_string(path).map_err(|source| FilterError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_filters(&text)
}

/// Render specs in the persisted format
pub fn render_filters(specs: &[FilterSpec]) -> Result<String, FilterError> {
    let file = FilterFile {
        filters: specs.iter().map(PersistedFilter::from).collect(),
    };
    Ok(toml::to_string_pretty(&file)?)
}

pub fn save_filter_file(path: &Path, specs: &[FilterSpec]) -> Result<(), FilterError> {
    let text = render_filters(specs)?;
    fs::write(path, text).map_err(|source| FilterError::Io {
        path: path.to_path_buf(),
        source,
    })
}
