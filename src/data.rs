use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub use crate::types::FloodId;

/// Raw upstream tuple as returned by the table API.
pub type Row = Map<String, Value>;

/// A historical flood event as stored in the upstream `floods` table.
///
/// Text columns are read leniently: the upstream schema stores `year` and
/// `deaths_toll` as TEXT, but older rows carry JSON numbers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FloodRecord {
    /// Upstream primary key.
    pub id: FloodId,
    /// Start date as recorded by the source survey.
    #[serde(default, deserialize_with = "lenient_text")]
    pub date_of_commencement: Option<String>,
    /// Year of the event (TEXT upstream).
    #[serde(default, deserialize_with = "lenient_text")]
    pub year: Option<String>,
    /// Easting in the Greek Grid (EPSG:2100), as digitized.
    #[serde(default)]
    pub x_original: Option<f64>,
    /// Northing in the Greek Grid (EPSG:2100), as digitized.
    #[serde(default)]
    pub y_original: Option<f64>,
    /// WGS84 latitude in degrees.
    #[serde(default)]
    pub latitude: Option<f64>,
    /// WGS84 longitude in degrees.
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Place name.
    #[serde(default, deserialize_with = "lenient_text")]
    pub location_name: Option<String>,
    /// Name given to the flood event, if any.
    #[serde(default, deserialize_with = "lenient_text")]
    pub flood_event_name: Option<String>,
    /// Recorded deaths (TEXT upstream).
    #[serde(default, deserialize_with = "lenient_text")]
    pub deaths_toll: Option<String>,
    /// Duration of the triggering rainfall.
    #[serde(default, deserialize_with = "lenient_text")]
    pub rainfall_duration: Option<String>,
    /// Recorded cause of the flood.
    #[serde(default, deserialize_with = "lenient_text")]
    pub cause_of_flood: Option<String>,
    /// Height of the triggering rainfall.
    #[serde(default, deserialize_with = "lenient_text")]
    pub rainfall_height: Option<String>,
    /// Free-form notes from the survey.
    #[serde(default, deserialize_with = "lenient_text")]
    pub relevant_information: Option<String>,
    /// Bibliographic source of the record.
    #[serde(default, deserialize_with = "lenient_text")]
    pub source: Option<String>,
}

impl FloodRecord {
    /// Decode a raw row into a record.
    pub fn from_row(table: &str, row: Row) -> Result<Self, crate::FloodError> {
        serde_json::from_value(Value::Object(row)).map_err(|err| crate::FloodError::Decode {
            table: table.to_string(),
            reason: err.to_string(),
        })
    }

    /// Encode the record as a raw row for inserts.
    pub fn to_row(&self) -> Row {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Row::new(),
        }
    }

    /// Whether both WGS84 coordinates are present and finite.
    pub fn has_coordinates(&self) -> bool {
        matches!((self.latitude, self.longitude), (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite())
    }

    /// Year as a number when the stored text is numeric.
    pub fn year_number(&self) -> Option<i32> {
        parse_leading_number(self.year.as_deref()?).map(|value| value as i32)
    }

    /// Death toll as a number when the stored text is numeric.
    pub fn deaths(&self) -> Option<u32> {
        parse_leading_number(self.deaths_toll.as_deref()?)
            .filter(|value| *value >= 0.0)
            .map(|value| value as u32)
    }
}

fn parse_leading_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        Some(Value::Bool(flag)) => Some(flag.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

/// How a column's values are interpreted, deduplicated, and ordered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Numeric values; `descending` picks most-recent/largest first.
    Numeric {
        /// Order largest first.
        descending: bool,
    },
    /// Free text sorted with the crate collation.
    Text,
}

/// A single selectable value of a filter dimension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Numeric value.
    Number(f64),
    /// Text value, trimmed.
    Text(String),
}

impl FilterValue {
    /// Normalize a raw column value.
    ///
    /// Strings are trimmed; null and blank values yield `None`. Numeric
    /// columns parse numeric text, keeping unparsable text as `Text`.
    pub fn from_raw(value: &Value, kind: ValueKind) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return None;
                }
                match kind {
                    ValueKind::Numeric { .. } => Some(
                        trimmed
                            .parse::<f64>()
                            .ok()
                            .filter(|number| number.is_finite())
                            .map(FilterValue::Number)
                            .unwrap_or_else(|| FilterValue::Text(trimmed.to_string())),
                    ),
                    ValueKind::Text => Some(FilterValue::Text(trimmed.to_string())),
                }
            }
            Value::Number(number) => match kind {
                ValueKind::Numeric { .. } => number
                    .as_f64()
                    .filter(|value| value.is_finite())
                    .map(FilterValue::Number),
                ValueKind::Text => Some(FilterValue::Text(number.to_string())),
            },
            Value::Bool(flag) => Some(FilterValue::Text(flag.to_string())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Literal used when the value becomes an equality predicate.
    ///
    /// Numbers use their canonical form (`1999`, not `1999.0`). The upstream
    /// `year` and `deaths_toll` columns are TEXT, so an eq filter upstream
    /// only matches cells stored in that canonical form; cells such as
    /// `" 1999 "` or `"1999.0"` still fold into the option but are not hit
    /// by the filter. [`crate::InMemoryTable`] compares numerically and
    /// matches them all.
    pub fn to_query_literal(&self) -> String {
        self.to_string()
    }

    /// Numeric payload, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FilterValue::Number(value) => Some(*value),
            FilterValue::Text(_) => None,
        }
    }

    /// Text payload, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FilterValue::Number(_) => None,
            FilterValue::Text(text) => Some(text),
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Number(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
                write!(f, "{}", *value as i64)
            }
            FilterValue::Number(value) => write!(f, "{value}"),
            FilterValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Number(value as f64)
    }
}
