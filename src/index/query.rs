//! Selection payload understood by the in-memory engine.
//!
//! ```json
//! "match_all"
//! {"term":  {"field": "color", "value": "red"}}
//! {"terms": {"field": "color", "values": ["red", "blue"]}}
//! {"range": {"field": "price", "gte": 10, "lt": 20}}
//! {"all":   [ ...selections ]}
//! ```
//! A JSON `null` payload selects every document.

use super::engine::IndexError;
use super::memory::Document;
use crate::search::types::FieldValue;

use serde::Deserialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    MatchAll,
    Term {
        field: String,
        value: FieldValue,
    },
    Terms {
        field: String,
        values: Vec<FieldValue>,
    },
    Range {
        field: String,
        #[serde(default)]
        gte: Option<f64>,
        #[serde(default)]
        lt: Option<f64>,
    },
    All(Vec<Selection>),
}

impl Selection {
    pub fn parse(payload: &serde_json::Value) -> Result<Self, IndexError> {
        if payload.is_null() {
            return Ok(Selection::MatchAll);
        }
        serde_json::from_value(payload.clone()).map_err(|e| IndexError::InvalidQuery(e.to_string()))
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Selection::MatchAll => true,
            Selection::Term { field, value } => doc
                .fields
                .get(field)
                .is_some_and(|v| v.total_cmp(value) == Ordering::Equal),
            Selection::Terms { field, values } => doc.fields.get(field).is_some_and(|v| {
                values
                    .iter()
                    .any(|candidate| v.total_cmp(candidate) == Ordering::Equal)
            }),
            Selection::Range { field, gte, lt } => {
                let Some(v) = doc.fields.get(field).and_then(FieldValue::as_f64) else {
                    return false;
                };
                gte.is_none_or(|low| v >= low) && lt.is_none_or(|high| v < high)
            }
            Selection::All(parts) => parts.iter().all(|part| part.matches(doc)),
        }
    }
}
