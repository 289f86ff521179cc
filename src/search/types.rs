use super::error::{RequestError, SearchError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifier of a disjoint shard of the document set.
pub type PartitionId = u32;

/// Pseudo field addressing a hit's relevance score in sort specs.
pub const SCORE_FIELD: &str = "_score";

/// Upper bound on `offset + count` accepted from callers.
pub const MAX_WINDOW: usize = 10_000;

/// A stored field value.
///
/// Values have a total order so that any field can be used as a sort key:
/// `Null < Bool < numbers < strings`. Integers and floats compare numerically
/// against each other.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl FieldValue {
    fn rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Bool(_) => 1,
            FieldValue::Int(_) | FieldValue::Float(_) => 2,
            FieldValue::Str(_) => 3,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// String form used as a facet value or group key.
    pub fn label(&self) -> String {
        self.to_string()
    }

    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (FieldValue::Int(a), FieldValue::Int(b)) => a.cmp(b),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a.cmp(b),
            (FieldValue::Str(a), FieldValue::Str(b)) => a.cmp(b),
            (a, b) if a.rank() == 2 && b.rank() == 2 => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                x.total_cmp(&y)
            }
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

impl SortField {
    pub fn score_desc() -> Self {
        Self {
            field: SCORE_FIELD.to_string(),
            order: SortOrder::Desc,
        }
    }

    pub fn is_score(&self) -> bool {
        self.field == SCORE_FIELD
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum FacetKind {
    /// Count per distinct value.
    Terms,
    /// Count per numeric bucket `floor(value / interval)`.
    Histogram { interval: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FacetSpec {
    pub field: String,
    #[serde(default = "default_facet_kind")]
    pub kind: FacetKind,
    /// Number of values reported for this facet in the final result.
    #[serde(default = "default_facet_max_count")]
    pub max_count: usize,
    /// Values with fewer hits are dropped from the final result.
    #[serde(default)]
    pub min_hit_count: u64,
}

fn default_facet_kind() -> FacetKind {
    FacetKind::Terms
}

fn default_facet_max_count() -> usize {
    10
}

impl FacetSpec {
    pub fn terms(field: &str, max_count: usize) -> Self {
        Self {
            field: field.to_string(),
            kind: FacetKind::Terms,
            max_count,
            min_hit_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupBy {
    pub field: String,
    /// Representative hits kept per group.
    #[serde(default = "default_max_per_group")]
    pub max_per_group: usize,
    /// Ordering of hits inside a group. Empty means the request's sort.
    #[serde(default)]
    pub sort: Vec<SortField>,
}

fn default_max_per_group() -> usize {
    1
}

/// A structured search request as produced by the query compiler.
///
/// `query` is opaque to the scatter-gather layer; only the index engine
/// interprets it. `routing_key` selects among replicas of a partition and
/// never changes which partitions are targeted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub query: serde_json::Value,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_count")]
    pub count: usize,
    #[serde(default)]
    pub sort: Vec<SortField>,
    #[serde(default)]
    pub facets: Vec<FacetSpec>,
    #[serde(default)]
    pub group_by: Option<GroupBy>,
    /// Stored fields copied into each hit. Empty selects every field.
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub partitions: Option<BTreeSet<PartitionId>>,
    #[serde(default)]
    pub routing_key: Option<String>,
}

fn default_count() -> usize {
    10
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            request_id: None,
            query: serde_json::Value::Null,
            offset: 0,
            count: default_count(),
            sort: Vec::new(),
            facets: Vec::new(),
            group_by: None,
            fields: Vec::new(),
            partitions: None,
            routing_key: None,
        }
    }
}

impl SearchRequest {
    pub fn new(query: serde_json::Value) -> Self {
        Self {
            query,
            ..Default::default()
        }
    }

    pub fn with_window(mut self, offset: usize, count: usize) -> Self {
        self.offset = offset;
        self.count = count;
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortField>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_partitions<I: IntoIterator<Item = PartitionId>>(mut self, partitions: I) -> Self {
        self.partitions = Some(partitions.into_iter().collect());
        self
    }

    /// Number of hits every source must keep so that the outermost merge can
    /// still produce the requested page.
    pub fn window_end(&self) -> usize {
        self.offset.saturating_add(self.count)
    }

    /// Sort criteria with the default (score descending) filled in.
    pub fn effective_sort(&self) -> Vec<SortField> {
        if self.sort.is_empty() {
            vec![SortField::score_desc()]
        } else {
            self.sort.clone()
        }
    }

    pub fn facet_spec(&self, field: &str) -> Option<&FacetSpec> {
        self.facets.iter().find(|spec| spec.field == field)
    }

    /// Rejects request shapes no partition could execute.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.count == 0 {
            return Err(RequestError::EmptyWindow);
        }
        match self.offset.checked_add(self.count) {
            Some(end) if end <= MAX_WINDOW => {}
            _ => {
                return Err(RequestError::WindowTooLarge {
                    offset: self.offset,
                    count: self.count,
                    max: MAX_WINDOW,
                });
            }
        }
        for facet in &self.facets {
            if facet.max_count == 0 {
                return Err(RequestError::InvalidFacet {
                    field: facet.field.clone(),
                    reason: "max_count must be positive".to_string(),
                });
            }
            if let FacetKind::Histogram { interval } = facet.kind
                && !(interval.is_finite() && interval > 0.0)
            {
                return Err(RequestError::InvalidFacet {
                    field: facet.field.clone(),
                    reason: format!("histogram interval {} is not positive", interval),
                });
            }
        }
        if let Some(group) = &self.group_by
            && group.max_per_group == 0
        {
            return Err(RequestError::InvalidGroupBy {
                field: group.field.clone(),
            });
        }
        Ok(())
    }
}

/// One matching document as seen by the merge layer.
///
/// Hits are owned copies; nothing in a hit refers back into partition-local
/// index state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hit {
    pub uid: u64,
    /// Document id local to the partition's snapshot.
    pub doc_id: u32,
    pub partition: PartitionId,
    pub score: f64,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Hit {
    /// Value used when sorting on `field`. Missing fields sort as `Null`.
    pub fn sort_value(&self, field: &str) -> FieldValue {
        if field == SCORE_FIELD {
            return FieldValue::Float(self.score);
        }
        self.fields.get(field).cloned().unwrap_or(FieldValue::Null)
    }
}

/// Partially aggregated facet counts for one field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum FacetAccumulator {
    Terms {
        counts: BTreeMap<String, u64>,
    },
    Histogram {
        interval: f64,
        buckets: BTreeMap<i64, u64>,
    },
}

/// One group-by bucket: its key, how many hits fell into it, and the
/// representative hits chosen by the per-group ordering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupBucket {
    pub value: String,
    pub total_hits: u64,
    pub hits: Vec<Hit>,
}

/// A locally correct contribution from one partition or one node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PartialResult {
    pub hits: Vec<Hit>,
    pub total_docs: u64,
    #[serde(default)]
    pub facets: BTreeMap<String, FacetAccumulator>,
    #[serde(default)]
    pub groups: Vec<GroupBucket>,
    #[serde(default)]
    pub errors: Vec<SearchError>,
}

impl PartialResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_error(error: SearchError) -> Self {
        Self {
            errors: vec![error],
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FacetCount {
    pub value: String,
    pub count: u64,
}

/// The client-visible answer to a search request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub request_id: Option<String>,
    pub hits: Vec<Hit>,
    pub total_docs: u64,
    pub facets: BTreeMap<String, Vec<FacetCount>>,
    pub groups: Vec<GroupBucket>,
    pub elapsed_ms: u64,
    pub errors: Vec<SearchError>,
}

impl SearchResult {
    pub fn empty(request_id: Option<String>) -> Self {
        Self {
            request_id,
            ..Default::default()
        }
    }
}
