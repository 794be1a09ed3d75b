//! Tag discovery.
//!
//! A single read query lists every `Object` node carrying at least one tag
//! that contains the configured prefix, grouped by the node's labels. All
//! labels except the generic base label name an application.

use serde_json::Value;
use tracing::{info, warn};

use crate::error::QueryError;
use crate::graph::{GraphSession, Record, Statement};

/// Label shared by every imaging object; never an application name.
pub const GENERIC_LABEL: &str = "Object";

/// Discovery query; `$prefix` is bound to the tag prefix.
pub const TAG_DISCOVERY_QUERY: &str = "MATCH (o:Object) WHERE o.Tags IS NOT NULL \
     AND any(x IN o.Tags WHERE x CONTAINS $prefix) \
     RETURN DISTINCT [x IN LABELS(o) WHERE NOT x = 'Object'] AS application, \
     COUNT(o) AS numTags";

/// One row of the discovery query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagHit {
    /// Candidate application names (the node's non-generic labels)
    pub applications: Vec<String>,
    /// Number of tagged objects behind this row
    pub num_tags: i64,
}

/// Runs the discovery query for one tag prefix
#[derive(Debug, Clone)]
pub struct TagScanner {
    prefix: String,
}

impl TagScanner {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn statement(&self) -> Statement {
        Statement::new(TAG_DISCOVERY_QUERY).param("prefix", self.prefix.as_str())
    }

    /// Run the discovery query. An empty database yields an empty list.
    pub async fn scan(&self, session: &dyn GraphSession) -> Result<Vec<TagHit>, QueryError> {
        let records = session.run(&self.statement()).await?;
        let hits = decode_hits(&records);
        for hit in &hits {
            info!(
                num_tags = hit.num_tags,
                applications = ?hit.applications,
                "Demeter tags found"
            );
        }
        Ok(hits)
    }
}

/// Decode discovery rows, skipping (and logging) malformed ones. Non-string
/// labels are dropped individually; the rest of the row is kept.
#[must_use]
pub fn decode_hits(records: &[Record]) -> Vec<TagHit> {
    records
        .iter()
        .filter_map(|record| match decode_hit(record) {
            Ok(hit) => Some(hit),
            Err(reason) => {
                warn!(reason = %reason, row = ?record, "Skipping malformed discovery row");
                None
            }
        })
        .collect()
}

fn decode_hit(record: &Record) -> Result<TagHit, String> {
    let applications = match record.get("application") {
        Some(Value::Array(labels)) => labels
            .iter()
            .filter_map(|label| match label.as_str() {
                Some(name) => Some(name.to_string()),
                None => {
                    warn!(label = %label, "Ignoring non-string application label");
                    None
                }
            })
            .collect(),
        Some(Value::String(label)) => vec![label.clone()],
        Some(other) => return Err(format!("unexpected application value {other}")),
        None => return Err("missing application column".to_string()),
    };
    let num_tags = record
        .get("numTags")
        .and_then(Value::as_i64)
        .ok_or_else(|| "missing or non-integer numTags column".to_string())?;
    Ok(TagHit {
        applications,
        num_tags,
    })
}

/// Flatten hits into application names: first-seen order, no duplicates,
/// generic label and blank names dropped.
#[must_use]
pub fn discover(hits: &[TagHit]) -> Vec<String> {
    let mut applications: Vec<String> = Vec::new();
    for name in hits.iter().flat_map(|hit| hit.applications.iter()) {
        if name.trim().is_empty() || name == GENERIC_LABEL {
            continue;
        }
        if !applications.iter().any(|existing| existing == name) {
            applications.push(name.clone());
        }
    }
    applications
}
