//! Metadata predicates applied before similarity ranking

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::vector::VectorRecord;

/// Reserved key addressing the record's parent document
pub const DOCUMENT_ID_KEY: &str = "document_id";

/// Conjunction of equality conditions over record metadata.
///
/// A condition on an array-valued field matches when the array contains the
/// value, so tag lists work as expected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub must: Vec<(String, JsonValue)>,
    pub must_not: Vec<(String, JsonValue)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only records of one document
    pub fn document(document_id: impl Into<String>) -> Self {
        Self::new().eq(DOCUMENT_ID_KEY, JsonValue::String(document_id.into()))
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.must.push((key.into(), value.into()));
        self
    }

    pub fn ne(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.must_not.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }

    pub fn matches(&self, record: &VectorRecord) -> bool {
        self.must.iter().all(|(k, v)| field_matches(record, k, v))
            && !self.must_not.iter().any(|(k, v)| field_matches(record, k, v))
    }
}

fn field_matches(record: &VectorRecord, key: &str, expected: &JsonValue) -> bool {
    if key == DOCUMENT_ID_KEY {
        return expected.as_str() == Some(record.document_id.as_str());
    }
    match record.metadata.get(key) {
        Some(JsonValue::Array(items)) => items.contains(expected),
        Some(actual) => actual == expected,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingVector;
    use serde_json::{json, Map};

    fn record(document_id: &str, metadata: JsonValue) -> VectorRecord {
        let metadata: Map<String, JsonValue> = serde_json::from_value(metadata).unwrap();
        VectorRecord {
            id: VectorRecord::chunk_id(document_id, 0),
            document_id: document_id.to_string(),
            chunk_index: 0,
            chunk_total: 1,
            text: String::new(),
            metadata,
            embedding: EmbeddingVector::new(vec![1.0], "m"),
        }
    }

    #[test]
    fn test_document_filter() {
        let filter = MetadataFilter::document("lean_seo_1");
        assert!(filter.matches(&record("lean_seo_1", json!({}))));
        assert!(!filter.matches(&record("webdata", json!({}))));
    }

    #[test]
    fn test_tag_list_membership() {
        let filter = MetadataFilter::new().eq("tags", "seo");
        assert!(filter.matches(&record("a", json!({"tags": ["seo", "growth"]}))));
        assert!(!filter.matches(&record("a", json!({"tags": ["growth"]}))));
    }

    #[test]
    fn test_must_not_excludes() {
        let filter = MetadataFilter::new().ne("media_type", "csv");
        assert!(filter.matches(&record("a", json!({"media_type": "pdf"}))));
        assert!(!filter.matches(&record("a", json!({"media_type": "csv"}))));
        assert!(filter.matches(&record("a", json!({}))));
    }
}
