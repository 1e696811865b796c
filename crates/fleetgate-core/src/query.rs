use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::filter::Filter;

/// Payload of the `listThings` family of node calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Filter>,
    /// Projection: field path -> 0/1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl ThingQuery {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(mut self, status: i64) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.query = Some(filter);
        self
    }

    /// Project only the given field paths.
    #[must_use]
    pub fn select<'a>(mut self, fields: impl IntoIterator<Item = &'a str>) -> Self {
        let projection = self.fields.get_or_insert_with(Map::new);
        for field in fields {
            projection.insert(field.to_string(), Value::from(1));
        }
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterExpr, FilterOp};
    use serde_json::json;

    #[test]
    fn test_builder_serializes_only_set_fields() {
        let query = ThingQuery::new()
            .status(1)
            .filter(Filter::new().with(FilterExpr::new("last.alerts", FilterOp::Ne, Value::Null).unwrap()))
            .select(["id", "code"])
            .limit(1000);

        assert_eq!(
            query.to_value(),
            json!({
                "status": 1,
                "query": {"last.alerts": {"$ne": null}},
                "fields": {"id": 1, "code": 1},
                "limit": 1000
            })
        );
    }

    #[test]
    fn test_deserialize_validates_filter() {
        let bad = serde_json::from_value::<ThingQuery>(json!({"query": {"$bogus": 1}}));
        assert!(bad.is_err());
    }
}
