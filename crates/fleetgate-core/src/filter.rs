//! Typed query filters.
//!
//! Clients send thing/log queries as Mongo-style JSON objects. Rather than
//! forwarding an arbitrary document, the gateway parses it into a [`Filter`]
//! made of `(field, operator, value)` expressions, rejecting unknown operators
//! and ill-typed operands at the boundary. The filter serializes back to the
//! same JSON dialect the backend nodes evaluate.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Errors produced while validating a filter document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("filter is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("filter must be a JSON object")]
    NotAnObject,

    #[error("invalid field name: {0:?}")]
    InvalidField(String),

    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    #[error("invalid operand for {op} on {field}")]
    InvalidOperand { field: String, op: FilterOp },

    #[error("field {0} mixes operators with plain values")]
    MixedOperators(String),
}

/// Comparison operators understood by the backend nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Exists,
    Regex,
}

impl FilterOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::In => "$in",
            Self::Nin => "$nin",
            Self::Exists => "$exists",
            Self::Regex => "$regex",
        }
    }

    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "$eq" => Self::Eq,
            "$ne" => Self::Ne,
            "$gt" => Self::Gt,
            "$gte" => Self::Gte,
            "$lt" => Self::Lt,
            "$lte" => Self::Lte,
            "$in" => Self::In,
            "$nin" => Self::Nin,
            "$exists" => Self::Exists,
            "$regex" => Self::Regex,
            _ => return None,
        })
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::In | Self::Nin => value.is_array(),
            Self::Exists => value.is_boolean(),
            Self::Regex => value.is_string(),
            _ => true,
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `(field, operator, value)` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpr {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl FilterExpr {
    pub fn new(
        field: impl Into<String>,
        op: FilterOp,
        value: Value,
    ) -> Result<Self, FilterError> {
        let field = field.into();
        if field.is_empty() || field.starts_with('$') {
            return Err(FilterError::InvalidField(field));
        }
        if !op.accepts(&value) {
            return Err(FilterError::InvalidOperand { field, op });
        }
        Ok(Self { field, op, value })
    }
}

/// One entry of a filter: a field condition or a logical group.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Expr(FilterExpr),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

/// A conjunction of clauses.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw query-string value.
    pub fn parse(raw: &str) -> Result<Self, FilterError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| FilterError::InvalidJson(e.to_string()))?;
        Self::try_from(value)
    }

    #[must_use]
    pub fn with(mut self, expr: FilterExpr) -> Self {
        self.clauses.push(Clause::Expr(expr));
        self
    }

    #[must_use]
    pub fn with_any(mut self, alternatives: Vec<Filter>) -> Self {
        self.clauses.push(Clause::Or(alternatives));
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Render the filter in the JSON dialect the backend nodes evaluate.
    pub fn to_value(&self) -> Value {
        let mut doc = Map::new();
        let mut ands = Vec::new();
        let mut ors = Vec::new();

        for clause in &self.clauses {
            match clause {
                Clause::Expr(expr) => {
                    let slot = doc
                        .entry(expr.field.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(ops) = slot {
                        ops.insert(expr.op.as_str().to_string(), expr.value.clone());
                    }
                }
                Clause::And(group) => ands.extend(group.iter().map(Filter::to_value)),
                Clause::Or(group) => ors.push(Value::Array(group.iter().map(Filter::to_value).collect())),
            }
        }

        if !ands.is_empty() {
            doc.insert("$and".to_string(), Value::Array(ands));
        }
        match ors.len() {
            0 => {}
            1 => {
                if let Some(or) = ors.pop() {
                    doc.insert("$or".to_string(), or);
                }
            }
            _ => {
                // Several OR groups must all hold; nest them under $and.
                let extra = ors
                    .into_iter()
                    .map(|or| Value::Object(Map::from_iter([("$or".to_string(), or)])));
                match doc.get_mut("$and") {
                    Some(Value::Array(existing)) => existing.extend(extra),
                    _ => {
                        doc.insert("$and".to_string(), Value::Array(extra.collect()));
                    }
                }
            }
        }

        Value::Object(doc)
    }

    fn parse_group(value: Value) -> Result<Vec<Filter>, FilterError> {
        match value {
            Value::Array(items) => items.into_iter().map(Filter::try_from).collect(),
            _ => Err(FilterError::NotAnObject),
        }
    }
}

impl TryFrom<Value> for Filter {
    type Error = FilterError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(doc) = value else {
            return Err(FilterError::NotAnObject);
        };

        let mut clauses = Vec::with_capacity(doc.len());
        for (key, value) in doc {
            match key.as_str() {
                "$and" => clauses.push(Clause::And(Self::parse_group(value)?)),
                "$or" => clauses.push(Clause::Or(Self::parse_group(value)?)),
                k if k.starts_with('$') => return Err(FilterError::UnknownOperator(key)),
                _ => match value {
                    Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                        if !ops.keys().all(|k| k.starts_with('$')) {
                            return Err(FilterError::MixedOperators(key));
                        }
                        for (op, operand) in ops {
                            let op = FilterOp::parse(&op)
                                .ok_or_else(|| FilterError::UnknownOperator(op.clone()))?;
                            clauses.push(Clause::Expr(FilterExpr::new(key.clone(), op, operand)?));
                        }
                    }
                    plain => clauses.push(Clause::Expr(FilterExpr::new(key, FilterOp::Eq, plain)?)),
                },
            }
        }

        Ok(Self { clauses })
    }
}

impl From<Filter> for Value {
    fn from(filter: Filter) -> Self {
        filter.to_value()
    }
}
