//! Declarative filters and their translation into conjunctive queries.
//!
//! A filter selects on equality or a single comparator per field, ANDed
//! within a clause. A filter may also be a disjunction of clauses; each
//! branch becomes its own [`Query`] because the store only runs conjunctive
//! queries. Running the branches and concatenating results is up to the
//! caller (see `Controller::get_jobs`).
//!
//! JSON shape accepted by [`Filter::from_json`]:
//!
//! ```json
//! {
//!   "where": {
//!     "type": "render",
//!     "or": [
//!       { "status": "active", "startTime": { "lt": "2024-05-01T00:00:00.000Z" } },
//!       { "status": "reserved" }
//!     ]
//!   },
//!   "order": "created",
//!   "limit": 10
//! }
//! ```

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::validate::type_error;

// ---------------------------------------------------------------------------
// Comparators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl Comparator {
    pub const TOKENS: [&'static str; 5] = ["lt", "lte", "gt", "gte", "eq"];

    pub fn token(self) -> &'static str {
        match self {
            Comparator::Lt => "lt",
            Comparator::Lte => "lte",
            Comparator::Gt => "gt",
            Comparator::Gte => "gte",
            Comparator::Eq => "eq",
        }
    }

    /// SQL operator.
    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
            Comparator::Eq => "=",
        }
    }

    /// Does `stored <op> operand` hold? Values of different types never match.
    pub fn holds(self, stored: &Value, operand: &Value) -> bool {
        let Some(ord) = compare_values(stored, operand) else {
            return false;
        };
        match self {
            Comparator::Lt => ord == Ordering::Less,
            Comparator::Lte => ord != Ordering::Greater,
            Comparator::Gt => ord == Ordering::Greater,
            Comparator::Gte => ord != Ordering::Less,
            Comparator::Eq => ord == Ordering::Equal,
        }
    }
}

impl std::str::FromStr for Comparator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lt" => Ok(Comparator::Lt),
            "lte" => Ok(Comparator::Lte),
            "gt" => Ok(Comparator::Gt),
            "gte" => Ok(Comparator::Gte),
            "eq" => Ok(Comparator::Eq),
            _ => Err(Error::Validation(format!(
                "comparator '{s}' is not supported. Supports {}",
                Comparator::TOKENS
                    .iter()
                    .map(|t| format!("'{t}'"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

/// Ordering between two stored values of the same JSON type.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(Value),
    Compare(Comparator, Value),
}

/// AND-combined conditions, plus an optional collection override.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clause {
    kind: Option<String>,
    conditions: Vec<(String, Condition)>,
}

impl Clause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query the `kind` collection instead of the configured one.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push((field.into(), Condition::Equals(value.into())));
        self
    }

    pub fn compare(
        mut self,
        field: impl Into<String>,
        op: Comparator,
        value: impl Into<Value>,
    ) -> Self {
        self.conditions
            .push((field.into(), Condition::Compare(op, value.into())));
        self
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(field, Comparator::Lt, value)
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(field, Comparator::Lte, value)
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(field, Comparator::Gt, value)
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(field, Comparator::Gte, value)
    }

    pub fn conditions(&self) -> &[(String, Condition)] {
        &self.conditions
    }

    pub fn kind_override(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    /// `self AND other`; `other`'s kind wins.
    fn and(&self, other: &Clause) -> Clause {
        let mut conditions = self.conditions.clone();
        conditions.extend(other.conditions.iter().cloned());
        Clause {
            kind: other.kind.clone().or_else(|| self.kind.clone()),
            conditions,
        }
    }

    fn from_json(map: &Map<String, Value>) -> Result<Self> {
        let mut clause = Clause::new();
        for (field, value) in map {
            if field == "kind" {
                match value {
                    Value::String(kind) => clause.kind = Some(kind.clone()),
                    other => return Err(type_error("filter.where.kind", "String", other)),
                }
                continue;
            }
            let condition = match value {
                Value::Object(op) => {
                    let mut entries = op.iter();
                    let (Some((token, operand)), None) = (entries.next(), entries.next()) else {
                        return Err(Error::Validation(format!(
                            "comparison on `{field}` must have exactly one comparator"
                        )));
                    };
                    Condition::Compare(token.parse()?, operand.clone())
                }
                literal => Condition::Equals(literal.clone()),
            };
            clause.conditions.push((field.clone(), condition));
        }
        Ok(clause)
    }
}

/// Where-part of a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Where {
    All(Clause),
    /// Disjunction; each branch runs as its own query.
    AnyOf(Vec<Clause>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub clause: Where,
    /// Single ascending sort key.
    pub order: Option<String>,
    pub limit: Option<usize>,
}

impl Default for Filter {
    fn default() -> Self {
        Self::matching(Clause::new())
    }
}

impl Filter {
    pub fn matching(clause: Clause) -> Self {
        Self {
            clause: Where::All(clause),
            order: None,
            limit: None,
        }
    }

    pub fn any_of(clauses: Vec<Clause>) -> Self {
        Self {
            clause: Where::AnyOf(clauses),
            order: None,
            limit: None,
        }
    }

    pub fn order(mut self, field: impl Into<String>) -> Self {
        self.order = Some(field.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn branches(&self) -> Vec<&Clause> {
        match &self.clause {
            Where::All(clause) => vec![clause],
            Where::AnyOf(clauses) => clauses.iter().collect(),
        }
    }

    /// One conjunctive query per branch, each with this filter's order and limit.
    pub fn queries(&self, namespace: &str, default_kind: &str) -> Vec<Query> {
        self.branches()
            .into_iter()
            .map(|clause| translate(clause, self.order.as_deref(), self.limit, namespace, default_kind))
            .collect()
    }

    /// Parse the JSON filter shape. Fields beside `or` apply to every branch.
    pub fn from_json(value: &Value) -> Result<Self> {
        let filter = match value {
            Value::Object(map) => map,
            Value::Null => return Ok(Filter::default()),
            other => return Err(type_error("Query object", "Object", other)),
        };

        let clause = match filter.get("where") {
            None | Some(Value::Null) => Where::All(Clause::new()),
            Some(Value::Object(map)) => {
                let mut shared = map.clone();
                match shared.remove("or") {
                    None => Where::All(Clause::from_json(&shared)?),
                    Some(Value::Array(branches)) => {
                        let shared = Clause::from_json(&shared)?;
                        let branches = branches
                            .iter()
                            .map(|branch| match branch {
                                Value::Object(map) => Ok(shared.and(&Clause::from_json(map)?)),
                                other => Err(type_error("Query object", "Object", other)),
                            })
                            .collect::<Result<Vec<_>>>()?;
                        Where::AnyOf(branches)
                    }
                    Some(other) => return Err(type_error("filter.where.or", "Array", &other)),
                }
            }
            Some(other) => return Err(type_error("filter.where", "Object", other)),
        };

        let order = match filter.get("order") {
            None | Some(Value::Null) => None,
            Some(Value::String(field)) => Some(field.clone()),
            Some(other) => return Err(type_error("filter.order", "String", other)),
        };

        let limit = match filter.get("limit") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => match n.as_u64().map(usize::try_from) {
                Some(Ok(n)) => Some(n),
                _ => {
                    return Err(Error::Validation(format!(
                        "filter.limit must be a non-negative integer that fits in memory. Actual: {n}"
                    )));
                }
            },
            Some(other) => return Err(type_error("filter.limit", "Number", other)),
        };

        Ok(Filter {
            clause,
            order,
            limit,
        })
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// `field <op> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub op: Comparator,
    pub value: Value,
}

/// A conjunctive query against one collection, as the store executes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub namespace: String,
    pub kind: String,
    pub predicates: Vec<Predicate>,
    pub order: Option<String>,
    pub limit: Option<usize>,
}

/// Translate one clause into a store query.
pub fn translate(
    clause: &Clause,
    order: Option<&str>,
    limit: Option<usize>,
    namespace: &str,
    default_kind: &str,
) -> Query {
    let predicates = clause
        .conditions
        .iter()
        .map(|(field, condition)| {
            let (op, value) = match condition {
                Condition::Equals(value) => (Comparator::Eq, value.clone()),
                Condition::Compare(op, value) => (*op, value.clone()),
            };
            Predicate {
                field: field.clone(),
                op,
                value,
            }
        })
        .collect();

    Query {
        namespace: namespace.to_string(),
        kind: clause.kind.as_deref().unwrap_or(default_kind).to_string(),
        predicates,
        order: order.map(str::to_string),
        limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literal_values_become_equality() {
        let filter = Filter::from_json(&json!({"where": {"status": "open"}})).unwrap();
        let queries = filter.queries("ns", "Job");
        assert_eq!(queries.len(), 1);
        assert_eq!(
            queries[0].predicates,
            vec![Predicate {
                field: "status".into(),
                op: Comparator::Eq,
                value: json!("open"),
            }]
        );
        assert_eq!(queries[0].kind, "Job");
    }

    #[test]
    fn comparator_maps_are_translated() {
        let filter = Filter::from_json(&json!({
            "where": {"startTime": {"lte": "2024-01-01T00:00:00.000Z"}},
            "order": "created",
            "limit": 3
        }))
        .unwrap();
        let q = &filter.queries("ns", "Job")[0];
        assert_eq!(q.predicates[0].op, Comparator::Lte);
        assert_eq!(q.order.as_deref(), Some("created"));
        assert_eq!(q.limit, Some(3));
    }

    #[test]
    fn unsupported_comparator_names_allowed_set() {
        let err = Filter::from_json(&json!({"where": {"n": {"like": 1}}})).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'like'"), "{msg}");
        assert!(msg.contains("'lt', 'lte', 'gt', 'gte', 'eq'"), "{msg}");
    }

    #[test]
    fn kind_selects_collection_and_is_not_a_predicate() {
        let filter = Filter::from_json(&json!({"where": {"kind": "Audit", "status": "open"}})).unwrap();
        let q = &filter.queries("ns", "Job")[0];
        assert_eq!(q.kind, "Audit");
        assert_eq!(q.predicates.len(), 1);
    }

    #[test]
    fn or_splits_into_branches_sharing_order_and_limit() {
        let filter = Filter::from_json(&json!({
            "where": {"or": [{"status": "active"}, {"status": "reserved"}]},
            "order": "created",
            "limit": 2
        }))
        .unwrap();
        let queries = filter.queries("ns", "Job");
        assert_eq!(queries.len(), 2);
        for q in &queries {
            assert_eq!(q.order.as_deref(), Some("created"));
            assert_eq!(q.limit, Some(2));
        }
        assert_eq!(queries[1].predicates[0].value, json!("reserved"));
    }

    #[test]
    fn fields_beside_or_apply_to_every_branch() {
        let filter = Filter::from_json(&json!({
            "where": {"type": "render", "or": [{"status": "active"}, {"status": "reserved"}]}
        }))
        .unwrap();
        for q in filter.queries("ns", "Job") {
            assert!(q.predicates.iter().any(|p| p.field == "type"));
            assert!(q.predicates.iter().any(|p| p.field == "status"));
        }
    }

    #[test]
    fn or_must_be_an_array_of_objects() {
        let err = Filter::from_json(&json!({"where": {"or": {"status": "open"}}})).unwrap_err();
        assert!(err.to_string().contains("filter.where.or must be type Array"));

        let err = Filter::from_json(&json!({"where": {"or": ["open"]}})).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn comparison_with_two_comparators_is_rejected() {
        let err = Filter::from_json(&json!({"where": {"n": {"lt": 1, "gt": 0}}})).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn limit_must_be_a_non_negative_integer() {
        for bad in [json!(-1), json!(1.5)] {
            let err = Filter::from_json(&json!({ "limit": bad })).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{bad}");
        }
        let filter = Filter::from_json(&json!({ "limit": 2 })).unwrap();
        assert_eq!(filter.limit, Some(2));
    }

    #[test]
    fn mixed_types_never_compare() {
        assert!(!Comparator::Lt.holds(&json!("1"), &json!(2)));
        assert!(Comparator::Lt.holds(&json!(1), &json!(2.5)));
        assert!(Comparator::Gte.holds(&json!("b"), &json!("a")));
        assert!(Comparator::Eq.holds(&Value::Null, &Value::Null));
    }
}
