// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Riffle change-dispatch schema.
//!
//! Two directions share this crate:
//! * sources push graph change events ([`SourceChangeEvent`], [`EventBatch`])
//!   into the `SourceDispatcher` service;
//! * the query engine pushes result deltas ([`ReactionInvocation`]) into the
//!   `ReactionHandler` service.
//!
//! The types in this module are validated value objects. Their prost
//! counterparts live in [`wire`]; conversion from the wire is the single place
//! where a [`ValidationError`] can arise. Generated tonic stubs live in [`rpc`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

mod error;
pub mod rpc;
pub mod wire;

pub use error::ValidationError;

/// Default TCP port of the `SourceDispatcher` gRPC service.
pub const DEFAULT_DISPATCHER_PORT: u16 = 50051;
/// Default TCP port of the `ReactionHandler` gRPC service.
pub const DEFAULT_REACTION_PORT: u16 = 50052;
/// Default TCP port of the plain HTTP+JSON event endpoint.
pub const DEFAULT_HTTP_PORT: u16 = 9000;

/// Kind of change carried by a [`SourceChangeEvent`].
///
/// On the wire each variant is a single ASCII character: `c`, `u`, `d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOp {
    /// Entity created (`c`).
    #[serde(rename = "c")]
    Create,
    /// Entity updated (`u`).
    #[serde(rename = "u")]
    Update,
    /// Entity deleted (`d`).
    #[serde(rename = "d")]
    Delete,
}

impl ChangeOp {
    /// Single-character wire code.
    pub const fn code(self) -> char {
        match self {
            ChangeOp::Create => 'c',
            ChangeOp::Update => 'u',
            ChangeOp::Delete => 'd',
        }
    }

    /// Wire code as a string slice.
    pub const fn as_str(self) -> &'static str {
        match self {
            ChangeOp::Create => "c",
            ChangeOp::Update => "u",
            ChangeOp::Delete => "d",
        }
    }
}

impl FromStr for ChangeOp {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "c" => Ok(ChangeOp::Create),
            "u" => Ok(ChangeOp::Update),
            "d" => Ok(ChangeOp::Delete),
            other => Err(ValidationError::InvalidOp(other.to_string())),
        }
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoints of a relationship change.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Relationship {
    /// Id of the start node.
    pub start_id: String,
    /// Id of the end node.
    pub end_id: String,
    /// Labels of the start node.
    pub start_labels: BTreeSet<String>,
    /// Labels of the end node.
    pub end_labels: BTreeSet<String>,
}

/// One atomic change to a node or relationship in a source graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceChangeEvent {
    /// Position in the source stream (non-decreasing per source).
    pub sequence_number: u64,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Create, update or delete.
    pub op: ChangeOp,
    /// Identity of the affected entity within its source.
    pub id: String,
    /// Classification labels.
    pub labels: BTreeSet<String>,
    /// String properties of the entity.
    pub properties: BTreeMap<String, String>,
    /// Present iff the entity is a relationship.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<Relationship>,
}

impl SourceChangeEvent {
    /// Node change with no labels or properties.
    pub fn node(sequence_number: u64, op: ChangeOp, id: impl Into<String>) -> Self {
        Self {
            sequence_number,
            timestamp: 0,
            op,
            id: id.into(),
            labels: BTreeSet::new(),
            properties: BTreeMap::new(),
            relationship: None,
        }
    }

    /// Relationship change between `start_id` and `end_id`.
    pub fn relationship(
        sequence_number: u64,
        op: ChangeOp,
        id: impl Into<String>,
        start_id: impl Into<String>,
        end_id: impl Into<String>,
    ) -> Self {
        Self {
            relationship: Some(Relationship {
                start_id: start_id.into(),
                end_id: end_id.into(),
                ..Relationship::default()
            }),
            ..Self::node(sequence_number, op, id)
        }
    }

    /// Set the event timestamp (ns since epoch).
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add a label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    /// Add a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// True when the event concerns a relationship rather than a node.
    pub fn is_relationship(&self) -> bool {
        self.relationship.is_some()
    }
}

/// Ordered group of events from one source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventBatch {
    /// Originating source stream.
    pub source_id: String,
    /// Free-form context (run ids and the like).
    pub metadata: BTreeMap<String, String>,
    /// Events in application order.
    pub events: Vec<SourceChangeEvent>,
}

impl EventBatch {
    /// Empty batch for `source_id`.
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Self::default()
        }
    }

    /// Append an event.
    pub fn push(&mut self, event: SourceChangeEvent) {
        self.events.push(event);
    }
}

/// Typed scalar stored in a result record field.
///
/// Ordering compares the variant first (in declaration order of the
/// protocol: string, double, integer, boolean, null) and then the payload;
/// doubles use IEEE total ordering so `Value` is `Ord`.
///
/// JSON integers decode as [`Value::Integer`]; an integer above `i64::MAX`
/// is an error rather than a silently rounded double.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// JSON `null` / protocol null.
    Null,
    /// Boolean.
    Boolean(bool),
    /// Signed 64-bit integer.
    Integer(i64),
    /// IEEE double.
    Double(f64),
    /// UTF-8 string.
    String(String),
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::String(_) => 0,
            Value::Double(_) => 1,
            Value::Integer(_) => 2,
            Value::Boolean(_) => 3,
            Value::Null => 4,
        }
    }

    /// Borrow the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s:?}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Null => f.write_str("null"),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> serde::de::Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string, number, boolean or null")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_none<E: serde::de::Error>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<Value, E> {
                Ok(Value::Boolean(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Value, E> {
                Ok(Value::Integer(v))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Value, E> {
                i64::try_from(v)
                    .map(Value::Integer)
                    .map_err(|_| E::custom(format!("integer {v} is out of range for i64")))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Value, E> {
                Ok(Value::Double(v))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Value, E> {
                Ok(Value::String(v.to_string()))
            }

            fn visit_string<E: serde::de::Error>(self, v: String) -> Result<Value, E> {
                Ok(Value::String(v))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

/// One row of a query result: field name → value.
pub type ResultRecord = BTreeMap<String, Value>;

/// Record sets produced by one query evaluation step.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReactionPayload {
    /// Evaluation step this payload belongs to.
    pub sequence: u64,
    /// Records that entered the result.
    pub added: Vec<ResultRecord>,
    /// Records whose values changed.
    pub updated: Vec<ResultRecord>,
    /// Records that left the result.
    pub deleted: Vec<ResultRecord>,
}

impl ReactionPayload {
    /// Total number of records across all three sets.
    pub fn record_count(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }

    /// Check that no record identity (the value of `id_field`) appears in
    /// more than one of `added`, `updated`, `deleted`.
    ///
    /// Records without `id_field` carry no identity and are not compared.
    pub fn check_disjoint(&self, id_field: &str) -> Result<(), ValidationError> {
        let mut seen: BTreeMap<&Value, &'static str> = BTreeMap::new();
        let sets = [
            ("added", &self.added),
            ("updated", &self.updated),
            ("deleted", &self.deleted),
        ];
        for (set_name, records) in sets {
            for id in records.iter().filter_map(|r| r.get(id_field)) {
                match seen.get(id) {
                    Some(&first) if first != set_name => {
                        return Err(ValidationError::OverlappingRecords {
                            id: id.to_string(),
                            first,
                            second: set_name,
                        });
                    }
                    Some(_) => {}
                    None => {
                        seen.insert(id, set_name);
                    }
                }
            }
        }
        Ok(())
    }
}

/// One delivery of a [`ReactionPayload`] to a reaction consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionInvocation {
    /// Unique per logical submission; used for de-duplication.
    pub id: String,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Query whose result changed.
    pub query_id: String,
    /// Transport headers (e.g. a query sequence header).
    pub metadata: BTreeMap<String, String>,
    /// Result delta.
    pub payload: ReactionPayload,
}

/// Outcome of a `DispatchSingle` / `DispatchBatch` call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DispatchResponse {
    /// False if any event was rejected.
    pub success: bool,
    /// Human-readable summary of the call.
    pub message: String,
    /// Number of events validated and forwarded.
    pub events_processed: u64,
}

impl DispatchResponse {
    /// Successful outcome.
    pub fn ok(events_processed: u64, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            events_processed,
        }
    }

    /// Failed (possibly partial) outcome.
    pub fn failed(events_processed: u64, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            events_processed,
        }
    }
}

/// Outcome of a `HandleInvocation` call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InvocationResponse {
    /// Whether the invocation was (or had already been) applied.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// Echo of the request's invocation id.
    pub invocation_id: String,
}

impl InvocationResponse {
    /// Successful outcome for `invocation_id`.
    pub fn ok(invocation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            invocation_id: invocation_id.into(),
        }
    }

    /// Failed outcome for `invocation_id`.
    pub fn failed(invocation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            invocation_id: invocation_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> ResultRecord {
        ResultRecord::from([("id".to_string(), Value::from(id))])
    }

    #[test]
    fn op_codes_round_trip_through_str() {
        for op in [ChangeOp::Create, ChangeOp::Update, ChangeOp::Delete] {
            assert_eq!(op.as_str().parse::<ChangeOp>().unwrap(), op);
            assert_eq!(op.as_str().chars().next(), Some(op.code()));
        }
    }

    #[test]
    fn unknown_op_code_is_rejected() {
        let err = "x".parse::<ChangeOp>().unwrap_err();
        assert_eq!(err, ValidationError::InvalidOp("x".into()));
        assert!("insert".parse::<ChangeOp>().is_err());
        assert!("C".parse::<ChangeOp>().is_err());
    }

    #[test]
    fn value_orders_by_variant_then_payload() {
        let mut values = vec![
            Value::Null,
            Value::Boolean(true),
            Value::Integer(3),
            Value::Double(1.5),
            Value::from("b"),
            Value::Integer(-1),
            Value::from("a"),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::from("a"),
                Value::from("b"),
                Value::Double(1.5),
                Value::Integer(-1),
                Value::Integer(3),
                Value::Boolean(true),
                Value::Null,
            ]
        );
    }

    #[test]
    fn value_equality_is_variant_sensitive() {
        assert_ne!(Value::Integer(72), Value::Double(72.0));
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert_eq!(Value::Null, Value::Null);
    }

    #[test]
    fn value_json_rejects_integers_beyond_i64() {
        let max: Value = serde_json::from_str("9223372036854775807").unwrap();
        assert_eq!(max, Value::Integer(i64::MAX));
        let err = serde_json::from_str::<Value>("9223372036854775808").unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
        assert!(serde_json::from_str::<Value>("[1]").is_err());
    }

    #[test]
    fn value_json_keeps_integer_and_double_apart() {
        let v: Value = serde_json::from_str("72").unwrap();
        assert_eq!(v, Value::Integer(72));
        let v: Value = serde_json::from_str("72.5").unwrap();
        assert_eq!(v, Value::Double(72.5));
        let v: Value = serde_json::from_str("null").unwrap();
        assert!(v.is_null());
        assert_eq!(serde_json::to_string(&Value::from("room_0")).unwrap(), "\"room_0\"");
    }

    #[test]
    fn disjoint_sets_pass() {
        let payload = ReactionPayload {
            sequence: 1,
            added: vec![record("room_0"), record("room_1")],
            updated: vec![record("room_2")],
            deleted: vec![ResultRecord::new()],
        };
        payload.check_disjoint("id").unwrap();
        assert_eq!(payload.record_count(), 4);
    }

    #[test]
    fn overlapping_sets_are_reported_with_both_set_names() {
        let payload = ReactionPayload {
            sequence: 1,
            added: vec![record("room_0")],
            updated: vec![],
            deleted: vec![record("room_0")],
        };
        let err = payload.check_disjoint("id").unwrap_err();
        assert_eq!(
            err,
            ValidationError::OverlappingRecords {
                id: "\"room_0\"".into(),
                first: "added",
                second: "deleted",
            }
        );
    }

    #[test]
    fn repeated_id_within_one_set_is_not_an_overlap() {
        let payload = ReactionPayload {
            sequence: 1,
            added: vec![record("room_0"), record("room_0")],
            ..ReactionPayload::default()
        };
        payload.check_disjoint("id").unwrap();
    }

    #[test]
    fn node_event_json_omits_relationship() {
        let event = SourceChangeEvent::node(1, ChangeOp::Create, "n1").with_label("Room");
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("relationship").is_none());
        assert_eq!(json["op"], "c");
        let back: SourceChangeEvent = serde_json::from_value(json).unwrap();
        assert!(back.relationship.is_none());
        assert_eq!(back, event);
    }
}
