// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Protobuf messages for the `riffle.v1` services.
//!
//! These structs are the on-the-wire shape (prost encoding for gRPC, serde
//! JSON for the HTTP variant). They are decoded leniently: `op` is a string,
//! labels are a list, a `Value` may arrive with no variant. `TryFrom` into the
//! domain types in the crate root performs every check exactly once.
//!
//! Field tags match `proto/riffle/v1/*.proto`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Relationship endpoints (tag 7 of `SourceChangeEvent`).
#[derive(Clone, PartialEq, Eq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Relationship {
    /// Start node id.
    #[prost(string, tag = "1")]
    pub start_id: String,
    /// End node id.
    #[prost(string, tag = "2")]
    pub end_id: String,
    /// Start node labels.
    #[prost(string, repeated, tag = "3")]
    pub start_labels: Vec<String>,
    /// End node labels.
    #[prost(string, repeated, tag = "4")]
    pub end_labels: Vec<String>,
}

/// Wire form of a source change event.
#[derive(Clone, PartialEq, Eq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceChangeEvent {
    /// Stream position.
    #[prost(uint64, tag = "1")]
    pub sequence_number: u64,
    /// Nanoseconds since the Unix epoch.
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
    /// Single-character op code.
    #[prost(string, tag = "3")]
    pub op: String,
    /// Entity id.
    #[prost(string, tag = "4")]
    pub id: String,
    /// Entity labels.
    #[prost(string, repeated, tag = "5")]
    pub labels: Vec<String>,
    /// Entity properties.
    #[prost(btree_map = "string, string", tag = "6")]
    pub properties: BTreeMap<String, String>,
    /// Absent for nodes.
    #[prost(message, optional, tag = "7")]
    pub relationship: Option<Relationship>,
}

/// Wire form of an event batch.
#[derive(Clone, PartialEq, Eq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBatch {
    /// Source stream id.
    #[prost(string, tag = "1")]
    pub source_id: String,
    /// Events in order.
    #[prost(message, repeated, tag = "2")]
    pub events: Vec<SourceChangeEvent>,
    /// Free-form context.
    #[prost(btree_map = "string, string", tag = "3")]
    pub metadata: BTreeMap<String, String>,
}

/// Response to both dispatcher methods.
#[derive(Clone, PartialEq, Eq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchResponse {
    /// False if any event was rejected.
    #[prost(bool, tag = "1")]
    pub success: bool,
    /// Outcome summary.
    #[prost(string, tag = "2")]
    pub message: String,
    /// Events validated and forwarded.
    #[prost(uint64, tag = "3")]
    pub events_processed: u64,
}

/// Protocol null marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum NullValue {
    /// The only null.
    NullValue = 0,
}

/// Typed scalar; exactly one variant must be set.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Value {
    /// Populated variant.
    #[prost(oneof = "value::Kind", tags = "1, 2, 3, 4, 5")]
    pub kind: Option<value::Kind>,
}

/// Nested types for [`Value`].
pub mod value {
    /// Variants of a [`super::Value`].
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        /// UTF-8 string.
        #[prost(string, tag = "1")]
        StringValue(String),
        /// IEEE double.
        #[prost(double, tag = "2")]
        DoubleValue(f64),
        /// Signed 64-bit integer.
        #[prost(int64, tag = "3")]
        IntegerValue(i64),
        /// Boolean.
        #[prost(bool, tag = "4")]
        BoolValue(bool),
        /// Null.
        #[prost(enumeration = "super::NullValue", tag = "5")]
        NullValue(i32),
    }
}

/// One row of query output.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResultRecord {
    /// Field name → value.
    #[prost(btree_map = "string, message", tag = "1")]
    pub fields: BTreeMap<String, Value>,
}

/// Result delta for one evaluation step.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReactionPayload {
    /// Evaluation step.
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    /// Added records.
    #[prost(message, repeated, tag = "2")]
    pub added: Vec<ResultRecord>,
    /// Updated records.
    #[prost(message, repeated, tag = "3")]
    pub updated: Vec<ResultRecord>,
    /// Deleted records.
    #[prost(message, repeated, tag = "4")]
    pub deleted: Vec<ResultRecord>,
}

/// One delivery to a reaction consumer.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReactionInvocation {
    /// Unique invocation id.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Nanoseconds since the Unix epoch.
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
    /// Query whose result changed.
    #[prost(string, tag = "3")]
    pub query_id: String,
    /// Transport headers.
    #[prost(btree_map = "string, string", tag = "4")]
    pub metadata: BTreeMap<String, String>,
    /// Result delta.
    #[prost(message, optional, tag = "5")]
    pub payload: Option<ReactionPayload>,
}

/// Response to `HandleInvocation`.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct InvocationResponse {
    /// Applied (now or earlier).
    #[prost(bool, tag = "1")]
    pub success: bool,
    /// Outcome summary.
    #[prost(string, tag = "2")]
    pub message: String,
    /// Echo of the request id.
    #[prost(string, tag = "3")]
    pub invocation_id: String,
}

// --- wire -> domain -------------------------------------------------------

fn label_set(labels: Vec<String>) -> BTreeSet<String> {
    labels.into_iter().collect()
}

impl TryFrom<SourceChangeEvent> for crate::SourceChangeEvent {
    type Error = ValidationError;

    fn try_from(wire: SourceChangeEvent) -> Result<Self, Self::Error> {
        if wire.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        let op = wire.op.parse()?;
        let relationship = match wire.relationship {
            None => None,
            Some(rel) => {
                if rel.start_id.is_empty() {
                    return Err(ValidationError::IncompleteRelationship {
                        id: wire.id,
                        end: "start",
                    });
                }
                if rel.end_id.is_empty() {
                    return Err(ValidationError::IncompleteRelationship {
                        id: wire.id,
                        end: "end",
                    });
                }
                Some(crate::Relationship {
                    start_id: rel.start_id,
                    end_id: rel.end_id,
                    start_labels: label_set(rel.start_labels),
                    end_labels: label_set(rel.end_labels),
                })
            }
        };
        Ok(crate::SourceChangeEvent {
            sequence_number: wire.sequence_number,
            timestamp: wire.timestamp,
            op,
            id: wire.id,
            labels: label_set(wire.labels),
            properties: wire.properties,
            relationship,
        })
    }
}

fn value_from_wire(field: &str, wire: Value) -> Result<crate::Value, ValidationError> {
    let kind = wire.kind.ok_or_else(|| ValidationError::EmptyValue {
        field: field.to_string(),
    })?;
    Ok(match kind {
        value::Kind::StringValue(s) => crate::Value::String(s),
        value::Kind::DoubleValue(d) => crate::Value::Double(d),
        value::Kind::IntegerValue(i) => crate::Value::Integer(i),
        value::Kind::BoolValue(b) => crate::Value::Boolean(b),
        value::Kind::NullValue(_) => crate::Value::Null,
    })
}

fn record_from_wire(wire: ResultRecord) -> Result<crate::ResultRecord, ValidationError> {
    wire.fields
        .into_iter()
        .map(|(field, value)| {
            let value = value_from_wire(&field, value)?;
            Ok((field, value))
        })
        .collect()
}

fn records_from_wire(
    wire: Vec<ResultRecord>,
) -> Result<Vec<crate::ResultRecord>, ValidationError> {
    wire.into_iter().map(record_from_wire).collect()
}

impl TryFrom<ReactionPayload> for crate::ReactionPayload {
    type Error = ValidationError;

    fn try_from(wire: ReactionPayload) -> Result<Self, Self::Error> {
        Ok(crate::ReactionPayload {
            sequence: wire.sequence,
            added: records_from_wire(wire.added)?,
            updated: records_from_wire(wire.updated)?,
            deleted: records_from_wire(wire.deleted)?,
        })
    }
}

impl TryFrom<ReactionInvocation> for crate::ReactionInvocation {
    type Error = ValidationError;

    fn try_from(wire: ReactionInvocation) -> Result<Self, Self::Error> {
        if wire.id.is_empty() {
            return Err(ValidationError::EmptyInvocationId);
        }
        if wire.query_id.is_empty() {
            return Err(ValidationError::EmptyQueryId);
        }
        let payload = wire.payload.ok_or(ValidationError::MissingPayload)?;
        Ok(crate::ReactionInvocation {
            id: wire.id,
            timestamp: wire.timestamp,
            query_id: wire.query_id,
            metadata: wire.metadata,
            payload: payload.try_into()?,
        })
    }
}

impl From<DispatchResponse> for crate::DispatchResponse {
    fn from(wire: DispatchResponse) -> Self {
        crate::DispatchResponse {
            success: wire.success,
            message: wire.message,
            events_processed: wire.events_processed,
        }
    }
}

impl From<InvocationResponse> for crate::InvocationResponse {
    fn from(wire: InvocationResponse) -> Self {
        crate::InvocationResponse {
            success: wire.success,
            message: wire.message,
            invocation_id: wire.invocation_id,
        }
    }
}

// --- domain -> wire -------------------------------------------------------

impl From<crate::Relationship> for Relationship {
    fn from(rel: crate::Relationship) -> Self {
        Relationship {
            start_id: rel.start_id,
            end_id: rel.end_id,
            start_labels: rel.start_labels.into_iter().collect(),
            end_labels: rel.end_labels.into_iter().collect(),
        }
    }
}

impl From<crate::SourceChangeEvent> for SourceChangeEvent {
    fn from(event: crate::SourceChangeEvent) -> Self {
        SourceChangeEvent {
            sequence_number: event.sequence_number,
            timestamp: event.timestamp,
            op: event.op.as_str().to_string(),
            id: event.id,
            labels: event.labels.into_iter().collect(),
            properties: event.properties,
            relationship: event.relationship.map(Into::into),
        }
    }
}

impl From<crate::EventBatch> for EventBatch {
    fn from(batch: crate::EventBatch) -> Self {
        EventBatch {
            source_id: batch.source_id,
            events: batch.events.into_iter().map(Into::into).collect(),
            metadata: batch.metadata,
        }
    }
}

impl From<crate::Value> for Value {
    fn from(value: crate::Value) -> Self {
        let kind = match value {
            crate::Value::String(s) => value::Kind::StringValue(s),
            crate::Value::Double(d) => value::Kind::DoubleValue(d),
            crate::Value::Integer(i) => value::Kind::IntegerValue(i),
            crate::Value::Boolean(b) => value::Kind::BoolValue(b),
            crate::Value::Null => value::Kind::NullValue(NullValue::NullValue as i32),
        };
        Value { kind: Some(kind) }
    }
}

fn record_to_wire(record: crate::ResultRecord) -> ResultRecord {
    ResultRecord {
        fields: record.into_iter().map(|(k, v)| (k, v.into())).collect(),
    }
}

impl From<crate::ReactionPayload> for ReactionPayload {
    fn from(payload: crate::ReactionPayload) -> Self {
        ReactionPayload {
            sequence: payload.sequence,
            added: payload.added.into_iter().map(record_to_wire).collect(),
            updated: payload.updated.into_iter().map(record_to_wire).collect(),
            deleted: payload.deleted.into_iter().map(record_to_wire).collect(),
        }
    }
}

impl From<crate::ReactionInvocation> for ReactionInvocation {
    fn from(inv: crate::ReactionInvocation) -> Self {
        ReactionInvocation {
            id: inv.id,
            timestamp: inv.timestamp,
            query_id: inv.query_id,
            metadata: inv.metadata,
            payload: Some(inv.payload.into()),
        }
    }
}

impl From<crate::DispatchResponse> for DispatchResponse {
    fn from(resp: crate::DispatchResponse) -> Self {
        DispatchResponse {
            success: resp.success,
            message: resp.message,
            events_processed: resp.events_processed,
        }
    }
}

impl From<crate::InvocationResponse> for InvocationResponse {
    fn from(resp: crate::InvocationResponse) -> Self {
        InvocationResponse {
            success: resp.success,
            message: resp.message,
            invocation_id: resp.invocation_id,
        }
    }
}

// --- Unit tests -----------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChangeOp;
    use prost::Message;

    fn wire_node(seq: u64, op: &str, id: &str) -> SourceChangeEvent {
        SourceChangeEvent {
            sequence_number: seq,
            op: op.into(),
            id: id.into(),
            ..SourceChangeEvent::default()
        }
    }

    #[test]
    fn node_event_decodes_with_relationship_absent() {
        let domain = crate::SourceChangeEvent::node(1, ChangeOp::Create, "n1")
            .with_label("Room")
            .with_property("temp", "72");
        let bytes = SourceChangeEvent::from(domain.clone()).encode_to_vec();

        let decoded = SourceChangeEvent::decode(bytes.as_slice()).unwrap();
        assert!(decoded.relationship.is_none());
        let back = crate::SourceChangeEvent::try_from(decoded).unwrap();
        assert_eq!(back.relationship, None);
        assert_eq!(back, domain);
    }

    #[test]
    fn empty_relationship_is_present_not_absent() {
        let mut wire = wire_node(1, "c", "r1");
        wire.relationship = Some(Relationship::default());
        let decoded = SourceChangeEvent::decode(wire.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.relationship, Some(Relationship::default()));
        assert_eq!(
            crate::SourceChangeEvent::try_from(decoded).unwrap_err(),
            ValidationError::IncompleteRelationship {
                id: "r1".into(),
                end: "start",
            }
        );
    }

    #[test]
    fn relationship_event_survives_the_wire() {
        let mut domain =
            crate::SourceChangeEvent::relationship(9, ChangeOp::Update, "e1", "n1", "n2");
        if let Some(rel) = domain.relationship.as_mut() {
            rel.start_labels.insert("Room".into());
            rel.end_labels.insert("Floor".into());
        }
        let wire = SourceChangeEvent::from(domain.clone());
        let decoded = SourceChangeEvent::decode(wire.encode_to_vec().as_slice()).unwrap();
        assert_eq!(crate::SourceChangeEvent::try_from(decoded).unwrap(), domain);
    }

    #[test]
    fn invalid_op_and_empty_id_are_rejected() {
        assert_eq!(
            crate::SourceChangeEvent::try_from(wire_node(1, "x", "n1")).unwrap_err(),
            ValidationError::InvalidOp("x".into())
        );
        assert_eq!(
            crate::SourceChangeEvent::try_from(wire_node(1, "c", "")).unwrap_err(),
            ValidationError::EmptyId
        );
        assert_eq!(
            crate::SourceChangeEvent::try_from(wire_node(1, "", "n1")).unwrap_err(),
            ValidationError::InvalidOp(String::new())
        );
    }

    #[test]
    fn duplicate_labels_collapse_into_a_set() {
        let mut wire = wire_node(1, "u", "n1");
        wire.labels = vec!["Room".into(), "Room".into(), "Area".into()];
        let event = crate::SourceChangeEvent::try_from(wire).unwrap();
        assert_eq!(event.labels.len(), 2);
    }

    #[test]
    fn json_event_without_relationship_maps_to_node() {
        let json = r#"{"sequence_number":1,"op":"c","id":"n1","labels":["Room"],"properties":{"temp":"72"}}"#;
        let wire: SourceChangeEvent = serde_json::from_str(json).unwrap();
        assert!(wire.relationship.is_none());
        assert_eq!(wire.timestamp, 0);
        let event = crate::SourceChangeEvent::try_from(wire).unwrap();
        assert_eq!(event.properties.get("temp").map(String::as_str), Some("72"));

        let json = r#"{"sequence_number":1,"op":"c","id":"n1","relationship":null}"#;
        let wire: SourceChangeEvent = serde_json::from_str(json).unwrap();
        assert!(wire.relationship.is_none());
    }

    #[test]
    fn value_without_variant_names_the_field() {
        let mut fields = BTreeMap::new();
        fields.insert("temperature".to_string(), Value { kind: None });
        let wire = ReactionInvocation {
            id: "inv-1".into(),
            query_id: "q".into(),
            payload: Some(ReactionPayload {
                sequence: 1,
                added: vec![ResultRecord { fields }],
                ..ReactionPayload::default()
            }),
            ..ReactionInvocation::default()
        };
        assert_eq!(
            crate::ReactionInvocation::try_from(wire).unwrap_err(),
            ValidationError::EmptyValue {
                field: "temperature".into()
            }
        );
    }

    #[test]
    fn invocation_values_keep_their_variants() {
        let record = crate::ResultRecord::from([
            ("id".to_string(), crate::Value::from("room_0")),
            ("temperature".to_string(), crate::Value::Double(72.5)),
            ("floor".to_string(), crate::Value::Integer(3)),
            ("occupied".to_string(), crate::Value::Boolean(false)),
            ("note".to_string(), crate::Value::Null),
        ]);
        let domain = crate::ReactionInvocation {
            id: "inv-1".into(),
            timestamp: 1_700_000_000_000_000_000,
            query_id: "building-comfort".into(),
            metadata: BTreeMap::from([("x-query-sequence".into(), "1".into())]),
            payload: crate::ReactionPayload {
                sequence: 1,
                added: vec![record],
                ..crate::ReactionPayload::default()
            },
        };
        let bytes = ReactionInvocation::from(domain.clone()).encode_to_vec();
        let decoded = ReactionInvocation::decode(bytes.as_slice()).unwrap();
        assert_eq!(crate::ReactionInvocation::try_from(decoded).unwrap(), domain);
    }

    #[test]
    fn invocation_requires_id_query_and_payload() {
        let base = ReactionInvocation {
            id: "inv".into(),
            query_id: "q".into(),
            payload: Some(ReactionPayload::default()),
            ..ReactionInvocation::default()
        };
        let mut no_id = base.clone();
        no_id.id.clear();
        assert_eq!(
            crate::ReactionInvocation::try_from(no_id).unwrap_err(),
            ValidationError::EmptyInvocationId
        );
        let mut no_query = base.clone();
        no_query.query_id.clear();
        assert_eq!(
            crate::ReactionInvocation::try_from(no_query).unwrap_err(),
            ValidationError::EmptyQueryId
        );
        let mut no_payload = base;
        no_payload.payload = None;
        assert_eq!(
            crate::ReactionInvocation::try_from(no_payload).unwrap_err(),
            ValidationError::MissingPayload
        );
    }
}
