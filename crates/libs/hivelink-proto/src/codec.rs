//! Envelope encode/decode.
//!
//! An envelope is the msgpack array
//! `[category, subcategory, message, [field, ...]]`. Fields are positional;
//! the schema supplies names and types on both ends.

use std::collections::HashMap;

use rmpv::Value;

use crate::schema::{DataType, FieldSpec, MessageIdentity, MessageSpec, Schema, SchemaError};
use crate::value::{EnumValue, FieldValue};

const ENVELOPE_LEN: usize = 4;

/// Errors from envelope encode/decode.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unknown message: {0}")]
    Schema(#[from] SchemaError),

    #[error("payload/schema length mismatch for {message}: expected {expected} fields, got {actual}")]
    LengthMismatch { message: String, expected: usize, actual: usize },

    #[error("{message} takes {expected} fields, {actual} supplied")]
    FieldCount { message: String, expected: usize, actual: usize },

    #[error("{message}.{field}: expected {expected}, got {actual}")]
    FieldType { message: String, field: String, expected: DataType, actual: &'static str },

    #[error("invalid enum value {value} for {domain}")]
    InvalidEnumValue { domain: String, value: i64 },

    #[error("{domain}.{name} does not have value {value}")]
    EnumNameMismatch { domain: String, name: String, value: i64 },

    #[error("msgpack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    #[error("msgpack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),
}

/// A decoded envelope with fields in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub identity: MessageIdentity,
    pub path: String,
    pub fields: Vec<(String, FieldValue)>,
}

impl DecodedMessage {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(field, _)| field == name).map(|(_, value)| value)
    }

    pub fn values(&self) -> impl Iterator<Item = &FieldValue> {
        self.fields.iter().map(|(_, value)| value)
    }

    pub fn into_map(self) -> HashMap<String, FieldValue> {
        self.fields.into_iter().collect()
    }
}

/// Encode `values` (in schema order) for `identity`.
pub fn encode_message(
    schema: &Schema,
    identity: MessageIdentity,
    values: &[FieldValue],
) -> Result<Vec<u8>, CodecError> {
    let spec = schema.resolve(identity)?;
    if values.len() != spec.fields.len() {
        return Err(CodecError::FieldCount {
            message: spec.path().to_string(),
            expected: spec.fields.len(),
            actual: values.len(),
        });
    }

    let mut packed = Vec::with_capacity(values.len());
    for (field, value) in spec.fields.iter().zip(values) {
        packed.push(encode_field(schema, spec, field, value)?);
    }

    let envelope = Value::Array(vec![
        Value::from(identity.category),
        Value::from(identity.subcategory),
        Value::from(identity.message),
        Value::Array(packed),
    ]);
    Ok(rmp_serde::to_vec(&envelope)?)
}

/// Encode named field values, ordering them by the schema first.
pub fn encode_named(
    schema: &Schema,
    identity: MessageIdentity,
    fields: &HashMap<String, FieldValue>,
) -> Result<Vec<u8>, CodecError> {
    let ordered = schema.build_payload(identity, fields)?;
    encode_message(schema, identity, &ordered)
}

pub fn decode_message(schema: &Schema, bytes: &[u8]) -> Result<DecodedMessage, CodecError> {
    let envelope: Value = rmp_serde::from_slice(bytes)?;
    let Value::Array(items) = envelope else {
        return Err(CodecError::MalformedEnvelope(format!(
            "expected array, got {}",
            describe(&envelope)
        )));
    };
    if items.len() != ENVELOPE_LEN {
        return Err(CodecError::MalformedEnvelope(format!(
            "expected {ENVELOPE_LEN} elements, got {}",
            items.len()
        )));
    }

    let identity = MessageIdentity::new(
        identity_part(&items[0], "category")?,
        identity_part(&items[1], "subcategory")?,
        identity_part(&items[2], "message")?,
    );
    let Value::Array(raw_fields) = &items[3] else {
        return Err(CodecError::MalformedEnvelope(format!(
            "field list is {}, not an array",
            describe(&items[3])
        )));
    };

    let spec = schema.resolve(identity)?;
    if raw_fields.len() != spec.fields.len() {
        return Err(CodecError::LengthMismatch {
            message: spec.path().to_string(),
            expected: spec.fields.len(),
            actual: raw_fields.len(),
        });
    }

    let mut fields = Vec::with_capacity(raw_fields.len());
    for (field, raw) in spec.fields.iter().zip(raw_fields) {
        fields.push((field.name.clone(), decode_field(schema, spec, field, raw)?));
    }

    Ok(DecodedMessage { identity, path: spec.path().to_string(), fields })
}

fn identity_part(value: &Value, what: &str) -> Result<u32, CodecError> {
    value.as_u64().and_then(|v| u32::try_from(v).ok()).ok_or_else(|| {
        CodecError::MalformedEnvelope(format!("{what} id is {}, not an ordinal", describe(value)))
    })
}

fn encode_field(
    schema: &Schema,
    spec: &MessageSpec,
    field: &FieldSpec,
    value: &FieldValue,
) -> Result<Value, CodecError> {
    let packed = match (field.datatype, value) {
        (DataType::Int, FieldValue::Int(v)) => Value::from(*v),
        (DataType::Float, FieldValue::Float(v)) => Value::F64(*v),
        (DataType::String, FieldValue::Str(v)) => Value::from(v.as_str()),
        (DataType::Bool, FieldValue::Bool(v)) => Value::Boolean(*v),
        (DataType::Bytes, FieldValue::Bytes(v)) => Value::Binary(v.clone()),
        (DataType::Enum, FieldValue::Enum(v)) => {
            let domain = field.enum_domain().unwrap_or(&field.name);
            if v.domain != domain {
                return Err(type_error(spec, field, "enum of another domain"));
            }
            let member = enum_member(schema, domain, v.value)?;
            if member.name != v.name {
                return Err(CodecError::EnumNameMismatch {
                    domain: v.domain.clone(),
                    name: v.name.clone(),
                    value: v.value,
                });
            }
            Value::from(member.value)
        }
        (DataType::Enum, FieldValue::Int(v)) => {
            let domain = field.enum_domain().unwrap_or(&field.name);
            Value::from(enum_member(schema, domain, *v)?.value)
        }
        (_, other) => return Err(type_error(spec, field, value_kind(other))),
    };
    Ok(packed)
}

fn decode_field(
    schema: &Schema,
    spec: &MessageSpec,
    field: &FieldSpec,
    raw: &Value,
) -> Result<FieldValue, CodecError> {
    let decoded = match field.datatype {
        DataType::Int => raw.as_i64().map(FieldValue::Int),
        DataType::Float => match raw {
            Value::F32(v) => Some(FieldValue::Float(f64::from(*v))),
            Value::F64(v) => Some(FieldValue::Float(*v)),
            _ => None,
        },
        DataType::String => raw.as_str().map(|v| FieldValue::Str(v.to_string())),
        DataType::Bool => raw.as_bool().map(FieldValue::Bool),
        DataType::Bytes => raw.as_slice().map(|v| FieldValue::Bytes(v.to_vec())),
        DataType::Enum => match raw.as_i64() {
            Some(v) => {
                let domain = field.enum_domain().unwrap_or(&field.name);
                Some(FieldValue::Enum(enum_member(schema, domain, v)?))
            }
            None => None,
        },
    };
    decoded.ok_or_else(|| type_error(spec, field, describe(raw)))
}

fn enum_member(schema: &Schema, domain: &str, value: i64) -> Result<EnumValue, CodecError> {
    let payload_enum = schema.enum_domain(domain)?;
    let name = payload_enum
        .name_of(value)
        .ok_or_else(|| CodecError::InvalidEnumValue { domain: domain.to_string(), value })?;
    Ok(EnumValue { domain: domain.to_string(), name: name.to_string(), value })
}

fn type_error(spec: &MessageSpec, field: &FieldSpec, actual: &'static str) -> CodecError {
    CodecError::FieldType {
        message: spec.path().to_string(),
        field: field.name.clone(),
        expected: field.datatype,
        actual,
    }
}

fn value_kind(value: &FieldValue) -> &'static str {
    match value {
        FieldValue::Int(_) => "int",
        FieldValue::Float(_) => "float",
        FieldValue::Str(_) => "string",
        FieldValue::Bool(_) => "bool",
        FieldValue::Bytes(_) => "bytes",
        FieldValue::Enum(_) => "enum",
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Nil => "nil",
        Value::Boolean(_) => "bool",
        Value::Integer(_) => "int",
        Value::F32(_) | Value::F64(_) => "float",
        Value::String(_) => "string",
        Value::Binary(_) => "bytes",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Ext(..) => "ext",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;

    fn flight_values(schema: &Schema) -> Vec<FieldValue> {
        vec![
            FieldValue::Enum(schema.enum_value("FlightMode", "LOITER").expect("LOITER")),
            FieldValue::Int(100),
            FieldValue::Int(100),
            FieldValue::Int(0),
            FieldValue::Int(100),
            FieldValue::Int(158334550),
            FieldValue::Int(208988410),
        ]
    }

    fn raw_envelope(identity: MessageIdentity, fields: Vec<Value>) -> Vec<u8> {
        let envelope = Value::Array(vec![
            Value::from(identity.category),
            Value::from(identity.subcategory),
            Value::from(identity.message),
            Value::Array(fields),
        ]);
        rmp_serde::to_vec(&envelope).expect("encode raw envelope")
    }

    #[test]
    fn flight_roundtrip_recovers_enum_name() {
        let schema = builtin::schema().expect("schema");
        let id = schema.lookup_path("Status.System.FLIGHT").expect("flight").identity;

        let bytes = encode_message(&schema, id, &flight_values(&schema)).expect("encode");
        let decoded = decode_message(&schema, &bytes).expect("decode");

        assert_eq!(decoded.identity, id);
        assert_eq!(decoded.path, "Status.System.FLIGHT");
        assert_eq!(decoded.values().cloned().collect::<Vec<_>>(), flight_values(&schema));
        let mode = decoded.get("FlightMode").and_then(FieldValue::as_enum).expect("mode");
        assert_eq!(mode.name, "LOITER");
        assert_eq!(mode.value, 5);
    }

    #[test]
    fn every_scalar_type_roundtrips() {
        let schema = builtin::schema().expect("schema");

        let find = schema.lookup_path("Reply.Network.FIND").expect("find").identity;
        let values = vec![
            FieldValue::Bool(true),
            FieldValue::Bytes(vec![0x00, 0xFA, 0x00]),
            FieldValue::Int(-3),
            FieldValue::Int(i64::MAX),
            FieldValue::Int(-120),
            FieldValue::Int(7),
        ];
        let bytes = encode_message(&schema, find, &values).expect("encode");
        let decoded = decode_message(&schema, &bytes).expect("decode");
        assert_eq!(decoded.values().cloned().collect::<Vec<_>>(), values);

        let text = schema.lookup_path("Testing.System.TEXTMSG").expect("text").identity;
        let values = vec![FieldValue::Str("nul\0inside".into())];
        let bytes = encode_message(&schema, text, &values).expect("encode");
        assert_eq!(decode_message(&schema, &bytes).expect("decode").get("textdata"), values.first());
    }

    #[test]
    fn integer_for_enum_field_is_coerced() {
        let schema = builtin::schema().expect("schema");
        let id = schema.lookup_path("Reply.Command.RESULT").expect("result").identity;
        let bytes = encode_message(&schema, id, &[FieldValue::Int(1)]).expect("encode");
        let decoded = decode_message(&schema, &bytes).expect("decode");
        let result = decoded.get("CommandResult").and_then(FieldValue::as_enum).expect("enum");
        assert_eq!(result.name, "ACCEPTED");
    }

    #[test]
    fn encode_rejects_wrong_field_count() {
        let schema = builtin::schema().expect("schema");
        let id = schema.lookup_path("Status.System.POSITION").expect("position").identity;
        let err = encode_message(&schema, id, &[FieldValue::Int(1)]).expect_err("short");
        assert!(matches!(err, CodecError::FieldCount { expected: 2, actual: 1, .. }));

        let values = vec![FieldValue::Int(1), FieldValue::Int(2), FieldValue::Int(3)];
        let err = encode_message(&schema, id, &values).expect_err("long");
        assert!(matches!(err, CodecError::FieldCount { expected: 2, actual: 3, .. }));
    }

    #[test]
    fn encode_rejects_wrong_types_and_enum_values() {
        let schema = builtin::schema().expect("schema");
        let id = schema.lookup_path("Status.System.POSITION").expect("position").identity;
        let err = encode_message(&schema, id, &[FieldValue::Int(1), FieldValue::Float(2.0)])
            .expect_err("float in int field");
        assert!(matches!(err, CodecError::FieldType { ref field, .. } if field == "lon"));

        let result = schema.lookup_path("Reply.Command.RESULT").expect("result").identity;
        let err = encode_message(&schema, result, &[FieldValue::Int(99)]).expect_err("range");
        assert!(matches!(err, CodecError::InvalidEnumValue { value: 99, .. }));

        let foreign = schema.enum_value("FlightMode", "ACRO").expect("ACRO");
        let err =
            encode_message(&schema, result, &[FieldValue::Enum(foreign)]).expect_err("domain");
        assert!(matches!(err, CodecError::FieldType { .. }));
    }

    #[test]
    fn encode_rejects_enum_name_that_disagrees_with_value() {
        let schema = builtin::schema().expect("schema");
        let flight = schema.lookup_path("Status.System.FLIGHT").expect("flight").identity;
        let mut values = flight_values(&schema);
        values[0] = FieldValue::Enum(EnumValue {
            domain: "FlightMode".to_string(),
            name: "ACRO".to_string(),
            value: 5,
        });
        let err = encode_message(&schema, flight, &values).expect_err("ACRO is not 5");
        assert!(matches!(
            err,
            CodecError::EnumNameMismatch { ref name, value: 5, .. } if name == "ACRO"
        ));
    }

    #[test]
    fn decode_rejects_schema_length_mismatch() {
        let schema = builtin::schema().expect("schema");
        let id = schema.lookup_path("Status.System.POSITION").expect("position").identity;

        let short = raw_envelope(id, vec![Value::from(1)]);
        assert!(matches!(
            decode_message(&schema, &short),
            Err(CodecError::LengthMismatch { expected: 2, actual: 1, .. })
        ));

        let long = raw_envelope(id, vec![Value::from(1), Value::from(2), Value::from(3)]);
        assert!(matches!(
            decode_message(&schema, &long),
            Err(CodecError::LengthMismatch { expected: 2, actual: 3, .. })
        ));
    }

    #[test]
    fn decode_rejects_malformed_shapes() {
        let schema = builtin::schema().expect("schema");

        let not_array = rmp_serde::to_vec(&Value::from(5)).expect("encode");
        assert!(matches!(
            decode_message(&schema, &not_array),
            Err(CodecError::MalformedEnvelope(_))
        ));

        let three =
            rmp_serde::to_vec(&Value::Array(vec![Value::from(5), Value::from(1), Value::from(2)]))
                .expect("encode");
        assert!(matches!(decode_message(&schema, &three), Err(CodecError::MalformedEnvelope(_))));

        let flat = rmp_serde::to_vec(&Value::Array(vec![
            Value::from(5),
            Value::from(1),
            Value::from(2),
            Value::from(3),
        ]))
        .expect("encode");
        assert!(matches!(decode_message(&schema, &flat), Err(CodecError::MalformedEnvelope(_))));

        assert!(decode_message(&schema, &[0xc1]).is_err());
    }

    #[test]
    fn decode_rejects_unknown_identity() {
        let schema = builtin::schema().expect("schema");
        let bytes = raw_envelope(MessageIdentity::new(5, 9, 1), vec![]);
        assert!(matches!(
            decode_message(&schema, &bytes),
            Err(CodecError::Schema(SchemaError::UnknownIdentity(_)))
        ));
    }

    #[test]
    fn decode_rejects_out_of_domain_enum() {
        let schema = builtin::schema().expect("schema");
        let id = schema.lookup_path("Reply.Command.RESULT").expect("result").identity;
        let bytes = raw_envelope(id, vec![Value::from(42)]);
        assert!(matches!(
            decode_message(&schema, &bytes),
            Err(CodecError::InvalidEnumValue { value: 42, .. })
        ));
    }

    #[test]
    fn encode_named_orders_fields() {
        let schema = builtin::schema().expect("schema");
        let id = schema.lookup_path("Status.System.POSITION").expect("position").identity;
        let mut fields = HashMap::new();
        fields.insert("lon".to_string(), FieldValue::Int(20));
        fields.insert("lat".to_string(), FieldValue::Int(10));
        let bytes = encode_named(&schema, id, &fields).expect("encode");
        let decoded = decode_message(&schema, &bytes).expect("decode");
        assert_eq!(
            decoded.fields,
            vec![("lat".to_string(), FieldValue::Int(10)), ("lon".to_string(), FieldValue::Int(20))]
        );
    }
}
