//! JSON form of decoded messages for the MQTT topic tree.
//!
//! Byte fields travel as `{"__b64__": "<standard base64>"}`, enums as their
//! integer value and non-finite floats as `null`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hivelink_proto::{DataType, DecodedMessage, FieldSpec, FieldValue, MessageSpec, Schema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::BridgeError;

pub const B64_TAG: &str = "__b64__";

/// Body published under `<base>/from/<node>/<Category>/<Subcategory>/<Message>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttEnvelope {
    pub intf: String,
    pub msgid: String,
    pub data: Map<String, Value>,
    pub from: String,
    pub time: u64,
}

impl MqttEnvelope {
    pub fn new(intf: &str, decoded: &DecodedMessage, from: &str, time: u64) -> Self {
        Self {
            intf: intf.to_string(),
            msgid: decoded.path.clone(),
            data: fields_to_json(decoded),
            from: from.to_string(),
            time,
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, BridgeError> {
        Ok(serde_json::to_vec(self)?)
    }
}

pub fn fields_to_json(decoded: &DecodedMessage) -> Map<String, Value> {
    decoded.fields.iter().map(|(name, value)| (name.clone(), field_to_json(value))).collect()
}

pub fn field_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Int(v) => Value::from(*v),
        FieldValue::Float(v) => Number::from_f64(*v).map_or(Value::Null, Value::Number),
        FieldValue::Str(v) => Value::String(v.clone()),
        FieldValue::Bool(v) => Value::Bool(*v),
        FieldValue::Bytes(v) => {
            let mut tagged = Map::new();
            tagged.insert(B64_TAG.to_string(), Value::String(STANDARD.encode(v)));
            Value::Object(tagged)
        }
        FieldValue::Enum(v) => Value::from(v.value),
    }
}

/// Converts a JSON `data` object into schema-ordered field values.
pub fn fields_from_json(
    schema: &Schema,
    spec: &MessageSpec,
    data: &Map<String, Value>,
) -> Result<Vec<FieldValue>, BridgeError> {
    if let Some(extra) = data.keys().find(|key| !spec.fields.iter().any(|f| &f.name == *key)) {
        return Err(hivelink_proto::SchemaError::UnexpectedField {
            message: spec.path().to_string(),
            field: extra.clone(),
        }
        .into());
    }
    spec.fields
        .iter()
        .map(|field| {
            let value = data.get(&field.name).ok_or_else(|| {
                hivelink_proto::SchemaError::MissingField {
                    message: spec.path().to_string(),
                    field: field.name.clone(),
                }
            })?;
            field_from_json(schema, field, value)
        })
        .collect()
}

pub fn field_from_json(
    schema: &Schema,
    field: &FieldSpec,
    value: &Value,
) -> Result<FieldValue, BridgeError> {
    let mismatch = || BridgeError::Field {
        field: field.name.clone(),
        reason: format!("expected {}, got {}", field.datatype, json_kind(value)),
    };

    let converted = match field.datatype {
        DataType::Int => FieldValue::Int(value.as_i64().ok_or_else(mismatch)?),
        DataType::Float => FieldValue::Float(value.as_f64().ok_or_else(mismatch)?),
        DataType::String => FieldValue::Str(value.as_str().ok_or_else(mismatch)?.to_string()),
        DataType::Bool => FieldValue::Bool(value.as_bool().ok_or_else(mismatch)?),
        DataType::Bytes => match value {
            Value::Object(tagged) => {
                let encoded = tagged.get(B64_TAG).and_then(Value::as_str).ok_or_else(mismatch)?;
                FieldValue::Bytes(STANDARD.decode(encoded)?)
            }
            Value::String(text) => FieldValue::Bytes(text.as_bytes().to_vec()),
            _ => return Err(mismatch()),
        },
        DataType::Enum => match value {
            Value::Number(_) => FieldValue::Int(value.as_i64().ok_or_else(mismatch)?),
            Value::String(member) => {
                let domain = field.enum_domain().unwrap_or(&field.name);
                FieldValue::Enum(schema.enum_value(domain, member)?)
            }
            _ => return Err(mismatch()),
        },
    };
    Ok(converted)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use hivelink_proto::{builtin, decode_message, encode_message};
    use serde_json::json;

    use super::*;

    #[test]
    fn bytes_roundtrip_through_b64_tag() {
        let schema = builtin::schema().expect("schema");
        let spec = schema.lookup_path("Testing.System.BINMSG").expect("binmsg");
        let raw = vec![0x00, 0xFA, 0xFF, 0x10];

        let json = field_to_json(&FieldValue::Bytes(raw.clone()));
        assert_eq!(json, json!({ "__b64__": "APr/EA==" }));

        let data = json!({ "data": json }).as_object().cloned().expect("object");
        let values = fields_from_json(&schema, spec, &data).expect("convert");
        assert_eq!(values, vec![FieldValue::Bytes(raw)]);
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(field_to_json(&FieldValue::Float(f64::NAN)), Value::Null);
        assert_eq!(field_to_json(&FieldValue::Float(f64::INFINITY)), Value::Null);
        assert_eq!(field_to_json(&FieldValue::Float(2.5)), json!(2.5));
    }

    #[test]
    fn enums_publish_as_integers_and_parse_by_name_or_value() {
        let schema = builtin::schema().expect("schema");
        let loiter = schema.enum_value("FlightMode", "LOITER").expect("LOITER");
        assert_eq!(field_to_json(&FieldValue::Enum(loiter.clone())), json!(5));

        let spec = schema.lookup_path("Reply.Command.RESULT").expect("result");
        let by_name = json!({ "CommandResult": "DENIED" }).as_object().cloned().expect("object");
        assert_eq!(
            fields_from_json(&schema, spec, &by_name).expect("by name"),
            vec![FieldValue::Enum(schema.enum_value("CommandResult", "DENIED").expect("DENIED"))]
        );
        let by_value = json!({ "CommandResult": 3 }).as_object().cloned().expect("object");
        assert_eq!(fields_from_json(&schema, spec, &by_value).expect("by value"), vec![FieldValue::Int(3)]);
    }

    #[test]
    fn envelope_shape() {
        let schema = builtin::schema().expect("schema");
        let spec = schema.lookup_path("Status.System.POSITION").expect("position");
        let bytes =
            encode_message(&schema, spec.identity, &[FieldValue::Int(1), FieldValue::Int(2)])
                .expect("encode");
        let decoded = decode_message(&schema, &bytes).expect("decode");

        let envelope = MqttEnvelope::new("udp", &decoded, "drone1", 1_700_000_000);
        let body: Value = serde_json::from_slice(&envelope.to_vec().expect("json")).expect("parse");
        assert_eq!(
            body,
            json!({
                "intf": "udp",
                "msgid": "Status.System.POSITION",
                "data": { "lat": 1, "lon": 2 },
                "from": "drone1",
                "time": 1_700_000_000u64,
            })
        );
    }

    #[test]
    fn missing_and_unexpected_fields_are_rejected() {
        let schema = builtin::schema().expect("schema");
        let spec = schema.lookup_path("Status.System.POSITION").expect("position");

        let missing = json!({ "lat": 1 }).as_object().cloned().expect("object");
        assert!(matches!(
            fields_from_json(&schema, spec, &missing),
            Err(BridgeError::Schema(hivelink_proto::SchemaError::MissingField { .. }))
        ));

        let extra = json!({ "lat": 1, "lon": 2, "alt": 3 }).as_object().cloned().expect("object");
        assert!(matches!(
            fields_from_json(&schema, spec, &extra),
            Err(BridgeError::Schema(hivelink_proto::SchemaError::UnexpectedField { .. }))
        ));

        let wrong = json!({ "lat": "north", "lon": 2 }).as_object().cloned().expect("object");
        assert!(matches!(fields_from_json(&schema, spec, &wrong), Err(BridgeError::Field { .. })));
    }
}
