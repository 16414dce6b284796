//! Conversion between plain JSON and Firestore's typed values.

use super::models::{ArrayValue, MapValue, Value};
use crate::store::StoreError;
use serde::de::Error;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;

fn custom(msg: String) -> StoreError {
    StoreError::SerializationError(<serde_json::Error as Error>::custom(msg))
}

pub fn fields_to_json(fields: HashMap<String, Value>) -> Result<Map<String, JsonValue>, StoreError> {
    let mut map = Map::new();
    for (key, value) in fields {
        map.insert(key, value_to_json(value)?);
    }
    Ok(map)
}

/// Timestamps, bytes and references come back as strings.
pub fn value_to_json(value: Value) -> Result<JsonValue, StoreError> {
    Ok(match value {
        Value::StringValue(s) => JsonValue::String(s),
        Value::IntegerValue(s) => {
            let i: i64 = s
                .parse()
                .map_err(|e| custom(format!("Failed to parse integer string '{}': {}", s, e)))?;
            JsonValue::Number(i.into())
        }
        Value::DoubleValue(d) => JsonValue::Number(
            serde_json::Number::from_f64(d)
                .ok_or_else(|| custom(format!("Invalid f64 value: {}", d)))?,
        ),
        Value::BooleanValue(b) => JsonValue::Bool(b),
        Value::MapValue(map_value) => JsonValue::Object(fields_to_json(map_value.fields)?),
        Value::ArrayValue(array_value) => JsonValue::Array(
            array_value
                .values
                .into_iter()
                .map(value_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::NullValue(_) => JsonValue::Null,
        Value::TimestampValue(s) => JsonValue::String(s),
        Value::GeoPointValue(gp) => json!({ "latitude": gp.latitude, "longitude": gp.longitude }),
        Value::BytesValue(s) => JsonValue::String(s),
        Value::ReferenceValue(s) => JsonValue::String(s),
    })
}

pub fn json_to_fields(map: Map<String, JsonValue>) -> Result<HashMap<String, Value>, StoreError> {
    let mut fields = HashMap::new();
    for (key, value) in map {
        fields.insert(key, json_to_value(value)?);
    }
    Ok(fields)
}

pub fn json_to_value(value: JsonValue) -> Result<Value, StoreError> {
    Ok(match value {
        JsonValue::Null => Value::NullValue(()),
        JsonValue::Bool(b) => Value::BooleanValue(b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::IntegerValue(i.to_string())
            } else if let Some(f) = n.as_f64() {
                Value::DoubleValue(f)
            } else {
                return Err(custom(format!("Unsupported number type: {}", n)));
            }
        }
        JsonValue::String(s) => Value::StringValue(s),
        JsonValue::Array(a) => Value::ArrayValue(ArrayValue {
            values: a
                .into_iter()
                .map(json_to_value)
                .collect::<Result<Vec<_>, _>>()?,
        }),
        JsonValue::Object(o) => Value::MapValue(MapValue {
            fields: json_to_fields(o)?,
        }),
    })
}

/// Quotes a single field name for use in masks and transforms when it is not
/// a plain identifier.
pub fn quote_field_path(name: &str) -> String {
    let mut chars = name.chars();
    let simple = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        name.to_string()
    } else {
        format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_and_timestamp_values() {
        let raw: HashMap<String, Value> = serde_json::from_value(json!({
            "memberCount": { "integerValue": "3" },
            "createdAt": { "timestampValue": "2024-05-01T10:00:00.123456Z" },
            "members": { "arrayValue": {} },
            "participants": { "mapValue": { "fields": { "u1": { "mapValue": { "fields": { "email": { "stringValue": "a@b.c" } } } } } } },
            "photoURL": { "nullValue": null }
        }))
        .unwrap();

        let map = fields_to_json(raw).unwrap();
        assert_eq!(map["memberCount"], json!(3));
        assert_eq!(map["createdAt"], json!("2024-05-01T10:00:00.123456Z"));
        assert_eq!(map["members"], json!([]));
        assert_eq!(map["participants"]["u1"]["email"], json!("a@b.c"));
        assert_eq!(map["photoURL"], JsonValue::Null);
    }

    #[test]
    fn test_json_to_value_number_kinds() {
        assert_eq!(json_to_value(json!(7)).unwrap(), Value::IntegerValue("7".into()));
        assert_eq!(json_to_value(json!(1.5)).unwrap(), Value::DoubleValue(1.5));
        let encoded = serde_json::to_value(json_to_value(json!(null)).unwrap()).unwrap();
        assert_eq!(encoded, json!({ "nullValue": null }));
    }

    #[test]
    fn test_bad_integer_is_an_error() {
        assert!(value_to_json(Value::IntegerValue("x1".into())).is_err());
    }

    #[test]
    fn test_quote_field_path() {
        assert_eq!(quote_field_path("photoURL"), "photoURL");
        assert_eq!(quote_field_path("user-1"), "`user-1`");
        assert_eq!(quote_field_path("9lives"), "`9lives`");
    }
}
