//! SCALE value to JSON conversion.
//!
//! Handlers read event parameters and call arguments as JSON with a few
//! conventions:
//!
//! - byte arrays of known key/id lengths become `0x` hex strings
//! - `Option` collapses to the inner value or `null`
//! - enum variants become `{"Variant": inner}`, so a nested runtime call
//!   reads `{"Pallet": {"call": {args}}}`
//! - integers are decimal strings (balances exceed JSON number precision)

use serde_json::{Map, Value as Json};
use subxt::dynamic::Value as DynamicValue;
use subxt::ext::scale_value::{Composite, Primitive, Value, ValueDef};

/// Lengths of fixed byte arrays rendered as hex: tickers (12), asset ids
/// and receipt uids (16), Ethereum addresses (20), accounts, identities
/// and hashes (32), signatures (64).
const BYTE_ARRAY_LENGTHS: &[usize] = &[12, 16, 20, 32, 64];

/// Ordered event parameters.
pub fn params_to_json<T>(fields: &Composite<T>) -> Vec<Json> {
    match fields {
        Composite::Named(named) => named.iter().map(|(_, v)| value_to_json(v)).collect(),
        Composite::Unnamed(values) => values.iter().map(value_to_json).collect(),
    }
}

/// Convert a Composite to a JSON value.
pub fn composite_to_json<T>(composite: &Composite<T>) -> Json {
    match composite {
        Composite::Unnamed(values) => {
            if let Some(hex_str) = try_as_byte_array(values) {
                return Json::String(hex_str);
            }
            // Newtype wrappers (IdentityId, AssetId, ...) unwrap to their field
            if values.len() == 1 {
                return value_to_json(&values[0]);
            }
            Json::Array(values.iter().map(value_to_json).collect())
        }
        Composite::Named(fields) => {
            let obj: Map<String, Json> = fields
                .iter()
                .map(|(name, v)| (name.clone(), value_to_json(v)))
                .collect();
            Json::Object(obj)
        }
    }
}

/// Interpret an unnamed composite of small integers as bytes.
fn try_as_byte_array<T>(values: &[Value<T>]) -> Option<String> {
    if !BYTE_ARRAY_LENGTHS.contains(&values.len()) {
        return None;
    }

    let bytes = values
        .iter()
        .map(|value| match &value.value {
            ValueDef::Primitive(Primitive::U128(n)) => u8::try_from(*n).ok(),
            _ => None,
        })
        .collect::<Option<Vec<u8>>>()?;

    Some(format!("0x{}", hex::encode(bytes)))
}

/// Convert a Value to a JSON value.
pub fn value_to_json<T>(value: &Value<T>) -> Json {
    match &value.value {
        ValueDef::Composite(composite) => composite_to_json(composite),
        ValueDef::Variant(variant) => {
            let inner = composite_to_json(&variant.values);
            match variant.name.as_str() {
                "None" => Json::Null,
                "Some" | "Id" => inner,
                name => {
                    let mut map = Map::new();
                    map.insert(name.to_string(), inner);
                    Json::Object(map)
                }
            }
        }
        ValueDef::Primitive(primitive) => primitive_to_json(primitive),
        ValueDef::BitSequence(bits) => Json::String(format!("{:?}", bits)),
    }
}

fn primitive_to_json(primitive: &Primitive) -> Json {
    match primitive {
        Primitive::Bool(b) => Json::Bool(*b),
        Primitive::Char(c) => Json::String(c.to_string()),
        Primitive::String(s) => Json::String(s.clone()),
        Primitive::U128(n) => Json::String(n.to_string()),
        Primitive::I128(n) => Json::String(n.to_string()),
        Primitive::U256(n) => Json::String(format!("0x{}", hex::encode(n))),
        Primitive::I256(n) => Json::String(format!("0x{}", hex::encode(n))),
    }
}

/// Storage key from its JSON form: `0x` strings are raw bytes, numbers
/// are integers.
pub fn json_to_key(value: &Json) -> DynamicValue {
    match value {
        Json::String(s) => match s.strip_prefix("0x").map(hex::decode) {
            Some(Ok(bytes)) => DynamicValue::from_bytes(bytes),
            _ => DynamicValue::string(s.clone()),
        },
        Json::Number(n) => match n.as_u64() {
            Some(n) => DynamicValue::u128(n as u128),
            None => DynamicValue::string(n.to_string()),
        },
        Json::Bool(b) => DynamicValue::bool(*b),
        other => DynamicValue::string(other.to_string()),
    }
}

/// Signer account from the encoded extrinsic address.
///
/// Accepts a bare 32-byte account or a `MultiAddress::Id` (tag 0).
pub fn signer_from_address(bytes: &[u8]) -> Option<[u8; 32]> {
    match bytes.len() {
        32 => bytes.try_into().ok(),
        33 if bytes[0] == 0 => bytes[1..].try_into().ok(),
        _ => None,
    }
}
