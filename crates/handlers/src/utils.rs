//! Shared utilities for event handlers.
//!
//! Event parameters arrive as ordered JSON values. The parsers below accept
//! the shapes the chain adapter produces (hex strings for byte arrays,
//! decimal strings for large integers, single-key objects or bare strings
//! for enum variants). The `param*` helpers turn a parse failure into a
//! decoding error for the whole block.

use serde_json::Value;

use prism_core::error::{DomainError, DomainResult};
use prism_core::models::AccountId;
use prism_core::ports::RawEvent;
use prism_core::projection::compose_id;

static NULL: Value = Value::Null;

// =============================================================================
// Positional parameter extraction
// =============================================================================

/// Build a decoding error for `event`.
pub fn decode_error(event: &RawEvent, reason: impl Into<String>) -> DomainError {
    DomainError::decoding(event.label(), reason)
}

/// Raw parameter at `index`, failing if the event is too short.
pub fn param_value<'a>(event: &'a RawEvent, index: usize, name: &str) -> DomainResult<&'a Value> {
    event
        .params
        .get(index)
        .ok_or_else(|| decode_error(event, format!("missing parameter {index} ({name})")))
}

/// Parse the parameter at `index`.
///
/// # Example
///
/// ```ignore
/// let did = param(event, 0, "did", parse_did)?;
/// ```
pub fn param<T>(
    event: &RawEvent,
    index: usize,
    name: &str,
    parser: fn(&Value) -> Option<T>,
) -> DomainResult<T> {
    let value = param_value(event, index, name)?;
    parser(value).ok_or_else(|| {
        decode_error(event, format!("parameter {index} ({name}) has unexpected shape: {value}"))
    })
}

/// Parse an optional parameter: absent or `null` is `None`, anything else
/// must parse.
pub fn opt_param<T>(
    event: &RawEvent,
    index: usize,
    name: &str,
    parser: fn(&Value) -> Option<T>,
) -> DomainResult<Option<T>> {
    match event.params.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => parser(value).map(Some).ok_or_else(|| {
            decode_error(event, format!("parameter {index} ({name}) has unexpected shape: {value}"))
        }),
    }
}

/// Parse every element of a list parameter.
pub fn list_param<T>(
    event: &RawEvent,
    index: usize,
    name: &str,
    parser: fn(&Value) -> Option<T>,
) -> DomainResult<Vec<T>> {
    let value = param_value(event, index, name)?;
    let items = value
        .as_array()
        .ok_or_else(|| decode_error(event, format!("parameter {index} ({name}) is not a list")))?;
    items
        .iter()
        .map(|item| {
            parser(item).ok_or_else(|| {
                decode_error(event, format!("element of {name} has unexpected shape: {item}"))
            })
        })
        .collect()
}

// =============================================================================
// Account / identity parsing
// =============================================================================

/// Parse an account ID from various JSON representations.
///
/// Handles multiple formats that may be returned by Substrate nodes:
/// - Hex string: `"0x1234..."`
/// - Wrapped object: `{ "Id": "0x..." }`
/// - Array wrapper: `["0x..."]`
/// - Byte array: `[b0, b1, ..., b31]`
pub fn parse_account(value: &Value) -> Option<AccountId> {
    match value {
        Value::Object(obj) => obj
            .get("Id")
            .or_else(|| obj.get("id"))
            .and_then(parse_account),
        Value::Array(arr) if arr.len() == 1 => parse_account(&arr[0]),
        other => parse_hash256(other).map(AccountId),
    }
}

/// Account as a `0x` hex string, the form stored in entities.
pub fn parse_account_hex(value: &Value) -> Option<String> {
    parse_account(value).map(|a| a.to_hex())
}

/// Parse an identity (DID) into its `0x` hex form.
pub fn parse_did(value: &Value) -> Option<String> {
    match value {
        Value::Object(obj) => obj.get("did").and_then(parse_did),
        other => parse_hash256(other).map(|b| format!("0x{}", hex::encode(b))),
    }
}

// =============================================================================
// Numeric parsing
// =============================================================================

/// Parse an amount (u128) from JSON.
///
/// Handles both numeric and string representations, which is important
/// because JSON numbers are limited to u64 but Substrate amounts can be u128.
pub fn parse_amount(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Parse a u64 from JSON.
pub fn parse_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Parse a u32 from JSON.
pub fn parse_u32(value: &Value) -> Option<u32> {
    parse_u64(value).and_then(|v| v.try_into().ok())
}

pub fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// =============================================================================
// Hash/bytes parsing
// =============================================================================

/// Parse a 32-byte hash from JSON.
///
/// Handles:
/// - Hex string: `"0x1234..."`
/// - Byte array: `[b0, b1, ..., b31]`
pub fn parse_hash256(value: &Value) -> Option<[u8; 32]> {
    parse_bytes(value)?.try_into().ok()
}

/// Parse arbitrary bytes from JSON.
///
/// Handles:
/// - Hex string: `"0x1234..."` (prefix optional)
/// - Byte array: `[b0, b1, ...]`
pub fn parse_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => {
            let hex_str = s.strip_prefix("0x").unwrap_or(s);
            hex::decode(hex_str).ok()
        }
        Value::Array(arr) => arr
            .iter()
            .map(|v| parse_u64(v).and_then(|b| u8::try_from(b).ok()))
            .collect(),
        _ => None,
    }
}

/// Bytes as a `0x` hex string.
pub fn parse_hex(value: &Value) -> Option<String> {
    parse_bytes(value).map(|b| format!("0x{}", hex::encode(b)))
}

/// Parse human-readable text.
///
/// `0x` strings and byte arrays are decoded as UTF-8 (lossy); other strings
/// are taken verbatim. Trailing NUL padding is stripped.
pub fn parse_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) if s.starts_with("0x") => match hex::decode(&s[2..]) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => s.clone(),
        },
        Value::String(s) => s.clone(),
        Value::Array(_) => String::from_utf8_lossy(&parse_bytes(value)?).into_owned(),
        _ => return None,
    };
    Some(text.trim_end_matches('\0').to_string())
}

/// Parse a legacy ticker (12 bytes, NUL padded). Empty tickers are rejected.
pub fn parse_ticker(value: &Value) -> Option<String> {
    parse_text(value).filter(|t| !t.is_empty() && t.len() <= 12)
}

// =============================================================================
// Enums and composites
// =============================================================================

/// Split an enum value into `(variant, inner)`.
///
/// Accepts `"Variant"` (unit), `{"Variant": inner}` and `{"Variant": []}`.
/// Unit variants yield a `null` inner value.
pub fn parse_variant(value: &Value) -> Option<(&str, &Value)> {
    match value {
        Value::String(s) => Some((s.as_str(), &NULL)),
        Value::Object(obj) if obj.len() == 1 => {
            let (name, inner) = obj.iter().next()?;
            match inner {
                Value::Array(a) if a.is_empty() => Some((name.as_str(), &NULL)),
                _ => Some((name.as_str(), inner)),
            }
        }
        _ => None,
    }
}

/// Variant name only.
pub fn parse_variant_name(value: &Value) -> Option<String> {
    parse_variant(value).map(|(name, _)| name.to_string())
}

/// A portfolio reference: owner identity and portfolio number
/// (`0` is the default portfolio).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortfolioRef {
    pub did: String,
    pub number: u64,
}

impl PortfolioRef {
    /// Entity id `did/number`.
    pub fn id(&self) -> String {
        compose_id(&[self.did.clone(), self.number.to_string()])
    }

    pub fn is_default(&self) -> bool {
        self.number == 0
    }
}

/// Parse `{"did": .., "kind": "Default" | {"User": n}}`.
pub fn parse_portfolio(value: &Value) -> Option<PortfolioRef> {
    let did = parse_did(value.get("did")?)?;
    let number = match parse_variant(value.get("kind")?)? {
        ("Default", _) => 0,
        ("User", inner) => parse_u64(inner)?,
        _ => return None,
    };
    Some(PortfolioRef { did, number })
}

/// Look up a named field, falling back to a position in an unnamed tuple.
pub fn field<'a>(value: &'a Value, name: &str, index: usize) -> Option<&'a Value> {
    value.get(name).or_else(|| value.get(index))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(params: Vec<Value>) -> RawEvent {
        RawEvent {
            index: 3,
            extrinsic_index: None,
            module: "Asset".into(),
            method: "Issued".into(),
            params,
        }
    }

    // -------------------------------------------------------------------------
    // Account parsing tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_account_hex_string() {
        let hex = "0x".to_string() + &"ab".repeat(32);
        let result = parse_account(&json!(hex));
        assert_eq!(result.unwrap().0, [0xab; 32]);
    }

    #[test]
    fn test_parse_account_wrapped_id() {
        let hex = "0x".to_string() + &"ef".repeat(32);
        assert_eq!(parse_account(&json!({"Id": hex})).unwrap().0, [0xef; 32]);
        assert_eq!(parse_account(&json!([hex])).unwrap().0, [0xef; 32]);
    }

    #[test]
    fn test_parse_account_byte_array() {
        let bytes: Vec<u8> = (0..32).collect();
        let result = parse_account(&json!(bytes));
        let expected: [u8; 32] = (0..32).collect::<Vec<u8>>().try_into().unwrap();
        assert_eq!(result.unwrap().0, expected);
    }

    #[test]
    fn test_parse_account_rejects_invalid_length() {
        let short_hex = "0x".to_string() + &"ab".repeat(16);
        assert!(parse_account(&json!(short_hex)).is_none());
        assert!(parse_account(&json!("not_valid_hex")).is_none());
    }

    #[test]
    fn test_parse_did_hex() {
        let did = "0x".to_string() + &"01".repeat(32);
        assert_eq!(parse_did(&json!(did)).as_deref(), Some(did.as_str()));
        assert_eq!(parse_did(&json!({"did": did})).as_deref(), Some(did.as_str()));
    }

    // -------------------------------------------------------------------------
    // Numeric parsing tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_amount_string() {
        assert_eq!(parse_amount(&json!(12345)), Some(12345));
        let large = "340282366920938463463374607431768211455"; // u128::MAX
        assert_eq!(parse_amount(&json!(large)), Some(u128::MAX));
    }

    #[test]
    fn test_parse_u32() {
        assert_eq!(parse_u32(&json!("67890")), Some(67890));
        // Should fail for values > u32::MAX
        assert!(parse_u32(&json!(u64::MAX)).is_none());
    }

    // -------------------------------------------------------------------------
    // Text and variant parsing tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_ticker_strips_padding() {
        assert_eq!(parse_ticker(&json!("0x41434d4500000000000000000")).as_deref(), None);
        assert_eq!(parse_ticker(&json!("0x41434d450000000000000000")).as_deref(), Some("ACME"));
        assert_eq!(parse_ticker(&json!("ACME")).as_deref(), Some("ACME"));
        assert_eq!(parse_ticker(&json!([65, 66, 0, 0])).as_deref(), Some("AB"));
        assert!(parse_ticker(&json!("0x000000000000000000000000")).is_none());
    }

    #[test]
    fn test_parse_variant_shapes() {
        assert_eq!(parse_variant(&json!("Default")), Some(("Default", &Value::Null)));
        assert_eq!(parse_variant(&json!({"Default": []})), Some(("Default", &Value::Null)));
        assert_eq!(parse_variant(&json!({"User": "3"})), Some(("User", &json!("3"))));
        assert!(parse_variant(&json!({"a": 1, "b": 2})).is_none());
    }

    #[test]
    fn test_parse_portfolio() {
        let did = "0x".to_string() + &"02".repeat(32);
        let default = parse_portfolio(&json!({"did": did, "kind": "Default"})).unwrap();
        assert!(default.is_default());
        assert_eq!(default.id(), format!("{did}/0"));

        let user = parse_portfolio(&json!({"did": did, "kind": {"User": 7}})).unwrap();
        assert_eq!(user.number, 7);
        assert!(parse_portfolio(&json!({"did": did, "kind": {"Other": 1}})).is_none());
    }

    // -------------------------------------------------------------------------
    // Positional extraction tests
    // -------------------------------------------------------------------------

    // Test critique: une forme inattendue est une erreur de décodage, pas un skip
    #[test]
    fn test_param_shape_error_is_decoding_error() {
        let ev = event(vec![json!("not a number")]);
        let err = param(&ev, 0, "amount", parse_amount).unwrap_err();
        assert!(matches!(err, DomainError::Decoding { ref event, .. } if event == "Asset.Issued"));

        let err = param(&ev, 4, "amount", parse_amount).unwrap_err();
        assert!(err.to_string().contains("missing parameter 4"));
    }

    #[test]
    fn test_opt_param_null_and_missing() {
        let ev = event(vec![json!(null), json!("12")]);
        assert_eq!(opt_param(&ev, 0, "a", parse_u64).unwrap(), None);
        assert_eq!(opt_param(&ev, 1, "b", parse_u64).unwrap(), Some(12));
        assert_eq!(opt_param(&ev, 5, "c", parse_u64).unwrap(), None);
        assert!(opt_param(&ev, 1, "b", parse_bool).is_err());
    }

    #[test]
    fn test_list_param() {
        let ev = event(vec![json!(["1", 2]), json!("x")]);
        assert_eq!(list_param(&ev, 0, "ids", parse_u64).unwrap(), vec![1, 2]);
        assert!(list_param(&ev, 1, "ids", parse_u64).is_err());
    }
}
