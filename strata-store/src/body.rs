//! The document body codec.
//!
//! Bodies are JSON objects. Replicated inputs are parsed untrusted and
//! validated; bodies re-read from our own storage are trusted and fail only
//! on outright corruption.

use bytes::Bytes;
use serde_json::{Map, Value};
use strata_model::Error;

use crate::{Result, StoreError};

/// A decoded document body.
pub type Dict = Map<String, Value>;

/// Check that `body` is a well-formed JSON object.
pub fn validate_body(body: &[u8]) -> Result<()> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(_)) => Ok(()),
        _ => Err(StoreError::InvalidBody),
    }
}

/// The canonical encoding of an empty body.
pub fn empty_dict() -> Bytes {
    Bytes::from_static(b"{}")
}

/// Decode a body into a dict. `trusted` bodies come from our own storage:
/// a parse failure there is data corruption, not caller error.
pub fn parse_dict(body: &[u8], trusted: bool) -> Result<Dict> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(dict)) => Ok(dict),
        _ if trusted => Err(StoreError::Model(Error::CorruptRevisionData)),
        _ => Err(StoreError::InvalidBody),
    }
}

/// Encode a dict back to body bytes.
pub fn encode_dict(dict: &Dict) -> Vec<u8> {
    serde_json::to_vec(dict).expect("JSON maps always serialize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(validate_body(b"{\"a\": [1, 2]}").is_ok());
        assert!(validate_body(b"{}").is_ok());
        assert!(validate_body(b"[1]").is_err()); // not an object
        assert!(validate_body(b"{").is_err());
        assert!(validate_body(b"").is_err());
    }

    #[test]
    fn test_parse_round_trip() {
        let dict = parse_dict(b"{\"x\":1}", false).unwrap();
        assert_eq!(dict.get("x"), Some(&Value::from(1)));
        let encoded = encode_dict(&dict);
        assert_eq!(parse_dict(&encoded, true).unwrap(), dict);
    }

    #[test]
    fn test_trusted_failure_is_corruption() {
        assert!(matches!(
            parse_dict(b"garbage", true),
            Err(StoreError::Model(Error::CorruptRevisionData))
        ));
        assert!(matches!(parse_dict(b"garbage", false), Err(StoreError::InvalidBody)));
    }

    #[test]
    fn test_empty_dict_is_valid() {
        assert!(validate_body(&empty_dict()).is_ok());
    }
}
