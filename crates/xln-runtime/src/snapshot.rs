use serde_json::Value;

use xln_core::XlnError;

use crate::env::Env;

/// Encode the whole environment as a tagged-JSON snapshot value.
/// Round-trips bit-for-bit through [`decode_snapshot`].
pub fn encode_snapshot(env: &Env) -> Result<Value, XlnError> {
    xln_codec::encode_tagged(env).map_err(|e| XlnError::Codec(e.to_string()))
}

/// Canonical string form of a snapshot: what the persistence layer stores
/// under `snapshot:<height>`.
pub fn snapshot_string(env: &Env) -> Result<String, XlnError> {
    Ok(xln_codec::canonical_string(&encode_snapshot(env)?))
}

pub fn decode_snapshot(value: Value) -> Result<Env, XlnError> {
    xln_codec::decode_tagged(value).map_err(|e| XlnError::Codec(e.to_string()))
}

pub fn decode_snapshot_str(raw: &str) -> Result<Env, XlnError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| XlnError::Codec(e.to_string()))?;
    decode_snapshot(value)
}

/// Content checksum of a snapshot (non-consensus; storage integrity only).
pub fn snapshot_checksum(raw: &str) -> [u8; 32] {
    xln_crypto::blake3_id(raw.as_bytes())
}
