use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Discriminator key of a tagged JSON object.
pub const TAG_KEY: &str = "__xlnType";

/// Tag for 256-bit integers (value: decimal string, `-` prefix when negative).
pub const TAG_BIGINT: &str = "bigint";

/// Tag for byte strings (value: `0x`-prefixed lowercase hex).
pub const TAG_BYTES: &str = "bytes";

/// Placeholder the decoder tolerates where an encoder elided a cycle.
pub const CIRCULAR_MARKER: &str = "[Circular]";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed tagged value: expected {expected}, got {got}")]
    BadTag { expected: &'static str, got: String },
}

/// Encode any serializable value into its tagged JSON form.
///
/// The tagging itself is carried by the serde impls of the wrapped types
/// (see [`crate::bigint`], [`crate::sigint`], [`crate::bytes_hex`]); this is
/// the single entry point so call sites never touch `serde_json` directly.
pub fn encode_tagged<T: Serialize>(value: &T) -> Result<Value, CodecError> {
    Ok(serde_json::to_value(value)?)
}

/// Decode a tagged JSON value back into `T`. Type-driven: the target type
/// decides which tags it expects.
pub fn decode_tagged<T: DeserializeOwned>(value: Value) -> Result<T, CodecError> {
    Ok(serde_json::from_value(value)?)
}

/// True if `value` is the cycle placeholder a foreign encoder may emit.
pub fn is_circular_marker(value: &Value) -> bool {
    matches!(value, Value::String(s) if s == CIRCULAR_MARKER)
}
