//! Deterministic tagged-JSON codec.
//!
//! Every consensus-visible hash in the system is keccak-256 over the
//! canonical string form of a JSON value: object keys sorted recursively,
//! no insignificant whitespace. Values that JSON cannot represent natively
//! are wrapped in a tagged object `{"__xlnType": <tag>, "value": <natural>}`:
//!
//!   bigint — 256-bit integers, decimal string, leading `-` when negative
//!   bytes  — owned byte strings, `0x`-prefixed lowercase hex
//!
//! Maps keyed by strings or integers encode as plain JSON objects (serde_json
//! stringifies integer keys), so no map tag is needed. The encoder cannot
//! produce reference cycles (state is arena-keyed by id), but the decoder
//! tolerates the literal string `"[Circular]"` wherever a value is expected.

pub mod canonical;
pub mod tagged;

pub use canonical::{canonical_string, keccak_bytes, keccak_value};
pub use tagged::{decode_tagged, encode_tagged, is_circular_marker, CodecError, CIRCULAR_MARKER, TAG_KEY};

/// Serde adapters for 256-bit integers and byte strings in tagged form.
pub mod bigint;
pub mod bigint_map;
pub mod bytes_hex;
pub mod sigint;
pub mod sigint_vec;
