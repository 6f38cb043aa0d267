//! `#[serde(with = "xln_codec::bytes_hex")]` adapter for owned byte strings.
//!
//! Emits the tagged form `{"__xlnType": "bytes", "value": "0x…"}` rather than
//! serde's default number array, keeping wire frames compact and readable.

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serializer};

use crate::tagged::{TAG_BYTES, TAG_KEY};

pub fn serialize<S: Serializer>(v: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(2))?;
    map.serialize_entry(TAG_KEY, TAG_BYTES)?;
    map.serialize_entry("value", &format!("0x{}", hex::encode(v)))?;
    map.end()
}

#[derive(Deserialize)]
struct Tagged {
    #[serde(rename = "__xlnType")]
    tag: String,
    value: String,
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let tagged = Tagged::deserialize(deserializer)?;
    if tagged.tag != TAG_BYTES {
        return Err(D::Error::custom(format!("expected bytes tag, got {}", tagged.tag)));
    }
    let stripped = tagged.value.strip_prefix("0x").unwrap_or(&tagged.value);
    hex::decode(stripped).map_err(D::Error::custom)
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Holder {
        #[serde(with = "crate::bytes_hex")]
        payload: Vec<u8>,
    }

    #[test]
    fn round_trips_tagged_hex() {
        let h = Holder { payload: vec![0xde, 0xad, 0xbe, 0xef] };
        let v = serde_json::to_value(&h).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"payload": {"__xlnType": "bytes", "value": "0xdeadbeef"}})
        );
        let back: Holder = serde_json::from_value(v).unwrap();
        assert_eq!(back, h);
    }
}
