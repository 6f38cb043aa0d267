//! `#[serde(with = "xln_codec::sigint")]` adapter for signed 256-bit values.

use ethnum::I256;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serializer};

use crate::tagged::{TAG_BIGINT, TAG_KEY};

pub fn serialize<S: Serializer>(v: &I256, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(2))?;
    map.serialize_entry(TAG_KEY, TAG_BIGINT)?;
    map.serialize_entry("value", &v.to_string())?;
    map.end()
}

#[derive(Deserialize)]
struct Tagged {
    #[serde(rename = "__xlnType")]
    tag: String,
    value: String,
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<I256, D::Error> {
    let tagged = Tagged::deserialize(deserializer)?;
    if tagged.tag != TAG_BIGINT {
        return Err(D::Error::custom(format!("expected bigint tag, got {}", tagged.tag)));
    }
    tagged.value.parse::<I256>().map_err(D::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Holder {
        #[serde(with = "crate::sigint")]
        delta: I256,
    }

    #[test]
    fn negative_round_trip() {
        let h = Holder { delta: I256::from(-50_000i64) };
        let v = serde_json::to_value(&h).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"delta": {"__xlnType": "bigint", "value": "-50000"}})
        );
        let back: Holder = serde_json::from_value(v).unwrap();
        assert_eq!(back, h);
    }
}
