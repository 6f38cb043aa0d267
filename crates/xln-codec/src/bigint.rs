//! `#[serde(with = "xln_codec::bigint")]` adapter for unsigned 256-bit values.

use ethnum::U256;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serializer};

use crate::tagged::{TAG_BIGINT, TAG_KEY};

pub fn serialize<S: Serializer>(v: &U256, serializer: S) -> Result<S::Ok, S::Error> {
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

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
    let tagged = Tagged::deserialize(deserializer)?;
    if tagged.tag != TAG_BIGINT {
        return Err(D::Error::custom(format!("expected bigint tag, got {}", tagged.tag)));
    }
    tagged.value.parse::<U256>().map_err(D::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Holder {
        #[serde(with = "crate::bigint")]
        amount: U256,
    }

    #[test]
    fn round_trips_tagged_form() {
        let h = Holder { amount: U256::from(10u128.pow(18)) };
        let v = serde_json::to_value(&h).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"amount": {"__xlnType": "bigint", "value": "1000000000000000000"}})
        );
        let back: Holder = serde_json::from_value(v).unwrap();
        assert_eq!(back, h);
    }
}
