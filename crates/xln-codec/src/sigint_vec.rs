//! `#[serde(with = "xln_codec::sigint_vec")]` adapter for `Vec<I256>`.

use ethnum::I256;
use serde::de::Error as _;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::tagged::{TAG_BIGINT, TAG_KEY};

struct Wrap<'a>(&'a I256);

impl Serialize for Wrap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(TAG_KEY, TAG_BIGINT)?;
        map.serialize_entry("value", &self.0.to_string())?;
        map.end()
    }
}

pub fn serialize<S: Serializer>(values: &[I256], serializer: S) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(values.len()))?;
    for v in values {
        seq.serialize_element(&Wrap(v))?;
    }
    seq.end()
}

#[derive(Deserialize)]
struct Tagged {
    #[serde(rename = "__xlnType")]
    tag: String,
    value: String,
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<I256>, D::Error> {
    let raw: Vec<Tagged> = Vec::deserialize(deserializer)?;
    raw.into_iter()
        .map(|t| {
            if t.tag != TAG_BIGINT {
                return Err(D::Error::custom(format!("expected bigint tag, got {}", t.tag)));
            }
            t.value.parse::<I256>().map_err(D::Error::custom)
        })
        .collect()
}
