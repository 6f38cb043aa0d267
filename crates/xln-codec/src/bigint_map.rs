//! `#[serde(with = "xln_codec::bigint_map")]` adapter for maps whose values
//! are unsigned 256-bit amounts (`BTreeMap<K, U256>`). Keys serialize through
//! their own serde impls; values take the tagged bigint form.

use std::collections::BTreeMap;

use ethnum::U256;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::tagged::{TAG_BIGINT, TAG_KEY};

struct Wrap<'a>(&'a U256);

impl Serialize for Wrap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(TAG_KEY, TAG_BIGINT)?;
        map.serialize_entry("value", &self.0.to_string())?;
        map.end()
    }
}

pub fn serialize<K, S>(map: &BTreeMap<K, U256>, serializer: S) -> Result<S::Ok, S::Error>
where
    K: Serialize + Ord,
    S: Serializer,
{
    let mut out = serializer.serialize_map(Some(map.len()))?;
    for (key, value) in map {
        out.serialize_entry(key, &Wrap(value))?;
    }
    out.end()
}

#[derive(Deserialize)]
struct Tagged {
    #[serde(rename = "__xlnType")]
    tag: String,
    value: String,
}

pub fn deserialize<'de, K, D>(deserializer: D) -> Result<BTreeMap<K, U256>, D::Error>
where
    K: Deserialize<'de> + Ord,
    D: Deserializer<'de>,
{
    let raw: BTreeMap<K, Tagged> = BTreeMap::deserialize(deserializer)?;
    let mut out = BTreeMap::new();
    for (key, tagged) in raw {
        if tagged.tag != TAG_BIGINT {
            return Err(D::Error::custom(format!("expected bigint tag, got {}", tagged.tag)));
        }
        let value = tagged.value.parse::<U256>().map_err(D::Error::custom)?;
        out.insert(key, value);
    }
    Ok(out)
}
