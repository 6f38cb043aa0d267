use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::XlnError;

/// Unix timestamp in milliseconds (caller-injected; never wall clock).
pub type Timestamp = u64;

/// Jurisdiction block height.
pub type JHeight = u64;

/// Token identifier inside a jurisdiction (small registry index).
pub type TokenId = u32;

/// A signer handle inside an entity quorum (e.g. `"s1"`, `"alice"`).
/// Signers are resolved to keys through the runtime signer directory.
pub type SignerId = String;

// ── EntityId ─────────────────────────────────────────────────────────────────

/// 32-byte entity identifier.
///
/// Three flavors share the space: *numbered* (small integer, big-endian in
/// the low 8 bytes), *lazy* (keccak of the canonical quorum board encoding),
/// and *named* (keccak of a registered name). Lexicographic order on the
/// canonical bytes defines the left/right convention for bilateral accounts:
/// the smaller ID is always `left`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub [u8; 32]);

impl EntityId {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    /// Numbered entity: the integer big-endian in the low 8 bytes.
    pub fn from_number(n: u64) -> Self {
        let mut b = [0u8; 32];
        b[24..32].copy_from_slice(&n.to_be_bytes());
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Canonical form: `0x` + 64 lowercase hex digits.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Numbered flavor if the top 24 bytes are zero and the value is nonzero.
    pub fn as_number(&self) -> Option<u64> {
        if self.0[..24].iter().all(|b| *b == 0) {
            let n = u64::from_be_bytes(self.0[24..32].try_into().expect("8 bytes"));
            if n > 0 {
                return Some(n);
            }
        }
        None
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// True if `self` takes the left seat against `other`.
    pub fn is_left_of(&self, other: &EntityId) -> bool {
        self < other
    }
}

/// Universal entity reference parser.
///
/// Accepts `0x…` (up to 64 hex digits, left-padded), `#N` or bare `N`
/// (numbered), `@name` (named: keccak of the UTF-8 name), and
/// `provider:ref` where `ref` is any of the former; the provider label is
/// returned alongside.
pub fn parse_entity_ref(input: &str) -> Result<(EntityId, Option<String>), XlnError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(XlnError::InvalidEntityId { input: input.to_string() });
    }

    // provider:entityId. Split on the first ':' unless it is a 0x literal.
    if !trimmed.starts_with("0x") {
        if let Some((provider, rest)) = trimmed.split_once(':') {
            let (id, _) = parse_entity_ref(rest)?;
            return Ok((id, Some(provider.to_string())));
        }
    }

    if let Some(hex_part) = trimmed.strip_prefix("0x") {
        if hex_part.is_empty() || hex_part.len() > 64 || hex_part.len() % 2 != 0 {
            return Err(XlnError::InvalidEntityId { input: input.to_string() });
        }
        let raw = hex::decode(hex_part.to_lowercase())
            .map_err(|_| XlnError::InvalidEntityId { input: input.to_string() })?;
        let mut b = [0u8; 32];
        b[32 - raw.len()..].copy_from_slice(&raw);
        return Ok((EntityId(b), None));
    }

    if let Some(name) = trimmed.strip_prefix('@') {
        if name.is_empty() {
            return Err(XlnError::InvalidEntityId { input: input.to_string() });
        }
        return Ok((EntityId(xln_codec::keccak_bytes(name.as_bytes())), None));
    }

    let numbered = trimmed.strip_prefix('#').unwrap_or(trimmed);
    let n: u64 = numbered
        .parse()
        .map_err(|_| XlnError::InvalidEntityId { input: input.to_string() })?;
    if n == 0 {
        return Err(XlnError::InvalidEntityId { input: input.to_string() });
    }
    Ok((EntityId::from_number(n), None))
}

impl FromStr for EntityId {
    type Err = XlnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_entity_ref(s).map(|(id, _)| id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_number() {
            Some(n) => write!(f, "#{n}"),
            None => write!(f, "{}", self.to_hex()),
        }
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_number() {
            Some(n) => write!(f, "EntityId(#{n})"),
            None => write!(f, "EntityId({}…)", &self.to_hex()[..10]),
        }
    }
}

// Canonical hex string on the wire so EntityId can key JSON maps.
impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_entity_ref(&s).map(|(id, _)| id).map_err(D::Error::custom)
    }
}

// ── Hash32 ───────────────────────────────────────────────────────────────────

/// 32-byte keccak-256 digest (frame hashes, proof body hashes, hashlocks).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, XlnError> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(stripped).map_err(|_| XlnError::InvalidHash { input: s.to_string() })?;
        let b: [u8; 32] = raw
            .try_into()
            .map_err(|_| XlnError::InvalidHash { input: s.to_string() })?;
        Ok(Self(b))
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({}…)", &self.to_hex()[..10])
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash32::from_hex(&s).map_err(D::Error::custom)
    }
}

/// HTLC lock identifier (keccak of the creating tuple).
pub type LockId = Hash32;

/// Governance proposal identifier.
pub type ProposalId = Hash32;

/// Swap offer identifier.
pub type OfferId = Hash32;

// ── Signing key material ─────────────────────────────────────────────────────

/// Dilithium2 public key (1312 bytes per NIST FIPS 204).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DilithiumPublicKey(#[serde(with = "xln_codec::bytes_hex")] pub Vec<u8>);

impl fmt::Debug for DilithiumPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DilithiumPublicKey({}b)", self.0.len())
    }
}

/// Dilithium2 detached signature (2420 bytes per NIST FIPS 204).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DilithiumSignature(#[serde(with = "xln_codec::bytes_hex")] pub Vec<u8>);

impl fmt::Debug for DilithiumSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DilithiumSignature({}b)", self.0.len())
    }
}

/// Kyber768 encapsulation public key advertised in gossip profiles;
/// onion layers for an entity are sealed against this key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KyberPublicKey(#[serde(with = "xln_codec::bytes_hex")] pub Vec<u8>);

impl fmt::Debug for KyberPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KyberPublicKey({}b)", self.0.len())
    }
}

// ── Canonical account key ────────────────────────────────────────────────────

/// Orders two entities into the canonical `(left, right)` pair.
pub fn canonical_pair(a: EntityId, b: EntityId) -> (EntityId, EntityId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Channel key: `left || right`, the 64-byte bilateral account identifier
/// used in proof headers.
pub fn channel_key(left: &EntityId, right: &EntityId) -> Vec<u8> {
    let mut key = Vec::with_capacity(64);
    key.extend_from_slice(left.as_bytes());
    key.extend_from_slice(right.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_reference_forms() {
        let (n1, _) = parse_entity_ref("#7").unwrap();
        let (n2, _) = parse_entity_ref("7").unwrap();
        assert_eq!(n1, n2);
        assert_eq!(n1.as_number(), Some(7));

        let (h, _) = parse_entity_ref("0x0000000000000000000000000000000000000000000000000000000000000007")
            .unwrap();
        assert_eq!(h, n1);

        // Short hex is left-padded.
        let (short, _) = parse_entity_ref("0x07").unwrap();
        assert_eq!(short, n1);

        let (named, _) = parse_entity_ref("@hub-alpha").unwrap();
        assert!(named.as_number().is_none());

        let (prov, provider) = parse_entity_ref("ethereum:#7").unwrap();
        assert_eq!(prov, n1);
        assert_eq!(provider.as_deref(), Some("ethereum"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_entity_ref("").is_err());
        assert!(parse_entity_ref("#0").is_err());
        assert!(parse_entity_ref("@").is_err());
        assert!(parse_entity_ref("0xzz").is_err());
        assert!(parse_entity_ref(&format!("0x{}", "ab".repeat(33))).is_err());
    }

    #[test]
    fn numbered_order_matches_numeric_order() {
        let a = EntityId::from_number(3);
        let b = EntityId::from_number(4);
        assert!(a.is_left_of(&b));
        assert_eq!(canonical_pair(b, a), (a, b));
    }

    #[test]
    fn serializes_as_canonical_hex() {
        let id = EntityId::from_number(255);
        let v = serde_json::to_value(id).unwrap();
        assert_eq!(
            v,
            serde_json::json!("0x00000000000000000000000000000000000000000000000000000000000000ff")
        );
        let back: EntityId = serde_json::from_value(v).unwrap();
        assert_eq!(back, id);
    }
}
