use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use pqcrypto_kyber::kyber768;
use pqcrypto_traits::kem::{Ciphertext, PublicKey, SecretKey, SharedSecret};
use thiserror::Error;

use xln_core::constants::MAX_HOPS;
use xln_core::{EntityId, KyberPublicKey, OnionEnvelope, OnionPayload, Secret, XlnError};

use crate::keypair::EncryptionKeyPair;

/// ChaCha20-Poly1305 nonce for sealed layers. The KEM mints a fresh key per
/// layer, so a fixed nonce is never reused under the same key.
const LAYER_NONCE: [u8; 12] = [0u8; 12];

#[derive(Debug, Error)]
pub enum OnionError {
    #[error("malformed encryption key or ciphertext")]
    Kem,
    #[error("layer decryption failed")]
    Cipher,
    #[error("layer payload did not decode: {0}")]
    Codec(String),
    #[error("cleartext envelope refused by configuration")]
    CleartextRefused,
    #[error("empty route tail")]
    EmptyRoute,
}

/// Shape-check a route before building an onion: 2..=MAX_HOPS entries, no
/// duplicates, except the self-pay case `route[0] == route[n-1]`, which is
/// allowed as long as the intermediates are unique.
pub fn validate_route(route: &[EntityId]) -> Result<(), XlnError> {
    if route.len() < 2 {
        return Err(XlnError::InvalidRoute { detail: format!("{} hops", route.len()) });
    }
    if route.len() > MAX_HOPS {
        return Err(XlnError::MaxHopsExceeded { hops: route.len(), max: MAX_HOPS });
    }
    let self_pay = route[0] == route[route.len() - 1];
    let body = if self_pay { &route[1..] } else { route };
    let mut seen = std::collections::BTreeSet::new();
    for hop in body {
        if !seen.insert(hop) {
            return Err(XlnError::InvalidRoute { detail: format!("duplicate hop {hop}") });
        }
    }
    Ok(())
}

/// Seal one layer toward `pk`: Kyber768 encapsulation keys a one-shot
/// ChaCha20-Poly1305 over the bincoded payload.
fn seal_layer(pk: &KyberPublicKey, payload: &OnionPayload) -> Result<OnionEnvelope, OnionError> {
    let kem_pk = kyber768::PublicKey::from_bytes(&pk.0).map_err(|_| OnionError::Kem)?;
    let (shared, kem_ct) = kyber768::encapsulate(&kem_pk);

    let plaintext = bincode::serialize(payload).map_err(|e| OnionError::Codec(e.to_string()))?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(shared.as_bytes()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&LAYER_NONCE), plaintext.as_slice())
        .map_err(|_| OnionError::Cipher)?;

    Ok(OnionEnvelope::Sealed {
        kem_ct: kem_ct.as_bytes().to_vec(),
        nonce: LAYER_NONCE.to_vec(),
        ciphertext,
    })
}

/// Build the full onion for the receiving chain `hops` (the route without
/// its first element, in forward order). Each entry pairs the hop with its
/// advertised encryption key; `None` produces a cleartext layer for local
/// setups.
///
/// The innermost layer carries `{final_recipient, secret}`; every outer
/// layer carries `{next_hop, inner_envelope}`.
pub fn build_onion(
    hops: &[(EntityId, Option<KyberPublicKey>)],
    secret: &Secret,
) -> Result<OnionEnvelope, OnionError> {
    let last = hops.last().ok_or(OnionError::EmptyRoute)?;

    let mut payload = OnionPayload {
        final_recipient: true,
        secret: Some(*secret),
        next_hop: None,
        inner_envelope: None,
    };
    let mut envelope = wrap(&last.1, &payload)?;

    for window in hops.windows(2).rev() {
        let (ref _hop, ref hop_pk) = window[0];
        let (next_entity, _) = window[1];
        payload = OnionPayload {
            final_recipient: false,
            secret: None,
            next_hop: Some(next_entity),
            inner_envelope: Some(Box::new(envelope)),
        };
        envelope = wrap(hop_pk, &payload)?;
    }

    Ok(envelope)
}

fn wrap(pk: &Option<KyberPublicKey>, payload: &OnionPayload) -> Result<OnionEnvelope, OnionError> {
    match pk {
        Some(pk) => seal_layer(pk, payload),
        None => Ok(OnionEnvelope::Cleartext { payload: payload.clone() }),
    }
}

/// Peel one layer with the hop's encryption secret key. Deterministic
/// (decapsulation only), so safe inside the tick.
///
/// `require_sealed` rejects cleartext envelopes outright; when they are
/// accepted the caller is expected to log the downgrade.
pub fn peel_envelope(
    keys: &EncryptionKeyPair,
    envelope: &OnionEnvelope,
    require_sealed: bool,
) -> Result<OnionPayload, OnionError> {
    match envelope {
        OnionEnvelope::Cleartext { payload } => {
            if require_sealed {
                Err(OnionError::CleartextRefused)
            } else {
                Ok(payload.clone())
            }
        }
        OnionEnvelope::Sealed { kem_ct, nonce, ciphertext } => {
            let sk = kyber768::SecretKey::from_bytes(keys.secret_key_bytes())
                .map_err(|_| OnionError::Kem)?;
            let ct = kyber768::Ciphertext::from_bytes(kem_ct).map_err(|_| OnionError::Kem)?;
            let shared = kyber768::decapsulate(&ct, &sk);

            let cipher = ChaCha20Poly1305::new(Key::from_slice(shared.as_bytes()));
            let plaintext = cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext.as_slice())
                .map_err(|_| OnionError::Cipher)?;
            bincode::deserialize(&plaintext).map_err(|e| OnionError::Codec(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hashlock_of;

    fn route_of(ns: &[u64]) -> Vec<EntityId> {
        ns.iter().map(|n| EntityId::from_number(*n)).collect()
    }

    #[test]
    fn route_validation() {
        assert!(validate_route(&route_of(&[1, 2, 3])).is_ok());
        assert!(validate_route(&route_of(&[1])).is_err());
        assert!(validate_route(&route_of(&[1, 2, 2, 3])).is_err());
        // Self-pay with unique intermediates is fine.
        assert!(validate_route(&route_of(&[1, 2, 3, 1])).is_ok());
        assert!(validate_route(&route_of(&[1, 2, 2, 1])).is_err());
        let too_long: Vec<u64> = (1..=21).collect();
        assert!(matches!(
            validate_route(&route_of(&too_long)),
            Err(XlnError::MaxHopsExceeded { .. })
        ));
    }

    #[test]
    fn onion_exposes_secret_only_to_final_hop() {
        let k1 = EncryptionKeyPair::generate();
        let k2 = EncryptionKeyPair::generate();
        let k3 = EncryptionKeyPair::generate();
        let h1 = EntityId::from_number(2);
        let h2 = EntityId::from_number(3);
        let dst = EntityId::from_number(4);
        let secret = Secret::from_bytes([9u8; 32]);
        let _lock = hashlock_of(&secret);

        let onion = build_onion(
            &[
                (h1, Some(k1.public_key.clone())),
                (h2, Some(k2.public_key.clone())),
                (dst, Some(k3.public_key.clone())),
            ],
            &secret,
        )
        .unwrap();

        // Hop 1 sees only the forwarding instruction.
        let p1 = peel_envelope(&k1, &onion, true).unwrap();
        assert!(!p1.final_recipient);
        assert_eq!(p1.next_hop, Some(h2));
        assert!(p1.secret.is_none());

        // Hop 1's key cannot open hop 2's layer.
        let inner = *p1.inner_envelope.unwrap();
        assert!(peel_envelope(&k1, &inner, true).is_err());

        let p2 = peel_envelope(&k2, &inner, true).unwrap();
        assert_eq!(p2.next_hop, Some(dst));

        let p3 = peel_envelope(&k3, &p2.inner_envelope.unwrap(), true).unwrap();
        assert!(p3.final_recipient);
        assert_eq!(p3.secret, Some(secret));
    }

    #[test]
    fn cleartext_refused_when_required() {
        let keys = EncryptionKeyPair::generate();
        let dst = EntityId::from_number(2);
        let secret = Secret::from_bytes([1u8; 32]);
        let onion = build_onion(&[(dst, None)], &secret).unwrap();
        assert!(matches!(
            peel_envelope(&keys, &onion, true),
            Err(OnionError::CleartextRefused)
        ));
        let payload = peel_envelope(&keys, &onion, false).unwrap();
        assert_eq!(payload.secret, Some(secret));
    }
}
