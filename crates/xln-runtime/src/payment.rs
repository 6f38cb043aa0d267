use std::collections::BTreeMap;

use ethnum::I256;

use xln_core::{EntityId, EntityTx, KyberPublicKey, Secret, TokenId, XlnError};
use xln_crypto::{build_onion, hashlock_of, validate_route};

/// Build a multi-hop HTLC payment tx for `route` (sender first, recipient
/// last). The onion is sealed here, at the input-construction boundary and
/// never inside the tick, against each receiving hop's advertised
/// encryption key; hops missing from `encryption_keys` get cleartext
/// layers (local setups only).
pub fn build_htlc_payment(
    route: &[EntityId],
    token_id: TokenId,
    amount: I256,
    secret: &Secret,
    encryption_keys: &BTreeMap<EntityId, KyberPublicKey>,
) -> Result<EntityTx, XlnError> {
    validate_route(route)?;
    let hops: Vec<(EntityId, Option<KyberPublicKey>)> = route[1..]
        .iter()
        .map(|hop| (*hop, encryption_keys.get(hop).cloned()))
        .collect();
    let envelope = build_onion(&hops, secret)
        .map_err(|e| XlnError::InvalidRoute { detail: e.to_string() })?;

    Ok(EntityTx::HtlcPayment {
        first_hop: route[1],
        token_id,
        amount,
        hashlock: hashlock_of(secret),
        num_hops: route.len(),
        envelope,
    })
}
