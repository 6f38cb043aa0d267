use xln_core::constants::MESSAGE_RING_CAPACITY;

use crate::env::Env;

/// Cross-cutting invariant sweep over a whole environment. Returns
/// human-readable violations; an empty vector means the env is sound.
///
/// Checked: canonical account ordering, hold/limit non-negativity, message
/// log bounds, and bilateral agreement between co-located account ends
/// that are not mid-handshake.
pub fn validate_env(env: &Env) -> Vec<String> {
    let mut violations = Vec::new();

    for (key, replica) in &env.replicas {
        let state = &replica.state;
        if state.messages.len() > MESSAGE_RING_CAPACITY {
            violations.push(format!("{key}: message log over capacity ({})", state.messages.len()));
        }

        for (peer, machine) in &state.accounts {
            if machine.left_entity >= machine.right_entity {
                violations.push(format!(
                    "{key}: account {peer} breaks canonical ordering ({} >= {})",
                    machine.left_entity, machine.right_entity
                ));
            }
            if machine.peer() != *peer {
                violations.push(format!(
                    "{key}: account keyed by {peer} but machine peers {}",
                    machine.peer()
                ));
            }
            if machine.owner() != state.entity_id {
                violations.push(format!("{key}: account {peer} owned by the wrong entity"));
            }
            for delta in machine.deltas.values() {
                if let Err(err) = delta.validate() {
                    violations.push(format!("{key}: account {peer}: {err}"));
                }
            }
        }
    }

    // Bilateral agreement: both ends of a co-located account hold
    // byte-identical canonical state once neither side has a frame in
    // flight.
    let entities = env.local_entities();
    for a in &entities {
        for b in &entities {
            if a >= b {
                continue;
            }
            let machine_a = env
                .replicas
                .values()
                .find(|r| r.entity_id == *a)
                .and_then(|r| r.state.accounts.get(b));
            let machine_b = env
                .replicas
                .values()
                .find(|r| r.entity_id == *b)
                .and_then(|r| r.state.accounts.get(a));
            let (Some(ma), Some(mb)) = (machine_a, machine_b) else { continue };
            if ma.pending_frame.is_some() || mb.pending_frame.is_some() {
                continue;
            }
            if ma.current_frame.height != mb.current_frame.height {
                continue;
            }
            if ma.deltas != mb.deltas {
                violations.push(format!("bilateral divergence between {a} and {b}"));
            }
            for (token_id, delta) in &ma.deltas {
                let sum = ma.net_outflow(*token_id)
                    + mb.net_outflow(*token_id);
                if sum != ethnum::I256::ZERO {
                    violations.push(format!(
                        "bilateral balance broken for {a}/{b} token {token_id}: {sum} (delta {delta:?})"
                    ));
                }
            }
        }
    }

    violations
}
