use xln_core::{EntityId, EntityInput, EntityTx, JBlock, XlnError, JEVENT_NAMES};

/// Startup parity check between this watcher and the registered event
/// schema. A mismatch means the binary and the chain disagree about event
/// layout, which is fatal.
pub fn assert_event_schema(registered: &[String]) -> Result<(), XlnError> {
    if registered.len() != JEVENT_NAMES.len()
        || registered.iter().zip(JEVENT_NAMES).any(|(a, b)| a != b)
    {
        return Err(XlnError::ChainUnavailable {
            detail: format!(
                "event schema mismatch: watcher knows {JEVENT_NAMES:?}, chain registered {registered:?}"
            ),
        });
    }
    Ok(())
}

/// Fan one jurisdiction block out to the given entities: one `j_event`
/// transaction per entity per block, carrying that entity's relevant slice
/// of the block's events. Entities with no relevant events get nothing.
///
/// `signer_id` is left empty; the runtime resolves it to each entity's
/// proposer replica.
pub fn ingest_block(block: &JBlock, entities: &[EntityId]) -> Vec<EntityInput> {
    let mut inputs = Vec::new();
    for entity in entities {
        let relevant: Vec<_> =
            block.events.iter().filter(|e| e.concerns(entity)).cloned().collect();
        if relevant.is_empty() {
            continue;
        }
        inputs.push(EntityInput::txs(
            *entity,
            "",
            vec![EntityTx::JEvent {
                block_number: block.block_number,
                block_hash: block.block_hash,
                events: relevant,
            }],
        ));
    }
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethnum::U256;
    use xln_core::{Hash32, JEvent};

    #[test]
    fn schema_parity() {
        let good: Vec<String> = JEVENT_NAMES.iter().map(|s| s.to_string()).collect();
        assert!(assert_event_schema(&good).is_ok());

        let mut reordered = good.clone();
        reordered.swap(0, 1);
        assert!(matches!(
            assert_event_schema(&reordered),
            Err(XlnError::ChainUnavailable { .. })
        ));
        assert!(assert_event_schema(&good[..5].to_vec()).is_err());
    }

    #[test]
    fn one_input_per_entity_per_block() {
        let e1 = EntityId::from_number(1);
        let e2 = EntityId::from_number(2);
        let e3 = EntityId::from_number(3);
        let block = JBlock {
            block_number: 7,
            block_hash: Hash32::from_bytes([7; 32]),
            events: vec![
                JEvent::ReserveUpdated { entity: e1, token_id: 1, new_balance: U256::from(5u8) },
                JEvent::ReserveUpdated { entity: e1, token_id: 2, new_balance: U256::from(9u8) },
                JEvent::AccountSettled { left: e1, right: e2, diffs: vec![] },
            ],
        };
        let inputs = ingest_block(&block, &[e1, e2, e3]);
        assert_eq!(inputs.len(), 2);
        // e1 gets all three events in one j_event tx.
        let EntityTx::JEvent { events, .. } = &inputs[0].entity_txs[0] else { panic!() };
        assert_eq!(events.len(), 3);
        let EntityTx::JEvent { events, .. } = &inputs[1].entity_txs[0] else { panic!() };
        assert_eq!(events.len(), 1);
    }
}
