use std::collections::{BTreeMap, BTreeSet, VecDeque};

use ethnum::U256;

use xln_core::constants::MAX_HOPS;
use xln_core::{EntityId, TokenId};

use crate::store::GossipStore;

/// Capacity-aware breadth-first route search over gossiped account
/// snapshots.
///
/// An edge `u → v` exists iff `u`'s advertised outbound capacity toward
/// `v` on `token_id` is at least `amount`. Returns the shortest such route
/// including both endpoints, or an empty vector when none exists within
/// `MAX_HOPS`. The self-pay case `source == target` searches for the
/// shortest cycle with unique intermediates.
pub fn find_paths(
    store: &GossipStore,
    source: EntityId,
    target: EntityId,
    amount: U256,
    token_id: TokenId,
) -> Vec<EntityId> {
    let mut predecessors: BTreeMap<EntityId, EntityId> = BTreeMap::new();
    let mut visited: BTreeSet<EntityId> = BTreeSet::new();
    let mut queue: VecDeque<(EntityId, usize)> = VecDeque::new();

    visited.insert(source);
    queue.push_back((source, 0));

    while let Some((node, depth)) = queue.pop_front() {
        if depth + 1 >= MAX_HOPS {
            continue;
        }
        for next in edges_from(store, &node, amount, token_id) {
            if next == target {
                // Reached the target (possibly source itself on a cycle).
                let mut route = vec![target];
                let mut cursor = node;
                while cursor != source {
                    route.push(cursor);
                    cursor = predecessors[&cursor];
                }
                route.push(source);
                route.reverse();
                return route;
            }
            if visited.insert(next) {
                predecessors.insert(next, node);
                queue.push_back((next, depth + 1));
            }
        }
    }
    Vec::new()
}

fn edges_from(
    store: &GossipStore,
    node: &EntityId,
    amount: U256,
    token_id: TokenId,
) -> Vec<EntityId> {
    let Some(profile) = store.get(node) else { return Vec::new() };
    profile
        .accounts
        .iter()
        .filter(|(_, snapshot)| {
            snapshot
                .token_capacities
                .get(&token_id)
                .map(|cap| cap.out_capacity >= amount)
                .unwrap_or(false)
        })
        .map(|(peer, _)| *peer)
        .collect()
}
