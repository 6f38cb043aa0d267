//! Gossip layer: a last-writer-wins profile store and a capacity-aware
//! BFS pathfinder over the advertised account capacities.

pub mod graph;
pub mod store;

pub use graph::find_paths;
pub use store::GossipStore;
