//! Swappable snapshots of the shared pricing state.
//!
//! Readers take an `Arc` to one consistent snapshot and keep it for the whole
//! operation; refresh builds a new value off to the side and swaps the pointer.
//! The token universe and the LP dependency graph derived from it always swap together.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::liquidity_graph::LiquidityGraph;
use crate::lp_dependency_graph::LpDependencyGraph;
use crate::token_metadata::TokenUniverse;

/// Token universe plus the dependency graph built from it.
#[derive(Debug, Clone, Default)]
pub struct MetadataSnapshot {
    pub universe: Arc<TokenUniverse>,
    pub dependencies: Arc<LpDependencyGraph>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl MetadataSnapshot {
    pub fn from_universe(universe: TokenUniverse) -> Self {
        let dependencies = LpDependencyGraph::build(universe.iter());
        Self {
            universe: Arc::new(universe),
            dependencies: Arc::new(dependencies),
            refreshed_at: Some(Utc::now()),
        }
    }
}

pub struct StateCache {
    metadata: ArcSwap<MetadataSnapshot>,
    liquidity: ArcSwap<LiquidityGraph>,
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCache {
    pub fn new() -> Self {
        Self {
            metadata: ArcSwap::from_pointee(MetadataSnapshot::default()),
            liquidity: ArcSwap::from_pointee(LiquidityGraph::empty()),
        }
    }

    pub fn metadata(&self) -> Arc<MetadataSnapshot> {
        self.metadata.load_full()
    }

    pub fn liquidity_graph(&self) -> Arc<LiquidityGraph> {
        self.liquidity.load_full()
    }

    pub fn store_metadata(&self, snapshot: MetadataSnapshot) {
        self.metadata.store(Arc::new(snapshot));
    }

    pub fn store_liquidity_graph(&self, graph: LiquidityGraph) {
        self.liquidity.store(Arc::new(graph));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PoolLeg, TokenRecord};

    #[test]
    fn readers_keep_their_snapshot_across_a_swap() {
        let cache = StateCache::new();
        let before = cache.metadata();
        assert!(before.universe.is_empty());

        cache.store_metadata(MetadataSnapshot::from_universe(TokenUniverse::from_records(vec![
            TokenRecord::base("a", 6),
            TokenRecord::base("b", 6),
            TokenRecord::pool("lp", 6, PoolLeg::new("a", 1), PoolLeg::new("b", 1)),
        ])));

        assert!(before.universe.is_empty());
        let after = cache.metadata();
        assert_eq!(after.universe.len(), 3);
        assert_eq!(after.dependencies.level("lp"), Some(0));
        assert!(after.refreshed_at.is_some());
    }
}
