//! # Liquidity Graph
//!
//! The `LiquidityGraph` is an immutable, weighted, undirected graph with one edge per
//! pool reserve pair. It derives market prices for tokens that the upstream feeds do
//! not cover by walking reserve ratios from a numeraire anchor.
//!
//! ## Weight Calculation
//!
//! When both leg prices are known, the edge weight is the pool's USD liquidity:
//! ```text
//! weight = reserve_a * price_a + reserve_b * price_b
//! ```
//! (doubling the known side when only one price is known). Before any price is
//! known, the geometric mean of the decimal-adjusted reserves is used as a proxy:
//! ```text
//! weight = sqrt(reserve_a * reserve_b)
//! ```
//! Stale edges are multiplied by `stale_weight_factor`; edges past `exclude_after_secs`
//! and edges with a zero reserve are never built.
//!
//! ## Path Search
//!
//! Best-first search over `(token, hops)` states maximising the path bottleneck (the
//! thinnest edge on the path), ties broken by fewer hops. The first time the numeraire
//! is popped the path is optimal within the hop bound.
//!
//! ## Thread Safety
//!
//! A graph is never mutated after `build`; refresh builds a new graph and swaps the
//! snapshot (see `state_cache`).

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::errors::PricingError;
use crate::pools::PoolReserves;
use crate::settings::GraphConfig;
use crate::types::conversions::atomic_to_decimal;
use crate::types::quote::clamp_confidence;
use crate::types::{PriceOrigin, PriceQuote, TokenId};

/// One pool reserve pair in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidityEdge {
    pub pool: TokenId,
    pub token_a: TokenId,
    pub token_b: TokenId,
    pub reserve_a: u128,
    pub reserve_b: u128,
    pub decimals_a: u8,
    pub decimals_b: u8,
    /// Liquidity weight after staleness adjustment
    pub weight: f64,
    /// Whether `weight` is USD liquidity (true) or the raw reserve proxy (false)
    pub usd_weighted: bool,
    pub stale: bool,
    pub updated_at: DateTime<Utc>,
}

impl LiquidityEdge {
    /// The token on the other side of `token`, if `token` is a leg of this edge.
    pub fn other(&self, token: &str) -> Option<&TokenId> {
        if self.token_a == token {
            Some(&self.token_b)
        } else if self.token_b == token {
            Some(&self.token_a)
        } else {
            None
        }
    }

    /// Price of the opposite leg given `from`'s price:
    /// `price_to = price_from * (r_from / 10^dec_from) / (r_to / 10^dec_to)`.
    ///
    /// Returns `None` for a non-member token, a zero reserve, or a non-finite result.
    pub fn derive_price(&self, from: &str, from_price: f64) -> Option<f64> {
        let (r_from, d_from, r_to, d_to) = if self.token_a == from {
            (self.reserve_a, self.decimals_a, self.reserve_b, self.decimals_b)
        } else if self.token_b == from {
            (self.reserve_b, self.decimals_b, self.reserve_a, self.decimals_a)
        } else {
            return None;
        };
        if r_from == 0 || r_to == 0 {
            return None;
        }
        let amount_from = atomic_to_decimal(r_from, d_from);
        let amount_to = atomic_to_decimal(r_to, d_to);
        let price = from_price * amount_from / amount_to;
        if price.is_finite() && price > 0.0 {
            Some(price)
        } else {
            None
        }
    }
}

/// Counters from a graph build, for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphBuildReport {
    pub edges: usize,
    pub zero_reserve_excluded: usize,
    pub stale_excluded: usize,
    pub stale_down_weighted: usize,
    pub duplicate_pools: usize,
    pub invalid_pairs: usize,
}

impl std::fmt::Display for GraphBuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "edges={} zero_reserve={} stale_excluded={} stale_down_weighted={} duplicates={} invalid={}",
            self.edges,
            self.zero_reserve_excluded,
            self.stale_excluded,
            self.stale_down_weighted,
            self.duplicate_pools,
            self.invalid_pairs
        )
    }
}

/// Immutable liquidity graph snapshot.
#[derive(Debug, Clone)]
pub struct LiquidityGraph {
    tokens: Vec<TokenId>,
    index: HashMap<TokenId, usize>,
    edges: Vec<LiquidityEdge>,
    /// Per token: (edge index, neighbour token index)
    adjacency: Vec<Vec<(usize, usize)>>,
    hop_decay: f64,
    liquidity_half_confidence: f64,
    built_at: DateTime<Utc>,
}

impl LiquidityGraph {
    pub fn empty() -> Self {
        Self {
            tokens: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
            adjacency: Vec::new(),
            hop_decay: 0.9,
            liquidity_half_confidence: 10_000.0,
            built_at: Utc::now(),
        }
    }

    /// Builds a graph from reserve snapshots.
    ///
    /// `usd_prices` are the latest known leg prices, used to weight edges by USD
    /// liquidity; pass an empty map before the first aggregation. The first snapshot
    /// of a given pool id wins.
    pub fn build(
        pools: &[PoolReserves],
        usd_prices: &HashMap<TokenId, f64>,
        cfg: &GraphConfig,
        now: DateTime<Utc>,
    ) -> (Self, GraphBuildReport) {
        let mut graph = Self {
            hop_decay: cfg.hop_decay,
            liquidity_half_confidence: cfg.liquidity_half_confidence,
            built_at: now,
            ..Self::empty()
        };
        let mut report = GraphBuildReport::default();
        let mut seen_pools: HashSet<&str> = HashSet::new();

        for pool in pools {
            if !seen_pools.insert(pool.pool.as_str()) {
                report.duplicate_pools += 1;
                continue;
            }
            if pool.token_a == pool.token_b {
                report.invalid_pairs += 1;
                continue;
            }
            if pool.has_zero_reserve() {
                debug!(pool = %pool.pool, "excluding pool with zero reserve");
                report.zero_reserve_excluded += 1;
                continue;
            }

            let age_secs = now.signed_duration_since(pool.updated_at).num_seconds().max(0) as u64;
            if age_secs > cfg.exclude_after_secs {
                report.stale_excluded += 1;
                continue;
            }

            let (mut weight, usd_weighted) = edge_weight(pool, usd_prices);
            if !(weight.is_finite() && weight > 0.0) {
                report.invalid_pairs += 1;
                continue;
            }
            let stale = age_secs > cfg.stale_after_secs;
            if stale {
                weight *= cfg.stale_weight_factor;
                report.stale_down_weighted += 1;
            }

            let a = graph.intern(&pool.token_a);
            let b = graph.intern(&pool.token_b);
            let edge_idx = graph.edges.len();
            graph.edges.push(LiquidityEdge {
                pool: pool.pool.clone(),
                token_a: pool.token_a.clone(),
                token_b: pool.token_b.clone(),
                reserve_a: pool.reserve_a,
                reserve_b: pool.reserve_b,
                decimals_a: pool.decimals_a,
                decimals_b: pool.decimals_b,
                weight,
                usd_weighted,
                stale,
                updated_at: pool.updated_at,
            });
            graph.adjacency[a].push((edge_idx, b));
            graph.adjacency[b].push((edge_idx, a));
        }

        report.edges = graph.edges.len();
        info!(tokens = graph.tokens.len(), %report, "liquidity graph built");
        (graph, report)
    }

    fn intern(&mut self, token: &TokenId) -> usize {
        if let Some(&idx) = self.index.get(token) {
            return idx;
        }
        let idx = self.tokens.len();
        self.tokens.push(token.clone());
        self.index.insert(token.clone(), idx);
        self.adjacency.push(Vec::new());
        idx
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_token(&self, token: &str) -> bool {
        self.index.contains_key(token)
    }

    pub fn edges(&self) -> &[LiquidityEdge] {
        &self.edges
    }

    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Edges touching `token`.
    pub fn edges_of(&self, token: &str) -> Vec<&LiquidityEdge> {
        match self.index.get(token) {
            Some(&idx) => self.adjacency[idx].iter().map(|(e, _)| &self.edges[*e]).collect(),
            None => Vec::new(),
        }
    }

    /// Resolves `token`'s USD price through the best path to `numeraire` within `max_hops`.
    ///
    /// `numeraire_usd` is the numeraire's own USD price. The returned quote carries the
    /// hop count and a confidence that decays with path length and thin liquidity.
    pub fn resolve_price(
        &self,
        token: &str,
        numeraire: &str,
        numeraire_usd: f64,
        max_hops: usize,
    ) -> Result<PriceQuote, PricingError> {
        let not_found = || PricingError::PathNotFound {
            token: token.to_string(),
            numeraire: numeraire.to_string(),
            attempted_hops: max_hops,
        };

        if !(numeraire_usd.is_finite() && numeraire_usd > 0.0) {
            warn!(numeraire, numeraire_usd, "numeraire price unusable for path pricing");
            return Err(not_found());
        }
        if token == numeraire {
            return Ok(PriceQuote {
                token: token.to_string(),
                usd_price: numeraire_usd,
                confidence: 1.0,
                origin: PriceOrigin::LiquidityPath { hops: 0 },
                computed_at: Utc::now(),
            });
        }

        let (Some(&source), Some(&target)) = (self.index.get(token), self.index.get(numeraire)) else {
            return Err(not_found());
        };

        let path = self.best_path(source, target, max_hops).ok_or_else(not_found)?;

        // Walk back from the numeraire to the token, converting the price at each hop.
        let mut price = numeraire_usd;
        let mut current = target;
        for &(edge_idx, prev) in path.hops.iter().rev() {
            let edge = &self.edges[edge_idx];
            price = match edge.derive_price(&self.tokens[current], price) {
                Some(p) => p,
                None => {
                    warn!(pool = %edge.pool, "price propagation produced an unusable value");
                    return Err(not_found());
                }
            };
            current = prev;
        }

        let hops = path.hops.len();
        let confidence = self.path_confidence(hops, path.bottleneck);
        debug!(token, hops, price, confidence, "resolved price via liquidity path");

        Ok(PriceQuote {
            token: token.to_string(),
            usd_price: price,
            confidence,
            origin: PriceOrigin::LiquidityPath { hops },
            computed_at: Utc::now(),
        })
    }

    /// Resolves every token in the graph that has a path to the numeraire.
    pub fn resolve_all(
        &self,
        numeraire: &str,
        numeraire_usd: f64,
        max_hops: usize,
    ) -> HashMap<TokenId, PriceQuote> {
        self.tokens
            .iter()
            .filter_map(|t| {
                self.resolve_price(t, numeraire, numeraire_usd, max_hops)
                    .ok()
                    .map(|q| (t.clone(), q))
            })
            .collect()
    }

    /// `hop_decay^hops * w / (w + half)` over the bottleneck weight `w`.
    fn path_confidence(&self, hops: usize, bottleneck: f64) -> f64 {
        let liquidity_factor = if bottleneck.is_infinite() {
            1.0
        } else {
            bottleneck / (bottleneck + self.liquidity_half_confidence)
        };
        clamp_confidence(self.hop_decay.powi(hops as i32) * liquidity_factor)
    }

    fn best_path(&self, source: usize, target: usize, max_hops: usize) -> Option<FoundPath> {
        let mut labels: Vec<Label> = vec![Label {
            node: source,
            hops: 0,
            bottleneck: f64::INFINITY,
            parent: None,
            via_edge: None,
        }];
        let mut heap = BinaryHeap::new();
        heap.push(HeapEntry {
            bottleneck: f64::INFINITY,
            hops: 0,
            label: 0,
        });
        // Fewest hops at which each node was settled. Labels pop in non-increasing
        // bottleneck order, so a later label with as many or more hops is dominated.
        let mut settled_hops: Vec<Option<usize>> = vec![None; self.tokens.len()];

        while let Some(entry) = heap.pop() {
            let label = labels[entry.label].clone();
            if let Some(h) = settled_hops[label.node] {
                if h <= label.hops {
                    continue;
                }
            }
            settled_hops[label.node] = Some(label.hops);

            if label.node == target {
                return Some(reconstruct(&labels, entry.label));
            }
            if label.hops >= max_hops {
                continue;
            }

            for &(edge_idx, neighbour) in &self.adjacency[label.node] {
                if let Some(h) = settled_hops[neighbour] {
                    if h <= label.hops + 1 {
                        continue;
                    }
                }
                let bottleneck = label.bottleneck.min(self.edges[edge_idx].weight);
                let idx = labels.len();
                labels.push(Label {
                    node: neighbour,
                    hops: label.hops + 1,
                    bottleneck,
                    parent: Some(entry.label),
                    via_edge: Some(edge_idx),
                });
                heap.push(HeapEntry {
                    bottleneck,
                    hops: label.hops + 1,
                    label: idx,
                });
            }
        }
        None
    }
}

fn edge_weight(pool: &PoolReserves, usd_prices: &HashMap<TokenId, f64>) -> (f64, bool) {
    let amount_a = atomic_to_decimal(pool.reserve_a, pool.decimals_a);
    let amount_b = atomic_to_decimal(pool.reserve_b, pool.decimals_b);
    let price = |t: &TokenId| usd_prices.get(t).copied().filter(|p| p.is_finite() && *p > 0.0);

    match (price(&pool.token_a), price(&pool.token_b)) {
        (Some(pa), Some(pb)) => (amount_a * pa + amount_b * pb, true),
        (Some(pa), None) => (2.0 * amount_a * pa, true),
        (None, Some(pb)) => (2.0 * amount_b * pb, true),
        (None, None) => ((amount_a * amount_b).sqrt(), false),
    }
}

#[derive(Debug, Clone)]
struct Label {
    node: usize,
    hops: usize,
    bottleneck: f64,
    parent: Option<usize>,
    via_edge: Option<usize>,
}

struct FoundPath {
    /// (edge, token index on the source side of that edge), source → target order
    hops: Vec<(usize, usize)>,
    bottleneck: f64,
}

fn reconstruct(labels: &[Label], end: usize) -> FoundPath {
    let bottleneck = labels[end].bottleneck;
    let mut hops = Vec::new();
    let mut cursor = end;
    while let (Some(parent), Some(edge)) = (labels[cursor].parent, labels[cursor].via_edge) {
        hops.push((edge, labels[parent].node));
        cursor = parent;
    }
    hops.reverse();
    FoundPath { hops, bottleneck }
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    bottleneck: f64,
    hops: usize,
    label: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Max-heap: wider bottleneck first, then fewer hops, then older label.
    fn cmp(&self, other: &Self) -> Ordering {
        self.bottleneck
            .total_cmp(&other.bottleneck)
            .then_with(|| other.hops.cmp(&self.hops))
            .then_with(|| other.label.cmp(&self.label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pool(id: &str, a: &str, b: &str, ra: u128, rb: u128) -> PoolReserves {
        PoolReserves {
            pool: id.to_string(),
            token_a: a.to_string(),
            token_b: b.to_string(),
            reserve_a: ra,
            reserve_b: rb,
            decimals_a: 6,
            decimals_b: 6,
            updated_at: Utc::now(),
        }
    }

    fn cfg() -> GraphConfig {
        GraphConfig::with_numeraire("usdc")
    }

    fn build(pools: &[PoolReserves]) -> LiquidityGraph {
        LiquidityGraph::build(pools, &HashMap::new(), &cfg(), Utc::now()).0
    }

    #[test]
    fn two_hop_price_composes_edge_formulas() {
        // P1: 1 X vs 500 USDC => X = $500. P2: 200 Y vs 100 X => Y = 500 * 100 / 200 = $250.
        let graph = build(&[
            pool("p1", "x", "usdc", 1_000_000, 500_000_000),
            pool("p2", "y", "x", 200_000_000, 100_000_000),
        ]);

        let x = graph.resolve_price("x", "usdc", 1.0, 4).expect("x priced");
        let y = graph.resolve_price("y", "usdc", 1.0, 4).expect("y priced");

        assert!((x.usd_price - 500.0).abs() < 1e-9, "x={}", x.usd_price);
        assert!((y.usd_price - 250.0).abs() < 1e-9, "y={}", y.usd_price);
        assert_eq!(y.origin, PriceOrigin::LiquidityPath { hops: 2 });
        assert!(y.confidence < x.confidence);
    }

    #[test]
    fn hop_bound_yields_path_not_found() {
        let graph = build(&[
            pool("p1", "x", "usdc", 1_000_000, 500_000_000),
            pool("p2", "y", "x", 200_000_000, 100_000_000),
        ]);
        match graph.resolve_price("y", "usdc", 1.0, 1) {
            Err(PricingError::PathNotFound { attempted_hops, .. }) => assert_eq!(attempted_hops, 1),
            other => panic!("expected PathNotFound, got {:?}", other),
        }
        assert!(graph.resolve_price("ghost", "usdc", 1.0, 4).is_err());
    }

    #[test]
    fn zero_reserve_pool_is_never_an_edge() {
        let (graph, report) = LiquidityGraph::build(
            &[pool("p1", "x", "usdc", 0, 500_000_000)],
            &HashMap::new(),
            &cfg(),
            Utc::now(),
        );
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(report.zero_reserve_excluded, 1);
        assert!(graph.resolve_price("x", "usdc", 1.0, 4).is_err());
    }

    #[test]
    fn round_trip_through_an_edge_returns_the_original_price() {
        let graph = build(&[
            pool("p1", "x", "usdc", 3_000_000, 7_000_000_000),
            pool("p2", "y", "x", 123_456_789, 987_654_321),
        ]);
        let x = graph.resolve_price("x", "usdc", 1.0, 4).expect("x").usd_price;
        let edge = graph.edges_of("y")[0];
        let y = edge.derive_price("x", x).expect("y via x");
        let x_again = edge.derive_price("y", y).expect("x via y");
        assert!((x - x_again).abs() / x < 1e-12, "x={} x_again={}", x, x_again);
    }

    #[test]
    fn prefers_the_deeper_path_within_the_bound() {
        // Thin direct pool prices X at $1; deep two-hop route prices X at $2.
        let graph = build(&[
            pool("thin", "x", "usdc", 10, 10),
            pool("deep1", "x", "mid", 1_000_000_000_000, 2_000_000_000_000),
            pool("deep2", "mid", "usdc", 1_000_000_000_000, 1_000_000_000_000),
        ]);
        let deep = graph.resolve_price("x", "usdc", 1.0, 2).expect("deep path");
        assert!((deep.usd_price - 2.0).abs() < 1e-9);
        assert_eq!(deep.origin, PriceOrigin::LiquidityPath { hops: 2 });

        let direct = graph.resolve_price("x", "usdc", 1.0, 1).expect("direct path");
        assert!((direct.usd_price - 1.0).abs() < 1e-9);
        assert!(direct.confidence < deep.confidence);
    }

    #[test]
    fn stale_edges_are_down_weighted_or_excluded() {
        let now = Utc::now();
        let mut stale = pool("stale", "x", "usdc", 1_000_000, 1_000_000);
        stale.updated_at = now - Duration::seconds(600);
        let mut ancient = pool("ancient", "y", "usdc", 1_000_000, 1_000_000);
        ancient.updated_at = now - Duration::seconds(7200);

        let (graph, report) = LiquidityGraph::build(&[stale, ancient], &HashMap::new(), &cfg(), now);
        assert_eq!(report.stale_down_weighted, 1);
        assert_eq!(report.stale_excluded, 1);
        assert!(graph.edges()[0].stale);
        assert!((graph.edges()[0].weight - 0.25).abs() < 1e-12);
        assert!(!graph.contains_token("y"));
    }

    #[test]
    fn known_prices_switch_weights_to_usd() {
        let mut prices = HashMap::new();
        prices.insert("usdc".to_string(), 1.0);
        let (graph, _) = LiquidityGraph::build(
            &[pool("p1", "x", "usdc", 1_000_000, 500_000_000)],
            &prices,
            &cfg(),
            Utc::now(),
        );
        let edge = &graph.edges()[0];
        assert!(edge.usd_weighted);
        assert!((edge.weight - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn numeraire_resolves_to_itself() {
        let graph = LiquidityGraph::empty();
        let q = graph.resolve_price("usdc", "usdc", 1.0, 3).expect("numeraire");
        assert_eq!(q.usd_price, 1.0);
        assert_eq!(q.confidence, 1.0);
    }

    #[test]
    fn resolve_all_covers_reachable_tokens_only() {
        let graph = build(&[
            pool("p1", "x", "usdc", 1_000_000, 500_000_000),
            pool("island", "a", "b", 1_000_000, 1_000_000),
        ]);
        let all = graph.resolve_all("usdc", 1.0, 3);
        assert!(all.contains_key("x"));
        assert!(all.contains_key("usdc"));
        assert!(!all.contains_key("a"));
    }
}
