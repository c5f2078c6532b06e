//! # Price Aggregator
//!
//! Merges the partial price maps returned by the upstream sources into one map.
//!
//! ## Pipeline
//!
//! 1. Each source map is sanitized (non-finite and non-positive quotes dropped) and its
//!    aliased numeraire keys are folded onto the qualified key.
//! 2. The maps are merged under a [`MergeStrategy`]; each strategy is an independent
//!    pure function.
//! 3. Bare alias keys are back-filled from their qualified key.
//! 4. MIRROR tokens receive exactly their base token's price (see [`propagate_mirrors`]).

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::errors::PricingError;
use crate::token_metadata::TokenUniverse;
use crate::types::{TokenId, TokenKind};

/// A token price map as returned by one source.
pub type PriceMap = HashMap<TokenId, f64>;

/// How overlapping quotes from several sources are reconciled.
///
/// Sources are ordered by priority: the first configured source is "A", the next "B".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// The earliest source reporting a token wins
    PrimaryAOverrides,
    /// The latest source reporting a token wins
    PrimaryBOverrides,
    /// Arithmetic mean of every source that reports the token
    #[default]
    Average,
    /// Same as `PrimaryAOverrides`; kept so configs can state fallback intent explicitly
    Fallback,
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeStrategy::PrimaryAOverrides => write!(f, "primary_a_overrides"),
            MergeStrategy::PrimaryBOverrides => write!(f, "primary_b_overrides"),
            MergeStrategy::Average => write!(f, "average"),
            MergeStrategy::Fallback => write!(f, "fallback"),
        }
    }
}

/// Two upstream keys for the same logical numeraire, e.g. `usd-coin` and `coingecko:usd-coin`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NumeraireAlias {
    pub bare: TokenId,
    /// Canonical key
    pub qualified: TokenId,
}

/// Result of [`aggregate_with_report`].
#[derive(Debug, Clone, Default)]
pub struct AggregationOutcome {
    pub prices: PriceMap,
    /// MIRROR tokens left unresolved because their base had no price
    pub unresolved_mirrors: Vec<TokenId>,
    /// Sources that failed or timed out (recorded, never fatal)
    pub source_failures: Vec<PricingError>,
    /// Quotes contributed per source after sanitizing
    pub source_counts: Vec<(String, usize)>,
}

/// Merges `source_maps` (in priority order) under `strategy`.
///
/// An empty input, or inputs that are all empty, produce an empty map.
pub fn aggregate(source_maps: &[PriceMap], strategy: MergeStrategy) -> PriceMap {
    aggregate_with_aliases(source_maps, strategy, &[])
}

/// [`aggregate`] plus numeraire alias reconciliation.
pub fn aggregate_with_aliases(
    source_maps: &[PriceMap],
    strategy: MergeStrategy,
    aliases: &[NumeraireAlias],
) -> PriceMap {
    let normalized: Vec<PriceMap> = source_maps
        .iter()
        .map(|m| canonicalize_aliases(sanitize(m), aliases))
        .collect();

    let mut merged = match strategy {
        MergeStrategy::PrimaryAOverrides | MergeStrategy::Fallback => merge_first_wins(&normalized),
        MergeStrategy::PrimaryBOverrides => merge_last_wins(&normalized),
        MergeStrategy::Average => merge_average(&normalized),
    };

    backfill_aliases(&mut merged, aliases);
    merged
}

/// Full aggregation step: alias reconciliation, merge, then mirror propagation over `universe`.
pub fn aggregate_with_report(
    named_maps: &[(String, PriceMap)],
    strategy: MergeStrategy,
    aliases: &[NumeraireAlias],
    universe: &TokenUniverse,
) -> AggregationOutcome {
    let maps: Vec<PriceMap> = named_maps.iter().map(|(_, m)| m.clone()).collect();
    let source_counts = named_maps
        .iter()
        .map(|(name, m)| (name.clone(), sanitize(m).len()))
        .collect();

    let mut prices = aggregate_with_aliases(&maps, strategy, aliases);
    let unresolved_mirrors = propagate_mirrors(&mut prices, universe);

    AggregationOutcome {
        prices,
        unresolved_mirrors,
        source_failures: Vec::new(),
        source_counts,
    }
}

/// Drops quotes that cannot be used as prices.
fn sanitize(map: &PriceMap) -> PriceMap {
    map.iter()
        .filter(|(token, price)| {
            let ok = price.is_finite() && **price > 0.0;
            if !ok {
                debug!("Discarding invalid quote {} = {}", token, price);
            }
            ok
        })
        .map(|(t, p)| (t.clone(), *p))
        .collect()
}

/// Moves bare alias keys onto their qualified key within a single source.
/// When a source reports both keys, the qualified one is kept.
fn canonicalize_aliases(mut map: PriceMap, aliases: &[NumeraireAlias]) -> PriceMap {
    for alias in aliases {
        if let Some(bare_price) = map.remove(&alias.bare) {
            map.entry(alias.qualified.clone()).or_insert(bare_price);
        }
    }
    map
}

fn backfill_aliases(merged: &mut PriceMap, aliases: &[NumeraireAlias]) {
    for alias in aliases {
        if let Some(price) = merged.get(&alias.qualified).copied() {
            merged.insert(alias.bare.clone(), price);
        }
    }
}

pub(crate) fn merge_first_wins(maps: &[PriceMap]) -> PriceMap {
    let mut merged = PriceMap::new();
    for map in maps {
        for (token, price) in map {
            merged.entry(token.clone()).or_insert(*price);
        }
    }
    merged
}

pub(crate) fn merge_last_wins(maps: &[PriceMap]) -> PriceMap {
    let mut merged = PriceMap::new();
    for map in maps {
        for (token, price) in map {
            merged.insert(token.clone(), *price);
        }
    }
    merged
}

pub(crate) fn merge_average(maps: &[PriceMap]) -> PriceMap {
    let mut sums: HashMap<&TokenId, (f64, usize)> = HashMap::new();
    for map in maps {
        for (token, price) in map {
            let entry = sums.entry(token).or_insert((0.0, 0));
            entry.0 += price;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(token, (sum, count))| (token.clone(), sum / count as f64))
        .collect()
}

/// Assigns every MIRROR token exactly its base token's price.
///
/// Mirror chains (a mirror of a mirror) are followed to the first non-mirror token.
/// A mirror whose base is unresolved, or whose chain loops, is removed from `prices`
/// even if a source quoted it directly, and returned in the unresolved list.
pub fn propagate_mirrors(prices: &mut PriceMap, universe: &TokenUniverse) -> Vec<TokenId> {
    let mut unresolved = Vec::new();

    for mirror in universe.mirrors() {
        match resolve_mirror_root(&mirror.id, universe) {
            Some(root) => match prices.get(&root).copied() {
                Some(price) => {
                    prices.insert(mirror.id.clone(), price);
                }
                None => {
                    prices.remove(&mirror.id);
                    warn!(
                        "Mirror token {} left unresolved: base {} has no price",
                        mirror.label(),
                        root
                    );
                    unresolved.push(mirror.id.clone());
                }
            },
            None => {
                prices.remove(&mirror.id);
                warn!("Mirror token {} has a looping base chain", mirror.label());
                unresolved.push(mirror.id.clone());
            }
        }
    }

    unresolved.sort();
    unresolved
}

fn resolve_mirror_root(id: &TokenId, universe: &TokenUniverse) -> Option<TokenId> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut current = id.as_str();
    loop {
        if !seen.insert(current) {
            return None;
        }
        match universe.get(current).map(|r| &r.kind) {
            Some(TokenKind::Mirror { base }) => current = base.as_str(),
            _ => return Some(current.to_string()),
        }
    }
}
