// src/pools.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::token_metadata::TokenUniverse;
use crate::types::token::deserialize_atomic;
use crate::types::TokenId;

/// Reserve snapshot of a two-asset pool, as reported by the reserve provider.
///
/// Reserves are atomic amounts; `decimals_*` convert them to whole units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolReserves {
    /// Pool identifier (the LP token id when the pool issues one)
    pub pool: TokenId,
    pub token_a: TokenId,
    pub token_b: TokenId,
    #[serde(deserialize_with = "deserialize_atomic")]
    pub reserve_a: u128,
    #[serde(deserialize_with = "deserialize_atomic")]
    pub reserve_b: u128,
    pub decimals_a: u8,
    pub decimals_b: u8,
    /// Defaults to load time when the provider does not report it
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl PoolReserves {
    pub fn has_zero_reserve(&self) -> bool {
        self.reserve_a == 0 || self.reserve_b == 0
    }
}

/// Supplies current pool reserves. Refreshed on an externally owned schedule.
#[async_trait]
pub trait PoolReserveProvider: Send + Sync {
    async fn fetch_reserves(&self) -> Result<Vec<PoolReserves>>;
}

/// Derives reserve snapshots from the POOL tokens in the universe.
///
/// Pools whose legs are missing from the universe (unknown decimals) are skipped.
pub fn reserves_from_pool_tokens(universe: &TokenUniverse, as_of: DateTime<Utc>) -> Vec<PoolReserves> {
    let mut out = Vec::new();
    for record in universe.pools() {
        let Some((leg_a, leg_b)) = record.pool_legs() else {
            continue;
        };
        let (Some(a), Some(b)) = (universe.get(&leg_a.token), universe.get(&leg_b.token)) else {
            debug!("Pool {} skipped for the liquidity graph: leg metadata missing", record.label());
            continue;
        };
        out.push(PoolReserves {
            pool: record.id.clone(),
            token_a: leg_a.token.clone(),
            token_b: leg_b.token.clone(),
            reserve_a: leg_a.reserve,
            reserve_b: leg_b.reserve,
            decimals_a: a.decimals,
            decimals_b: b.decimals,
            updated_at: as_of,
        });
    }
    out
}

/// Fixed reserve list, mostly for tests and embedding.
pub struct StaticPoolReserveProvider {
    pools: Vec<PoolReserves>,
}

impl StaticPoolReserveProvider {
    pub fn new(pools: Vec<PoolReserves>) -> Self {
        Self { pools }
    }
}

#[async_trait]
impl PoolReserveProvider for StaticPoolReserveProvider {
    async fn fetch_reserves(&self) -> Result<Vec<PoolReserves>> {
        Ok(self.pools.clone())
    }
}

/// Reads a JSON array of [`PoolReserves`] from disk on every call.
pub struct JsonFilePoolReserveProvider {
    path: PathBuf,
}

impl JsonFilePoolReserveProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PoolReserveProvider for JsonFilePoolReserveProvider {
    async fn fetch_reserves(&self) -> Result<Vec<PoolReserves>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("reading pool reserves from {}", self.path.display()))?;
        let pools: Vec<PoolReserves> = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing pool reserves in {}", self.path.display()))?;
        info!("Loaded {} pool reserve snapshots from {}", pools.len(), self.path.display());
        Ok(pools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PoolLeg, TokenRecord};

    #[test]
    fn pool_tokens_become_reserve_snapshots() {
        let universe = TokenUniverse::from_records(vec![
            TokenRecord::base("eth", 18),
            TokenRecord::base("usdc", 6),
            TokenRecord::pool("lp", 18, PoolLeg::new("eth", 10), PoolLeg::new("usdc", 20)),
            TokenRecord::pool("lp-unknown", 18, PoolLeg::new("eth", 10), PoolLeg::new("ghost", 20)),
        ]);
        let now = Utc::now();
        let reserves = reserves_from_pool_tokens(&universe, now);

        assert_eq!(reserves.len(), 1);
        assert_eq!(reserves[0].pool, "lp");
        assert_eq!(reserves[0].decimals_b, 6);
        assert_eq!(reserves[0].updated_at, now);
    }

    #[test]
    fn reserves_parse_from_json() {
        let raw = r#"[{
            "pool": "p1", "token_a": "x", "token_b": "usdc",
            "reserve_a": "1000000", "reserve_b": 500000000,
            "decimals_a": 6, "decimals_b": 6,
            "updated_at": "2026-01-01T00:00:00Z"
        }]"#;
        let pools: Vec<PoolReserves> = serde_json::from_str(raw).expect("pools");
        assert_eq!(pools[0].reserve_a, 1_000_000);
        assert!(!pools[0].has_zero_reserve());

        let undated: Vec<PoolReserves> = serde_json::from_str(
            r#"[{"pool":"p2","token_a":"x","token_b":"y","reserve_a":1,"reserve_b":0,"decimals_a":6,"decimals_b":6}]"#,
        )
        .expect("undated pools");
        assert!(undated[0].has_zero_reserve());
        assert!(Utc::now().signed_duration_since(undated[0].updated_at).num_seconds() < 60);
    }
}
