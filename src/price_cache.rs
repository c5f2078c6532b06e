// src/price_cache.rs

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::types::{PriceOrigin, PriceQuote, TokenId};

/// Last-known prices shared between the pricing cycle and readers.
///
/// Written only after a complete aggregation (or resolution) step, so readers never
/// observe half a cycle's worth of updates from a single writer.
#[derive(Clone, Default)]
pub struct SharedPriceCache {
    prices: Arc<DashMap<TokenId, PriceEntry>>,
    last_successful_update: Arc<AtomicU64>,
    consecutive_failures: Arc<AtomicU32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceEntry {
    pub price: f64,
    pub confidence: f64,
    pub updated_at: DateTime<Utc>,
    pub origin: PriceOrigin,
}

impl SharedPriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_price(&self, token: &str) -> Option<f64> {
        self.prices.get(token).map(|entry| entry.price)
    }

    pub fn get_entry(&self, token: &str) -> Option<PriceEntry> {
        self.prices.get(token).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Stores a batch of plain USD prices with a single origin and confidence.
    pub fn update_batch(&self, prices: &HashMap<TokenId, f64>, origin: PriceOrigin, confidence: f64) {
        let now = Utc::now();
        for (token, price) in prices {
            self.prices.insert(
                token.clone(),
                PriceEntry {
                    price: *price,
                    confidence,
                    updated_at: now,
                    origin,
                },
            );
        }
    }

    pub fn update_quote(&self, quote: &PriceQuote) {
        self.prices.insert(
            quote.token.clone(),
            PriceEntry {
                price: quote.usd_price,
                confidence: quote.confidence,
                updated_at: quote.computed_at,
                origin: quote.origin,
            },
        );
    }

    /// Plain USD map of every cached price, for weighting graph edges.
    pub fn snapshot(&self) -> HashMap<TokenId, f64> {
        self.prices
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().price))
            .collect()
    }

    /// Freshness breakdown relative to `now`.
    pub fn stats(&self, now: DateTime<Utc>, stale_after: Duration) -> CacheStats {
        let mut stats = CacheStats::default();
        for entry in self.prices.iter() {
            let age = now
                .signed_duration_since(entry.updated_at)
                .to_std()
                .unwrap_or_default();
            if age <= stale_after {
                stats.fresh += 1;
            } else {
                stats.stale += 1;
            }
            match entry.origin {
                PriceOrigin::Aggregated | PriceOrigin::Mirror => stats.from_feeds += 1,
                PriceOrigin::LiquidityPath { .. } => stats.from_graph += 1,
                PriceOrigin::ReserveRatio | PriceOrigin::RedemptionQuote => stats.from_lp_valuation += 1,
            }
        }
        stats
    }

    pub fn mark_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.last_successful_update
            .store(Utc::now().timestamp().max(0) as u64, Ordering::Relaxed);
    }

    pub fn mark_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Healthy while fewer than 3 consecutive cycles failed and the last success is under `max_age`.
    pub fn is_healthy(&self, max_age: Duration) -> bool {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        let last_update = self.last_successful_update.load(Ordering::Relaxed);
        if last_update == 0 {
            return failures < 3;
        }
        let now = Utc::now().timestamp().max(0) as u64;
        failures < 3 && now.saturating_sub(last_update) < max_age.as_secs()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub fresh: usize,
    pub stale: usize,
    pub from_feeds: usize,
    pub from_graph: usize,
    pub from_lp_valuation: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fresh={} stale={} (feeds={} graph={} lp={})",
            self.fresh, self.stale, self.from_feeds, self.from_graph, self.from_lp_valuation
        )
    }
}
