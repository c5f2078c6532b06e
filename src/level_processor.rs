//! Level-ordered LP valuation.
//!
//! Walks the dependency levels in ascending order. Tokens within one level do not depend
//! on each other, so they are valued concurrently (bounded by `max_concurrent_quotes`)
//! against the same price snapshot; the level's results are then added to the book the
//! next level reads. A failed token is simply absent from the book, so its dependents
//! fail with `MissingDependency` instead of crashing the batch.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::PricingError;
use crate::lp_dependency_graph::LpDependencyGraph;
use crate::lp_valuation::LpValuator;
use crate::types::{LpValuation, PriceBook, TokenId};

/// Output of one LP batch.
#[derive(Debug, Clone, Default)]
pub struct LpBatchResult {
    /// Resolved POOL valuations only
    pub valuations: HashMap<TokenId, LpValuation>,
    /// Why each unresolved POOL token failed; diagnostic only
    pub failures: HashMap<TokenId, PricingError>,
}

impl LpBatchResult {
    pub fn usd_prices(&self) -> HashMap<TokenId, f64> {
        self.valuations
            .iter()
            .map(|(token, v)| (token.clone(), v.usd_price))
            .collect()
    }
}

pub struct LevelProcessor {
    valuator: Arc<LpValuator>,
    graph: Arc<LpDependencyGraph>,
    max_concurrency: usize,
}

impl LevelProcessor {
    pub fn new(valuator: Arc<LpValuator>, graph: Arc<LpDependencyGraph>, max_concurrency: usize) -> Self {
        Self {
            valuator,
            graph,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Values every POOL token reachable through the level order, starting from `base`.
    pub async fn calculate_all(&self, base: &PriceBook) -> LpBatchResult {
        let started = Instant::now();
        let mut result = LpBatchResult::default();
        let mut book = base.clone();

        for token in self.graph.cyclic_tokens().into_iter().chain(self.graph.blocked_tokens()) {
            if let Some(reason) = self.graph.unresolvable_reason(&token) {
                result.failures.insert(token, reason);
            }
        }

        for (level, tokens) in self.graph.levels() {
            let level_started = Instant::now();
            let snapshot = Arc::new(book.clone());

            let outcomes: Vec<(TokenId, Result<LpValuation, PricingError>)> = stream::iter(tokens)
                .map(|token| {
                    let valuator = Arc::clone(&self.valuator);
                    let snapshot = Arc::clone(&snapshot);
                    async move {
                        let outcome = valuator.valuate(&token, &snapshot).await;
                        (token, outcome)
                    }
                })
                .buffer_unordered(self.max_concurrency)
                .collect()
                .await;

            let mut resolved = 0usize;
            for (token, outcome) in outcomes {
                match outcome {
                    Ok(valuation) => {
                        book.insert(token.clone(), valuation.price_point());
                        result.valuations.insert(token, valuation);
                        resolved += 1;
                    }
                    Err(e) => {
                        debug!(%token, level, error = %e, "LP valuation failed");
                        crate::metrics::increment_pricing_failures(e.kind());
                        result.failures.insert(token, e);
                    }
                }
            }
            debug!(
                level,
                resolved,
                elapsed_ms = level_started.elapsed().as_millis() as u64,
                "LP level processed"
            );
        }

        if !result.failures.is_empty() {
            warn!(failed = result.failures.len(), "some LP tokens could not be valued");
        }
        crate::metrics::record_lp_batch(started.elapsed(), result.valuations.len(), result.failures.len());
        info!(
            valued = result.valuations.len(),
            failed = result.failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "LP batch complete"
        );
        result
    }
}
