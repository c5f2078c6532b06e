//! # Pricing Service
//!
//! Entry point of the SDK. Owns the collaborators (token metadata, price sources, pool
//! reserves, optional redemption quoter), the swappable state snapshots and the
//! last-known price cache, and exposes the pricing operations:
//!
//! - [`PricingService::aggregate_prices`] / [`PricingService::aggregate_prices_with`]
//! - [`PricingService::resolve_token_price`]
//! - [`PricingService::calculate_all_lp_values`]
//! - [`PricingService::get_dependency_stats`]
//! - [`PricingService::refresh_tokens`] / [`PricingService::refresh_liquidity_graph`]
//! - [`PricingService::run_cycle`], the full pipeline:
//!   aggregate → refresh graph → resolve missing BASE prices via the graph → LP batch.
//!
//! No operation panics or aborts on a per-token failure; the only fatal error is an
//! invalid configuration, which is rejected before a service exists.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::errors::PricingError;
use crate::level_processor::{LevelProcessor, LpBatchResult};
use crate::liquidity_graph::{GraphBuildReport, LiquidityGraph};
use crate::lp_dependency_graph::DependencyStats;
use crate::lp_valuation::{LpValuator, RedemptionQuoter};
use crate::pools::{reserves_from_pool_tokens, JsonFilePoolReserveProvider, PoolReserveProvider};
use crate::price_aggregator::{aggregate_with_report, AggregationOutcome, MergeStrategy};
use crate::price_cache::SharedPriceCache;
use crate::price_feeds::{build_sources, PriceFeedSet};
use crate::settings::Settings;
use crate::state_cache::{MetadataSnapshot, StateCache};
use crate::token_metadata::{JsonFileTokenProvider, TokenMetadataProvider, TokenUniverse};
use crate::types::{PriceBook, PriceOrigin, PricePoint, PriceQuote, TokenId, TokenKind};

/// Everything one [`PricingService::run_cycle`] produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub aggregation: AggregationOutcome,
    pub graph: GraphBuildReport,
    /// BASE and MIRROR prices filled in from the liquidity graph
    pub graph_resolved: HashMap<TokenId, PriceQuote>,
    /// BASE and MIRROR tokens left without a price, with the reason
    pub unresolved: HashMap<TokenId, PricingError>,
    pub lp: LpBatchResult,
    /// Every price known at the end of the cycle
    pub prices: PriceBook,
    pub elapsed: Duration,
}

pub struct PricingService {
    settings: Settings,
    token_provider: Arc<dyn TokenMetadataProvider>,
    pool_provider: Option<Arc<dyn PoolReserveProvider>>,
    feeds: PriceFeedSet,
    quoter: Option<Arc<dyn RedemptionQuoter>>,
    state: StateCache,
    price_cache: SharedPriceCache,
}

impl PricingService {
    pub fn new(settings: Settings, token_provider: Arc<dyn TokenMetadataProvider>, feeds: PriceFeedSet) -> Self {
        Self {
            settings,
            token_provider,
            pool_provider: None,
            feeds,
            quoter: None,
            state: StateCache::new(),
            price_cache: SharedPriceCache::new(),
        }
    }

    /// Wires the service from settings: configured price sources plus the JSON data files.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let feeds = build_sources(&settings)?;
        let tokens_file = settings
            .data
            .tokens_file
            .clone()
            .context("data.tokens_file must be set to build the service from settings")?;
        let pools_file = settings.data.pools_file.clone();

        let mut service = Self::new(settings, Arc::new(JsonFileTokenProvider::new(tokens_file)), feeds);
        if let Some(path) = pools_file {
            service = service.with_pool_provider(Arc::new(JsonFilePoolReserveProvider::new(path)));
        }
        Ok(service)
    }

    pub fn with_pool_provider(mut self, provider: Arc<dyn PoolReserveProvider>) -> Self {
        self.pool_provider = Some(provider);
        self
    }

    pub fn with_quoter(mut self, quoter: Arc<dyn RedemptionQuoter>) -> Self {
        self.quoter = Some(quoter);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn price_cache(&self) -> &SharedPriceCache {
        &self.price_cache
    }

    pub fn universe(&self) -> Arc<TokenUniverse> {
        Arc::clone(&self.state.metadata().universe)
    }

    pub fn liquidity_graph(&self) -> Arc<LiquidityGraph> {
        self.state.liquidity_graph()
    }

    /// Reloads token metadata and rebuilds the dependency graph. Returns the token count.
    #[instrument(skip(self))]
    pub async fn refresh_tokens(&self) -> Result<usize> {
        let records = self
            .token_provider
            .list_tokens()
            .await
            .context("listing token metadata")?;
        let snapshot = MetadataSnapshot::from_universe(TokenUniverse::from_records(records));
        let count = snapshot.universe.len();

        let stats = snapshot.dependencies.stats();
        crate::metrics::set_dependency_stats(stats.level_count, stats.cyclic);
        info!(tokens = count, dependency = %stats, "token metadata refreshed");

        self.state.store_metadata(snapshot);
        Ok(count)
    }

    /// Aggregates the configured sources under the configured strategy.
    pub async fn aggregate_prices(&self) -> AggregationOutcome {
        self.aggregate_prices_with(self.settings.aggregation.strategy).await
    }

    /// Aggregates the configured sources under `strategy` and records the result in the
    /// last-known price cache. Failing sources are reported, never fatal.
    #[instrument(skip(self))]
    pub async fn aggregate_prices_with(&self, strategy: MergeStrategy) -> AggregationOutcome {
        let metadata = self.state.metadata();
        let fetches = self.feeds.fetch_all().await;

        let named: Vec<(String, HashMap<TokenId, f64>)> =
            fetches.iter().map(|f| (f.source.clone(), f.prices.clone())).collect();
        let mut outcome = aggregate_with_report(
            &named,
            strategy,
            &self.settings.aggregation.numeraire_aliases,
            &metadata.universe,
        );
        outcome.source_failures = fetches.into_iter().filter_map(|f| f.error).collect();

        if !outcome.source_failures.is_empty() {
            warn!(
                failed = outcome.source_failures.len(),
                sources = self.feeds.len(),
                "some price sources were unavailable"
            );
        }

        let (mirrors, direct): (HashMap<TokenId, f64>, HashMap<TokenId, f64>) = outcome
            .prices
            .iter()
            .map(|(t, p)| (t.clone(), *p))
            .partition(|(t, _)| metadata.universe.get(t).map(|r| r.is_mirror()).unwrap_or(false));
        let confidence = self.settings.valuation.base_price_confidence;
        self.price_cache.update_batch(&direct, PriceOrigin::Aggregated, confidence);
        self.price_cache.update_batch(&mirrors, PriceOrigin::Mirror, confidence);

        crate::metrics::set_aggregation_result(outcome.prices.len(), outcome.unresolved_mirrors.len());
        info!(
            %strategy,
            priced = outcome.prices.len(),
            unresolved_mirrors = outcome.unresolved_mirrors.len(),
            "aggregation complete"
        );
        outcome
    }

    /// Rebuilds the liquidity graph from the reserve provider and the POOL token records,
    /// weighting edges with the last-known prices.
    #[instrument(skip(self))]
    pub async fn refresh_liquidity_graph(&self) -> Result<GraphBuildReport> {
        let now = Utc::now();
        let metadata = self.state.metadata();

        let mut pools = match &self.pool_provider {
            Some(provider) => match provider.fetch_reserves().await {
                Ok(pools) => pools,
                Err(e) => {
                    warn!(error = %e, "pool reserve provider failed, using POOL token reserves only");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        pools.extend(reserves_from_pool_tokens(
            &metadata.universe,
            metadata.refreshed_at.unwrap_or(now),
        ));

        let weights = self.price_cache.snapshot();
        let (graph, report) = LiquidityGraph::build(&pools, &weights, &self.settings.graph, now);

        crate::metrics::set_graph_size(graph.token_count(), graph.edge_count());
        crate::metrics::increment_excluded_edges("zero_reserve", report.zero_reserve_excluded);
        crate::metrics::increment_excluded_edges("stale", report.stale_excluded);

        self.state.store_liquidity_graph(graph);
        Ok(report)
    }

    fn numeraire_usd(&self) -> f64 {
        self.price_cache
            .get_price(&self.settings.graph.numeraire)
            .filter(|p| p.is_finite() && *p > 0.0)
            .unwrap_or(self.settings.graph.numeraire_usd_price)
    }

    /// Resolves `token` through the current liquidity graph snapshot.
    ///
    /// MIRROR tokens resolve through their base and carry the base's price.
    pub fn resolve_token_price(&self, token: &str) -> Result<PriceQuote, PricingError> {
        let metadata = self.state.metadata();
        let graph = self.state.liquidity_graph();
        let numeraire = &self.settings.graph.numeraire;
        let max_hops = self.settings.graph.max_hops;
        let numeraire_usd = self.numeraire_usd();

        let target = match metadata.universe.get(token).map(|r| &r.kind) {
            Some(TokenKind::Mirror { base }) => base.as_str(),
            Some(_) => token,
            None if token == numeraire.as_str() => token,
            None => {
                crate::metrics::increment_graph_resolutions(false);
                return Err(PricingError::TokenNotFound(token.to_string()));
            }
        };

        let result = graph
            .resolve_price(target, numeraire, numeraire_usd, max_hops)
            .map(|mut quote| {
                if target != token {
                    quote.token = token.to_string();
                    quote.origin = PriceOrigin::Mirror;
                }
                quote
            })
            .map_err(|e| match e {
                PricingError::PathNotFound { numeraire, attempted_hops, .. } => PricingError::PathNotFound {
                    token: token.to_string(),
                    numeraire,
                    attempted_hops,
                },
                other => other,
            });

        crate::metrics::increment_graph_resolutions(result.is_ok());
        result
    }

    /// Values every POOL token from plain USD base prices.
    pub async fn calculate_all_lp_values(&self, base_prices: &HashMap<TokenId, f64>) -> LpBatchResult {
        let book = PriceBook::from_usd_map(base_prices, self.settings.valuation.base_price_confidence);
        self.calculate_all_lp_values_from_book(&book).await
    }

    /// Values every POOL token from a book that already carries per-price confidences.
    pub async fn calculate_all_lp_values_from_book(&self, book: &PriceBook) -> LpBatchResult {
        let metadata = self.state.metadata();
        let mut valuator = LpValuator::new(Arc::clone(&metadata.universe), self.settings.valuation.clone());
        if let Some(quoter) = &self.quoter {
            valuator = valuator.with_quoter(Arc::clone(quoter));
        }
        let processor = LevelProcessor::new(
            Arc::new(valuator),
            Arc::clone(&metadata.dependencies),
            self.settings.valuation.max_concurrent_quotes,
        );
        processor.calculate_all(book).await
    }

    pub fn get_dependency_stats(&self) -> DependencyStats {
        self.state.metadata().dependencies.stats()
    }

    /// One full pricing pass. Token metadata is loaded first if it never was.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let started = Instant::now();
        if self.state.metadata().refreshed_at.is_none() {
            self.refresh_tokens().await?;
        }

        let aggregation = self.aggregate_prices().await;
        let graph = match self.refresh_liquidity_graph().await {
            Ok(report) => report,
            Err(e) => {
                self.price_cache.mark_failure();
                return Err(e);
            }
        };

        let metadata = self.state.metadata();
        let confidence = self.settings.valuation.base_price_confidence;
        let mut book = PriceBook::from_usd_map(&aggregation.prices, confidence);
        let mut graph_resolved = HashMap::new();
        let mut unresolved = HashMap::new();

        for record in metadata.universe.iter().filter(|r| !r.is_pool()) {
            if book.contains(&record.id) {
                continue;
            }
            match self.resolve_token_price(&record.id) {
                Ok(quote) => {
                    book.insert_quote(&quote);
                    self.price_cache.update_quote(&quote);
                    graph_resolved.insert(record.id.clone(), quote);
                }
                Err(e) => {
                    debug!(token = %record.label(), error = %e, "no price for token");
                    crate::metrics::increment_pricing_failures(e.kind());
                    unresolved.insert(record.id.clone(), e);
                }
            }
        }

        let lp = self.calculate_all_lp_values_from_book(&book).await;
        for valuation in lp.valuations.values() {
            book.insert(valuation.token.clone(), PricePoint::new(valuation.usd_price, valuation.confidence));
            self.price_cache.update_quote(&valuation.to_quote());
        }
        self.price_cache.mark_success();

        let elapsed = started.elapsed();
        crate::metrics::record_cycle_duration(elapsed);
        info!(
            aggregated = aggregation.prices.len(),
            graph_resolved = graph_resolved.len(),
            unresolved = unresolved.len(),
            lp_valued = lp.valuations.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "pricing cycle complete"
        );

        Ok(CycleReport {
            aggregation,
            graph,
            graph_resolved,
            unresolved,
            lp,
            prices: book,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price_feeds::StaticPriceSource;
    use crate::token_metadata::StaticTokenProvider;
    use crate::types::{PoolLeg, TokenRecord};

    fn service() -> PricingService {
        let tokens = StaticTokenProvider::new(vec![
            TokenRecord::base("usdc", 6),
            TokenRecord::base("x", 6),
            TokenRecord::mirror("x.bridged", 6, "x"),
            TokenRecord::pool("lp", 6, PoolLeg::new("x", 1_000_000), PoolLeg::new("usdc", 500_000_000)),
        ]);
        let feeds = PriceFeedSet::new().with_source(
            Arc::new(StaticPriceSource::new(
                "fixed",
                [("usdc".to_string(), 1.0)].into_iter().collect(),
            )),
            Duration::from_millis(200),
        );
        PricingService::new(Settings::for_numeraire("usdc"), Arc::new(tokens), feeds)
    }

    #[tokio::test]
    async fn mirror_resolves_through_its_base() {
        let service = service();
        service.refresh_tokens().await.expect("tokens");
        service.aggregate_prices().await;
        service.refresh_liquidity_graph().await.expect("graph");

        let quote = service.resolve_token_price("x.bridged").expect("mirror quote");
        assert_eq!(quote.token, "x.bridged");
        assert_eq!(quote.origin, PriceOrigin::Mirror);
        assert!((quote.usd_price - 500.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn run_cycle_fills_graph_prices_and_lp_values() {
        let service = service();
        let report = service.run_cycle().await.expect("cycle");

        assert_eq!(report.aggregation.prices["usdc"], 1.0);
        assert!(report.graph_resolved.contains_key("x"));
        assert!(report.graph_resolved.contains_key("x.bridged"));
        assert!(report.unresolved.is_empty());
        assert!(report.lp.valuations.contains_key("lp"));
        assert!(service.price_cache().get_price("lp").is_some());
        assert_eq!(service.get_dependency_stats().total_pools, 1);
    }

    #[tokio::test]
    async fn token_without_metadata_is_not_found() {
        let service = service();
        service.run_cycle().await.expect("cycle");
        match service.resolve_token_price("ghost") {
            Err(PricingError::TokenNotFound(token)) => assert_eq!(token, "ghost"),
            other => panic!("expected TokenNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn known_token_without_a_route_has_no_path() {
        let tokens = StaticTokenProvider::new(vec![
            TokenRecord::base("usdc", 6),
            TokenRecord::base("x", 6),
            TokenRecord::base("island", 18),
            TokenRecord::pool("lp", 6, PoolLeg::new("x", 1_000_000), PoolLeg::new("usdc", 500_000_000)),
        ]);
        let service = PricingService::new(Settings::for_numeraire("usdc"), Arc::new(tokens), PriceFeedSet::new());
        service.refresh_tokens().await.expect("tokens");
        service.refresh_liquidity_graph().await.expect("graph");

        match service.resolve_token_price("island") {
            Err(PricingError::PathNotFound { token, attempted_hops, .. }) => {
                assert_eq!(token, "island");
                assert_eq!(attempted_hops, service.settings().graph.max_hops);
            }
            other => panic!("expected PathNotFound, got {:?}", other),
        }
        assert!(service.resolve_token_price("x").is_ok());
    }
}
