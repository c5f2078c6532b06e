//! Integration tests for the full pricing pipeline
//!
//! Drives `PricingService` through the public API with in-memory collaborators.

use anyhow::Result;
use async_trait::async_trait;
use lp_pricing_sdk::{
    errors::PricingError,
    pools::{PoolReserves, StaticPoolReserveProvider},
    price_aggregator::{MergeStrategy, PriceMap},
    price_feeds::{PriceFeedSet, PriceSource, StaticPriceSource},
    settings::Settings,
    token_metadata::StaticTokenProvider,
    types::{PoolLeg, PriceOrigin, TokenRecord},
    PricingService,
};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn prices(entries: &[(&str, f64)]) -> PriceMap {
    entries.iter().map(|(t, p)| (t.to_string(), *p)).collect()
}

fn fixed(name: &str, entries: &[(&str, f64)]) -> Arc<dyn PriceSource> {
    Arc::new(StaticPriceSource::new(name, prices(entries)))
}

fn reserves(pool: &str, a: &str, b: &str, ra: u128, rb: u128) -> PoolReserves {
    PoolReserves {
        pool: pool.to_string(),
        token_a: a.to_string(),
        token_b: b.to_string(),
        reserve_a: ra,
        reserve_b: rb,
        decimals_a: 6,
        decimals_b: 6,
        updated_at: chrono::Utc::now(),
    }
}

struct DownSource;

#[async_trait]
impl PriceSource for DownSource {
    fn name(&self) -> &str {
        "down"
    }

    async fn fetch_prices(&self) -> Result<PriceMap> {
        Err(anyhow::anyhow!("HTTP error: 502 Bad Gateway"))
    }
}

/// tokenY priced at $250 through tokenX ($500) against the numeraire
#[tokio::test]
async fn test_two_hop_price_through_the_service() {
    let tokens = StaticTokenProvider::new(vec![
        TokenRecord::base("usdc", 6),
        TokenRecord::base("x", 6),
        TokenRecord::base("y", 6),
    ]);
    let pools = StaticPoolReserveProvider::new(vec![
        reserves("p1", "x", "usdc", 1_000_000, 500_000_000),
        reserves("p2", "y", "x", 200_000_000, 100_000_000),
    ]);
    let feeds = PriceFeedSet::new().with_source(fixed("fixed", &[("usdc", 1.0)]), Duration::from_millis(200));
    let service = PricingService::new(Settings::for_numeraire("usdc"), Arc::new(tokens), feeds)
        .with_pool_provider(Arc::new(pools));

    let report = service.run_cycle().await.expect("cycle");

    let y = &report.graph_resolved["y"];
    assert!((y.usd_price - 250.0).abs() < 1e-9, "y = {}", y.usd_price);
    assert_eq!(y.origin, PriceOrigin::LiquidityPath { hops: 2 });
    let x = &report.graph_resolved["x"];
    assert!((x.usd_price - 500.0).abs() < 1e-9);
    assert!(x.confidence > y.confidence);
    assert_eq!(report.graph.edges, 2);
}

/// One LP token over $2 / $3 legs values at ≈ $4.9497
#[tokio::test]
async fn test_reserve_ratio_lp_value_through_the_service() {
    let tokens = StaticTokenProvider::new(vec![
        TokenRecord::base("a", 6),
        TokenRecord::base("b", 6),
        TokenRecord::pool("l1", 6, PoolLeg::new("a", 2_000_000), PoolLeg::new("b", 1_000_000)),
    ]);
    let service = PricingService::new(Settings::for_numeraire("b"), Arc::new(tokens), PriceFeedSet::new());
    service.refresh_tokens().await.expect("tokens");

    let result = service.calculate_all_lp_values(&prices(&[("a", 2.0), ("b", 3.0)])).await;

    let l1 = &result.valuations["l1"];
    assert!((l1.usd_price - 4.9497).abs() < 1e-4, "l1 = {}", l1.usd_price);
    assert!((l1.value_of(500_000) - l1.usd_price / 2.0).abs() < 1e-9);
    assert!(result.failures.is_empty());
}

/// A failed level-0 dependency removes its level-1 and level-2 dependents only
#[tokio::test]
async fn test_failed_dependency_cascades_without_affecting_others() {
    let tokens = StaticTokenProvider::new(vec![
        TokenRecord::base("a", 6),
        TokenRecord::base("b", 6),
        TokenRecord::base("dark", 6),
        TokenRecord::pool("bad0", 6, PoolLeg::new("dark", 1_000_000), PoolLeg::new("a", 1_000_000)),
        TokenRecord::pool("bad1", 6, PoolLeg::new("bad0", 1_000_000), PoolLeg::new("b", 1_000_000)),
        TokenRecord::pool("bad2", 6, PoolLeg::new("bad1", 1_000_000), PoolLeg::new("a", 1_000_000)),
        TokenRecord::pool("good0", 6, PoolLeg::new("a", 1_000_000), PoolLeg::new("b", 1_000_000)),
        TokenRecord::pool("good1", 6, PoolLeg::new("good0", 1_000_000), PoolLeg::new("a", 1_000_000)),
    ]);
    let service = PricingService::new(Settings::for_numeraire("a"), Arc::new(tokens), PriceFeedSet::new());
    service.refresh_tokens().await.expect("tokens");

    let stats = service.get_dependency_stats();
    assert_eq!(stats.total_pools, 5);
    assert_eq!(stats.level_count, 3);

    let result = service.calculate_all_lp_values(&prices(&[("a", 1.0), ("b", 1.0)])).await;

    assert!(result.valuations.contains_key("good0"));
    assert!(result.valuations.contains_key("good1"));
    for absent in ["bad0", "bad1", "bad2"] {
        assert!(!result.valuations.contains_key(absent), "{} must be absent", absent);
    }
    assert!(matches!(
        result.failures.get("bad0"),
        Some(PricingError::MissingDependency { missing, .. }) if missing == "dark"
    ));
}

#[tokio::test]
async fn test_unavailable_source_is_reported_not_fatal() {
    let tokens = StaticTokenProvider::new(vec![TokenRecord::base("eth", 18), TokenRecord::base("usdc", 6)]);
    let feeds = PriceFeedSet::new()
        .with_source(Arc::new(DownSource), Duration::from_millis(200))
        .with_source(fixed("a", &[("eth", 2000.0), ("usdc", 1.0)]), Duration::from_millis(200))
        .with_source(fixed("b", &[("eth", 2100.0)]), Duration::from_millis(200));
    let service = PricingService::new(Settings::for_numeraire("usdc"), Arc::new(tokens), feeds);
    service.refresh_tokens().await.expect("tokens");

    let average = service.aggregate_prices_with(MergeStrategy::Average).await;
    assert_eq!(average.prices["eth"], 2050.0);
    assert_eq!(average.source_failures.len(), 1);
    assert!(matches!(
        &average.source_failures[0],
        PricingError::SourceUnavailable { feed, .. } if feed == "down"
    ));

    let later_wins = service.aggregate_prices_with(MergeStrategy::PrimaryBOverrides).await;
    assert_eq!(later_wins.prices["eth"], 2100.0);
    assert_eq!(service.price_cache().get_price("eth"), Some(2100.0));
}

#[tokio::test]
async fn test_mirror_tracks_base_through_aggregation() {
    let tokens = StaticTokenProvider::new(vec![
        TokenRecord::base("eth", 18),
        TokenRecord::mirror("eth_l2", 18, "eth"),
    ]);
    let feeds = PriceFeedSet::new()
        .with_source(fixed("a", &[("eth", 2000.0), ("eth_l2", 1700.0)]), Duration::from_millis(200));
    let service = PricingService::new(Settings::for_numeraire("eth"), Arc::new(tokens), feeds);
    service.refresh_tokens().await.expect("tokens");

    let outcome = service.aggregate_prices().await;
    assert_eq!(outcome.prices["eth_l2"], outcome.prices["eth"]);
    assert!(outcome.unresolved_mirrors.is_empty());
}

#[tokio::test]
async fn test_service_from_settings_reads_json_data_files() {
    let mut tokens_file = tempfile::NamedTempFile::new().expect("tokens file");
    write!(
        tokens_file,
        r#"[
            {{"id":"usdc","decimals":6,"kind":"base"}},
            {{"id":"weth","decimals":18,"kind":"base"}},
            {{"id":"lp","decimals":18,"kind":{{"pool":{{
                "leg_a":{{"token":"weth","reserve":"1000000000000000000"}},
                "leg_b":{{"token":"usdc","reserve":2500000000}}
            }}}}}}
        ]"#
    )
    .expect("write tokens");
    let mut pools_file = tempfile::NamedTempFile::new().expect("pools file");
    write!(pools_file, "[]").expect("write pools");

    let mut settings = Settings::for_numeraire("usdc");
    settings.data.tokens_file = Some(tokens_file.path().display().to_string());
    settings.data.pools_file = Some(pools_file.path().display().to_string());
    settings.sources = vec![lp_pricing_sdk::settings::SourceConfig::Static {
        name: "pegged".to_string(),
        prices: HashMap::from([("usdc".to_string(), 1.0)]),
    }];

    let service = PricingService::from_settings(settings).expect("service");
    let report = service.run_cycle().await.expect("cycle");

    let weth = &report.graph_resolved["weth"];
    assert!((weth.usd_price - 2500.0).abs() < 1e-6, "weth = {}", weth.usd_price);
    assert!(report.lp.valuations.contains_key("lp"));
}
