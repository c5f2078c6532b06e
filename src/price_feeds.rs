// src/price_feeds.rs

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::coingecko_price_updater::CoinGeckoSource;
use crate::errors::PricingError;
use crate::external_price_updater::DefiLlamaSource;
use crate::price_aggregator::PriceMap;
use crate::settings::{Settings, SourceConfig};

/// One upstream USD price feed.
///
/// A source returns whatever subset of tokens it knows; missing tokens are simply
/// absent from the map. Errors are recorded by [`PriceFeedSet`] and never abort a cycle.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_prices(&self) -> Result<PriceMap>;
}

/// Result of one source fetch within a cycle.
#[derive(Debug, Clone)]
pub struct SourceFetch {
    pub source: String,
    /// Empty when the source failed or timed out
    pub prices: PriceMap,
    pub error: Option<PricingError>,
    pub elapsed: Duration,
}

impl SourceFetch {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Ordered set of price sources, queried concurrently with a per-source timeout.
///
/// Order is priority order: the first source is "A" for the merge strategies.
#[derive(Clone, Default)]
pub struct PriceFeedSet {
    sources: Vec<(Arc<dyn PriceSource>, Duration)>,
}

impl PriceFeedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Arc<dyn PriceSource>, timeout: Duration) -> Self {
        self.sources.push((source, timeout));
        self
    }

    pub fn push(&mut self, source: Arc<dyn PriceSource>, timeout: Duration) {
        self.sources.push((source, timeout));
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|(s, _)| s.name().to_string()).collect()
    }

    /// Queries every source concurrently. Results come back in source order.
    ///
    /// A failing or slow source yields an empty map plus a `SourceUnavailable` error.
    pub async fn fetch_all(&self) -> Vec<SourceFetch> {
        let futures = self.sources.iter().map(|(source, timeout)| {
            let source = Arc::clone(source);
            let timeout = *timeout;
            async move {
                let start = Instant::now();
                let outcome = tokio::time::timeout(timeout, source.fetch_prices()).await;
                let elapsed = start.elapsed();
                let name = source.name().to_string();

                let (prices, error) = match outcome {
                    Ok(Ok(prices)) => {
                        debug!("Source {} returned {} prices in {:?}", name, prices.len(), elapsed);
                        (prices, None)
                    }
                    Ok(Err(e)) => {
                        warn!("Source {} failed: {}", name, e);
                        (
                            PriceMap::new(),
                            Some(PricingError::SourceUnavailable {
                                feed: name.clone(),
                                reason: e.to_string(),
                            }),
                        )
                    }
                    Err(_) => {
                        warn!("Source {} timed out after {:?}", name, timeout);
                        (
                            PriceMap::new(),
                            Some(PricingError::SourceUnavailable {
                                feed: name.clone(),
                                reason: format!("timed out after {}ms", timeout.as_millis()),
                            }),
                        )
                    }
                };

                crate::metrics::record_source_fetch(&name, error.is_none(), elapsed);
                SourceFetch {
                    source: name,
                    prices,
                    error,
                    elapsed,
                }
            }
        });

        join_all(futures).await
    }
}

/// Fixed price table. Useful as a last-resort source and in tests.
pub struct StaticPriceSource {
    name: String,
    prices: PriceMap,
}

impl StaticPriceSource {
    pub fn new(name: impl Into<String>, prices: PriceMap) -> Self {
        Self {
            name: name.into(),
            prices,
        }
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_prices(&self) -> Result<PriceMap> {
        Ok(self.prices.clone())
    }
}

/// Builds the configured sources in declaration order.
pub fn build_sources(settings: &Settings) -> Result<PriceFeedSet> {
    let default_timeout = settings.aggregation.source_timeout_ms;
    let mut set = PriceFeedSet::new();

    for cfg in &settings.sources {
        let timeout = Duration::from_millis(cfg.timeout_ms().unwrap_or(default_timeout));
        let source: Arc<dyn PriceSource> = match cfg {
            SourceConfig::CoinGecko {
                name, base_url, tokens, ..
            } => Arc::new(CoinGeckoSource::new(name.clone(), base_url.clone(), tokens.clone(), timeout)?),
            SourceConfig::DefiLlama {
                name,
                base_url,
                max_age_secs,
                tokens,
                ..
            } => Arc::new(DefiLlamaSource::new(
                name.clone(),
                base_url.clone(),
                tokens.clone(),
                Duration::from_secs(*max_age_secs),
                timeout,
            )?),
            SourceConfig::Static { name, prices } => Arc::new(StaticPriceSource::new(name.clone(), prices.clone())),
        };
        set.push(source, timeout);
    }

    info!("Configured {} price sources: {:?}", set.len(), set.names());
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowSource;

    #[async_trait]
    impl PriceSource for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch_prices(&self) -> Result<PriceMap> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(PriceMap::new())
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl PriceSource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        async fn fetch_prices(&self) -> Result<PriceMap> {
            Err(anyhow::anyhow!("HTTP error: 503"))
        }
    }

    fn fixed(name: &str, entries: &[(&str, f64)]) -> Arc<dyn PriceSource> {
        let prices = entries.iter().map(|(t, p)| (t.to_string(), *p)).collect();
        Arc::new(StaticPriceSource::new(name, prices))
    }

    #[tokio::test]
    async fn slow_source_times_out_without_blocking_others() {
        let set = PriceFeedSet::new()
            .with_source(Arc::new(SlowSource), Duration::from_millis(20))
            .with_source(fixed("fixed", &[("eth", 2000.0)]), Duration::from_millis(200));

        let started = Instant::now();
        let results = set.fetch_all().await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(results[0].source, "slow");
        assert!(results[0].prices.is_empty());
        assert!(matches!(results[0].error, Some(PricingError::SourceUnavailable { .. })));
        assert!(results[1].is_ok());
        assert_eq!(results[1].prices["eth"], 2000.0);
    }

    #[tokio::test]
    async fn failing_sources_yield_empty_maps() {
        let set = PriceFeedSet::new()
            .with_source(Arc::new(BrokenSource), Duration::from_millis(100))
            .with_source(Arc::new(BrokenSource), Duration::from_millis(100));
        let results = set.fetch_all().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.prices.is_empty() && !r.is_ok()));
    }

    #[test]
    fn static_sources_build_from_settings() {
        let mut settings = Settings::for_numeraire("usdc");
        settings.sources = vec![SourceConfig::Static {
            name: "fixed".into(),
            prices: [("usdc".to_string(), 1.0)].into_iter().collect(),
        }];
        let set = build_sources(&settings).expect("sources");
        assert_eq!(set.names(), vec!["fixed".to_string()]);
    }
}
