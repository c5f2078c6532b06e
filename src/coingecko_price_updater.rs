// src/coingecko_price_updater.rs

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::price_aggregator::PriceMap;
use crate::price_feeds::PriceSource;

// CoinGecko returns a map keyed by coin id, each value `{ "usd": price }`
type CoinGeckoPriceResponse = HashMap<String, CoinGeckoTokenPrice>;

#[derive(Debug, Deserialize)]
struct CoinGeckoTokenPrice {
    usd: Option<f64>,
}

/// Quotes from the CoinGecko `simple/price` endpoint.
///
/// `token_map` maps our token id to the CoinGecko coin id. Several tokens may share a
/// coin id (a native token and its bridged copy, for instance).
pub struct CoinGeckoSource {
    name: String,
    base_url: String,
    token_map: HashMap<String, String>,
    client: reqwest::Client,
}

impl CoinGeckoSource {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        token_map: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building CoinGecko HTTP client")?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_map,
            client,
        })
    }

    fn request_url(&self) -> Option<String> {
        let ids: BTreeSet<&str> = self.token_map.values().map(String::as_str).collect();
        if ids.is_empty() {
            return None;
        }
        let ids_param = ids.into_iter().collect::<Vec<_>>().join(",");
        Some(format!("{}/simple/price?ids={}&vs_currencies=usd", self.base_url, ids_param))
    }
}

/// Maps a CoinGecko response back onto our token ids, dropping unusable quotes.
fn map_response(response: &CoinGeckoPriceResponse, token_map: &HashMap<String, String>) -> PriceMap {
    let mut prices = PriceMap::new();
    for (token, coin_id) in token_map {
        let Some(price) = response.get(coin_id).and_then(|p| p.usd) else {
            continue;
        };
        if price.is_finite() && price > 0.0 {
            prices.insert(token.clone(), price);
        } else {
            warn!("CoinGecko: invalid price for {} ({}): {}", token, coin_id, price);
        }
    }
    prices
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_prices(&self) -> Result<PriceMap> {
        let Some(url) = self.request_url() else {
            return Ok(PriceMap::new());
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow!("HTTP request failed: {}", e))?;

        if !response.status().is_success() {
            if response.status() == 429 {
                return Err(anyhow!("Rate limited (429)"));
            }
            return Err(anyhow!("HTTP error: {}", response.status()));
        }

        let data: CoinGeckoPriceResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("JSON parse failed: {}", e))?;

        let prices = map_response(&data, &self.token_map);
        debug!("CoinGecko {}: {} of {} tokens priced", self.name, prices.len(), self.token_map.len());
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_map() -> HashMap<String, String> {
        [
            ("usdc", "usd-coin"),
            ("usdc.e", "usd-coin"),
            ("eth", "ethereum"),
            ("junk", "junk-coin"),
        ]
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
    }

    #[test]
    fn response_maps_shared_ids_to_every_token() {
        let raw = r#"{"usd-coin":{"usd":0.9998},"ethereum":{"usd":2450.5},"junk-coin":{"usd":0.0}}"#;
        let response: CoinGeckoPriceResponse = serde_json::from_str(raw).expect("response");
        let prices = map_response(&response, &token_map());

        assert_eq!(prices["usdc"], 0.9998);
        assert_eq!(prices["usdc.e"], 0.9998);
        assert_eq!(prices["eth"], 2450.5);
        assert!(!prices.contains_key("junk"));
    }

    #[test]
    fn request_url_deduplicates_ids() {
        let source = CoinGeckoSource::new("cg", "https://example.test/api/v3/", token_map(), Duration::from_secs(1))
            .expect("client");
        let url = source.request_url().expect("url");
        assert_eq!(
            url,
            "https://example.test/api/v3/simple/price?ids=ethereum,junk-coin,usd-coin&vs_currencies=usd"
        );
    }

    #[tokio::test]
    async fn empty_token_map_skips_the_request() {
        let source = CoinGeckoSource::new("cg", "http://127.0.0.1:1", HashMap::new(), Duration::from_millis(50))
            .expect("client");
        assert!(source.fetch_prices().await.expect("empty").is_empty());
    }
}
