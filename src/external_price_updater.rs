// src/external_price_updater.rs

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::price_aggregator::PriceMap;
use crate::price_feeds::PriceSource;

#[derive(Debug, Deserialize)]
struct DefiLlamaPriceResponse {
    coins: HashMap<String, DefiLlamaCoin>,
}

#[derive(Debug, Deserialize)]
struct DefiLlamaCoin {
    price: f64,
    /// Seconds since the epoch
    timestamp: Option<u64>,
}

/// Quotes from the DefiLlama `prices/current` endpoint.
///
/// `token_map` maps our token id to a DefiLlama coin key (`chain:address` or
/// `coingecko:<id>`). Quotes older than `max_age` are dropped.
pub struct DefiLlamaSource {
    name: String,
    base_url: String,
    token_map: HashMap<String, String>,
    max_age: Duration,
    client: reqwest::Client,
}

impl DefiLlamaSource {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        token_map: HashMap<String, String>,
        max_age: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building DefiLlama HTTP client")?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_map,
            max_age,
            client,
        })
    }

    fn request_url(&self) -> Option<String> {
        let keys: BTreeSet<&str> = self.token_map.values().map(String::as_str).collect();
        if keys.is_empty() {
            return None;
        }
        let keys_param = keys.into_iter().collect::<Vec<_>>().join(",");
        Some(format!("{}/prices/current/{}", self.base_url, keys_param))
    }
}

fn map_response(
    response: &DefiLlamaPriceResponse,
    token_map: &HashMap<String, String>,
    max_age: Duration,
    now_secs: u64,
) -> PriceMap {
    let mut prices = PriceMap::new();
    for (token, key) in token_map {
        let Some(coin) = response.coins.get(key) else {
            continue;
        };
        if !(coin.price.is_finite() && coin.price > 0.0) {
            warn!("DefiLlama: invalid price for {} ({}): {}", token, key, coin.price);
            continue;
        }
        // Quotes without a timestamp are accepted as current
        if let Some(ts) = coin.timestamp {
            let age = now_secs.saturating_sub(ts);
            if age > max_age.as_secs() {
                debug!("DefiLlama: dropping stale quote for {} ({}s old)", token, age);
                continue;
            }
        }
        prices.insert(token.clone(), coin.price);
    }
    prices
}

#[async_trait]
impl PriceSource for DefiLlamaSource {
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
            return Err(anyhow!("HTTP error: {}", response.status()));
        }

        let data: DefiLlamaPriceResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("JSON parse failed: {}", e))?;

        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let prices = map_response(&data, &self.token_map, self.max_age, now_secs);
        debug!("DefiLlama {}: {} of {} tokens priced", self.name, prices.len(), self.token_map.len());
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_and_invalid_quotes_are_dropped() {
        let raw = r#"{"coins":{
            "coingecko:ethereum":{"price":2450.0,"timestamp":1000},
            "arbitrum:0xabc":{"price":1.1,"timestamp":900},
            "coingecko:usd-coin":{"price":1.0},
            "coingecko:dead":{"price":-1.0,"timestamp":1000}
        }}"#;
        let response: DefiLlamaPriceResponse = serde_json::from_str(raw).expect("response");
        let token_map: HashMap<String, String> = [
            ("eth", "coingecko:ethereum"),
            ("arb", "arbitrum:0xabc"),
            ("usdc", "coingecko:usd-coin"),
            ("dead", "coingecko:dead"),
            ("missing", "coingecko:missing"),
        ]
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();

        let prices = map_response(&response, &token_map, Duration::from_secs(60), 1030);

        assert_eq!(prices.len(), 2);
        assert_eq!(prices["eth"], 2450.0);
        assert_eq!(prices["usdc"], 1.0);
    }

    #[test]
    fn request_url_joins_keys() {
        let token_map: HashMap<String, String> =
            [("eth".to_string(), "coingecko:ethereum".to_string())].into_iter().collect();
        let source = DefiLlamaSource::new(
            "llama",
            "https://coins.example/",
            token_map,
            Duration::from_secs(60),
            Duration::from_secs(1),
        )
        .expect("client");
        assert_eq!(
            source.request_url().as_deref(),
            Some("https://coins.example/prices/current/coingecko:ethereum")
        );
    }
}
