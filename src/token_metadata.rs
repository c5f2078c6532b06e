//! Token metadata: the provider seam and the in-memory token universe built from it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use log::{info, warn};
use std::path::PathBuf;

use crate::types::{TokenId, TokenRecord};

/// Supplies the token universe (decimals, kind, mirror and pool linkage).
#[async_trait]
pub trait TokenMetadataProvider: Send + Sync {
    async fn list_tokens(&self) -> Result<Vec<TokenRecord>>;
}

/// Immutable snapshot of every known token, in provider order.
#[derive(Debug, Clone, Default)]
pub struct TokenUniverse {
    tokens: IndexMap<TokenId, TokenRecord>,
}

impl TokenUniverse {
    /// Builds the universe; a later record with a duplicate id replaces the earlier one.
    pub fn from_records(records: Vec<TokenRecord>) -> Self {
        let mut tokens = IndexMap::with_capacity(records.len());
        for record in records {
            if let Some(previous) = tokens.insert(record.id.clone(), record) {
                warn!("Duplicate token metadata for {}, keeping the latest record", previous.id);
            }
        }
        Self { tokens }
    }

    pub fn get(&self, id: &str) -> Option<&TokenRecord> {
        self.tokens.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tokens.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenRecord> {
        self.tokens.values()
    }

    pub fn pools(&self) -> impl Iterator<Item = &TokenRecord> {
        self.tokens.values().filter(|r| r.is_pool())
    }

    pub fn mirrors(&self) -> impl Iterator<Item = &TokenRecord> {
        self.tokens.values().filter(|r| r.is_mirror())
    }

    pub fn is_pool(&self, id: &str) -> bool {
        self.get(id).map(TokenRecord::is_pool).unwrap_or(false)
    }
}

/// Fixed token list, mostly for tests and embedding.
pub struct StaticTokenProvider {
    records: Vec<TokenRecord>,
}

impl StaticTokenProvider {
    pub fn new(records: Vec<TokenRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl TokenMetadataProvider for StaticTokenProvider {
    async fn list_tokens(&self) -> Result<Vec<TokenRecord>> {
        Ok(self.records.clone())
    }
}

/// Reads a JSON array of [`TokenRecord`] from disk on every call.
pub struct JsonFileTokenProvider {
    path: PathBuf,
}

impl JsonFileTokenProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenMetadataProvider for JsonFileTokenProvider {
    async fn list_tokens(&self) -> Result<Vec<TokenRecord>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("reading token metadata from {}", self.path.display()))?;
        let records: Vec<TokenRecord> = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing token metadata in {}", self.path.display()))?;
        info!("Loaded {} token records from {}", records.len(), self.path.display());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PoolLeg;
    use std::io::Write;

    #[test]
    fn universe_keeps_latest_duplicate_and_filters_kinds() {
        let universe = TokenUniverse::from_records(vec![
            TokenRecord::base("eth", 18),
            TokenRecord::base("usdc", 6),
            TokenRecord::mirror("eth.arb", 18, "eth"),
            TokenRecord::pool("lp", 18, PoolLeg::new("eth", 1), PoolLeg::new("usdc", 1)),
            TokenRecord::base("usdc", 8),
        ]);
        assert_eq!(universe.len(), 4);
        assert_eq!(universe.get("usdc").map(|r| r.decimals), Some(8));
        assert_eq!(universe.pools().count(), 1);
        assert_eq!(universe.mirrors().count(), 1);
        assert!(universe.is_pool("lp"));
        assert!(!universe.is_pool("missing"));
    }

    #[tokio::test]
    async fn json_file_provider_reads_records() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"[{{"id":"eth","decimals":18,"kind":"base"}},{{"id":"eth.arb","decimals":18,"kind":{{"mirror":{{"base":"eth"}}}}}}]"#
        )
        .expect("write");

        let provider = JsonFileTokenProvider::new(file.path());
        let records = provider.list_tokens().await.expect("records");
        assert_eq!(records.len(), 2);
        assert!(records[1].is_mirror());
    }

    #[tokio::test]
    async fn json_file_provider_reports_missing_file() {
        let provider = JsonFileTokenProvider::new("/definitely/not/here.json");
        assert!(provider.list_tokens().await.is_err());
    }
}
