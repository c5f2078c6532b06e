use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;

use crate::price_aggregator::{MergeStrategy, NumeraireAlias};

#[derive(Debug, Deserialize, Clone)]
pub struct Aggregation {
    #[serde(default)]
    pub strategy: MergeStrategy,
    /// Per-source fetch timeout unless the source overrides it
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
    #[serde(default)]
    pub numeraire_aliases: Vec<NumeraireAlias>,
}

fn default_source_timeout_ms() -> u64 {
    2000
}

impl Default for Aggregation {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::default(),
            source_timeout_ms: default_source_timeout_ms(),
            numeraire_aliases: Vec::new(),
        }
    }
}

/// Upstream price source definition.
///
/// `tokens` maps our token id to the upstream key (CoinGecko id, DefiLlama `chain:address`
/// or `coingecko:<id>` key). Static sources carry their prices directly.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    CoinGecko {
        name: String,
        #[serde(default = "default_coingecko_url")]
        base_url: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        tokens: HashMap<String, String>,
    },
    DefiLlama {
        name: String,
        #[serde(default = "default_defillama_url")]
        base_url: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        /// Quotes older than this are dropped by the source
        #[serde(default = "default_defillama_max_age_secs")]
        max_age_secs: u64,
        #[serde(default)]
        tokens: HashMap<String, String>,
    },
    Static {
        name: String,
        #[serde(default)]
        prices: HashMap<String, f64>,
    },
}

fn default_coingecko_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}
fn default_defillama_url() -> String {
    "https://coins.llama.fi".to_string()
}
fn default_defillama_max_age_secs() -> u64 {
    60
}

impl SourceConfig {
    pub fn name(&self) -> &str {
        match self {
            SourceConfig::CoinGecko { name, .. }
            | SourceConfig::DefiLlama { name, .. }
            | SourceConfig::Static { name, .. } => name,
        }
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        match self {
            SourceConfig::CoinGecko { timeout_ms, .. } | SourceConfig::DefiLlama { timeout_ms, .. } => *timeout_ms,
            SourceConfig::Static { .. } => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    /// Anchor token every multi-hop price is resolved against
    pub numeraire: String,
    /// USD price of the numeraire when the feeds do not report it
    #[serde(default = "default_numeraire_usd_price")]
    pub numeraire_usd_price: f64,
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    /// Confidence multiplier applied per hop
    #[serde(default = "default_hop_decay")]
    pub hop_decay: f64,
    /// Bottleneck liquidity (in weight units) at which the liquidity factor reaches 0.5
    #[serde(default = "default_liquidity_half_confidence")]
    pub liquidity_half_confidence: f64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_stale_weight_factor")]
    pub stale_weight_factor: f64,
    #[serde(default = "default_exclude_after_secs")]
    pub exclude_after_secs: u64,
}

fn default_numeraire_usd_price() -> f64 {
    1.0
}
fn default_max_hops() -> usize {
    4
}
fn default_hop_decay() -> f64 {
    0.9
}
fn default_liquidity_half_confidence() -> f64 {
    10_000.0
}
fn default_stale_after_secs() -> u64 {
    300
}
fn default_stale_weight_factor() -> f64 {
    0.25
}
fn default_exclude_after_secs() -> u64 {
    3600
}

impl GraphConfig {
    pub fn with_numeraire(numeraire: impl Into<String>) -> Self {
        Self {
            numeraire: numeraire.into(),
            numeraire_usd_price: default_numeraire_usd_price(),
            max_hops: default_max_hops(),
            hop_decay: default_hop_decay(),
            liquidity_half_confidence: default_liquidity_half_confidence(),
            stale_after_secs: default_stale_after_secs(),
            stale_weight_factor: default_stale_weight_factor(),
            exclude_after_secs: default_exclude_after_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValuationConfig {
    /// Bounded fan-out for same-level valuations (and therefore redemption quotes)
    #[serde(default = "default_max_concurrent_quotes")]
    pub max_concurrent_quotes: usize,
    #[serde(default = "default_quote_timeout_ms")]
    pub quote_timeout_ms: u64,
    /// Alert threshold for reserve-ratio vs quote disagreement. No flagging when unset.
    #[serde(default)]
    pub divergence_alert_bps: Option<u32>,
    /// Asset the fixed-numeraire ratio of LP valuations is expressed in
    #[serde(default)]
    pub reference_asset: Option<String>,
    /// Confidence assigned to plain USD base prices handed to `calculate_all_lp_values`
    #[serde(default = "default_base_price_confidence")]
    pub base_price_confidence: f64,
}

fn default_max_concurrent_quotes() -> usize {
    8
}
fn default_quote_timeout_ms() -> u64 {
    1500
}
fn default_base_price_confidence() -> f64 {
    1.0
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_quotes: default_max_concurrent_quotes(),
            quote_timeout_ms: default_quote_timeout_ms(),
            divergence_alert_bps: None,
            reference_asset: None,
            base_price_confidence: default_base_price_confidence(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DataFiles {
    /// JSON array of token records
    #[serde(default)]
    pub tokens_file: Option<String>,
    /// JSON array of pool reserve snapshots
    #[serde(default)]
    pub pools_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metrics {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9000
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    pub graph: GraphConfig,
    #[serde(default)]
    pub valuation: ValuationConfig,
    #[serde(default)]
    pub data: DataFiles,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub metrics: Metrics,
}

impl Settings {
    /// Loads `Config.toml` from the working directory, applies `LP_PRICING_*` overrides and validates.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_path("Config.toml")
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = Config::builder()
            .add_source(File::from(path))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        apply_env_overrides(&mut settings);
        settings.validate()?;
        Ok(settings)
    }

    /// Minimal settings for embedding the SDK without a config file.
    pub fn for_numeraire(numeraire: impl Into<String>) -> Self {
        Self {
            aggregation: Aggregation::default(),
            sources: Vec::new(),
            graph: GraphConfig::with_numeraire(numeraire),
            valuation: ValuationConfig::default(),
            data: DataFiles::default(),
            log: LogSettings::default(),
            metrics: Metrics::default(),
        }
    }

    /// Rejects malformed values. A failure here is the only fatal error in the SDK.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::Message(msg));

        if self.graph.numeraire.trim().is_empty() {
            return fail("graph.numeraire must not be empty".to_string());
        }
        if self.graph.max_hops == 0 {
            return fail("graph.max_hops must be at least 1".to_string());
        }
        if !(self.graph.hop_decay > 0.0 && self.graph.hop_decay <= 1.0) {
            return fail(format!("graph.hop_decay must be in (0, 1], got {}", self.graph.hop_decay));
        }
        if !(self.graph.stale_weight_factor > 0.0 && self.graph.stale_weight_factor <= 1.0) {
            return fail(format!(
                "graph.stale_weight_factor must be in (0, 1], got {}",
                self.graph.stale_weight_factor
            ));
        }
        if !(self.graph.liquidity_half_confidence.is_finite() && self.graph.liquidity_half_confidence > 0.0) {
            return fail("graph.liquidity_half_confidence must be a positive number".to_string());
        }
        if !(self.graph.numeraire_usd_price.is_finite() && self.graph.numeraire_usd_price > 0.0) {
            return fail("graph.numeraire_usd_price must be a positive number".to_string());
        }
        if self.graph.exclude_after_secs < self.graph.stale_after_secs {
            return fail("graph.exclude_after_secs must be >= graph.stale_after_secs".to_string());
        }
        if self.aggregation.source_timeout_ms == 0 {
            return fail("aggregation.source_timeout_ms must be positive".to_string());
        }
        if self.valuation.max_concurrent_quotes == 0 {
            return fail("valuation.max_concurrent_quotes must be at least 1".to_string());
        }
        if self.valuation.quote_timeout_ms == 0 {
            return fail("valuation.quote_timeout_ms must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.valuation.base_price_confidence) {
            return fail("valuation.base_price_confidence must be in [0, 1]".to_string());
        }

        let mut names = std::collections::HashSet::new();
        for source in &self.sources {
            if source.name().trim().is_empty() {
                return fail("every source needs a non-empty name".to_string());
            }
            if !names.insert(source.name().to_string()) {
                return fail(format!("duplicate source name '{}'", source.name()));
            }
        }
        for alias in &self.aggregation.numeraire_aliases {
            if alias.bare == alias.qualified {
                return fail(format!("numeraire alias '{}' maps to itself", alias.bare));
            }
        }
        Ok(())
    }
}

fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(numeraire) = env::var("LP_PRICING_NUMERAIRE") {
        let trimmed = numeraire.trim();
        if !trimmed.is_empty() {
            settings.graph.numeraire = trimmed.to_string();
        }
    }

    if let Ok(raw) = env::var("LP_PRICING_STRATEGY") {
        match serde_json::from_value::<MergeStrategy>(serde_json::Value::String(raw.trim().to_string())) {
            Ok(strategy) => settings.aggregation.strategy = strategy,
            Err(e) => {
                eprintln!("Ignoring LP_PRICING_STRATEGY='{}': {}", raw, e);
            }
        }
    }

    if let Ok(raw) = env::var("LP_PRICING_MAX_HOPS") {
        match raw.trim().parse::<usize>() {
            Ok(hops) => settings.graph.max_hops = hops,
            Err(e) => eprintln!("Ignoring LP_PRICING_MAX_HOPS='{}': {}", raw, e),
        }
    }

    if let Ok(path) = env::var("LP_PRICING_TOKENS_FILE") {
        if !path.trim().is_empty() {
            settings.data.tokens_file = Some(path.trim().to_string());
        }
    }
    if let Ok(path) = env::var("LP_PRICING_POOLS_FILE") {
        if !path.trim().is_empty() {
            settings.data.pools_file = Some(path.trim().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let settings = Settings::for_numeraire("usdc");
        assert!(settings.validate().is_ok());
        assert_eq!(settings.graph.max_hops, 4);
        assert_eq!(settings.aggregation.strategy, MergeStrategy::Average);
    }

    #[test]
    fn zero_hops_is_rejected() {
        let mut settings = Settings::for_numeraire("usdc");
        settings.graph.max_hops = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn duplicate_source_names_are_rejected() {
        let mut settings = Settings::for_numeraire("usdc");
        settings.sources = vec![
            SourceConfig::Static { name: "fixed".into(), prices: HashMap::new() },
            SourceConfig::Static { name: "fixed".into(), prices: HashMap::new() },
        ];
        assert!(settings.validate().is_err());
    }
}
