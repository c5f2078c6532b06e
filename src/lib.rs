//! # LP Pricing SDK
//!
//! A Rust library for resolving USD valuations of a heterogeneous token universe:
//! independently priced BASE tokens, MIRROR tokens that track a base token 1:1 on
//! another execution domain, and POOL (LP) tokens over two-asset reserve pairs that
//! may nest other LP tokens.
//!
//! ## Overview
//!
//! - **Aggregation**: merges partial price maps from several upstream sources under a
//!   configurable strategy, reconciling aliased numeraire keys and mirror tokens
//! - **Multi-hop pricing**: derives missing prices from reserve ratios along the best
//!   path to a numeraire in a liquidity graph
//! - **LP valuation**: values LP tokens from reserves and leg prices (or an exact
//!   redemption quote), in dependency order so nested LP tokens see their legs first
//!
//! ## Architecture
//!
//! ### Data Layer
//! Token metadata and pool reserves come from async provider traits; upstream quotes
//! come from [`price_feeds::PriceSource`] implementations queried concurrently.
//!
//! ### Pricing Layer
//! [`price_aggregator`], [`liquidity_graph`], [`lp_dependency_graph`], [`lp_valuation`]
//! and [`level_processor`] are independent and testable in isolation.
//!
//! ### Service Layer
//! [`PricingService`] owns swappable snapshots ([`state_cache`]) and the last-known price
//! cache ([`price_cache`]), and exposes the pricing operations.

// Core Types
/// Token, quote and valuation types
pub mod types;
/// Pricing error taxonomy
pub mod errors;

// Collaborators
/// Token metadata provider trait and token universe
pub mod token_metadata;
/// Pool reserve snapshots and providers
pub mod pools;
/// Price source trait and concurrent fetching
pub mod price_feeds;
/// CoinGecko price source
pub mod coingecko_price_updater;
/// DefiLlama price source
pub mod external_price_updater;

// Pricing
/// Multi-source price aggregation
pub mod price_aggregator;
/// Liquidity graph and multi-hop pricing
pub mod liquidity_graph;
/// LP dependency levels and cycle detection
pub mod lp_dependency_graph;
/// LP intrinsic value calculation
pub mod lp_valuation;
/// Level-ordered LP batch processing
pub mod level_processor;

// State & Service
/// Last-known price cache
pub mod price_cache;
/// Swappable state snapshots
pub mod state_cache;
/// Pricing service facade
pub mod pricing_service;

// Infrastructure
/// Metrics and observability
pub mod metrics;

// Settings & Configuration
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use errors::PricingError;
pub use price_aggregator::{aggregate, MergeStrategy};
pub use pricing_service::{CycleReport, PricingService};
pub use settings::Settings;
pub use types::{LpValuation, PriceQuote, TokenRecord};
