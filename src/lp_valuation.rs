//! # LP Intrinsic Value
//!
//! Values one whole LP token (`10^decimals` atomic units) from its pool's reserves and
//! the resolved prices of its two legs.
//!
//! ## Methods
//!
//! **Reserve ratio** (always available when the preconditions hold):
//! ```text
//! total_usd = reserve_a_dec * price_a + reserve_b_dec * price_b
//! supply    = sqrt(reserve_a * reserve_b) / 10^lp_decimals
//! value     = total_usd / supply
//! ```
//!
//! **Redemption quote** (when a [`RedemptionQuoter`] is configured): redeem one whole LP
//! token and value the returned leg amounts. Authoritative when it answers in time;
//! the reserve-ratio value is the fallback on absence, error or timeout.
//!
//! When both methods produce a value their relative divergence is attached to the
//! result and flagged against `valuation.divergence_alert_bps`, never reconciled.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::PricingError;
use crate::settings::ValuationConfig;
use crate::token_metadata::TokenUniverse;
use crate::types::conversions::{atomic_to_decimal, decimal_scale, unit_amount};
use crate::types::{LpValuation, PoolLeg, PriceBook, PricePoint, TokenRecord, ValuationMethod};

/// Leg amounts returned for redeeming LP units, in atomic units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedemptionQuote {
    pub amount_a: u128,
    pub amount_b: u128,
}

/// Answers "what would redeeming `lp_amount` atomic LP units return?".
#[async_trait]
pub trait RedemptionQuoter: Send + Sync {
    async fn quote(&self, pool: &TokenRecord, lp_amount: u128) -> Result<RedemptionQuote>;
}

/// Everything a valuation needs, checked up front.
struct ValuationInputs<'a> {
    pool: &'a TokenRecord,
    leg_a: &'a PoolLeg,
    leg_b: &'a PoolLeg,
    decimals_a: u8,
    decimals_b: u8,
    price_a: PricePoint,
    price_b: PricePoint,
}

impl ValuationInputs<'_> {
    fn leg_usd(&self, amount_a: u128, amount_b: u128) -> f64 {
        atomic_to_decimal(amount_a, self.decimals_a) * self.price_a.usd
            + atomic_to_decimal(amount_b, self.decimals_b) * self.price_b.usd
    }

    fn confidence(&self) -> f64 {
        self.price_a.confidence.min(self.price_b.confidence)
    }
}

pub struct LpValuator {
    universe: Arc<TokenUniverse>,
    quoter: Option<Arc<dyn RedemptionQuoter>>,
    config: ValuationConfig,
}

impl LpValuator {
    pub fn new(universe: Arc<TokenUniverse>, config: ValuationConfig) -> Self {
        Self {
            universe,
            quoter: None,
            config,
        }
    }

    pub fn with_quoter(mut self, quoter: Arc<dyn RedemptionQuoter>) -> Self {
        self.quoter = Some(quoter);
        self
    }

    pub fn universe(&self) -> &TokenUniverse {
        &self.universe
    }

    fn inputs<'a>(&'a self, token: &str, prices: &PriceBook) -> Result<ValuationInputs<'a>, PricingError> {
        let pool = self
            .universe
            .get(token)
            .ok_or_else(|| PricingError::TokenNotFound(token.to_string()))?;
        let (leg_a, leg_b) = pool
            .pool_legs()
            .ok_or_else(|| PricingError::TokenNotFound(token.to_string()))?;

        let record_a = self
            .universe
            .get(&leg_a.token)
            .ok_or_else(|| PricingError::TokenNotFound(leg_a.token.clone()))?;
        let record_b = self
            .universe
            .get(&leg_b.token)
            .ok_or_else(|| PricingError::TokenNotFound(leg_b.token.clone()))?;

        for leg in [leg_a, leg_b] {
            if leg.reserve == 0 {
                return Err(PricingError::ZeroReserve {
                    pool: pool.id.clone(),
                    leg: leg.token.clone(),
                });
            }
        }

        let price_of = |leg: &PoolLeg| {
            prices.get(&leg.token).ok_or_else(|| PricingError::MissingDependency {
                token: pool.id.clone(),
                missing: leg.token.clone(),
            })
        };
        let price_a = price_of(leg_a)?;
        let price_b = price_of(leg_b)?;

        Ok(ValuationInputs {
            pool,
            leg_a,
            leg_b,
            decimals_a: record_a.decimals,
            decimals_b: record_b.decimals,
            price_a,
            price_b,
        })
    }

    /// Reserve-ratio value of one whole LP token, with its confidence.
    pub fn reserve_ratio_value(&self, token: &str, prices: &PriceBook) -> Result<PricePoint, PricingError> {
        let inputs = self.inputs(token, prices)?;
        let usd = reserve_ratio(&inputs).ok_or_else(|| PricingError::MissingDependency {
            token: token.to_string(),
            missing: inputs.leg_a.token.clone(),
        })?;
        Ok(PricePoint::new(usd, inputs.confidence()))
    }

    /// Values `token` against `prices`. Preconditions that fail yield an error, never a guess.
    pub async fn valuate(&self, token: &str, prices: &PriceBook) -> Result<LpValuation, PricingError> {
        let inputs = self.inputs(token, prices)?;
        let reserve_value = reserve_ratio(&inputs);

        let quote_value = match self.quote_value(&inputs).await {
            Ok(v) => Some(v),
            Err(e) => {
                if self.quoter.is_some() {
                    debug!("Falling back to reserve ratio for {}: {}", inputs.pool.label(), e);
                    crate::metrics::increment_quote_fallbacks();
                }
                None
            }
        };

        let (usd_price, method) = match (quote_value, reserve_value) {
            (Some(q), _) => (q, ValuationMethod::RedemptionQuote),
            (None, Some(r)) => (r, ValuationMethod::ReserveRatio),
            (None, None) => {
                return Err(PricingError::MissingDependency {
                    token: token.to_string(),
                    missing: inputs.leg_a.token.clone(),
                })
            }
        };

        let method_divergence = match (quote_value, reserve_value) {
            (Some(q), Some(r)) if r > 0.0 => Some((q - r).abs() / r),
            _ => None,
        };
        let divergence_flagged = match (method_divergence, self.config.divergence_alert_bps) {
            (Some(div), Some(bps)) if div * 10_000.0 > bps as f64 => {
                warn!(
                    "LP {} valuation methods disagree by {:.2} bps (alert at {} bps): quote={:?} reserve_ratio={:?}",
                    inputs.pool.label(),
                    div * 10_000.0,
                    bps,
                    quote_value,
                    reserve_value
                );
                crate::metrics::increment_divergence_alerts();
                true
            }
            _ => false,
        };

        let numeraire_ratio = self
            .config
            .reference_asset
            .as_deref()
            .and_then(|asset| prices.usd(asset))
            .map(|ref_usd| usd_price / ref_usd);

        Ok(LpValuation {
            token: inputs.pool.id.clone(),
            usd_price,
            confidence: inputs.confidence(),
            numeraire_ratio,
            method,
            method_divergence,
            divergence_flagged,
            decimals: inputs.pool.decimals,
            computed_at: Utc::now(),
        })
    }

    async fn quote_value(&self, inputs: &ValuationInputs<'_>) -> Result<f64, PricingError> {
        let token = inputs.pool.id.clone();
        let unavailable = |reason: String| PricingError::QuoteUnavailable {
            token: token.clone(),
            reason,
        };

        let quoter = self
            .quoter
            .as_ref()
            .ok_or_else(|| unavailable("no redemption quoter configured".to_string()))?;
        let unit = unit_amount(inputs.pool.decimals)
            .ok_or_else(|| unavailable(format!("{} decimals overflow the unit amount", inputs.pool.decimals)))?;

        let timeout = Duration::from_millis(self.config.quote_timeout_ms);
        let quote = match tokio::time::timeout(timeout, quoter.quote(inputs.pool, unit)).await {
            Ok(Ok(q)) => q,
            Ok(Err(e)) => return Err(unavailable(e.to_string())),
            Err(_) => return Err(unavailable(format!("timed out after {}ms", timeout.as_millis()))),
        };

        let value = inputs.leg_usd(quote.amount_a, quote.amount_b);
        if value.is_finite() && value > 0.0 {
            Ok(value)
        } else {
            Err(unavailable(format!("quote valued at {}", value)))
        }
    }
}

fn reserve_ratio(inputs: &ValuationInputs<'_>) -> Option<f64> {
    let total_usd = inputs.leg_usd(inputs.leg_a.reserve, inputs.leg_b.reserve);
    let supply = (inputs.leg_a.reserve as f64).sqrt() * (inputs.leg_b.reserve as f64).sqrt()
        / decimal_scale(inputs.pool.decimals);
    let value = total_usd / supply;
    if value.is_finite() && value > 0.0 {
        Some(value)
    } else {
        None
    }
}
