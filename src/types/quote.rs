use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::conversions::atomic_to_decimal;
use super::token::TokenId;

/// Where a price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceOrigin {
    /// Merged from the upstream price feeds
    Aggregated,
    /// Copied from the base token of a MIRROR token
    Mirror,
    /// Derived from reserve ratios along a liquidity path
    LiquidityPath { hops: usize },
    /// LP intrinsic value from the constant-product supply estimate
    ReserveRatio,
    /// LP intrinsic value from an exact redemption quote
    RedemptionQuote,
}

impl std::fmt::Display for PriceOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceOrigin::Aggregated => write!(f, "aggregated"),
            PriceOrigin::Mirror => write!(f, "mirror"),
            PriceOrigin::LiquidityPath { hops } => write!(f, "liquidity_path({} hops)", hops),
            PriceOrigin::ReserveRatio => write!(f, "reserve_ratio"),
            PriceOrigin::RedemptionQuote => write!(f, "redemption_quote"),
        }
    }
}

/// A resolved USD price with its confidence. Recomputed every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub token: TokenId,
    pub usd_price: f64,
    /// Trust in `usd_price`, in `[0, 1]`
    pub confidence: f64,
    pub origin: PriceOrigin,
    pub computed_at: DateTime<Utc>,
}

/// Price plus confidence, the unit stored in a [`PriceBook`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub usd: f64,
    pub confidence: f64,
}

impl PricePoint {
    pub fn new(usd: f64, confidence: f64) -> Self {
        Self {
            usd,
            confidence: clamp_confidence(confidence),
        }
    }
}

/// Known USD prices keyed by token, each with a confidence.
///
/// The level-ordered LP processor reads one book per level and extends it with
/// the level's results before moving on.
#[derive(Debug, Clone, Default)]
pub struct PriceBook {
    points: HashMap<TokenId, PricePoint>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a book from plain USD prices, assigning every entry the same confidence.
    /// Non-finite and non-positive prices are skipped.
    pub fn from_usd_map(prices: &HashMap<TokenId, f64>, confidence: f64) -> Self {
        let mut book = Self::new();
        for (token, usd) in prices {
            book.insert(token.clone(), PricePoint::new(*usd, confidence));
        }
        book
    }

    /// Inserts a price, ignoring non-finite or non-positive values. Returns whether it was stored.
    pub fn insert(&mut self, token: TokenId, point: PricePoint) -> bool {
        if !point.usd.is_finite() || point.usd <= 0.0 {
            return false;
        }
        self.points.insert(token, point);
        true
    }

    pub fn insert_quote(&mut self, quote: &PriceQuote) -> bool {
        self.insert(quote.token.clone(), PricePoint::new(quote.usd_price, quote.confidence))
    }

    pub fn get(&self, token: &str) -> Option<PricePoint> {
        self.points.get(token).copied()
    }

    pub fn usd(&self, token: &str) -> Option<f64> {
        self.points.get(token).map(|p| p.usd)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.points.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TokenId, &PricePoint)> {
        self.points.iter()
    }

    /// Plain USD view of the book.
    pub fn usd_map(&self) -> HashMap<TokenId, f64> {
        self.points.iter().map(|(t, p)| (t.clone(), p.usd)).collect()
    }
}

/// Which intrinsic-value method produced an LP valuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuationMethod {
    ReserveRatio,
    RedemptionQuote,
}

impl From<ValuationMethod> for PriceOrigin {
    fn from(method: ValuationMethod) -> Self {
        match method {
            ValuationMethod::ReserveRatio => PriceOrigin::ReserveRatio,
            ValuationMethod::RedemptionQuote => PriceOrigin::RedemptionQuote,
        }
    }
}

/// Intrinsic USD value of one whole LP token.
///
/// A missing valuation means "price unavailable"; there is no zero placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpValuation {
    pub token: TokenId,
    /// USD value of one whole LP token (`10^decimals` atomic units)
    pub usd_price: f64,
    /// Minimum of the legs' confidences
    pub confidence: f64,
    /// Value expressed in units of the configured reference asset, when that asset is priced
    pub numeraire_ratio: Option<f64>,
    pub method: ValuationMethod,
    /// `|quote - reserve_ratio| / reserve_ratio` when both methods produced a value
    pub method_divergence: Option<f64>,
    /// Set when `method_divergence` exceeded the configured alert threshold
    pub divergence_flagged: bool,
    pub decimals: u8,
    pub computed_at: DateTime<Utc>,
}

impl LpValuation {
    /// USD value of `lp_amount` atomic LP units.
    pub fn value_of(&self, lp_amount: u128) -> f64 {
        atomic_to_decimal(lp_amount, self.decimals) * self.usd_price
    }

    pub fn price_point(&self) -> PricePoint {
        PricePoint::new(self.usd_price, self.confidence)
    }

    pub fn to_quote(&self) -> PriceQuote {
        PriceQuote {
            token: self.token.clone(),
            usd_price: self.usd_price,
            confidence: self.confidence,
            origin: self.method.into(),
            computed_at: self.computed_at,
        }
    }
}

pub(crate) fn clamp_confidence(c: f64) -> f64 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_book_skips_invalid_prices() {
        let mut prices = HashMap::new();
        prices.insert("eth".to_string(), 2500.0);
        prices.insert("zero".to_string(), 0.0);
        prices.insert("nan".to_string(), f64::NAN);
        prices.insert("neg".to_string(), -1.0);

        let book = PriceBook::from_usd_map(&prices, 0.9);
        assert_eq!(book.len(), 1);
        assert_eq!(book.get("eth"), Some(PricePoint::new(2500.0, 0.9)));
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(PricePoint::new(1.0, 1.7).confidence, 1.0);
        assert_eq!(PricePoint::new(1.0, -0.2).confidence, 0.0);
        assert_eq!(PricePoint::new(1.0, f64::NAN).confidence, 0.0);
    }

    #[test]
    fn valuation_scales_by_lp_amount() {
        let v = LpValuation {
            token: "lp".to_string(),
            usd_price: 4.0,
            confidence: 1.0,
            numeraire_ratio: None,
            method: ValuationMethod::ReserveRatio,
            method_divergence: None,
            divergence_flagged: false,
            decimals: 6,
            computed_at: Utc::now(),
        };
        assert!((v.value_of(2_500_000) - 10.0).abs() < 1e-9);
    }
}
