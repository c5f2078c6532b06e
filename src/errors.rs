//! Pricing error taxonomy.
//!
//! Every variant except [`PricingError::InvalidConfig`] is recoverable at the batch
//! level: the failing token or source is dropped and the rest of the batch proceeds.

use crate::types::TokenId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PricingError {
    /// An upstream price feed failed or timed out
    #[error("price source '{feed}' unavailable: {reason}")]
    SourceUnavailable { feed: String, reason: String },

    /// No metadata for the requested token
    #[error("token '{0}' not found in token metadata")]
    TokenNotFound(TokenId),

    /// No liquidity route to the numeraire within the hop bound
    #[error("no liquidity path from '{token}' to '{numeraire}' within {attempted_hops} hops")]
    PathNotFound {
        token: TokenId,
        numeraire: TokenId,
        attempted_hops: usize,
    },

    /// A leg price was unresolved at valuation time
    #[error("'{token}' is missing a resolved price for dependency '{missing}'")]
    MissingDependency { token: TokenId, missing: TokenId },

    /// The token sits on a dependency cycle
    #[error("dependency cycle detected through {}", .members.join(" -> "))]
    CycleDetected { token: TokenId, members: Vec<TokenId> },

    /// A pool leg has a zero reserve
    #[error("pool '{pool}' has a zero reserve for '{leg}'")]
    ZeroReserve { pool: TokenId, leg: TokenId },

    /// The redemption quote provider could not answer; valuation falls back to reserve ratios
    #[error("redemption quote unavailable for '{token}': {reason}")]
    QuoteUnavailable { token: TokenId, reason: String },

    /// Malformed startup configuration, the only fatal condition
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PricingError {
    /// Short, stable label used for metrics and log aggregation.
    pub fn kind(&self) -> &'static str {
        match self {
            PricingError::SourceUnavailable { .. } => "source_unavailable",
            PricingError::TokenNotFound(_) => "token_not_found",
            PricingError::PathNotFound { .. } => "path_not_found",
            PricingError::MissingDependency { .. } => "missing_dependency",
            PricingError::CycleDetected { .. } => "cycle_detected",
            PricingError::ZeroReserve { .. } => "zero_reserve",
            PricingError::QuoteUnavailable { .. } => "quote_unavailable",
            PricingError::InvalidConfig(_) => "invalid_config",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, PricingError::InvalidConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_members() {
        let err = PricingError::CycleDetected {
            token: "a".into(),
            members: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle detected through a -> b -> a");
        assert_eq!(err.kind(), "cycle_detected");
        assert!(!err.is_fatal());
    }

    #[test]
    fn path_not_found_keeps_hop_count() {
        let err = PricingError::PathNotFound {
            token: "x".into(),
            numeraire: "usdc".into(),
            attempted_hops: 3,
        };
        assert!(err.to_string().contains("within 3 hops"));
    }
}
