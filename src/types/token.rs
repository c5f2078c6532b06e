use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Token identifier as used by the metadata provider and the upstream price feeds.
pub type TokenId = String;

/// One side of a two-asset reserve pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLeg {
    /// Token held by the pool on this side (may itself be a POOL token)
    pub token: TokenId,
    /// Reserve in atomic (smallest) units
    #[serde(deserialize_with = "deserialize_atomic")]
    pub reserve: u128,
}

impl PoolLeg {
    pub fn new(token: impl Into<TokenId>, reserve: u128) -> Self {
        Self {
            token: token.into(),
            reserve,
        }
    }
}

/// Token classification.
///
/// Serialized externally tagged, e.g. `"base"`, `{"mirror": {"base": "eth"}}` or
/// `{"pool": {"leg_a": {..}, "leg_b": {..}}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Directly traded token with an independently sourced price
    Base,
    /// Tracks `base` 1:1 on another execution domain; never priced independently
    Mirror { base: TokenId },
    /// LP token over a two-asset reserve pair
    Pool { leg_a: PoolLeg, leg_b: PoolLeg },
}

/// Static metadata for a single token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub id: TokenId,
    #[serde(default)]
    pub symbol: Option<String>,
    pub decimals: u8,
    pub kind: TokenKind,
}

impl TokenRecord {
    pub fn base(id: impl Into<TokenId>, decimals: u8) -> Self {
        Self {
            id: id.into(),
            symbol: None,
            decimals,
            kind: TokenKind::Base,
        }
    }

    pub fn mirror(id: impl Into<TokenId>, decimals: u8, base: impl Into<TokenId>) -> Self {
        Self {
            id: id.into(),
            symbol: None,
            decimals,
            kind: TokenKind::Mirror { base: base.into() },
        }
    }

    pub fn pool(id: impl Into<TokenId>, decimals: u8, leg_a: PoolLeg, leg_b: PoolLeg) -> Self {
        Self {
            id: id.into(),
            symbol: None,
            decimals,
            kind: TokenKind::Pool { leg_a, leg_b },
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn is_pool(&self) -> bool {
        matches!(self.kind, TokenKind::Pool { .. })
    }

    pub fn is_mirror(&self) -> bool {
        matches!(self.kind, TokenKind::Mirror { .. })
    }

    pub fn pool_legs(&self) -> Option<(&PoolLeg, &PoolLeg)> {
        match &self.kind {
            TokenKind::Pool { leg_a, leg_b } => Some((leg_a, leg_b)),
            _ => None,
        }
    }

    pub fn mirror_base(&self) -> Option<&TokenId> {
        match &self.kind {
            TokenKind::Mirror { base } => Some(base),
            _ => None,
        }
    }

    /// Symbol when known, otherwise the id. Used for log lines only.
    pub fn label(&self) -> &str {
        self.symbol.as_deref().unwrap_or(&self.id)
    }
}

/// Accepts atomic amounts as JSON numbers or as decimal strings.
///
/// Amounts above `u64::MAX` should be written as strings; most JSON producers cannot
/// emit them losslessly as numbers.
pub(crate) fn deserialize_atomic<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    struct AtomicVisitor;

    impl<'de> Visitor<'de> for AtomicVisitor {
        type Value = u128;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative integer or a decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
            Ok(v as u128)
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
            u128::try_from(v).map_err(|_| E::custom(format!("negative atomic amount: {}", v)))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
            v.trim()
                .parse::<u128>()
                .map_err(|e| E::custom(format!("invalid atomic amount '{}': {}", v, e)))
        }
    }

    deserializer.deserialize_any(AtomicVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_record_parses_from_json_with_string_reserves() {
        let raw = r#"{
            "id": "lp-eth-usdc",
            "symbol": "ETH/USDC LP",
            "decimals": 18,
            "kind": { "pool": {
                "leg_a": { "token": "eth", "reserve": "1000000000000000000000000" },
                "leg_b": { "token": "usdc", "reserve": 2500000000 }
            } }
        }"#;
        let record: TokenRecord = serde_json::from_str(raw).expect("valid record");
        let (a, b) = record.pool_legs().expect("pool legs");
        assert_eq!(a.reserve, 1_000_000_000_000_000_000_000_000u128);
        assert_eq!(b.reserve, 2_500_000_000);
        assert_eq!(record.label(), "ETH/USDC LP");
    }

    #[test]
    fn base_and_mirror_records_parse() {
        let base: TokenRecord =
            serde_json::from_str(r#"{"id":"eth","decimals":18,"kind":"base"}"#).expect("base");
        assert_eq!(base.kind, TokenKind::Base);

        let mirror: TokenRecord = serde_json::from_str(
            r#"{"id":"eth.arb","decimals":18,"kind":{"mirror":{"base":"eth"}}}"#,
        )
        .expect("mirror");
        assert_eq!(mirror.mirror_base().map(String::as_str), Some("eth"));
    }

    #[test]
    fn negative_reserve_is_rejected() {
        let raw = r#"{"token":"eth","reserve":-5}"#;
        assert!(serde_json::from_str::<PoolLeg>(raw).is_err());
    }
}
