//! Core data types shared across the pricing pipeline.

pub mod conversions;
pub mod quote;
pub mod token;

pub use quote::{LpValuation, PriceBook, PriceOrigin, PricePoint, PriceQuote, ValuationMethod};
pub use token::{PoolLeg, TokenId, TokenKind, TokenRecord};
