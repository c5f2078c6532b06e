//! Atomic (smallest-unit) amount conversions.

/// Converts an atomic amount to decimal units (`amount / 10^decimals`).
///
/// Reserves larger than 2^53 lose integer precision here, which is acceptable for
/// USD valuation but means the result must never be converted back to an atomic amount.
pub fn atomic_to_decimal(amount: u128, decimals: u8) -> f64 {
    if amount == 0 {
        return 0.0;
    }
    amount as f64 / decimal_scale(decimals)
}

/// `10^decimals` as `f64`.
pub fn decimal_scale(decimals: u8) -> f64 {
    10f64.powi(decimals as i32)
}

/// One whole token expressed in atomic units, `None` when `10^decimals` overflows `u128`.
pub fn unit_amount(decimals: u8) -> Option<u128> {
    10u128.checked_pow(decimals as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_to_decimal_scales_by_decimals() {
        assert_eq!(atomic_to_decimal(1_000_000, 6), 1.0);
        assert_eq!(atomic_to_decimal(0, 18), 0.0);
        let eth = atomic_to_decimal(1_500_000_000_000_000_000, 18);
        assert!((eth - 1.5).abs() < 1e-12, "eth={}", eth);
    }

    #[test]
    fn unit_amount_rejects_overflowing_decimals() {
        assert_eq!(unit_amount(0), Some(1));
        assert_eq!(unit_amount(6), Some(1_000_000));
        assert!(unit_amount(38).is_some());
        assert_eq!(unit_amount(39), None);
    }
}
