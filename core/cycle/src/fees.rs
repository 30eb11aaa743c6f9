//! Fee arithmetic. Everything here is exact decimal; integer cents exist
//! only at the gateway boundary.

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

use crate::config::CycleConfig;

#[derive(Clone, Debug)]
pub struct FeePolicy {
    pub percent: BigDecimal,
    pub fixed: BigDecimal,
    pub cap: BigDecimal,
    pub retry_surcharge: BigDecimal,
}

impl FeePolicy {
    pub fn from_config(cfg: &CycleConfig) -> FeePolicy {
        FeePolicy {
            percent: cfg.fee_percent.clone(),
            fixed: cfg.fee_fixed.clone(),
            cap: cfg.fee_cap.clone(),
            retry_surcharge: cfg.retry_surcharge.clone(),
        }
    }

    /// `min(cap, amount * percent + fixed)`, plus the surcharge once for any
    /// retried debit (`retry_count >= 1`), never per retry.
    pub fn application_fee(&self, amount: &BigDecimal, retry_count: i32) -> BigDecimal {
        let base = amount * &self.percent + &self.fixed;
        let capped = if base > self.cap { self.cap.clone() } else { base };
        if retry_count >= 1 {
            capped + &self.retry_surcharge
        } else {
            capped
        }
    }
}

/// Converts an exact decimal amount to integer cents, rounding halves away
/// from zero. Returns None if the result does not fit in i64, which no sane
/// contribution amount does.
pub fn to_cents(amount: &BigDecimal) -> Option<i64> {
    let scaled: BigDecimal = amount * BigDecimal::from(100);
    let (digits, exp) = scaled.into_bigint_and_exponent();
    if exp <= 0 {
        let scale = num_traits::pow(BigInt::from(10), (-exp) as usize);
        return (digits * scale).to_i64();
    }
    let divisor = num_traits::pow(BigInt::from(10), exp as usize);
    let quotient = &digits / &divisor;
    let remainder = &digits % &divisor;
    let rounded = if remainder.abs() * 2u8 >= divisor {
        if digits.is_negative() {
            quotient - 1
        } else {
            quotient + 1
        }
    } else {
        quotient
    };
    rounded.to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn policy() -> FeePolicy {
        FeePolicy {
            percent: BigDecimal::from_str("0.01").unwrap(),
            fixed: BigDecimal::from_str("0.30").unwrap(),
            cap: BigDecimal::from_str("3.50").unwrap(),
            retry_surcharge: BigDecimal::from_str("2.50").unwrap(),
        }
    }

    #[test]
    fn first_attempt_fee() {
        let fee = policy().application_fee(&BigDecimal::from(100), 0);
        assert_eq!(fee, BigDecimal::from_str("1.30").unwrap());
    }

    #[test]
    fn fee_is_capped() {
        let fee = policy().application_fee(&BigDecimal::from(1000), 0);
        assert_eq!(fee, BigDecimal::from_str("3.50").unwrap());
    }

    #[test]
    fn surcharge_applies_once_for_any_retry() {
        let first_retry = policy().application_fee(&BigDecimal::from(100), 1);
        let third_retry = policy().application_fee(&BigDecimal::from(100), 3);
        assert_eq!(first_retry, BigDecimal::from_str("3.80").unwrap());
        assert_eq!(first_retry, third_retry);
    }

    #[test]
    fn surcharge_stacks_on_top_of_cap() {
        let fee = policy().application_fee(&BigDecimal::from(1000), 2);
        assert_eq!(fee, BigDecimal::from_str("6.00").unwrap());
    }

    #[test]
    fn cents_exact() {
        assert_eq!(to_cents(&BigDecimal::from_str("100").unwrap()), Some(10_000));
        assert_eq!(to_cents(&BigDecimal::from_str("1.30").unwrap()), Some(130));
        assert_eq!(to_cents(&BigDecimal::from_str("0").unwrap()), Some(0));
    }

    #[test]
    fn cents_round_half_away_from_zero() {
        assert_eq!(to_cents(&BigDecimal::from_str("1.005").unwrap()), Some(101));
        assert_eq!(to_cents(&BigDecimal::from_str("1.0049").unwrap()), Some(100));
        assert_eq!(to_cents(&BigDecimal::from_str("-1.005").unwrap()), Some(-101));
        assert_eq!(to_cents(&BigDecimal::from_str("-1.0049").unwrap()), Some(-100));
    }
}
