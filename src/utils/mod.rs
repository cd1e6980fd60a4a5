/*
 * Decimal conversion helpers shared across the pipeline
 */

use ethers::types::U256;
use num_bigint::BigUint;
use rust_decimal::Decimal;
use std::str::FromStr;
use crate::models::{Result, VigilError};

/// Reinterpret a raw token amount with the given decimals count:
/// `human = raw * 10^(-decimals)`. Exact; fails only when the raw value
/// exceeds the 96-bit decimal mantissa.
pub fn decimal_from_raw(raw: U256, decimals: u32) -> Result<Decimal> {
    let value = decimal_from_u256(raw)?;
    let scale = Decimal::from(
        10u64
            .checked_pow(decimals)
            .ok_or_else(|| VigilError::Calculation(format!("decimals out of range: {decimals}")))?,
    );
    Ok(value / scale)
}

pub fn decimal_from_u256(raw: U256) -> Result<Decimal> {
    Decimal::from_str(&raw.to_string())
        .map_err(|e| VigilError::Calculation(format!("U256 conversion error: {e}")))
}

/// Indicative pool price from `slot0.sqrtPriceX96`, adjusted for token
/// decimals. Used only for pre-flight logging.
pub fn sqrt_price_x96_to_price(sqrt_price_x96: U256, decimals0: u32, decimals1: u32) -> Result<Decimal> {
    if sqrt_price_x96.is_zero() {
        return Err(VigilError::Calculation("Invalid sqrt price: zero".to_string()));
    }

    let q96 = BigUint::from(2u128).pow(96);
    let sqrt_price = BigUint::from_str(&sqrt_price_x96.to_string())
        .map_err(|e| VigilError::Calculation(format!("sqrt price parse error: {e}")))?;
    let price_x192 = sqrt_price.pow(2u32);
    let price_x96 = price_x192 / &q96;

    // Raw ratio is token1/token0; invert and rescale to quote token0 in
    // human token1 units.
    let ratio = price_x96 / &q96;
    if ratio == BigUint::from(0u32) {
        return Err(VigilError::Calculation("Price calculation resulted in zero".to_string()));
    }

    let ratio_dec = Decimal::from_str(&ratio.to_string())
        .map_err(|e| VigilError::Calculation(format!("Failed to parse ratio: {e}")))?;

    let adjustment = if decimals0 >= decimals1 {
        Decimal::from(10u64.pow(decimals0 - decimals1))
    } else {
        Decimal::ONE / Decimal::from(10u64.pow(decimals1 - decimals0))
    };

    Ok(Decimal::ONE / ratio_dec * adjustment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_to_human_round_trips_at_usdc_scale() {
        let raw = U256::from(2_050_000_000u64);
        let human = decimal_from_raw(raw, 6).unwrap();
        assert_eq!(human * Decimal::from(1_000_000), Decimal::from(2_050_000_000u64));
        assert_eq!(human, Decimal::from_str("2050").unwrap());
    }

    #[test]
    fn raw_to_human_at_wei_scale() {
        let one_eth = U256::from(10u64).pow(U256::from(18u64));
        assert_eq!(decimal_from_raw(one_eth, 18).unwrap(), Decimal::ONE);
    }

    #[test]
    fn gas_price_in_eth() {
        // 30 gwei
        let wei = U256::from(30_000_000_000u64);
        let eth = decimal_from_raw(wei, 18).unwrap();
        assert_eq!(eth, Decimal::from_str("0.00000003").unwrap());
    }

    #[test]
    fn rejects_zero_sqrt_price() {
        assert!(sqrt_price_x96_to_price(U256::zero(), 18, 6).is_err());
    }
}
