/*
 * Uniswap V3 quoter client: QuoterV2 quotes, factory lookup, slot0 reads
 */

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use ethers::{
    abi::{encode, Token},
    types::{Address, U256},
    utils::keccak256,
};
use std::sync::Arc;
use std::str::FromStr;
use std::time::Duration;
use crate::dex::DexQuoter;
use crate::models::{PriceQuote, Result, Slot0, VigilError};
use crate::resilience::TtlCache;
use crate::rpc::RpcClient;

pub const QUOTER_V2_ADDRESS: &str = "0x61fFE014bA17989E743c5F6cB21bF9697530B21e";
pub const FACTORY_ADDRESS: &str = "0x1F98431c8aD98523631AE4a59f267346ea31F984";

const GAS_PRICE_TTL: Duration = Duration::from_secs(15);

pub struct UniswapQuoter {
    rpc: Arc<RpcClient>,
    quoter: Address,
    factory: Address,
    gas_cache: TtlCache<U256>,
    pool_cache: DashMap<(Address, Address, u32), Address>,
}

impl UniswapQuoter {
    pub fn new(rpc: Arc<RpcClient>) -> Result<Self> {
        let quoter = Address::from_str(QUOTER_V2_ADDRESS)
            .map_err(|e| VigilError::Config(format!("Invalid quoter address: {e}")))?;
        let factory = Address::from_str(FACTORY_ADDRESS)
            .map_err(|e| VigilError::Config(format!("Invalid factory address: {e}")))?;

        Ok(Self {
            rpc,
            quoter,
            factory,
            gas_cache: TtlCache::new(GAS_PRICE_TTL),
            pool_cache: DashMap::new(),
        })
    }

    async fn quote_single(
        &self,
        signature: &str,
        token_in: Address,
        token_out: Address,
        amount: U256,
        fee: u32,
    ) -> Result<PriceQuote> {
        let call_data = encode_quote_call(signature, token_in, token_out, amount, fee);

        let result = self
            .rpc
            .call(self.quoter, call_data)
            .await
            .map_err(|e| VigilError::DexQuoteFailed(e.to_string()))?;

        let (amount, gas_estimate) = decode_quote_response(&result)?;

        Ok(PriceQuote {
            amount,
            gas_estimate,
            timestamp: Utc::now(),
        })
    }
}

fn selector(signature: &str) -> [u8; 4] {
    let mut sel = [0u8; 4];
    sel.copy_from_slice(&keccak256(signature.as_bytes())[0..4]);
    sel
}

/// Calldata for `quoteExactInputSingle` / `quoteExactOutputSingle`: both take
/// a `(tokenIn, tokenOut, amount, fee, sqrtPriceLimitX96)` struct, with the
/// price limit left at zero.
fn encode_quote_call(
    signature: &str,
    token_in: Address,
    token_out: Address,
    amount: U256,
    fee: u32,
) -> Vec<u8> {
    let params = Token::Tuple(vec![
        Token::Address(token_in),
        Token::Address(token_out),
        Token::Uint(amount),
        Token::Uint(fee.into()),
        Token::Uint(U256::zero()),
    ]);

    let mut call_data = Vec::from(selector(signature));
    call_data.extend_from_slice(&encode(&[params]));
    call_data
}

/// Both quote calls return `(amount, sqrtPriceX96After, initializedTicksCrossed,
/// gasEstimate)`; only the first and last words matter here.
fn decode_quote_response(result: &[u8]) -> Result<(U256, U256)> {
    if result.len() < 128 {
        return Err(VigilError::DexQuoteFailed(format!(
            "quote response too short: {} bytes",
            result.len()
        )));
    }

    let amount = U256::from_big_endian(&result[0..32]);
    let gas_estimate = U256::from_big_endian(&result[96..128]);
    Ok((amount, gas_estimate))
}

fn decode_pool_address(result: &[u8]) -> Result<Address> {
    if result.len() < 32 {
        return Err(VigilError::DexQuoteFailed(
            "invalid getPool response".to_string(),
        ));
    }

    let pool = Address::from_slice(&result[12..32]);
    if pool.is_zero() {
        return Err(VigilError::DexQuoteFailed("pool not found".to_string()));
    }
    Ok(pool)
}

fn decode_slot0_response(result: &[u8]) -> Result<Slot0> {
    if result.len() < 64 {
        return Err(VigilError::DexQuoteFailed(
            "invalid slot0 response".to_string(),
        ));
    }

    let sqrt_price_x96 = U256::from_big_endian(&result[0..32]);

    // int24 tick occupies the low three bytes of the second word.
    let tick_bytes = &result[32..64];
    let raw = (i32::from(tick_bytes[29]) << 16)
        | (i32::from(tick_bytes[30]) << 8)
        | i32::from(tick_bytes[31]);
    let tick = if tick_bytes[29] >= 0x80 {
        #[allow(clippy::cast_possible_wrap)]
        let extended = raw | 0xFF00_0000_u32 as i32;
        extended
    } else {
        raw
    };

    Ok(Slot0 {
        sqrt_price_x96,
        tick,
    })
}

#[async_trait]
impl DexQuoter for UniswapQuoter {
    async fn quote_exact_in(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        fee: u32,
    ) -> Result<PriceQuote> {
        self.quote_single(
            "quoteExactInputSingle((address,address,uint256,uint24,uint160))",
            token_in,
            token_out,
            amount_in,
            fee,
        )
        .await
    }

    async fn quote_exact_out(
        &self,
        token_in: Address,
        token_out: Address,
        amount_out: U256,
        fee: u32,
    ) -> Result<PriceQuote> {
        self.quote_single(
            "quoteExactOutputSingle((address,address,uint256,uint24,uint160))",
            token_in,
            token_out,
            amount_out,
            fee,
        )
        .await
    }

    async fn gas_price(&self) -> Result<U256> {
        self.gas_cache
            .get_or_try_insert_with(|| async {
                self.rpc
                    .suggest_gas_price()
                    .await
                    .map_err(|e| VigilError::DexGasFailed(e.to_string()))
            })
            .await
    }

    async fn slot0(&self, token_a: Address, token_b: Address, fee: u32) -> Result<Slot0> {
        let pool = self.pool_address(token_a, token_b, fee).await?;

        let call_data = Vec::from(selector("slot0()"));
        let result = self
            .rpc
            .call(pool, call_data)
            .await
            .map_err(|e| VigilError::DexQuoteFailed(e.to_string()))?;

        decode_slot0_response(&result)
    }

    async fn pool_address(&self, token_a: Address, token_b: Address, fee: u32) -> Result<Address> {
        let key = (token_a, token_b, fee);
        if let Some(cached) = self.pool_cache.get(&key) {
            return Ok(*cached);
        }

        let params = encode(&[
            Token::Address(token_a),
            Token::Address(token_b),
            Token::Uint(fee.into()),
        ]);
        let mut call_data = Vec::from(selector("getPool(address,address,uint24)"));
        call_data.extend_from_slice(&params);

        let result = self
            .rpc
            .call(self.factory, call_data)
            .await
            .map_err(|e| VigilError::DexQuoteFailed(e.to_string()))?;

        let pool = decode_pool_address(&result)?;
        // Write-once: a concurrent lookup of the same key resolves to the
        // same address, so a duplicate insert is harmless.
        self.pool_cache.entry(key).or_insert(pool);
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(value: u64) -> [u8; 32] {
        let mut buf = [0u8; 32];
        U256::from(value).to_big_endian(&mut buf);
        buf
    }

    #[test]
    fn decodes_quote_response_words() {
        let mut result = Vec::new();
        result.extend_from_slice(&word(2_050_000_000)); // amountOut
        result.extend_from_slice(&word(0)); // sqrtPriceX96After
        result.extend_from_slice(&word(0)); // ticksCrossed
        result.extend_from_slice(&word(100_000)); // gasEstimate

        let (amount, gas) = decode_quote_response(&result).unwrap();
        assert_eq!(amount, U256::from(2_050_000_000u64));
        assert_eq!(gas, U256::from(100_000u64));
    }

    #[test]
    fn rejects_short_quote_response() {
        assert!(decode_quote_response(&[0u8; 64]).is_err());
    }

    #[test]
    fn rejects_zero_pool_address() {
        assert!(decode_pool_address(&[0u8; 32]).is_err());
    }

    #[test]
    fn decodes_pool_address_word() {
        let mut result = [0u8; 32];
        result[12..32].copy_from_slice(&[0xAB; 20]);
        let pool = decode_pool_address(&result).unwrap();
        assert_eq!(pool, Address::from_slice(&[0xAB; 20]));
    }

    #[test]
    fn decodes_slot0_with_negative_tick() {
        let mut result = Vec::new();
        result.extend_from_slice(&word(1_000_000));
        // -887272 (MIN_TICK) as int24, sign-extended into the word's low bytes
        let mut tick_word = [0xFFu8; 32];
        let tick_i32: i32 = -887_272;
        tick_word[28..32].copy_from_slice(&tick_i32.to_be_bytes());
        result.extend_from_slice(&tick_word);

        let slot0 = decode_slot0_response(&result).unwrap();
        assert_eq!(slot0.sqrt_price_x96, U256::from(1_000_000u64));
        assert_eq!(slot0.tick, -887_272);
    }

    #[test]
    fn decodes_slot0_with_positive_tick() {
        let mut result = Vec::new();
        result.extend_from_slice(&word(1_000_000));
        result.extend_from_slice(&word(200_000));

        let slot0 = decode_slot0_response(&result).unwrap();
        assert_eq!(slot0.tick, 200_000);
    }

    #[test]
    fn quote_calldata_has_selector_and_five_words() {
        let data = encode_quote_call(
            "quoteExactInputSingle((address,address,uint256,uint24,uint160))",
            Address::zero(),
            Address::zero(),
            U256::from(1u64),
            3000,
        );
        assert_eq!(data.len(), 4 + 5 * 32);
    }
}
