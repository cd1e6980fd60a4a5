/*
 * DEX quoter capability set and the Uniswap V3 implementation
 */

mod uniswap;

use async_trait::async_trait;
use ethers::types::{Address, U256};
use crate::models::{PriceQuote, Result, Slot0};

pub use uniswap::UniswapQuoter;

#[async_trait]
pub trait DexQuoter: Send + Sync {
    /// Projected output for a fixed input amount, in the output token's
    /// smallest units.
    async fn quote_exact_in(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        fee: u32,
    ) -> Result<PriceQuote>;

    /// Required input for a fixed output amount, in the input token's
    /// smallest units.
    async fn quote_exact_out(
        &self,
        token_in: Address,
        token_out: Address,
        amount_out: U256,
        fee: u32,
    ) -> Result<PriceQuote>;

    /// Node-suggested gas price in wei, cached briefly.
    async fn gas_price(&self) -> Result<U256>;

    /// Current pool square-root price and tick (pre-flight data).
    async fn slot0(&self, token_a: Address, token_b: Address, fee: u32) -> Result<Slot0>;

    /// Factory lookup of the pool address, memoized for the process lifetime.
    async fn pool_address(&self, token_a: Address, token_b: Address, fee: u32) -> Result<Address>;
}
