/*
 * JSON-RPC client for read-only contract calls against the chain head
 */

use crate::models::{Result, VigilError};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;

pub struct RpcClient {
    provider: Arc<Provider<Http>>,
}

impl RpcClient {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| VigilError::Rpc(format!("Failed to create provider: {e}")))?;

        Ok(Self {
            provider: Arc::new(provider),
        })
    }

    #[must_use]
    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

    /// `eth_call` against the latest block.
    pub async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>> {
        let tx = ethers::types::TransactionRequest::new()
            .to(to)
            .data(Bytes::from(data));

        let result = self
            .provider
            .call(&tx.into(), None)
            .await
            .map_err(|e| VigilError::Rpc(format!("eth_call failed: {e}")))?;

        Ok(result.to_vec())
    }

    /// Node-suggested gas price in wei. Uncached; callers layer their own TTL.
    pub async fn suggest_gas_price(&self) -> Result<U256> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| VigilError::Rpc(format!("Failed to get gas price: {e}")))
    }
}
