/*
 * CEX depth clients: symbol translation, decoding, and resilience
 */

mod binance;
mod kraken;
mod okx;

use crate::config::CexProvider;
use crate::models::{OrderBook, Result, VigilError};
use crate::resilience::{CircuitBreaker, TokenBucket};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

pub use binance::BinanceClient;
pub use kraken::KrakenClient;
pub use okx::OkxClient;

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

const RATE_PER_SEC: f64 = 20.0;
const BURST: u32 = 5;
const BREAKER_THRESHOLD: u32 = 3;
const BREAKER_OPEN_FOR: Duration = Duration::from_secs(30);

#[async_trait]
pub trait CexClient: Send + Sync {
    /// Fetch a point-in-time depth snapshot for the canonical symbol.
    async fn get_depth(&self, symbol: &str) -> Result<OrderBook>;
}

#[must_use]
pub fn create_cex_client(provider: CexProvider) -> Box<dyn CexClient> {
    match provider {
        CexProvider::Binance => Box::new(BinanceClient::new()),
        CexProvider::Kraken => Box::new(KrakenClient::new()),
        CexProvider::Okx => Box::new(OkxClient::new()),
    }
}

/// Rate limit and circuit breaker applied in front of every provider call.
/// All failure classes surface as `CexUnavailable`; while the breaker is
/// open, calls fail before any network I/O.
pub(crate) struct ClientGuard {
    name: &'static str,
    bucket: TokenBucket,
    breaker: CircuitBreaker,
}

impl ClientGuard {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            bucket: TokenBucket::new(RATE_PER_SEC, BURST),
            breaker: CircuitBreaker::new(BREAKER_THRESHOLD, BREAKER_OPEN_FOR),
        }
    }

    pub(crate) async fn call<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.bucket.acquire().await;

        if self.breaker.check().is_err() {
            return Err(VigilError::CexUnavailable(format!(
                "{} circuit breaker open",
                self.name
            )));
        }

        match f().await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(VigilError::CexUnavailable(format!("{}: {e}", self.name)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guard_opens_after_consecutive_failures() {
        let guard = ClientGuard::new("test");
        for _ in 0..4 {
            let res: Result<()> = guard
                .call(|| async { Err(VigilError::CexUnavailable("boom".to_string())) })
                .await;
            assert!(res.is_err());
        }

        // Breaker is now open: the closure must not run.
        let res: Result<()> = guard.call(|| async { Ok(()) }).await;
        match res {
            Err(VigilError::CexUnavailable(msg)) => assert!(msg.contains("circuit breaker open")),
            other => panic!("expected breaker-open error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn guard_passes_through_success() {
        let guard = ClientGuard::new("test");
        let res: Result<u32> = guard.call(|| async { Ok(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }
}
