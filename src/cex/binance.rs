/*
 * Binance depth client implementation
 */

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use crate::cex::{CexClient, ClientGuard, HTTP_TIMEOUT};
use crate::models::{OrderBook, PriceLevel, Result, VigilError};

const BASE_URL: &str = "https://api.binance.com/api/v3";

pub struct BinanceClient {
    client: Client,
    guard: ClientGuard,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    #[serde(rename = "lastUpdateId")]
    _last_update_id: i64,
    bids: Vec<Vec<String>>,
    asks: Vec<Vec<String>>,
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            guard: ClientGuard::new("Binance"),
            base_url: BASE_URL.to_string(),
        }
    }

    fn format_symbol(symbol: &str) -> String {
        symbol.to_uppercase()
    }
}

fn parse_levels(raw: &[Vec<String>]) -> Vec<PriceLevel> {
    raw.iter()
        .filter_map(|level| {
            if level.len() < 2 {
                return None;
            }
            let price = Decimal::from_str(&level[0]).ok()?;
            let amount = Decimal::from_str(&level[1]).ok()?;
            Some(PriceLevel { price, amount })
        })
        .collect()
}

fn parse_depth(raw: &str) -> Result<OrderBook> {
    let depth: DepthResponse = serde_json::from_str(raw)
        .map_err(|e| VigilError::CexUnavailable(format!("Failed to decode Binance depth: {e}")))?;

    Ok(OrderBook {
        asks: parse_levels(&depth.asks),
        bids: parse_levels(&depth.bids),
        timestamp: Utc::now(),
    })
}

#[async_trait]
impl CexClient for BinanceClient {
    async fn get_depth(&self, symbol: &str) -> Result<OrderBook> {
        let url = format!(
            "{}/depth?symbol={}&limit=100",
            self.base_url,
            Self::format_symbol(symbol)
        );

        self.guard
            .call(|| async {
                let resp = self
                    .client
                    .get(&url)
                    .timeout(HTTP_TIMEOUT)
                    .send()
                    .await?;

                if !resp.status().is_success() {
                    return Err(VigilError::CexUnavailable(format!(
                        "Binance returned status {}",
                        resp.status()
                    )));
                }

                parse_depth(&resp.text().await?)
            })
            .await
    }
}
