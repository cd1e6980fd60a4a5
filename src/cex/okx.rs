/*
 * OKX depth client implementation
 */

use crate::cex::{CexClient, ClientGuard, HTTP_TIMEOUT};
use crate::models::{OrderBook, PriceLevel, Result, VigilError};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

const BASE_URL: &str = "https://www.okx.com";

pub struct OkxClient {
    client: Client,
    guard: ClientGuard,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OkxResponse {
    code: String,
    msg: String,
    data: Vec<OkxDepth>,
}

#[derive(Debug, Deserialize)]
struct OkxDepth {
    // Levels are [price, quantity, deprecated, order_count]
    asks: Vec<Vec<String>>,
    bids: Vec<Vec<String>>,
}

impl Default for OkxClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OkxClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            guard: ClientGuard::new("OKX"),
            base_url: BASE_URL.to_string(),
        }
    }

    fn format_symbol(symbol: &str) -> String {
        match symbol {
            "ETHUSDC" => "ETH-USDC".to_string(),
            "ETHUSD" => "ETH-USD".to_string(),
            "BTCUSDC" => "BTC-USDC".to_string(),
            "BTCUSD" => "BTC-USD".to_string(),
            other if other.len() >= 6 => {
                let (base, quote) = other.split_at(other.len() - 4);
                format!("{base}-{quote}")
            }
            other => other.to_string(),
        }
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
    let resp: OkxResponse = serde_json::from_str(raw)
        .map_err(|e| VigilError::CexUnavailable(format!("Failed to decode OKX depth: {e}")))?;

    if resp.code != "0" {
        return Err(VigilError::CexUnavailable(format!(
            "OKX API error: {} - {}",
            resp.code, resp.msg
        )));
    }

    let depth = resp
        .data
        .into_iter()
        .next()
        .ok_or_else(|| VigilError::CexUnavailable("No data in OKX response".to_string()))?;

    Ok(OrderBook {
        asks: parse_levels(&depth.asks),
        bids: parse_levels(&depth.bids),
        timestamp: Utc::now(),
    })
}

#[async_trait]
impl CexClient for OkxClient {
    async fn get_depth(&self, symbol: &str) -> Result<OrderBook> {
        let url = format!(
            "{}/api/v5/market/books?instId={}&sz=100",
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
                        "OKX returned status {}",
                        resp.status()
                    )));
                }

                parse_depth(&resp.text().await?)
            })
            .await
    }
}
