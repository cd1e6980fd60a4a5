/*
 * Kraken depth client implementation
 */

use crate::cex::{CexClient, ClientGuard, HTTP_TIMEOUT};
use crate::models::{OrderBook, PriceLevel, Result, VigilError};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;

const BASE_URL: &str = "https://api.kraken.com";

pub struct KrakenClient {
    client: Client,
    guard: ClientGuard,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    error: Vec<String>,
    result: Option<HashMap<String, KrakenDepth>>,
}

#[derive(Debug, Deserialize)]
struct KrakenDepth {
    // Levels are [price, volume, timestamp]
    asks: Vec<Vec<serde_json::Value>>,
    bids: Vec<Vec<serde_json::Value>>,
}

impl Default for KrakenClient {
    fn default() -> Self {
        Self::new()
    }
}

impl KrakenClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            guard: ClientGuard::new("Kraken"),
            base_url: BASE_URL.to_string(),
        }
    }

    fn format_symbol(symbol: &str) -> &str {
        match symbol {
            "ETHUSDC" | "ETHUSD" => "XETHZUSD",
            "BTCUSDC" | "BTCUSD" => "XXBTZUSD",
            other => other,
        }
    }
}

fn parse_levels(raw: &[Vec<serde_json::Value>]) -> Vec<PriceLevel> {
    raw.iter()
        .filter_map(|level| {
            if level.len() < 2 {
                return None;
            }
            let price = Decimal::from_str(level[0].as_str()?).ok()?;
            let amount = Decimal::from_str(level[1].as_str()?).ok()?;
            Some(PriceLevel { price, amount })
        })
        .collect()
}

fn parse_depth(raw: &str) -> Result<OrderBook> {
    let resp: DepthResponse = serde_json::from_str(raw)
        .map_err(|e| VigilError::CexUnavailable(format!("Failed to decode Kraken depth: {e}")))?;

    if !resp.error.is_empty() {
        return Err(VigilError::CexUnavailable(format!(
            "Kraken API error: {:?}",
            resp.error
        )));
    }

    let result = resp
        .result
        .ok_or_else(|| VigilError::CexUnavailable("No result in Kraken response".to_string()))?;

    let depth = result
        .into_values()
        .next()
        .ok_or_else(|| VigilError::CexUnavailable("No depth data in Kraken response".to_string()))?;

    Ok(OrderBook {
        asks: parse_levels(&depth.asks),
        bids: parse_levels(&depth.bids),
        timestamp: Utc::now(),
    })
}

#[async_trait]
impl CexClient for KrakenClient {
    async fn get_depth(&self, symbol: &str) -> Result<OrderBook> {
        let url = format!(
            "{}/0/public/Depth?pair={}&count=100",
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
                        "Kraken returned status {}",
                        resp.status()
                    )));
                }

                parse_depth(&resp.text().await?)
            })
            .await
    }
}
