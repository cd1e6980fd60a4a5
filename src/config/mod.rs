/*
 * Configuration management for the detector
 */

use crate::models::{Result, VigilError};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

pub const WETH_ADDRESS: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
pub const USDC_ADDRESS: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";

#[derive(Debug, Clone)]
pub struct Config {
    pub eth_node_ws: String,
    pub eth_node_http: String,
    pub symbol: String,
    pub token_in: Address,
    pub token_out: Address,
    pub token_in_dec: u32,
    pub token_out_dec: u32,
    pub pool_fee: u32,
    pub trade_sizes: Vec<U256>,
    pub min_profit: Decimal,
    pub max_workers: usize,
    pub cex_provider: CexProvider,
    pub metrics_port: u16,
    pub ws_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CexProvider {
    Binance,
    Kraken,
    Okx,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            eth_node_ws: env::var("ETH_NODE_WS")
                .map_err(|_| VigilError::Config("ETH_NODE_WS not set".to_string()))?,
            eth_node_http: env::var("ETH_NODE_HTTP")
                .map_err(|_| VigilError::Config("ETH_NODE_HTTP not set".to_string()))?,
            symbol: env::var("SYMBOL").unwrap_or_else(|_| "ETHUSDC".to_string()),
            token_in: parse_address(
                &env::var("TOKEN_IN").unwrap_or_else(|_| WETH_ADDRESS.to_string()),
                "TOKEN_IN",
            )?,
            token_out: parse_address(
                &env::var("TOKEN_OUT").unwrap_or_else(|_| USDC_ADDRESS.to_string()),
                "TOKEN_OUT",
            )?,
            token_in_dec: parse_var("TOKEN_IN_DEC", 18)?,
            token_out_dec: parse_var("TOKEN_OUT_DEC", 6)?,
            pool_fee: parse_var("POOL_FEE", 3000)?,
            trade_sizes: parse_trade_sizes(&env::var("TRADE_SIZES").unwrap_or_else(|_| {
                "1000000000000000000,10000000000000000000".to_string()
            }))?,
            min_profit: Decimal::from_str(
                &env::var("MIN_PROFIT").unwrap_or_else(|_| "10.0".to_string()),
            )
            .map_err(|e| VigilError::Config(format!("Invalid MIN_PROFIT: {e}")))?,
            max_workers: parse_var("MAX_WORKERS", 5)?,
            cex_provider: env::var("CEX_PROVIDER")
                .unwrap_or_else(|_| "binance".to_string())
                .parse()?,
            metrics_port: parse_var("METRICS_PORT", 8085)?,
            ws_port: parse_var("WS_PORT", 8080)?,
        })
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| VigilError::Config(format!("Invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn parse_address(raw: &str, key: &str) -> Result<Address> {
    raw.parse()
        .map_err(|e| VigilError::Config(format!("Invalid {key} address: {e}")))
}

/// Comma-separated positive integers in the input token's smallest unit.
pub fn parse_trade_sizes(raw: &str) -> Result<Vec<U256>> {
    let mut sizes = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let size = U256::from_dec_str(part)
            .map_err(|e| VigilError::Config(format!("Invalid trade size {part}: {e}")))?;
        if size.is_zero() {
            return Err(VigilError::Config(format!("Trade size must be positive: {part}")));
        }
        sizes.push(size);
    }
    if sizes.is_empty() {
        return Err(VigilError::Config("No valid TRADE_SIZES configured".to_string()));
    }
    Ok(sizes)
}

impl FromStr for CexProvider {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "binance" => Ok(CexProvider::Binance),
            "kraken" => Ok(CexProvider::Kraken),
            "okx" => Ok(CexProvider::Okx),
            _ => Err(VigilError::Config(format!("Unknown CEX provider: {s}"))),
        }
    }
}
