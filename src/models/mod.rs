/*
 * Domain types and errors for the arbitrage detector
 */

use chrono::{DateTime, Utc};
use ethers::types::{U256, U64};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// One resting level of a depth ladder. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub amount: Decimal,
}

/// Point-in-time depth snapshot. `asks` ascend by price, `bids` descend;
/// consumers rely on that ordering and the book is never mutated after
/// construction.
#[derive(Debug, Clone)]
pub struct OrderBook {
    pub asks: Vec<PriceLevel>,
    pub bids: Vec<PriceLevel>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl OrderBook {
    /// Average price to fill `amount` by walking the ladder, consuming
    /// `min(level.amount, remaining)` per level. Returns `None` when the
    /// ladder is exhausted before the fill completes or when `amount <= 0`.
    /// The denominator is the requested amount, not the filled amount.
    #[must_use]
    pub fn effective_price(&self, side: Side, amount: Decimal) -> Option<Decimal> {
        if amount <= Decimal::ZERO {
            return None;
        }

        let levels = match side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        };

        let mut remaining = amount;
        let mut total_cost = Decimal::ZERO;

        for level in levels {
            let fill = level.amount.min(remaining);
            total_cost += fill * level.price;
            remaining -= fill;
            if remaining.is_zero() {
                break;
            }
        }

        if remaining > Decimal::ZERO {
            return None;
        }

        Some(total_cost / amount)
    }
}

/// Raw AMM quote: `amount` is the pool's integer output (exact-in) or the
/// required input (exact-out) in the smallest units of the relevant token.
/// No implicit scaling.
#[derive(Debug, Clone)]
pub struct PriceQuote {
    pub amount: U256,
    pub gas_estimate: U256,
    pub timestamp: DateTime<Utc>,
}

/// Pre-flight pool state from `slot0`.
#[derive(Debug, Clone)]
pub struct Slot0 {
    pub sqrt_price_x96: U256,
    pub tick: i32,
}

/// A chain head as seen by the listener.
#[derive(Debug, Clone)]
pub struct Block {
    pub number: U64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    #[serde(rename = "CEX -> DEX")]
    CexToDex,
    #[serde(rename = "DEX -> CEX")]
    DexToCex,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::CexToDex => write!(f, "CEX -> DEX"),
            Direction::DexToCex => write!(f, "DEX -> CEX"),
        }
    }
}

/// Per-opportunity payload. Scalars carry display precision only; all
/// decisions upstream are made on exact decimals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeData {
    pub cex_price: f64,
    pub dex_price: f64,
    pub spread_pct: f64,
    pub estimated_profit: f64,
    pub gas_cost: f64,
    pub symbol: String,
    pub direction: Direction,
}

/// Event stream payload for subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ArbitrageEvent {
    #[serde(rename = "HEARTBEAT")]
    Heartbeat {
        #[serde(rename = "blockNumber")]
        block_number: u64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "OPPORTUNITY")]
    Opportunity {
        #[serde(rename = "blockNumber")]
        block_number: u64,
        timestamp: DateTime<Utc>,
        data: TradeData,
    },
}

#[derive(Debug, Error)]
pub enum VigilError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CEX unavailable: {0}")]
    CexUnavailable(String),

    #[error("DEX quote failed: {0}")]
    DexQuoteFailed(String),

    #[error("DEX gas price failed: {0}")]
    DexGasFailed(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Head source error: {0}")]
    HeadSource(String),

    #[error("Calculation error: {0}")]
    Calculation(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VigilError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn level(price: &str, amount: &str) -> PriceLevel {
        PriceLevel {
            price: Decimal::from_str(price).unwrap(),
            amount: Decimal::from_str(amount).unwrap(),
        }
    }

    fn book() -> OrderBook {
        OrderBook {
            asks: vec![level("100", "1"), level("101", "2"), level("105", "5")],
            bids: vec![level("99", "1"), level("98", "2")],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn effective_price_full_fill_at_best_ask() {
        let price = book()
            .effective_price(Side::Buy, Decimal::from_str("0.5").unwrap())
            .unwrap();
        assert_eq!(price, Decimal::from(100));
    }

    #[test]
    fn effective_price_partial_fill_crosses_levels() {
        // 1.0 @ 100 + 0.5 @ 101 = 150.5 over the requested 1.5
        let amount = Decimal::from_str("1.5").unwrap();
        let price = book().effective_price(Side::Buy, amount).unwrap();
        let expected = Decimal::from_str("150.5").unwrap() / amount;
        assert_eq!(price, expected);
    }

    #[test]
    fn effective_price_insufficient_depth() {
        assert!(book()
            .effective_price(Side::Buy, Decimal::from(100))
            .is_none());
    }

    #[test]
    fn effective_price_sell_walks_bids() {
        let price = book().effective_price(Side::Sell, Decimal::ONE).unwrap();
        assert_eq!(price, Decimal::from(99));
    }

    #[test]
    fn effective_price_rejects_non_positive_amount() {
        assert!(book().effective_price(Side::Buy, Decimal::ZERO).is_none());
        assert!(book()
            .effective_price(Side::Buy, Decimal::from(-1))
            .is_none());
    }

    #[test]
    fn effective_price_empty_ladder() {
        let empty = OrderBook {
            asks: vec![],
            bids: vec![],
            timestamp: Utc::now(),
        };
        assert!(empty.effective_price(Side::Buy, Decimal::ONE).is_none());
    }

    #[test]
    fn effective_price_bounded_by_touched_levels() {
        let b = book();
        let amount = Decimal::from_str("2.5").unwrap();
        let price = b.effective_price(Side::Buy, amount).unwrap();
        assert!(price >= b.asks[0].price);
        assert!(price <= b.asks[1].price);
    }

    #[test]
    fn effective_price_monotone_in_size() {
        let b = book();
        let mut last = Decimal::ZERO;
        for size in ["0.5", "1", "1.5", "2", "3"] {
            let price = b
                .effective_price(Side::Buy, Decimal::from_str(size).unwrap())
                .unwrap();
            assert!(price >= last, "buy price regressed at size {size}");
            last = price;
        }

        let mut last = Decimal::from(1000);
        for size in ["0.5", "1", "2", "3"] {
            let price = b
                .effective_price(Side::Sell, Decimal::from_str(size).unwrap())
                .unwrap();
            assert!(price <= last, "sell price rose at size {size}");
            last = price;
        }
    }

    #[test]
    fn heartbeat_event_shape() {
        let event = ArbitrageEvent::Heartbeat {
            block_number: 100,
            timestamp: Utc::now(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["type"], "HEARTBEAT");
        assert_eq!(json["blockNumber"], 100);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn opportunity_event_shape() {
        let event = ArbitrageEvent::Opportunity {
            block_number: 7,
            timestamp: Utc::now(),
            data: TradeData {
                cex_price: 2000.0,
                dex_price: 2050.0,
                spread_pct: 2.5,
                estimated_profit: 42.0,
                gas_cost: 6.0,
                symbol: "ETHUSDC".to_string(),
                direction: Direction::CexToDex,
            },
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["type"], "OPPORTUNITY");
        assert_eq!(json["data"]["cexPrice"], 2000.0);
        assert_eq!(json["data"]["estimatedProfit"], 42.0);
        assert_eq!(json["data"]["direction"], "CEX -> DEX");
    }
}
