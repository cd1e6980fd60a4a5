/*
 * Arbitrage orchestrator: admission loop, per-block fan-out, profit math
 */

use chrono::Utc;
use ethers::types::{U256, U64};
use futures::future::try_join_all;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::{Arc, RwLock};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use crate::{
    cex::CexClient,
    config::Config,
    dex::DexQuoter,
    listener::BlockSource,
    models::{
        ArbitrageEvent, Block, Direction, OrderBook, PriceQuote, Result, Side, TradeData,
        VigilError,
    },
    notifier::Notifier,
    observability::Metrics,
    utils::{decimal_from_raw, decimal_from_u256, sqrt_price_x96_to_price},
};

const STALE_BLOCK_CUTOFF_SECS: i64 = 60;
const DEFAULT_GAS_PRICE_WEI: u64 = 30_000_000_000;

/// Hard-coded taker fee (10 bps).
fn cex_fee_rate() -> Decimal {
    Decimal::new(1, 3)
}

pub struct Orchestrator {
    cfg: Config,
    cex: Arc<dyn CexClient>,
    dex: Arc<dyn DexQuoter>,
    source: Arc<dyn BlockSource>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
    last_block: RwLock<Option<U64>>,
    slots: Arc<Semaphore>,
}

struct SizeQuotes {
    size: U256,
    sell: PriceQuote,
    buy: PriceQuote,
}

impl Orchestrator {
    pub fn new(
        cfg: Config,
        cex: Arc<dyn CexClient>,
        dex: Arc<dyn DexQuoter>,
        source: Arc<dyn BlockSource>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(cfg.max_workers));
        Self {
            cfg,
            cex,
            dex,
            source,
            notifier,
            metrics,
            last_block: RwLock::new(None),
            slots,
        }
    }

    /// Admission loop: one worker slot per block, blocks dropped when the
    /// pool is full. Returns when `ctx` is cancelled or the source closes
    /// its block channel.
    pub async fn run(self: Arc<Self>, ctx: CancellationToken) -> Result<()> {
        let (mut blocks, mut errors) = self.source.subscribe(ctx.clone());

        info!("detector started, waiting for blocks");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                Some(err) = errors.recv() => {
                    warn!(error = %err, "head source error");
                }
                block = blocks.recv() => {
                    let Some(block) = block else { return Ok(()) };
                    self.metrics.blocks_processed.inc();

                    match self.slots.clone().try_acquire_owned() {
                        Ok(permit) => {
                            self.metrics.active_workers.inc();
                            let worker = self.clone();
                            tokio::spawn(async move {
                                worker.process_block(&block).await;
                                worker.metrics.active_workers.dec();
                                drop(permit);
                            });
                        }
                        Err(_) => {
                            warn!(block = block.number.as_u64(), "worker pool full, skipping block");
                        }
                    }
                }
            }
        }
    }

    async fn process_block(&self, block: &Block) {
        let age = Utc::now() - block.timestamp;
        if age > chrono::Duration::seconds(STALE_BLOCK_CUTOFF_SECS) {
            warn!(
                block = block.number.as_u64(),
                age_secs = age.num_seconds(),
                "skipping stale block"
            );
            return;
        }

        // Dedup: only one worker can win admission for a given block, so the
        // read-check / write-set gap is harmless.
        {
            let last = self.last_block.read().expect("last_block lock poisoned");
            if *last == Some(block.number) {
                return;
            }
        }
        {
            let mut last = self.last_block.write().expect("last_block lock poisoned");
            *last = Some(block.number);
        }

        info!(height = block.number.as_u64(), "new block");

        self.notifier.broadcast(ArbitrageEvent::Heartbeat {
            block_number: block.number.as_u64(),
            timestamp: Utc::now(),
        });

        let depth_fut = self.cex.get_depth(&self.cfg.symbol);

        let quotes_fut = try_join_all(self.cfg.trade_sizes.iter().map(|&size| async move {
            let sell = self
                .dex
                .quote_exact_in(self.cfg.token_in, self.cfg.token_out, size, self.cfg.pool_fee)
                .await
                .map_err(|e| {
                    VigilError::DexQuoteFailed(format!("sell quote for size {size}: {e}"))
                })?;
            let buy = self
                .dex
                .quote_exact_out(self.cfg.token_out, self.cfg.token_in, size, self.cfg.pool_fee)
                .await
                .map_err(|e| {
                    VigilError::DexQuoteFailed(format!("buy quote for size {size}: {e}"))
                })?;
            Ok::<_, VigilError>(SizeQuotes { size, sell, buy })
        }));

        let gas_fut = async {
            match self.dex.gas_price().await {
                Ok(price) => price,
                Err(e) => {
                    warn!(error = %e, "failed to fetch gas price, using default");
                    U256::from(DEFAULT_GAS_PRICE_WEI)
                }
            }
        };

        let slot0_fut = async {
            match self
                .dex
                .slot0(self.cfg.token_in, self.cfg.token_out, self.cfg.pool_fee)
                .await
            {
                Ok(slot0) => Some(slot0),
                Err(e) => {
                    warn!(error = %e, "failed to fetch slot0, skipping pre-flight check");
                    None
                }
            }
        };

        // CEX depth and every quote are mandatory: the first failure cancels
        // the sibling fetches and abandons the block. Gas and slot0 are
        // isolated so they can only degrade, never abort.
        let (mandatory, gas_price, slot0) = tokio::join!(
            async { tokio::try_join!(depth_fut, quotes_fut) },
            gas_fut,
            slot0_fut,
        );

        let (book, quotes) = match mandatory {
            Ok(data) => data,
            Err(e) => {
                error!(block = block.number.as_u64(), error = %e, "data fetch failed");
                return;
            }
        };

        if let Some(slot0) = slot0 {
            match sqrt_price_x96_to_price(
                slot0.sqrt_price_x96,
                self.cfg.token_in_dec,
                self.cfg.token_out_dec,
            ) {
                Ok(price) => {
                    info!(tick = slot0.tick, pool_price = %price.round_dp(2), "pre-flight pool state");
                }
                Err(_) => info!(tick = slot0.tick, "pre-flight pool state"),
            }
        }

        for sized in &quotes {
            if let Err(e) =
                self.check_cex_buy_dex_sell(block.number, &book, sized.size, &sized.sell, gas_price)
            {
                error!(block = block.number.as_u64(), error = %e, "CEX -> DEX evaluation failed");
            }
            if let Err(e) =
                self.check_dex_buy_cex_sell(block.number, &book, sized.size, &sized.buy, gas_price)
            {
                error!(block = block.number.as_u64(), error = %e, "DEX -> CEX evaluation failed");
            }
        }
    }

    /// Buy `amount_in` of the input token on the CEX asks, sell on the DEX.
    /// `quote` is the exact-in projection for that size.
    fn check_cex_buy_dex_sell(
        &self,
        block_number: U64,
        book: &OrderBook,
        amount_in: U256,
        quote: &PriceQuote,
        gas_price_wei: U256,
    ) -> Result<()> {
        let amt_in = decimal_from_raw(amount_in, self.cfg.token_in_dec)?;
        let amt_out = decimal_from_raw(quote.amount, self.cfg.token_out_dec)?;
        let dex_price = amt_out / amt_in;

        let Some(cex_price) = book.effective_price(Side::Buy, amt_in) else {
            info!(
                block = block_number.as_u64(),
                size = %amt_in,
                "CEX depth insufficient, skipping size"
            );
            return Ok(());
        };

        let spread = (dex_price - cex_price) / cex_price * Decimal::from(100);

        let cex_cost = cex_price * amt_in * (Decimal::ONE + cex_fee_rate());
        let gas_cost = self.gas_cost_in_quote(quote.gas_estimate, gas_price_wei, cex_price)?;
        let net_dex = amt_out - gas_cost;
        let profit = net_dex - cex_cost;

        info!(
            block = block_number.as_u64(),
            cex_price = %cex_price.round_dp(2),
            dex_price = %dex_price.round_dp(2),
            spread_pct = %spread.round_dp(2),
            size = %amt_in.round_dp(2),
            "market analysis complete (CEX -> DEX)"
        );

        self.emit_opportunity(
            block_number,
            Direction::CexToDex,
            cex_price,
            dex_price,
            spread,
            profit,
            gas_cost,
        );
        self.account_profit(amt_in, cex_price, dex_price, profit, Direction::CexToDex);
        Ok(())
    }

    /// Buy the input token on the DEX (exact-out gives the required quote
    /// token), sell on the CEX bids.
    fn check_dex_buy_cex_sell(
        &self,
        block_number: U64,
        book: &OrderBook,
        amount_out: U256,
        quote: &PriceQuote,
        gas_price_wei: U256,
    ) -> Result<()> {
        let amt_eth = decimal_from_raw(amount_out, self.cfg.token_in_dec)?;
        let quote_in = decimal_from_raw(quote.amount, self.cfg.token_out_dec)?;
        let dex_price = quote_in / amt_eth;

        let Some(cex_price) = book.effective_price(Side::Sell, amt_eth) else {
            info!(
                block = block_number.as_u64(),
                size = %amt_eth,
                "CEX depth insufficient, skipping size"
            );
            return Ok(());
        };

        let spread = (cex_price - dex_price) / dex_price * Decimal::from(100);

        let cex_revenue = cex_price * amt_eth * (Decimal::ONE - cex_fee_rate());
        let gas_cost = self.gas_cost_in_quote(quote.gas_estimate, gas_price_wei, cex_price)?;
        let profit = cex_revenue - quote_in - gas_cost;

        info!(
            block = block_number.as_u64(),
            cex_price = %cex_price.round_dp(2),
            dex_price = %dex_price.round_dp(2),
            spread_pct = %spread.round_dp(2),
            size = %amt_eth.round_dp(2),
            "market analysis complete (DEX -> CEX)"
        );

        self.emit_opportunity(
            block_number,
            Direction::DexToCex,
            cex_price,
            dex_price,
            spread,
            profit,
            gas_cost,
        );
        self.account_profit(amt_eth, cex_price, dex_price, profit, Direction::DexToCex);
        Ok(())
    }

    /// `gas_estimate * gas_price` in the quote currency, priced at the
    /// effective CEX rate.
    fn gas_cost_in_quote(
        &self,
        gas_estimate: U256,
        gas_price_wei: U256,
        cex_price: Decimal,
    ) -> Result<Decimal> {
        let gas_used = decimal_from_u256(gas_estimate)?;
        let gas_price_eth = decimal_from_raw(gas_price_wei, 18)?;
        Ok(gas_used * gas_price_eth * cex_price)
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_opportunity(
        &self,
        block_number: U64,
        direction: Direction,
        cex_price: Decimal,
        dex_price: Decimal,
        spread: Decimal,
        profit: Decimal,
        gas_cost: Decimal,
    ) {
        self.notifier.broadcast(ArbitrageEvent::Opportunity {
            block_number: block_number.as_u64(),
            timestamp: Utc::now(),
            data: TradeData {
                cex_price: cex_price.to_f64().unwrap_or_default(),
                dex_price: dex_price.to_f64().unwrap_or_default(),
                spread_pct: spread.to_f64().unwrap_or_default(),
                estimated_profit: profit.to_f64().unwrap_or_default(),
                gas_cost: gas_cost.to_f64().unwrap_or_default(),
                symbol: self.cfg.symbol.clone(),
                direction,
            },
        });
    }

    fn account_profit(
        &self,
        amount: Decimal,
        cex_price: Decimal,
        dex_price: Decimal,
        profit: Decimal,
        direction: Direction,
    ) {
        if profit <= self.cfg.min_profit {
            return;
        }

        self.metrics.opportunities_found.inc();
        self.metrics
            .profit_total
            .with_label_values(&["USDC"])
            .inc_by(profit.to_f64().unwrap_or_default());

        info!(
            dir = %direction,
            size = %amount.round_dp(2),
            cex = %cex_price.round_dp(2),
            dex = %dex_price.round_dp(2),
            profit = %profit.round_dp(2),
            "arb opportunity"
        );
    }
}
