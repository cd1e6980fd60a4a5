/*
 * Resilient chain-head subscription with gap backfill
 *
 * State machine: DISCONNECTED -> SUBSCRIBING -> LIVE -> (timeout/error ->
 * DISCONNECTED | cancellation -> CLOSED). Backfilled headers are emitted in
 * ascending order before live headers after every reconnect.
 */

use chrono::{DateTime, TimeZone, Utc};
use ethers::providers::{Middleware, Provider, StreamExt, Ws};
use ethers::types::{H256, U64};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use crate::models::{Block, VigilError};
use crate::resilience::{Backoff, TokenBucket};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);
const BACKFILL_CAP: u64 = 50;
const CHANNEL_DEPTH: usize = 32;

/// Source of chain heads as seen by the orchestrator. Implemented by
/// `HeadSource` in production and by channel-backed doubles in tests.
pub trait BlockSource: Send + Sync {
    fn subscribe(
        &self,
        ctx: CancellationToken,
    ) -> (mpsc::Receiver<Block>, mpsc::Receiver<VigilError>);
}

pub struct HeadSource {
    ws_url: String,
    limiter: Arc<TokenBucket>,
}

/// Why the LIVE state ended.
enum LiveExit {
    HeartbeatTimeout,
    StreamEnded,
    Cancelled,
    ReceiverGone,
}

impl HeadSource {
    #[must_use]
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            limiter: Arc::new(TokenBucket::new(20.0, 5)),
        }
    }
}

impl BlockSource for HeadSource {
    /// Start the source. Blocks arrive on the first channel; transient errors
    /// on the second. Errors are informational only: the source reconnects on
    /// its own and never aborts until `ctx` is cancelled or the block
    /// receiver is dropped.
    fn subscribe(
        &self,
        ctx: CancellationToken,
    ) -> (mpsc::Receiver<Block>, mpsc::Receiver<VigilError>) {
        let (blocks_tx, blocks_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (errors_tx, errors_rx) = mpsc::channel(CHANNEL_DEPTH);

        let ws_url = self.ws_url.clone();
        let limiter = self.limiter.clone();
        tokio::spawn(run(ws_url, limiter, blocks_tx, errors_tx, ctx));

        (blocks_rx, errors_rx)
    }
}

async fn run(
    ws_url: String,
    limiter: Arc<TokenBucket>,
    blocks_tx: mpsc::Sender<Block>,
    errors_tx: mpsc::Sender<VigilError>,
    ctx: CancellationToken,
) {
    let mut backoff = Backoff::new(INITIAL_BACKOFF, MAX_BACKOFF);
    let mut last_block: Option<U64> = None;

    // DISCONNECTED
    loop {
        if ctx.is_cancelled() {
            return;
        }

        // SUBSCRIBING
        let provider = match Provider::<Ws>::connect(&ws_url).await {
            Ok(p) => p,
            Err(e) => {
                report(&errors_tx, VigilError::HeadSource(format!("dial failed: {e}")));
                if sleep_or_cancel(backoff.next(), &ctx).await {
                    return;
                }
                continue;
            }
        };

        if let Some(last) = last_block {
            match backfill(&provider, last, &limiter, &blocks_tx, &errors_tx, &ctx).await {
                BackfillOutcome::Done(advanced) => last_block = advanced.or(last_block),
                BackfillOutcome::Stop => return,
            }
        }

        let mut stream = match provider.subscribe_blocks().await {
            Ok(s) => s,
            Err(e) => {
                report(&errors_tx, VigilError::HeadSource(format!("sub failed: {e}")));
                if sleep_or_cancel(backoff.next(), &ctx).await {
                    return;
                }
                continue;
            }
        };

        // LIVE
        backoff.reset();
        info!("head subscription live");

        let exit = loop {
            tokio::select! {
                _ = ctx.cancelled() => break LiveExit::Cancelled,
                next = tokio::time::timeout(HEARTBEAT_TIMEOUT, stream.next()) => {
                    match next {
                        Err(_) => {
                            report(&errors_tx, VigilError::HeadSource(format!(
                                "heartbeat timeout ({HEARTBEAT_TIMEOUT:?})"
                            )));
                            break LiveExit::HeartbeatTimeout;
                        }
                        Ok(None) => {
                            report(&errors_tx, VigilError::HeadSource("subscription ended".to_string()));
                            break LiveExit::StreamEnded;
                        }
                        Ok(Some(header)) => {
                            let Some(block) = block_from_header(&header) else {
                                continue;
                            };
                            last_block = Some(block.number);
                            if blocks_tx.send(block).await.is_err() {
                                break LiveExit::ReceiverGone;
                            }
                        }
                    }
                }
            }
        };

        match exit {
            // CLOSED
            LiveExit::Cancelled | LiveExit::ReceiverGone => return,
            LiveExit::HeartbeatTimeout | LiveExit::StreamEnded => {}
        }
    }
}

enum BackfillOutcome {
    /// Backfill finished; carries the highest emitted block number, if any.
    Done(Option<U64>),
    /// Cancellation or a dropped receiver: the source must shut down.
    Stop,
}

/// Replay headers missed while disconnected: `(last, head]` capped at the
/// most recent `BACKFILL_CAP`, in ascending order, paced by the shared
/// limiter. Fetch failures skip that block; freshness beats completeness.
async fn backfill(
    provider: &Provider<Ws>,
    last: U64,
    limiter: &TokenBucket,
    blocks_tx: &mpsc::Sender<Block>,
    errors_tx: &mpsc::Sender<VigilError>,
    ctx: &CancellationToken,
) -> BackfillOutcome {
    let head = match provider.get_block_number().await {
        Ok(head) => head,
        Err(e) => {
            report(errors_tx, VigilError::HeadSource(format!("head fetch failed: {e}")));
            return BackfillOutcome::Done(None);
        }
    };

    let Some((start, end)) = backfill_range(last, head, BACKFILL_CAP) else {
        return BackfillOutcome::Done(None);
    };

    info!(start = start.as_u64(), end = end.as_u64(), "backfilling missed blocks");

    let mut emitted = None;
    let mut number = start;
    while number <= end {
        tokio::select! {
            _ = ctx.cancelled() => return BackfillOutcome::Stop,
            _ = limiter.acquire() => {}
        }

        match provider.get_block(number).await {
            Ok(Some(header)) => {
                if let Some(block) = block_from_header(&header) {
                    if blocks_tx.send(block).await.is_err() {
                        return BackfillOutcome::Stop;
                    }
                    emitted = Some(number);
                }
            }
            Ok(None) => {}
            Err(e) => {
                report(errors_tx, VigilError::HeadSource(format!(
                    "backfill failed for block {number}: {e}"
                )));
            }
        }
        number += U64::one();
    }

    BackfillOutcome::Done(emitted)
}

/// The inclusive range to backfill, or `None` when the head has not moved.
/// Capped to the `cap` most recent blocks: `start = max(last + 1, head - cap + 1)`.
fn backfill_range(last: U64, head: U64, cap: u64) -> Option<(U64, U64)> {
    if head <= last {
        return None;
    }

    let floor = head.as_u64().saturating_sub(cap - 1);
    let start = (last + U64::one()).as_u64().max(floor);
    Some((U64::from(start), head))
}

fn block_from_header(header: &ethers::types::Block<H256>) -> Option<Block> {
    let number = header.number?;
    let timestamp = timestamp_from_secs(header.timestamp.low_u64());
    Some(Block { number, timestamp })
}

fn timestamp_from_secs(secs: u64) -> DateTime<Utc> {
    #[allow(clippy::cast_possible_wrap)]
    Utc.timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Non-blocking error delivery: an unread error is logged and dropped rather
/// than stalling the source.
fn report(errors_tx: &mpsc::Sender<VigilError>, err: VigilError) {
    if let Err(mpsc::error::TrySendError::Full(err) | mpsc::error::TrySendError::Closed(err)) =
        errors_tx.try_send(err)
    {
        warn!(error = %err, "head source error (no reader)");
    }
}

/// Returns true when cancelled.
async fn sleep_or_cancel(delay: Duration, ctx: &CancellationToken) -> bool {
    tokio::select! {
        _ = ctx.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backfill_range_within_cap() {
        let (start, end) = backfill_range(U64::from(100), U64::from(110), 50).unwrap();
        assert_eq!(start, U64::from(101));
        assert_eq!(end, U64::from(110));
    }

    #[test]
    fn backfill_range_caps_to_most_recent_fifty() {
        // Gap of 200: only the most recent 50 survive.
        let (start, end) = backfill_range(U64::from(100), U64::from(300), 50).unwrap();
        assert_eq!(start, U64::from(251));
        assert_eq!(end, U64::from(300));
        assert_eq!(end.as_u64() - start.as_u64() + 1, 50);
    }

    #[test]
    fn backfill_range_empty_when_head_not_ahead() {
        assert!(backfill_range(U64::from(100), U64::from(100), 50).is_none());
        assert!(backfill_range(U64::from(100), U64::from(99), 50).is_none());
    }

    #[test]
    fn backfill_range_exact_boundary() {
        // head - last == cap: every missed block still fits.
        let (start, end) = backfill_range(U64::from(100), U64::from(150), 50).unwrap();
        assert_eq!(start, U64::from(101));
        assert_eq!(end, U64::from(150));
    }

    #[test]
    fn header_without_number_is_skipped() {
        let header = ethers::types::Block::<H256>::default();
        assert!(block_from_header(&header).is_none());
    }

    #[test]
    fn header_converts_to_block() {
        let header = ethers::types::Block::<H256> {
            number: Some(U64::from(123)),
            timestamp: ethers::types::U256::from(1_700_000_000u64),
            ..Default::default()
        };
        let block = block_from_header(&header).unwrap();
        assert_eq!(block.number, U64::from(123));
        assert_eq!(block.timestamp.timestamp(), 1_700_000_000);
    }
}
