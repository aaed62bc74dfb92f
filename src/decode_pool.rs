//! Bounded concurrent decode pool: keeps JSON parsing and decompression off
//! the socket read path. A job buffer absorbs bursts; a semaphore caps how
//! many decodes run at once. A decoded `Quote` is delivered to both the
//! originating worker's `Lister` (pull path) and the shared `MarketPoolHub`
//! (push path).

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::market_pool::MarketPoolHub;
use crate::venue::Frame;
use crate::worker::Worker;

/// One inbound frame waiting to be decoded, tagged with the worker it came
/// from (a decoder needs its `Handler` and its mutable keepalive state).
pub struct DecodeJob {
    pub worker: Arc<Worker>,
    pub frame: Frame,
}

/// Creates the job channel a `Worker` submits into. The receiving half is
/// handed to `run`.
pub fn channel(buffer: usize) -> (mpsc::Sender<DecodeJob>, mpsc::Receiver<DecodeJob>) {
    mpsc::channel(buffer)
}

/// Drains `rx`, spawning up to `capacity` concurrent decode tasks. Exits
/// once `cancel` fires or every sender is dropped.
pub async fn run(
    mut rx: mpsc::Receiver<DecodeJob>,
    capacity: usize,
    hub: Arc<MarketPoolHub>,
    cancel: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(capacity));

    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let hub = hub.clone();

        tokio::spawn(async move {
            let _permit = permit;
            process_job(job, &hub).await;
        });
    }
}

async fn process_job(job: DecodeJob, hub: &MarketPoolHub) {
    let quote = job.worker.decode_frame(&job.frame).await;
    if let Some(quote) = quote {
        debug!(venue = %job.worker.venue, symbol = %quote.symbol, "decoded quote");
        job.worker.list().add(quote.symbol.clone(), quote.clone());
        hub.push(quote);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AggregatorConfig;
    use crate::quote::Venue;
    use crate::venue::{FrameKind, HuobiHandler};

    #[tokio::test]
    async fn decoded_depth_reaches_lister_and_market_pool() {
        let hub = Arc::new(MarketPoolHub::new(10));
        let (decode_tx, decode_rx) = channel(10);
        let cancel = CancellationToken::new();

        let worker = Worker::new(
            "wss://example.invalid/ws",
            Arc::new(HuobiHandler::new()),
            AggregatorConfig::default(),
            decode_tx.clone(),
        );

        let run_cancel = cancel.clone();
        let run_hub = hub.clone();
        let pool_task = tokio::spawn(run(decode_rx, 4, run_hub, run_cancel));

        let body = r#"{"ch":"market.ethusdt.depth.step1","ts":1690000000000,"tick":{"bids":[[100.1,2.0]],"asks":[[100.2,3.0]]}}"#;
        let compressed = {
            use std::io::Write;
            let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
            enc.write_all(body.as_bytes()).unwrap();
            enc.finish().unwrap()
        };

        decode_tx
            .send(DecodeJob {
                worker: worker.clone(),
                frame: Frame {
                    kind: FrameKind::Binary,
                    bytes: compressed,
                },
            })
            .await
            .unwrap();

        for _ in 0..50 {
            if !worker.list().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert!(!worker.list().is_empty());
        let found = worker.find(&["ethusdt".to_string()]);
        assert_eq!(found.get("ethusdt").unwrap().venue, Venue::Huobi);
        assert_eq!(hub.pool().len(), 1);

        cancel.cancel();
        let _ = pool_task.await;
    }
}
