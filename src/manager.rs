//! Top-level registry: owns one `Worker` per venue, the shared decode pool,
//! the shared `MarketPoolHub`, and the subscribe intake dispatcher. The
//! single entry point callers build and hold onto.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::AggregatorConfig;
use crate::decode_pool::{self, DecodeJob};
use crate::error::AggregatorError;
use crate::market_pool::{MarketPoolHub, MarketStream};
use crate::quote::{Quote, SubscribeRequest, Venue};
use crate::subscribe::SubscribeIntake;
use crate::venue::{HuobiHandler, OkExHandler};
use crate::worker::Worker;

const HUOBI_WS_URL: &str = "wss://api.huobi.pro/ws";
const OKEX_WS_URL: &str = "wss://real.okex.com:8443/ws/v3";

pub struct Manager {
    workers: HashMap<Venue, Arc<Worker>>,
    cancel: CancellationToken,
    intake: SubscribeIntake,
    hub: Arc<MarketPoolHub>,
    config: AggregatorConfig,
    decode_rx: AsyncMutex<Option<mpsc::Receiver<DecodeJob>>>,
    subscribe_rx: AsyncMutex<Option<mpsc::Receiver<SubscribeRequest>>>,
}

impl Manager {
    pub fn new(config: AggregatorConfig) -> Arc<Self> {
        let (decode_tx, decode_rx) = decode_pool::channel(config.decode_pool_buffer);
        let (intake, subscribe_rx) = SubscribeIntake::new(config.intake_queue_capacity);
        let hub = Arc::new(MarketPoolHub::new(config.market_pool_capacity));
        let cancel = CancellationToken::new();

        let mut workers = HashMap::new();
        workers.insert(
            Venue::Huobi,
            Worker::new(
                HUOBI_WS_URL,
                Arc::new(HuobiHandler::new()),
                config.clone(),
                decode_tx.clone(),
            ),
        );
        workers.insert(
            Venue::OkEx,
            Worker::new(
                OKEX_WS_URL,
                Arc::new(OkExHandler::new()),
                config.clone(),
                decode_tx,
            ),
        );

        Arc::new(Self {
            workers,
            cancel,
            intake,
            hub,
            config,
            decode_rx: AsyncMutex::new(Some(decode_rx)),
            subscribe_rx: AsyncMutex::new(Some(subscribe_rx)),
        })
    }

    /// Sending handle callers use to request a new subscription.
    pub fn intake(&self) -> SubscribeIntake {
        self.intake.clone()
    }

    /// A fresh push-path subscription to every decoded `Quote`, across
    /// venues.
    pub fn market_stream(&self) -> MarketStream {
        self.hub.subscribe()
    }

    pub fn find(
        &self,
        venue: Venue,
        symbols: &[String],
    ) -> Result<HashMap<String, Quote>, AggregatorError> {
        self.workers
            .get(&venue)
            .map(|w| w.find(symbols))
            .ok_or_else(|| AggregatorError::UnknownVenue(venue.to_string()))
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drives every worker, the decode pool, and the subscribe dispatcher
    /// until `close()` is called. Must be called exactly once.
    pub async fn run(self: Arc<Self>) {
        let decode_rx = self
            .decode_rx
            .lock()
            .await
            .take()
            .expect("Manager::run called more than once");
        let subscribe_rx = self
            .subscribe_rx
            .lock()
            .await
            .take()
            .expect("Manager::run called more than once");

        let decode_task = tokio::spawn(decode_pool::run(
            decode_rx,
            self.config.decode_pool_capacity,
            self.hub.clone(),
            self.cancel.clone(),
        ));

        let worker_tasks: Vec<_> = self
            .workers
            .values()
            .cloned()
            .map(|worker| {
                let cancel = self.cancel.clone();
                tokio::spawn(async move { worker.run(cancel).await })
            })
            .collect();

        let dispatch_task = {
            let manager = self.clone();
            tokio::spawn(async move { manager.dispatch_loop(subscribe_rx).await })
        };

        let _ = decode_task.await;
        for task in worker_tasks {
            let _ = task.await;
        }
        let _ = dispatch_task.await;
    }

    async fn dispatch_loop(self: Arc<Self>, mut rx: mpsc::Receiver<SubscribeRequest>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                req = rx.recv() => {
                    let Some(req) = req else { return };
                    let Some(worker) = self.workers.get(&req.venue) else {
                        warn!(venue = %req.venue, "subscribe request for unregistered venue");
                        continue;
                    };
                    if let Err(e) = worker.subscribe(req).await {
                        warn!(error = %e, "subscribe failed");
                    }
                }
            }
        }
    }

    /// Cancels every worker, the decode pool, and the dispatcher. `run()`
    /// returns once its spawned tasks observe the cancellation.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}
