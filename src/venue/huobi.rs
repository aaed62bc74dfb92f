//! Huobi: gzip-compressed binary frames carrying depth ticks, server pings,
//! and subscribe acks, all multiplexed onto the same channel. A server
//! `{"ping": <ms>}` must be answered with `{"pong": <ms>}` on the same
//! connection or Huobi closes it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec;
use crate::quote::{MarketKind, Quote, SubscribeRequest, Venue};
use crate::time_util::now_ms;
use crate::worker::Worker;

use super::{Frame, FrameKind, Handler};

const KEEPALIVE_CHECK_INTERVAL_MS: u64 = 3_000;
const SERVER_PING_DEAD_AFTER_MS: i64 = 10_000;

#[derive(Debug, Deserialize)]
struct DepthTick {
    bids: Vec<(f64, f64)>,
    asks: Vec<(f64, f64)>,
}

#[derive(Debug, Deserialize)]
struct DepthMessage {
    ch: Option<String>,
    ts: Option<i64>,
    tick: Option<DepthTick>,
}

#[derive(Debug, Deserialize)]
struct PingMessage {
    ping: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AckMessage {
    status: Option<String>,
    subbed: Option<String>,
}

fn symbol_from_channel(channel: &str) -> Option<&str> {
    channel.split('.').nth(1)
}

fn level_from_pair(price: f64, amount: f64) -> (String, String) {
    (price.to_string(), amount.to_string())
}

pub struct HuobiHandler;

impl HuobiHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HuobiHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for HuobiHandler {
    fn venue(&self) -> Venue {
        Venue::Huobi
    }

    fn format_subscribe(&self, req: &SubscribeRequest) -> Vec<u8> {
        if req.market_kind != MarketKind::Spot {
            return Vec::new();
        }
        format!(
            r#"{{"id":"id1","sub":"market.{}.depth.step1"}}"#,
            req.symbol
        )
        .into_bytes()
    }

    async fn keepalive(&self, worker: Arc<Worker>, cancel: CancellationToken) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_millis(KEEPALIVE_CHECK_INTERVAL_MS));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let silence = now_ms() - worker.last_server_ping_ms();
                    if silence > SERVER_PING_DEAD_AFTER_MS {
                        warn!(venue = %Venue::Huobi, silence_ms = silence, "no server ping, forcing reconnect");
                        worker.force_close().await;
                    }
                }
            }
        }
    }

    async fn decode(&self, frame: &Frame, worker: &Worker) -> Option<Quote> {
        if frame.kind != FrameKind::Binary {
            return None;
        }
        let text = codec::gunzip(&frame.bytes).ok()?;
        let value: Value = serde_json::from_str(&text).ok()?;

        if let Some(quote) = self.try_decode_depth(&value) {
            return Some(quote);
        }

        if self.try_handle_ping(&value, worker).await {
            return None;
        }

        self.recognize_ack(text.as_bytes(), worker);
        None
    }

    fn recognize_ack(&self, bytes: &[u8], worker: &Worker) {
        let Ok(ack) = serde_json::from_slice::<AckMessage>(bytes) else {
            return;
        };
        if ack.status.as_deref() != Some("ok") {
            return;
        }
        let Some(subbed) = ack.subbed else { return };
        if let Some(symbol) = symbol_from_channel(&subbed) {
            worker.mark_acked(symbol);
        }
    }
}

impl HuobiHandler {
    fn try_decode_depth(&self, value: &Value) -> Option<Quote> {
        let msg: DepthMessage = serde_json::from_value(value.clone()).ok()?;
        let channel = msg.ch?;
        let symbol = symbol_from_channel(&channel)?.to_string();
        let tick = msg.tick?;

        let bids: Vec<_> = tick
            .bids
            .iter()
            .map(|(p, a)| level_from_pair(*p, *a))
            .collect();
        let asks: Vec<_> = tick
            .asks
            .iter()
            .map(|(p, a)| level_from_pair(*p, *a))
            .collect();

        Quote::new(
            Venue::Huobi,
            symbol,
            bids,
            asks,
            msg.ts.unwrap_or_else(now_ms),
        )
    }

    async fn try_handle_ping(&self, value: &Value, worker: &Worker) -> bool {
        let Ok(ping) = serde_json::from_value::<PingMessage>(value.clone()) else {
            return false;
        };
        let Some(ms) = ping.ping else { return false };

        worker.record_server_ping(now_ms());
        let pong = format!(r#"{{"pong":{}}}"#, ms).into_bytes();
        if let Err(e) = worker.send_raw(pong).await {
            debug!(venue = %Venue::Huobi, error = %e, "failed to send pong");
        }
        true
    }
}
