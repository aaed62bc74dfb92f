//! OKEx (v3 spot): raw-deflate binary frames carrying depth and subscribe
//! acks, plus a plain-text `ping`/`pong` keepalive that rides the same
//! connection. Liveness here is judged off `last_inbound_ms` — any inbound
//! frame, not just a `pong`, counts as a sign of life.

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

const PING_PERIOD_MS: u64 = 5_000;
const PING_AFTER_SILENCE_MS: i64 = 3_000;
const DEAD_AFTER_SILENCE_MS: i64 = PING_PERIOD_MS as i64 * 3;

#[derive(Debug, Deserialize)]
struct DepthMessage {
    table: Option<String>,
    data: Option<Vec<DepthData>>,
}

#[derive(Debug, Deserialize)]
struct DepthData {
    instrument_id: Option<String>,
    bids: Option<Vec<Vec<String>>>,
    asks: Option<Vec<Vec<String>>>,
    timestamp: Option<String>,
}

/// OKEx depth levels are `[price, size, ...]` — spot carries a trailing
/// order-count field, other channels don't. Only the first two matter.
fn level_from_row(row: Vec<String>) -> Option<(String, String)> {
    let mut it = row.into_iter();
    let price = it.next()?;
    let size = it.next()?;
    Some((price, size))
}

#[derive(Debug, Deserialize)]
struct AckMessage {
    event: Option<String>,
    channel: Option<String>,
}

fn symbol_from_channel(channel: &str) -> Option<&str> {
    channel.split(':').nth(1)
}

pub struct OkExHandler;

impl OkExHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OkExHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for OkExHandler {
    fn venue(&self) -> Venue {
        Venue::OkEx
    }

    fn format_subscribe(&self, req: &SubscribeRequest) -> Vec<u8> {
        if req.market_kind != MarketKind::Spot {
            return Vec::new();
        }
        format!(
            r#"{{"op": "subscribe", "args": ["spot/depth5:{}"]}}"#,
            req.symbol
        )
        .into_bytes()
    }

    async fn keepalive(&self, worker: Arc<Worker>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(PING_PERIOD_MS));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let silence = now_ms() - worker.last_inbound_ms();
                    if silence > DEAD_AFTER_SILENCE_MS {
                        warn!(venue = %Venue::OkEx, silence_ms = silence, "no inbound data, forcing reconnect");
                        worker.force_close().await;
                    } else if silence > PING_AFTER_SILENCE_MS {
                        if let Err(e) = worker.send_raw(b"ping".to_vec()).await {
                            debug!(venue = %Venue::OkEx, error = %e, "failed to send ping");
                        }
                    }
                }
            }
        }
    }

    async fn decode(&self, frame: &Frame, worker: &Worker) -> Option<Quote> {
        match frame.kind {
            FrameKind::Text => {
                if frame.bytes == b"ping" {
                    let _ = worker.send_raw(b"pong".to_vec()).await;
                    return None;
                }
                if frame.bytes == b"pong" {
                    // The read loop already stamped `last_inbound_ms` for
                    // this frame before handing it to the decode pool —
                    // that's the only liveness signal `keepalive` reads.
                    return None;
                }
                self.recognize_ack(&frame.bytes, worker);
                None
            }
            FrameKind::Binary => {
                let text = codec::inflate(&frame.bytes).ok()?;
                let value: Value = serde_json::from_str(&text).ok()?;
                if let Some(quote) = self.try_decode_depth(&value) {
                    return Some(quote);
                }
                self.recognize_ack(text.as_bytes(), worker);
                None
            }
        }
    }

    fn recognize_ack(&self, bytes: &[u8], worker: &Worker) {
        let Ok(ack) = serde_json::from_slice::<AckMessage>(bytes) else {
            return;
        };
        if ack.event.as_deref() != Some("subscribe") {
            return;
        }
        let Some(channel) = ack.channel else { return };
        if let Some(symbol) = symbol_from_channel(&channel) {
            worker.mark_acked(symbol);
        }
    }
}

impl OkExHandler {
    fn try_decode_depth(&self, value: &Value) -> Option<Quote> {
        let msg: DepthMessage = serde_json::from_value(value.clone()).ok()?;
        msg.table.as_deref()?;
        let entry = msg.data?.into_iter().next()?;

        let symbol = entry.instrument_id?;
        let bids: Vec<_> = entry
            .bids
            .unwrap_or_default()
            .into_iter()
            .filter_map(level_from_row)
            .collect();
        let asks: Vec<_> = entry
            .asks
            .unwrap_or_default()
            .into_iter()
            .filter_map(level_from_row)
            .collect();

        let timestamp_ms = entry
            .timestamp
            .and_then(|ts| chrono::DateTime::parse_from_rfc3339(&ts).ok())
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(now_ms);

        Quote::new(Venue::OkEx, symbol, bids, asks, timestamp_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AggregatorConfig;
    use crate::quote::SubscribeRequest;
    use crate::worker::Worker;

    #[test]
    fn format_subscribe_matches_wire_format() {
        let h = OkExHandler::new();
        let req = SubscribeRequest::new("ltcusdt", Venue::OkEx, MarketKind::Spot);
        assert_eq!(
            h.format_subscribe(&req),
            br#"{"op": "subscribe", "args": ["spot/depth5:ltcusdt"]}"#.to_vec()
        );
    }

    #[test]
    fn format_subscribe_rejects_non_spot() {
        let h = OkExHandler::new();
        let req = SubscribeRequest::new("ltcusdt", Venue::OkEx, MarketKind::Perpetual);
        assert!(h.format_subscribe(&req).is_empty());
    }

    #[test]
    fn symbol_from_channel_extracts_segment_after_colon() {
        assert_eq!(symbol_from_channel("spot/depth5:ltcusdt"), Some("ltcusdt"));
    }

    #[test]
    fn try_decode_depth_extracts_quote_from_table_payload() {
        let h = OkExHandler::new();
        let value: Value = serde_json::from_str(
            r#"{"table":"spot/depth5","data":[{"instrument_id":"LTC-USDT","timestamp":"2023-07-22T12:00:00.000Z","bids":[["85.1","10","2"]],"asks":[["85.2","5","1"]]}]}"#,
        )
        .unwrap();
        let quote = h.try_decode_depth(&value).unwrap();
        assert_eq!(quote.symbol, "LTC-USDT");
        assert_eq!(quote.best_bid.as_str(), "85.1");
        assert_eq!(quote.best_ask.as_str(), "85.2");
    }

    #[test]
    fn try_decode_depth_accepts_bare_price_size_pairs() {
        // Spec §8 property 10: a two-element `[price, size]` row (no
        // trailing order-count field) must still decode.
        let h = OkExHandler::new();
        let value: Value = serde_json::from_str(
            r#"{"table":"spot/depth5","data":[{"instrument_id":"ETH-USDT","timestamp":"2023-07-22T12:00:00.000Z","bids":[["100","1"]],"asks":[["101","2"]]}]}"#,
        )
        .unwrap();
        let quote = h.try_decode_depth(&value).unwrap();
        assert_eq!(quote.symbol, "ETH-USDT");
        assert_eq!(quote.best_bid.as_str(), "100");
        assert_eq!(quote.best_ask.as_str(), "101");
    }

    #[tokio::test]
    async fn recognize_ack_moves_symbol_from_pending_to_acked() {
        let (tx, _rx) = tokio::sync::mpsc::channel(10);
        let worker = Worker::new(
            "wss://example.invalid/ws",
            Arc::new(OkExHandler::new()),
            AggregatorConfig::default(),
            tx,
        );
        let req = SubscribeRequest::new("ETH-USDT", Venue::OkEx, MarketKind::Spot);
        // The socket isn't connected, so this errors, but `pending` is
        // populated before the send is attempted.
        let _ = worker.subscribe(req).await;
        assert!(worker.is_pending("ETH-USDT"));

        let h = OkExHandler::new();
        h.recognize_ack(
            br#"{"event":"subscribe","channel":"spot/depth5:ETH-USDT"}"#,
            &worker,
        );

        assert!(worker.is_acked("ETH-USDT"));
        assert!(!worker.is_pending("ETH-USDT"));
    }
}
