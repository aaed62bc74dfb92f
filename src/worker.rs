//! The long-lived per-venue actor: owns the socket, the subscription state
//! machine (`pending`/`acked`), the local `Lister`, and drives its `Handler`
//! through dial, read, keepalive, resubscribe-sweep and GC-sweep tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AggregatorConfig;
use crate::decode_pool::DecodeJob;
use crate::error::AggregatorError;
use crate::lister::Lister;
use crate::quote::{Quote, SubscribeRequest, Venue};
use crate::time_util::now_ms;
use crate::venue::{Frame, FrameKind, Handler};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = futures_util::stream::SplitSink<WsStream, Message>;
type WsRead = futures_util::stream::SplitStream<WsStream>;

/// Mutual exclusion + debounce for `reconnect_and_resubscribe`.
///
/// A second concurrent reconnect attempt (lock already held) or an attempt
/// within `debounce` of the previous attempt's *start* is rejected
/// immediately — this is what prevents reconnect storms when a read error
/// and a keepalive timeout fire at once (§4.2).
struct ReconnectGate {
    busy: AsyncMutex<()>,
    last_start_ms: AtomicI64,
    debounce_ms: i64,
}

impl ReconnectGate {
    fn new(debounce: std::time::Duration) -> Self {
        Self {
            busy: AsyncMutex::new(()),
            last_start_ms: AtomicI64::new(i64::MIN / 2),
            debounce_ms: debounce.as_millis() as i64,
        }
    }

    /// Returns a guard if this attempt may proceed, `None` otherwise. The
    /// guard must be held for the duration of the reconnect.
    fn try_begin(&self, now: i64) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        let guard = self.busy.try_lock().ok()?;
        let last = self.last_start_ms.load(Ordering::Acquire);
        if now - last < self.debounce_ms {
            return None;
        }
        self.last_start_ms.store(now, Ordering::Release);
        Some(guard)
    }
}

/// Owns one venue's connection and subscription state.
pub struct Worker {
    pub venue: Venue,
    ws_url: String,
    handler: Arc<dyn Handler>,
    config: AggregatorConfig,
    list: Lister,
    pending: SyncMutex<HashMap<String, Vec<u8>>>,
    acked: SyncMutex<HashMap<String, Vec<u8>>>,
    write: AsyncMutex<Option<WsWrite>>,
    reconnect_gate: ReconnectGate,
    last_inbound_ms: AtomicI64,
    last_server_ping_ms: AtomicI64,
    decode_tx: mpsc::Sender<DecodeJob>,
}

impl Worker {
    pub fn new(
        ws_url: impl Into<String>,
        handler: Arc<dyn Handler>,
        config: AggregatorConfig,
        decode_tx: mpsc::Sender<DecodeJob>,
    ) -> Arc<Self> {
        let venue = handler.venue();
        let start = now_ms();
        Arc::new(Self {
            venue,
            ws_url: ws_url.into(),
            handler,
            reconnect_gate: ReconnectGate::new(config.reconnect_debounce),
            config,
            list: Lister::new(),
            pending: SyncMutex::new(HashMap::new()),
            acked: SyncMutex::new(HashMap::new()),
            write: AsyncMutex::new(None),
            last_inbound_ms: AtomicI64::new(start),
            last_server_ping_ms: AtomicI64::new(start),
            decode_tx,
        })
    }

    pub fn list(&self) -> &Lister {
        &self.list
    }

    pub fn find(&self, symbols: &[String]) -> HashMap<String, Quote> {
        self.list.find(symbols)
    }

    /// Hands `frame` to this worker's `Handler`. Called from the decode pool,
    /// off the socket read path.
    pub async fn decode_frame(&self, frame: &Frame) -> Option<Quote> {
        self.handler.decode(frame, self).await
    }

    pub fn last_inbound_ms(&self) -> i64 {
        self.last_inbound_ms.load(Ordering::Acquire)
    }

    pub fn last_server_ping_ms(&self) -> i64 {
        self.last_server_ping_ms.load(Ordering::Acquire)
    }

    pub fn record_server_ping(&self, at_ms: i64) {
        self.last_server_ping_ms.store(at_ms, Ordering::Release);
    }

    /// Move `symbol` from `pending` to `acked`, if it was pending. A symbol
    /// not currently pending (stale/duplicate ack) is a no-op.
    pub fn mark_acked(&self, symbol: &str) {
        let frame = self.pending.lock().remove(symbol);
        if let Some(frame) = frame {
            self.acked.lock().insert(symbol.to_string(), frame);
            debug!(venue = %self.venue, symbol, "subscription acked");
        }
    }

    pub fn is_pending(&self, symbol: &str) -> bool {
        self.pending.lock().contains_key(symbol)
    }

    pub fn is_acked(&self, symbol: &str) -> bool {
        self.acked.lock().contains_key(symbol)
    }

    /// Moves every currently-acked symbol back to pending, so its subscribe
    /// frame gets resent. Used on reconnect (§4.2: "Acked" -> "Pending").
    fn requeue_acked_as_pending(&self) {
        let mut pending = self.pending.lock();
        let mut acked = self.acked.lock();
        for (symbol, frame) in acked.drain() {
            pending.insert(symbol, frame);
        }
    }

    /// Idempotent per symbol: overwrites and resends the pending frame.
    pub async fn subscribe(&self, req: SubscribeRequest) -> anyhow::Result<()> {
        let frame = self.handler.format_subscribe(&req);
        if frame.is_empty() {
            return Err(AggregatorError::UnsupportedMarketKind {
                venue: req.venue,
                kind: req.market_kind,
            }
            .into());
        }

        self.pending.lock().insert(req.symbol.clone(), frame.clone());
        self.acked.lock().remove(&req.symbol);

        self.send_raw(frame).await
    }

    /// Raw text-frame send, guarded by the shared write half. `subscribe`,
    /// the resubscribe sweep, and a venue's `keepalive`/`decode` all go
    /// through this.
    pub async fn send_raw(&self, bytes: Vec<u8>) -> anyhow::Result<()> {
        let text = String::from_utf8(bytes)?;
        let mut guard = self.write.lock().await;
        match guard.as_mut() {
            Some(sink) => {
                sink.send(Message::Text(text)).await?;
                Ok(())
            }
            None => anyhow::bail!("worker {} is not connected", self.venue),
        }
    }

    /// Used by a venue's `keepalive` task to force a reconnect when the
    /// liveness protocol decides the connection is dead. Closing the write
    /// half causes the read loop's next read to fail, which drives the
    /// normal reconnect path.
    pub async fn force_close(&self) {
        let mut guard = self.write.lock().await;
        if let Some(mut sink) = guard.take() {
            let _ = sink.close().await;
        }
    }

    /// Dial `ws_url` with a handshake timeout, retrying forever on failure.
    /// Never surfaces an error — liveness is preferred over fast failure.
    async fn dial(&self, cancel: &CancellationToken) -> Option<(WsWrite, WsRead)> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            debug!(venue = %self.venue, url = %self.ws_url, "dialing");
            let attempt = tokio::time::timeout(self.config.dial_timeout, self.dial_once()).await;

            match attempt {
                Ok(Ok(stream)) => {
                    info!(venue = %self.venue, "connected");
                    let (write, read) = stream.split();
                    return Some((write, read));
                }
                Ok(Err(e)) => warn!(venue = %self.venue, error = %e, "dial failed"),
                Err(_) => warn!(venue = %self.venue, "dial handshake timed out"),
            }

            tokio::select! {
                _ = tokio::time::sleep(jittered(self.config.dial_retry_delay)) => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// One dial attempt: directly, or tunnelled through `config.proxy_url`
    /// via an HTTP `CONNECT` if one is configured.
    async fn dial_once(&self) -> anyhow::Result<WsStream> {
        match &self.config.proxy_url {
            Some(proxy) => {
                let tcp = connect_via_proxy(proxy, &self.ws_url).await?;
                let (stream, _response) = tokio_tungstenite::client_async_tls(&self.ws_url, tcp).await?;
                Ok(stream)
            }
            None => {
                let (stream, _response) = connect_async(&self.ws_url).await?;
                Ok(stream)
            }
        }
    }

    /// The delicate operation (§4.2): mutual exclusion + debounce, close,
    /// redial, move every `acked` symbol back to `pending`, resend every
    /// pending frame at least once.
    async fn reconnect_and_resubscribe(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Option<WsRead> {
        let _guard = self.reconnect_gate.try_begin(now_ms())?;

        warn!(venue = %self.venue, "reconnecting");
        self.force_close().await;

        let (write, read) = self.dial(cancel).await?;
        *self.write.lock().await = Some(write);

        self.requeue_acked_as_pending();

        let frames: Vec<Vec<u8>> = self.pending.lock().values().cloned().collect();
        for frame in frames {
            if let Err(e) = self.send_raw(frame).await {
                warn!(venue = %self.venue, error = %e, "resubscribe send failed, will retry on next sweep");
            }
        }

        let now = now_ms();
        self.last_inbound_ms.store(now, Ordering::Release);
        self.last_server_ping_ms.store(now, Ordering::Release);

        Some(read)
    }

    /// Keep retrying `reconnect_and_resubscribe` until it succeeds (lock
    /// contention and debounce are transient) or the worker is cancelled.
    async fn ensure_connected(self: &Arc<Self>, cancel: &CancellationToken) -> Option<WsRead> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(read) = self.reconnect_and_resubscribe(cancel).await {
                return Some(read);
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }

    /// Periodic resubscribe sweep: resends every still-pending frame.
    /// Tolerates subscribe frames lost to transient send failures.
    async fn resubscribe_sweep_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.resubscribe_sweep_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let frames: Vec<Vec<u8>> = self.pending.lock().values().cloned().collect();
                    for frame in frames {
                        let _ = self.send_raw(frame).await;
                    }
                }
            }
        }
    }

    /// Periodic `Lister` GC sweep.
    async fn gc_sweep_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.gc_sweep_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.list.gc(now_ms(), self.config.gc_ttl);
                }
            }
        }
    }

    /// Dial, then enter the listen loop; on exit, close the socket.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut read = match self.ensure_connected(&cancel).await {
            Some(read) => read,
            None => return,
        };

        let keepalive_handler = self.handler.clone();
        let keepalive_worker = self.clone();
        let keepalive_cancel = cancel.clone();
        let keepalive_task = tokio::spawn(async move {
            keepalive_handler.keepalive(keepalive_worker, keepalive_cancel).await;
        });

        let resubscribe_task = tokio::spawn(self.clone().resubscribe_sweep_loop(cancel.clone()));
        let gc_task = tokio::spawn(self.clone().gc_sweep_loop(cancel.clone()));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = read.next() => {
                    match next {
                        Some(Ok(msg)) => {
                            self.last_inbound_ms.store(now_ms(), Ordering::Release);
                            if let Some(frame) = to_frame(msg) {
                                if self.decode_tx.send(DecodeJob { worker: self.clone(), frame }).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            error!(venue = %self.venue, error = %e, "read error, reconnecting");
                            match self.ensure_connected(&cancel).await {
                                Some(new_read) => read = new_read,
                                None => break,
                            }
                        }
                        None => {
                            warn!(venue = %self.venue, "stream ended, reconnecting");
                            match self.ensure_connected(&cancel).await {
                                Some(new_read) => read = new_read,
                                None => break,
                            }
                        }
                    }
                }
            }
        }

        self.force_close().await;
        keepalive_task.abort();
        resubscribe_task.abort();
        gc_task.abort();
        info!(venue = %self.venue, "worker exited");
    }
}

/// Adds up to 20% positive jitter to a retry delay, so a burst of workers
/// dialing the same dead endpoint don't all retry in lockstep.
fn jittered(base: std::time::Duration) -> std::time::Duration {
    let factor = 1.0 + rand::random::<f64>() * 0.2;
    std::time::Duration::from_secs_f64(base.as_secs_f64() * factor)
}

/// Opens a TCP stream to `target_url`'s host through `proxy_url` via an HTTP
/// `CONNECT` tunnel. `tokio-tungstenite` has no native proxy support, so this
/// does the tunnel handshake by hand and hands back a plain `TcpStream` for
/// `client_async_tls` to layer the WebSocket (and TLS, for `wss://`) upgrade
/// on top of.
async fn connect_via_proxy(proxy_url: &str, target_url: &str) -> anyhow::Result<TcpStream> {
    let (_, proxy_host, proxy_port) =
        parse_authority(proxy_url).ok_or_else(|| anyhow::anyhow!("invalid proxy url: {proxy_url}"))?;
    let (_, target_host, target_port) =
        parse_authority(target_url).ok_or_else(|| anyhow::anyhow!("invalid target url: {target_url}"))?;

    let mut stream = TcpStream::connect((proxy_host.as_str(), proxy_port)).await?;

    let request = format!(
        "CONNECT {target_host}:{target_port} HTTP/1.1\r\n\
         Host: {target_host}:{target_port}\r\n\
         Proxy-Connection: Keep-Alive\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!("proxy closed the connection during CONNECT handshake");
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > 8192 {
            anyhow::bail!("proxy CONNECT response exceeded 8KiB without a terminator");
        }
    }

    let response = String::from_utf8_lossy(&buf);
    let status_line = response.lines().next().unwrap_or_default();
    if !status_line.contains(" 200") {
        anyhow::bail!("proxy CONNECT to {target_host}:{target_port} failed: {status_line}");
    }

    Ok(stream)
}

/// Splits a `scheme://host[:port][/path]` URL into `(is_tls, host, port)`,
/// defaulting the port from the scheme when absent. Good enough for the
/// `ws(s)://`/`http(s)://` URLs this crate ever dials.
fn parse_authority(url: &str) -> Option<(bool, String, u16)> {
    let (secure, rest) = if let Some(r) = url.strip_prefix("wss://") {
        (true, r)
    } else if let Some(r) = url.strip_prefix("ws://") {
        (false, r)
    } else if let Some(r) = url.strip_prefix("https://") {
        (true, r)
    } else if let Some(r) = url.strip_prefix("http://") {
        (false, r)
    } else {
        return None;
    };

    let authority = rest.split(['/', '?', '#']).next()?;
    if authority.is_empty() {
        return None;
    }

    if let Some(colon) = authority.rfind(':') {
        let (host, port_str) = (&authority[..colon], &authority[colon + 1..]);
        if let Ok(port) = port_str.parse() {
            return Some((secure, host.to_string(), port));
        }
    }

    Some((secure, authority.to_string(), if secure { 443 } else { 80 }))
}

fn to_frame(msg: Message) -> Option<Frame> {
    match msg {
        Message::Text(text) => Some(Frame {
            kind: FrameKind::Text,
            bytes: text.into_bytes(),
        }),
        Message::Binary(bytes) => Some(Frame {
            kind: FrameKind::Binary,
            bytes,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn reconnect_gate_rejects_concurrent_attempt() {
        let gate = ReconnectGate::new(Duration::from_secs(10));
        let guard = gate.try_begin(0);
        assert!(guard.is_some());
        assert!(gate.try_begin(1).is_none());
    }

    #[test]
    fn reconnect_gate_debounces_within_window() {
        let gate = ReconnectGate::new(Duration::from_secs(10));
        {
            let _g = gate.try_begin(0);
        }
        assert!(gate.try_begin(5_000).is_none());
        assert!(gate.try_begin(10_001).is_some());
    }

    #[test]
    fn reconnect_gate_allows_sequential_attempts_after_debounce() {
        let gate = ReconnectGate::new(Duration::from_secs(10));
        {
            let _g = gate.try_begin(0);
        }
        {
            let _g = gate.try_begin(20_000);
        }
        assert!(gate.try_begin(20_001).is_none());
    }

    fn test_worker() -> (Arc<Worker>, mpsc::Receiver<DecodeJob>) {
        let (tx, rx) = mpsc::channel(10);
        let worker = Worker::new(
            "wss://example.invalid/ws",
            Arc::new(crate::venue::HuobiHandler::new()),
            AggregatorConfig::default(),
            tx,
        );
        (worker, rx)
    }

    #[tokio::test]
    async fn subscribe_surfaces_send_error_when_not_connected() {
        let (worker, _rx) = test_worker();
        let req = SubscribeRequest::new("ethusdt", Venue::Huobi, crate::quote::MarketKind::Spot);
        assert!(worker.subscribe(req).await.is_err());
    }

    #[tokio::test]
    async fn subscribe_rejects_unsupported_market_kind_before_sending() {
        let (worker, _rx) = test_worker();
        let req = SubscribeRequest::new("ethusdt", Venue::Huobi, crate::quote::MarketKind::Futures);
        let err = worker.subscribe(req).await.unwrap_err();
        assert!(err
            .downcast_ref::<AggregatorError>()
            .map(|e| matches!(e, AggregatorError::UnsupportedMarketKind { .. }))
            .unwrap_or(false));
    }

    #[test]
    fn mark_acked_is_a_no_op_for_a_symbol_that_was_never_pending() {
        let (worker, _rx) = test_worker();
        worker.mark_acked("ethusdt");
        assert!(worker.pending.lock().is_empty());
        assert!(worker.acked.lock().is_empty());
    }

    #[test]
    fn mark_acked_moves_symbol_from_pending_to_acked() {
        let (worker, _rx) = test_worker();
        worker
            .pending
            .lock()
            .insert("ethusdt".to_string(), b"frame".to_vec());

        worker.mark_acked("ethusdt");

        assert!(!worker.is_pending("ethusdt"));
        assert!(worker.is_acked("ethusdt"));
    }

    #[test]
    fn requeue_acked_as_pending_moves_every_acked_symbol_back() {
        let (worker, _rx) = test_worker();
        worker
            .acked
            .lock()
            .insert("ethusdt".to_string(), b"frame1".to_vec());
        worker
            .acked
            .lock()
            .insert("btcusdt".to_string(), b"frame2".to_vec());

        worker.requeue_acked_as_pending();

        assert!(worker.acked.lock().is_empty());
        assert!(worker.is_pending("ethusdt"));
        assert!(worker.is_pending("btcusdt"));
    }

    #[test]
    fn parse_authority_defaults_port_from_scheme() {
        assert_eq!(
            parse_authority("wss://api.huobi.pro/ws"),
            Some((true, "api.huobi.pro".to_string(), 443))
        );
        assert_eq!(
            parse_authority("ws://localhost/feed"),
            Some((false, "localhost".to_string(), 80))
        );
    }

    #[test]
    fn parse_authority_honors_explicit_port() {
        assert_eq!(
            parse_authority("wss://real.okex.com:8443/ws/v3"),
            Some((true, "real.okex.com".to_string(), 8443))
        );
        assert_eq!(
            parse_authority("http://proxy.local:3128"),
            Some((false, "proxy.local".to_string(), 3128))
        );
    }

    #[test]
    fn parse_authority_rejects_unknown_scheme() {
        assert!(parse_authority("ftp://example.com").is_none());
    }

    #[tokio::test]
    async fn run_exits_within_bounded_time_after_cancellation() {
        // A worker stuck redialling an unreachable endpoint must still
        // observe cancellation promptly rather than riding out the full
        // dial timeout (spec §8 property 12).
        let config = AggregatorConfig {
            dial_timeout: std::time::Duration::from_millis(50),
            dial_retry_delay: std::time::Duration::from_millis(10),
            ..AggregatorConfig::default()
        };
        let (tx, _rx) = mpsc::channel(10);
        let worker = Worker::new(
            "ws://127.0.0.1:1",
            Arc::new(crate::venue::HuobiHandler::new()),
            config,
            tx,
        );
        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(worker.run(run_cancel));

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        cancel.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;
        assert!(result.is_ok(), "worker did not exit within bounded time");
    }
}
