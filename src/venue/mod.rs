//! The per-venue strategy: one `Handler` implementation per exchange,
//! dispatched through a trait object rather than class inheritance (§9:
//! "model as a capability set with a dispatch vtable").

mod huobi;
mod okex;

pub use huobi::HuobiHandler;
pub use okex::OkExHandler;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::quote::{Quote, SubscribeRequest};
use crate::worker::Worker;

/// Kind of websocket frame a `Handler` is asked to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

/// One inbound frame, already pulled off the socket by the read loop. The
/// read loop does not parse it — that's entirely the `Handler`'s job.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub bytes: Vec<u8>,
}

/// The four operations that make a venue's wire protocol pluggable.
///
/// Decode ordering within one frame (§4.1): depth decode is attempted first;
/// on failure the bytes are tried as a pong frame, then as an ack frame. A
/// single frame is never both a quote and an ack.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Venue tag, for building the right subscribe/ack/decode table.
    fn venue(&self) -> crate::quote::Venue;

    /// Format the wire-level subscribe command for `req`. Returns an empty
    /// `Vec` for market kinds the venue doesn't support yet (non-spot, v1) —
    /// callers must not send an empty frame (`Worker::subscribe` rejects it).
    fn format_subscribe(&self, req: &SubscribeRequest) -> Vec<u8>;

    /// Long-running liveness task. Exits on `cancel` or when the task
    /// decides the connection should be dropped (it closes the socket
    /// itself via `worker.force_close()`, which the read loop observes as a
    /// read error and reconnects from).
    async fn keepalive(&self, worker: Arc<Worker>, cancel: CancellationToken);

    /// Decode one inbound frame. Returns `Some(Quote)` on a depth update,
    /// `None` for keepalive/ack/unrecognized frames.
    async fn decode(&self, frame: &Frame, worker: &Worker) -> Option<Quote>;

    /// Scan a decoded payload for a subscription ack and, if found, call
    /// `worker.mark_acked(symbol)`.
    fn recognize_ack(&self, bytes: &[u8], worker: &Worker);
}
