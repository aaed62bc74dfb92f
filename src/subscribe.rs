//! The bounded intake queue a caller submits `SubscribeRequest`s into.
//!
//! Deliberately tiny (capacity 2, per spec): subscribe traffic is bursty at
//! startup and otherwise rare. §6 specifies `Subscribe(req)` as "returns
//! once enqueued (may block briefly when the intake queue is full)" — that's
//! `submit`. `try_submit` is the non-blocking variant for callers that would
//! rather fail fast than wait.

use tokio::sync::mpsc;

use crate::error::AggregatorError;
use crate::quote::SubscribeRequest;

/// Sending half of the intake queue. Cheap to clone; every clone shares the
/// same bounded channel.
#[derive(Clone)]
pub struct SubscribeIntake {
    tx: mpsc::Sender<SubscribeRequest>,
}

impl SubscribeIntake {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SubscribeRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Enqueues `req`, waiting briefly if the intake queue is currently
    /// full. Only fails if the dispatcher has shut down.
    pub async fn submit(&self, req: SubscribeRequest) -> Result<(), AggregatorError> {
        self.tx.send(req).await.map_err(|_| AggregatorError::IntakeFull)
    }

    /// Non-blocking submit. Returns `AggregatorError::IntakeFull` rather than
    /// waiting when the queue is saturated.
    pub fn try_submit(&self, req: SubscribeRequest) -> Result<(), AggregatorError> {
        self.tx.try_send(req).map_err(|_| AggregatorError::IntakeFull)
    }
}
