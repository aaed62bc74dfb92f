//! The narrow error type that crosses the public API boundary.
//!
//! Everything else (dial failures, decode errors, liveness timeouts) is
//! handled internally with `anyhow::Result` and logged, per spec §7 — it
//! never reaches a caller of `Manager`.

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("subscribe intake queue is full, try again")]
    IntakeFull,

    #[error("no worker registered for venue {0}")]
    UnknownVenue(String),

    #[error("market kind {kind:?} has no subscribe frame for venue {venue}")]
    UnsupportedMarketKind {
        venue: crate::quote::Venue,
        kind: crate::quote::MarketKind,
    },
}
