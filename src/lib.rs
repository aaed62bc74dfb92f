//! market-aggregator: a depth-aggregation client for Huobi and OKEx spot
//! order books.
//!
//! A [`Manager`] owns one [`Worker`](worker::Worker) per venue. Callers pull
//! the latest quote per symbol through [`Manager::find`], or subscribe to
//! every decoded [`Quote`] as a push-path stream through
//! [`Manager::market_stream`]. New subscriptions go in through
//! [`Manager::intake`].

pub mod codec;
pub mod config;
pub mod decode_pool;
pub mod error;
pub mod lister;
pub mod manager;
pub mod market_pool;
pub mod quote;
pub mod subscribe;
pub mod time_util;
pub mod venue;
pub mod worker;

pub use config::AggregatorConfig;
pub use error::AggregatorError;
pub use manager::Manager;
pub use market_pool::MarketStream;
pub use quote::{Level, MarketKind, Quote, SubscribeRequest, Venue};
