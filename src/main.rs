//! Demo binary: boots a `Manager`, subscribes to a couple of symbols on
//! each venue, and prints decoded quotes as they arrive.

use clap::Parser;
use dotenv::dotenv;
use market_aggregator::{AggregatorConfig, Manager, MarketKind, SubscribeRequest, Venue};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Subscribe to Huobi and OKEx spot depth and stream decoded quotes to stdout.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Huobi spot symbols to subscribe to, e.g. ethusdt.
    #[arg(long, value_delimiter = ',', default_value = "ethusdt,btcusdt")]
    huobi_symbols: Vec<String>,

    /// OKEx spot symbols to subscribe to, e.g. ltc-usdt.
    #[arg(long, value_delimiter = ',', default_value = "ltc-usdt,eth-usdt")]
    okex_symbols: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = AggregatorConfig::from_env();
    let manager = Manager::new(config);

    let run_handle = tokio::spawn(manager.clone().run());

    let intake = manager.intake();
    for symbol in &cli.huobi_symbols {
        if let Err(e) = intake
            .submit(SubscribeRequest::new(symbol, Venue::Huobi, MarketKind::Spot))
            .await
        {
            warn!(symbol, error = %e, "failed to queue huobi subscription");
        }
    }
    for symbol in &cli.okex_symbols {
        if let Err(e) = intake
            .submit(SubscribeRequest::new(symbol, Venue::OkEx, MarketKind::Spot))
            .await
        {
            warn!(symbol, error = %e, "failed to queue okex subscription");
        }
    }

    let mut stream = manager.market_stream();
    tokio::spawn(async move {
        while let Some(quote) = stream.next().await {
            info!(
                venue = %quote.venue,
                symbol = %quote.symbol,
                bid = %quote.best_bid,
                ask = %quote.best_ask,
                ts = quote.timestamp_ms,
                "quote"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    manager.close();
    let _ = run_handle.await;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "market_aggregator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
