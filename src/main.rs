//! RefPrice - cross-venue reference price service
//!
//! Streams 1-minute candles from the configured exchanges (and optionally
//! swaps from AMM pools), and every tick publishes one outlier-filtered VWAP
//! per asset.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use refprice::config::AppConfig;
use refprice::dex::{connect_venue, forward_trades, load_reverse_tokens, DexScraper};
use refprice::oracle::{
    build_source, AggregationWindow, CandleSource, PriceAggregator, Publisher, Supervisor,
};
use refprice::persistence::CsvAggregateStore;
use refprice::types::CandleObservation;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::load()?;
    info!(config = %config, "Configuration loaded");

    let (tx, rx) = mpsc::channel::<CandleObservation>(config.feed.queue_capacity.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // CEX candle feeds
    let sources = config
        .venue_names()
        .iter()
        .map(|name| {
            build_source(name, &config.endpoints)
                .with_context(|| format!("Failed to build candle source for {name}"))
        })
        .collect::<Result<Vec<Arc<dyn CandleSource>>>>()?;
    let supervisor = Supervisor::new(
        config.asset_list(),
        tx.clone(),
        config.restart_cooldown(),
        shutdown_rx,
    );
    let mut feeds = supervisor.spawn_all(sources.clone());
    info!(venues = sources.len(), "Candle feeds started");

    // On-chain pair engine
    let scrapers = if config.dex.enabled {
        start_dex(&config, tx.clone()).await?
    } else {
        Vec::new()
    };
    drop(supervisor);
    drop(tx);

    // Aggregation window
    let store = Arc::new(
        CsvAggregateStore::new(&config.persistence.data_dir)
            .context("Failed to open aggregate store")?,
    );
    let window = AggregationWindow::new(
        config.tick_interval(),
        PriceAggregator::new(config.feed.outlier_basis_points),
        Publisher::new(store),
    );
    let mut window_task = tokio::spawn(window.run(rx));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        }
        _ = &mut window_task => {
            warn!("Aggregation window exited");
        }
    }

    shutdown_tx.send_replace(true);
    for source in &sources {
        source.close();
    }
    for scraper in &scrapers {
        if let Err(e) = scraper.close().await {
            warn!(venue = %scraper.venue(), error = %e, "AMM scraper closed with error");
        }
    }
    while let Some(joined) = feeds.join_next().await {
        match joined {
            Ok(sessions) => info!(sessions, "Candle feed stopped"),
            Err(e) => error!(error = %e, "Candle feed task failed"),
        }
    }

    info!("RefPrice stopped");
    Ok(())
}

/// `LOG_FORMAT=json` switches to JSON lines; `RUST_LOG` sets the filter
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

/// Connect every AMM venue and bridge its tracked trades into the queue.
///
/// A venue that cannot be reached at startup is fatal.
async fn start_dex(
    config: &AppConfig,
    tx: mpsc::Sender<CandleObservation>,
) -> Result<Vec<Arc<DexScraper>>> {
    let reverse_tokens = load_reverse_tokens(Path::new(&config.dex.reverse_tokens_path));
    let tracked: HashSet<String> = config.tracked_identities().into_iter().collect();

    let mut scrapers = Vec::with_capacity(config.dex.venues.len());
    for venue in &config.dex.venues {
        let scraper = connect_venue(venue, &config.dex, reverse_tokens.clone())
            .await
            .with_context(|| format!("Failed to connect AMM venue {}", venue.name))?;
        let scraper = Arc::new(scraper);

        if let Some(trades) = scraper.channel() {
            tokio::spawn(forward_trades(trades, tx.clone(), tracked.clone()));
        }

        let runner = scraper.clone();
        tokio::spawn(async move {
            if let Err(e) = runner.run().await {
                error!(venue = %runner.venue(), error = %e, "AMM scraper failed");
            }
        });
        scrapers.push(scraper);
    }

    info!(venues = scrapers.len(), "AMM venues started");
    Ok(scrapers)
}
