//! Route Dispatch - field worker route ordering and ETA service
//!
//! Serves the Dispatch API over HTTP, or plans a stop list offline.

mod cli;
mod config;
mod db;
mod defaults;
mod error;
mod handlers;
mod services;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::cli::{Cli, Command, PlanInput};
use crate::config::Config;
use crate::db::InMemoryRouteRepository;
use crate::defaults::DEFAULT_LOGS_DIR;
use crate::services::eta::EtaProjector;
use crate::services::geocoding::create_geocoder;
use crate::services::route_store::{RouteDefaults, RouteStore};
use crate::services::routing::create_route_optimizer;
use crate::types::{Route, RouteKey, RouteResponse, Stop};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // .env may set LOGS_DIR, so load it before logging starts
    dotenvy::dotenv().ok();

    // Logs directory - use LOGS_DIR env var or default to ./logs
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| DEFAULT_LOGS_DIR.to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "route-dispatch.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,route_dispatch=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    // Load configuration
    let config = Config::from_env()?;

    match cli.command {
        None => serve(config, None).await,
        Some(Command::Serve { bind }) => serve(config, bind).await,
        Some(Command::Plan { input }) => plan(config, &input).await,
    }
}

async fn serve(config: Config, bind: Option<String>) -> Result<()> {
    info!("Starting Route Dispatch...");

    let geocoder = create_geocoder(&config.geocoder)?;
    let optimizer = create_route_optimizer(config.valhalla.clone(), config.average_speed_kmh)
        .context("Failed to create route optimizer")?;
    let store = RouteStore::new(
        Arc::new(InMemoryRouteRepository::new()),
        geocoder,
        optimizer,
        RouteDefaults::from(&config),
    );

    let app = handlers::build_router(Arc::new(store));

    let addr = bind.unwrap_or(config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await.context("HTTP server error")?;
    Ok(())
}

/// Geocode, order and project a stop list without the HTTP layer
async fn plan(config: Config, path: &std::path::Path) -> Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let input: PlanInput = serde_json::from_str(&raw).with_context(|| format!("Invalid stop list in {}", path.display()))?;

    let geocoder = create_geocoder(&config.geocoder)?;
    let optimizer = create_route_optimizer(config.valhalla.clone(), config.average_speed_kmh)
        .context("Failed to create route optimizer")?;

    let mut stops = Vec::with_capacity(input.stops.len());
    for item in input.stops {
        let service = item.service_duration_minutes.unwrap_or(config.default_service_minutes);
        let mut stop = Stop::new(item.booking_ref, item.address, item.coordinate, service);
        if stop.coordinate.is_none() {
            match geocoder.geocode(&stop.address).await {
                Ok(coordinate) => stop.coordinate = Some(coordinate),
                Err(e) => warn!("Geocoding '{}' failed: {}", stop.address, e),
            }
        }
        stops.push(stop);
    }

    let start_time = input
        .start_time
        .unwrap_or_else(|| Utc::now().date_naive().and_time(config.workday_start).and_utc());
    let origin = input.origin.or(config.depot);

    let result = optimizer.optimize(origin, stops).await;

    let mut route = Route::new(RouteKey::new(Uuid::nil(), start_time.date_naive()), start_time);
    route.origin = origin;
    route.stops = result.ordered_stops;
    route.source = Some(result.source);
    route.optimized_at = Some(Utc::now());
    route.warnings = result.warnings;
    EtaProjector::new(config.average_speed_kmh).project_all(&mut route.stops, start_time);
    route.recompute_totals();

    println!("{}", serde_json::to_string_pretty(&RouteResponse::from(route))?);
    Ok(())
}
