//! CLI argument parsing for the route-dispatch binary.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::types::Coordinates;

#[derive(Parser)]
#[command(name = "route-dispatch", about = "Field worker route ordering and ETA service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server (default if no subcommand given)
    Serve {
        /// Listen address, overrides BIND_ADDR
        #[arg(long)]
        bind: Option<String>,
    },
    /// Order a JSON stop list offline and print the planned route
    Plan {
        /// Path to the stop list
        #[arg(long)]
        input: PathBuf,
    },
}

/// Input file for `plan`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInput {
    #[serde(default)]
    pub origin: Option<Coordinates>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    pub stops: Vec<PlanStop>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStop {
    pub booking_ref: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub coordinate: Option<Coordinates>,
    #[serde(default)]
    pub service_duration_minutes: Option<u32>,
}
