// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Covtrace - contact tracing and notification fan-out.
//!
//! This is the binary entry point for the Covtrace engine.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod commands;
mod serve;
mod services;
mod shutdown;

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};

use covtrace_config::model::CovtraceConfig;
use covtrace_core::{CovtraceError, InfectionStatus, Payload, UserRecord};
use covtrace_notify::BroadcastRequest;
use covtrace_presence::Location;

use crate::services::Services;

/// Covtrace - contact tracing and notification fan-out.
#[derive(Parser, Debug)]
#[command(name = "covtrace", version, about, long_about = None)]
struct Cli {
    /// Explicit config file. Defaults to the XDG lookup.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the long-lived process (fan-out worker, sinks, metrics).
    Serve,
    /// Register or update a user.
    Register {
        phone: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        county: String,
        #[arg(long, default_value = "UNKNOWN")]
        status: InfectionStatus,
        /// Push device token.
        #[arg(long)]
        token: Option<String>,
    },
    /// Record a location report.
    Locate {
        phone: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        #[arg(long)]
        accuracy: Option<f64>,
        #[arg(long)]
        speed: Option<f64>,
        /// RFC 3339 timestamp. Defaults to now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Change a user's infection status.
    SetStatus {
        phone: String,
        status: InfectionStatus,
    },
    /// Send a direct notification to one user.
    Send {
        phone: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
        /// Payload entry as key=value. Repeatable.
        #[arg(long = "data", value_parser = commands::parse_key_value)]
        data: Vec<(String, String)>,
    },
    /// Broadcast a notification to a filtered population.
    Broadcast {
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
        /// Payload entry as key=value. Repeatable, at least one required.
        #[arg(long = "data", value_parser = commands::parse_key_value)]
        data: Vec<(String, String)>,
        /// Include every user.
        #[arg(long)]
        all: bool,
        /// Include users in this county. Repeatable.
        #[arg(long)]
        county: Vec<String>,
        /// Include users with this infection status. Repeatable.
        #[arg(long)]
        status: Vec<InfectionStatus>,
    },
    /// Trace contacts of a positive user and alert them.
    Trace {
        phone: String,
        /// First day to scan (YYYY-MM-DD).
        #[arg(long)]
        since: NaiveDate,
    },
    /// List a user's inbox.
    Messages {
        phone: String,
        /// Mark this message id as seen before listing.
        #[arg(long)]
        mark_seen: Option<String>,
    },
}

fn load_config(path: Option<&PathBuf>) -> CovtraceConfig {
    let loaded = match path {
        Some(path) => covtrace_config::load_and_validate_path(path),
        None => covtrace_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            covtrace_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

fn payload(entries: Vec<(String, String)>) -> Payload {
    entries
        .into_iter()
        .fold(Payload::new(), |p, (k, v)| p.with(k, v))
}

async fn dispatch(command: Commands, config: CovtraceConfig) -> Result<(), CovtraceError> {
    match command {
        Commands::Serve => serve::run_serve(config).await,
        Commands::Register {
            phone,
            name,
            county,
            status,
            token,
        } => {
            let user = UserRecord {
                phone_number: phone,
                full_name: name,
                county,
                infection_status: status,
                device_token: token,
            };
            commands::register(&config, user).await
        }
        Commands::Locate {
            phone,
            lat,
            lng,
            accuracy,
            speed,
            at,
        } => {
            let location = Location {
                accuracy,
                speed,
                ..Location::new(lat, lng)
            };
            commands::locate(&config, &phone, location, at).await
        }
        Commands::SetStatus { phone, status } => {
            commands::set_status(&config, &phone, status).await
        }
        Commands::Messages { phone, mark_seen } => {
            commands::messages(&config, &phone, mark_seen.as_deref()).await
        }
        Commands::Send {
            phone,
            title,
            body,
            data,
        } => {
            with_services(&config, |services| async move {
                commands::send(&services, &phone, &title, &body, payload(data)).await
            })
            .await
        }
        Commands::Broadcast {
            title,
            body,
            data,
            all,
            county,
            status,
        } => {
            let request = BroadcastRequest {
                filters: commands::filters(all, county, status),
                title,
                body,
                payload: payload(data),
            };
            with_services(&config, |services| async move {
                commands::broadcast(&services, request).await
            })
            .await
        }
        Commands::Trace { phone, since } => {
            let config = &config;
            with_services(config, |services| async move {
                commands::trace(&services, config, &phone, since).await
            })
            .await
        }
    }
}

/// Builds the full service graph, runs `f`, and shuts everything down
/// whatever the outcome.
async fn with_services<F, Fut>(config: &CovtraceConfig, f: F) -> Result<(), CovtraceError>
where
    F: FnOnce(std::sync::Arc<Services>) -> Fut,
    Fut: std::future::Future<Output = Result<(), CovtraceError>>,
{
    let services = std::sync::Arc::new(Services::from_config(config).await?);
    let result = f(services.clone()).await;
    services.shutdown().await;
    result
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("covtrace: use --help for available commands");
        return;
    };

    let config = load_config(cli.config.as_ref());
    serve::init_tracing(&config.service.log_level);

    if let Err(e) = dispatch(command, config).await {
        eprintln!("covtrace: {e}");
        std::process::exit(1);
    }
}
