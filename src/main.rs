use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use geo_loadtest::config::Config;
use geo_loadtest::errors::ConfigError;
use geo_loadtest::metrics::{gather_metrics_string, register_metrics, start_metrics_server};
use geo_loadtest::report::format_report;
use geo_loadtest::scheduler::Scheduler;
use geo_loadtest::yaml_config::YamlConfig;

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("Required environment variables:");
    eprintln!("  BASE_URL                - API base URL, e.g. https://host/api/1");
    eprintln!();
    eprintln!("Optional environment variables:");
    eprintln!("  CONFIG_FILE             - YAML configuration file (env vars override it)");
    eprintln!("  API_KEY                 - Appended to every request as key=<value>");
    eprintln!("  QUERY_POINTS            - Fixed points query, skips the /info lookup");
    eprintln!("  QUERY_POINTS_NUM        - Points in the generated query (default: 3)");
    eprintln!("  NUM_USERS               - Virtual users (default: 10)");
    eprintln!("  SPAWN_RATE              - Users started per second (default: NUM_USERS)");
    eprintln!("  TEST_DURATION           - Run duration: 30s, 10m, 2h (default: 5m)");
    eprintln!("  PACING_INTERVAL         - Minimum time between iterations (default: 1s)");
    eprintln!("  PERSONAS                - name[:weight] list, e.g. route:1,vrp:10");
    eprintln!("                            names: isochrone, matrix, matrix_post, route,");
    eprintln!("                            route_invalid, vrp");
    eprintln!("  RANDOM_SEED             - Seed for reproducible generated traffic");
    eprintln!("  SKIP_TLS_VERIFY         - Skip TLS certificate verification (default: true)");
    eprintln!("  DEBUG                   - yes: log every failed request");
    eprintln!("  METRICS_PORT            - Serve Prometheus metrics on this port");
    eprintln!("  METRIC_NAMESPACE        - Prometheus metric namespace (default: geo_loadtest)");
    eprintln!("  LOG_FORMAT              - json for JSON log lines");
    eprintln!();
    eprintln!("VRP configuration:");
    eprintln!("  VRP_MAX_PROFILES        - Vehicles per job (default: 1)");
    eprintln!("  VRP_MAX_LOCATIONS       - Services per job (default: 10)");
    eprintln!("  VRP_PROFILES            - Comma-separated routing profiles (default: car)");
    eprintln!("  VRP_TOMTOM_PROBABILITY  - Traffic-aware provider probability (default: 0.2)");
    eprintln!("  VRP_POLL_INTERVAL       - Delay between solution polls, >= 330ms");
    eprintln!("  VRP_MAX_POLLS           - Give up on a job after this many polls (default: none)");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config() -> Result<Config, ConfigError> {
    match std::env::var("CONFIG_FILE") {
        Ok(path) => {
            info!(path = %path, "Loading configuration file");
            let yaml = YamlConfig::from_file(&path)?;
            Config::from_yaml_with_env_overrides(&yaml)
        }
        Err(_) => Config::from_env(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();
    register_metrics()?;

    let config = match load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(1);
        }
    };
    config.print_summary();

    let registry_arc = Arc::new(Mutex::new(prometheus::default_registry().clone()));
    if let Some(port) = config.metrics_port {
        let registry = registry_arc.clone();
        tokio::spawn(async move {
            start_metrics_server(port, registry).await;
        });
    }
    let metrics_enabled = config.metrics_port.is_some();
    let (users, spawn_rate, duration) = (config.users, config.spawn_rate, config.test_duration);

    let mut scheduler = match Scheduler::new(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    let stop = scheduler.start(users, spawn_rate, Some(duration))?;
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Ctrl-C received, stopping");
                    stop.stop();
                }
                Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
            },
            _ = stop.stopped() => {}
        }
    });

    let stats = scheduler.wait().await?;
    println!("{}", format_report(&stats));

    if metrics_enabled {
        println!("\n--- FINAL METRICS ---\n{}", gather_metrics_string(&registry_arc));
        println!("--- END OF FINAL METRICS ---\n");
    }

    Ok(())
}
