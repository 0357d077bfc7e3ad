use clap::Parser;
use geopin::config::PipelineConfig;
use geopin::input::load_records;
use geopin::pipeline::CancelToken;
use geopin::session::MapSession;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// geopin: geocode an address list into map pins
///
/// Reads addresses from a CSV export, a JSON array of records or a text file
/// with one address per line, geocodes them in batches, and prints the resulting
/// pins as JSON on stdout.
///
/// Examples:
///   geopin depots.txt
///   geopin customers.csv --batch-size 5 --retries 2
///   geopin stores.json --nearby "1 Dock Rd" --radius 800
///   geopin cities.txt --offline
///   geopin --serve --port 8080
#[derive(Parser)]
#[command(name = "geopin", version, about, long_about = None)]
struct Cli {
    /// Address list (.csv with a header row, .json records, or plain text).
    #[arg(index = 1)]
    input: Option<PathBuf>,

    /// Addresses geocoded concurrently per batch.
    #[arg(long, short = 'b')]
    batch_size: Option<usize>,

    /// Extra attempts for transient geocoder failures.
    #[arg(long)]
    retries: Option<u32>,

    /// Pause between batches, in milliseconds.
    #[arg(long)]
    pause_ms: Option<u64>,

    /// Offline mode: only use the built-in city gazetteer.
    #[arg(long)]
    offline: bool,

    /// Do not read or write the geocode cache.
    #[arg(long)]
    no_cache: bool,

    /// Country filter for online geocoding (ISO 3166-1 alpha-2, e.g. SE).
    #[arg(long)]
    country: Option<String>,

    /// After mapping, show only pins near this address.
    #[arg(long)]
    nearby: Option<String>,

    /// Radius in meters for --nearby.
    #[arg(long)]
    radius: Option<f64>,

    /// JSON config file. Defaults to ~/.geopin/config.json when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run the HTTP API instead of a one-shot run.
    #[arg(long)]
    serve: bool,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 3000)]
    port: u16,
}

#[derive(Serialize)]
struct Output<'a> {
    status: String,
    report: &'a geopin::pipeline::RunReport,
    locations: &'a [geopin::location::ResolvedLocation],
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("geopin=info")),
        )
        .init();

    let cli = Cli::parse();

    // ── Configuration ───────────────────────────────────────────

    let loaded = match &cli.config {
        Some(path) => PipelineConfig::load_from(path),
        None => PipelineConfig::load(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });
    apply_overrides(&cli, &mut config);

    let mut session = MapSession::from_config(config).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    // ── Server mode ─────────────────────────────────────────────

    if cli.serve {
        if let Err(e) = geopin::server::start(&cli.host, cli.port, session).await {
            eprintln!("Error: Cannot serve on {}:{}: {}", cli.host, cli.port, e);
            std::process::exit(1);
        }
        return;
    }

    // ── One-shot run ────────────────────────────────────────────

    let Some(input) = cli.input.as_deref() else {
        eprintln!("Error: No address list specified.");
        eprintln!();
        eprintln!("Usage:");
        eprintln!("  geopin depots.txt");
        eprintln!("  geopin customers.json --batch-size 5");
        eprintln!("  geopin --serve");
        std::process::exit(1);
    };

    let records = load_records(input).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("  Stopping after the current batch...");
                cancel.cancel();
            }
        });
    }

    eprintln!("  Geocoding {} addresses...", records.len());
    let report = session
        .process(records, |pct| eprintln!("  Progress: {:5.1}%", pct), Some(&cancel))
        .await;
    eprintln!("  {}", report.status_line());
    for failure in &report.failures {
        eprintln!("    \u{2717} {}: {}", failure.address, failure.reason);
    }

    if let Some(ref address) = cli.nearby {
        match session.show_nearby(address, cli.radius) {
            Ok(ids) => eprintln!("  {} pins near '{}'", ids.len(), address),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }

    let output = Output {
        status: report.status_line(),
        report: &report,
        locations: session.store().all(),
    };
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn apply_overrides(cli: &Cli, config: &mut PipelineConfig) {
    if let Some(n) = cli.batch_size {
        config.batch_size = n;
    }
    if let Some(n) = cli.retries {
        config.max_retries = n;
    }
    if let Some(ms) = cli.pause_ms {
        config.batch_pause_ms = ms;
    }
    if let Some(r) = cli.radius {
        config.nearby_radius_m = r;
    }
    if cli.offline {
        config.offline = true;
    }
    if cli.no_cache {
        config.cache_enabled = false;
    }
    if cli.country.is_some() {
        config.country = cli.country.clone();
    }
}
