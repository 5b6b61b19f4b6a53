//! sockettap - transport socket traffic tap
//!
//! Validates tap settings, drives the tap with synthetic connections and
//! inspects the traces it wrote.

use clap::{Parser, Subcommand};
use sockettap_core::config::{ConfigLoader, TapMode, TapSettings};
use sockettap_core::events::{CloseKind, ConnectionInfo};
use sockettap_core::sink::TraceSink;
use sockettap_core::stats::{StatsStore, TransportTapStats};
use sockettap_core::tap_config::SocketTapConfig;
use sockettap_core::time::SystemTimeSource;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "sockettap")]
#[command(version)]
#[command(about = "Tap transport socket traffic into traces", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "SOCKETTAP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the configuration, then print the effective settings
    Validate,

    /// Pretty-print traces from a JSONL file
    Show {
        /// Input JSONL file
        input: PathBuf,

        /// Only show records of this trace id
        #[arg(short, long)]
        trace_id: Option<u64>,

        /// Print one summary line per record instead of the full JSON
        #[arg(short, long)]
        summary: bool,

        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        num: usize,
    },

    /// Tap synthetic connections and write their traces
    Demo {
        /// Number of connections to simulate
        #[arg(short = 'n', long, default_value = "4")]
        connections: u64,

        /// Override the submission mode (streamed, buffered)
        #[arg(short, long)]
        mode: Option<TapMode>,

        /// Override the output path of the JSONL sink
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stats output format (prometheus, json)
        #[arg(long, default_value = "prometheus")]
        stats_format: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = load_config(cli.config.clone());

    // CLI verbose flag takes precedence over the config file
    let log_level = if cli.verbose > 0 {
        match cli.verbose {
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else {
        match settings.general.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Validate => validate_command(cli.config),
        Commands::Show {
            input,
            trace_id,
            summary,
            num,
        } => show_command(&input, trace_id, summary, num),
        Commands::Demo {
            connections,
            mode,
            output,
            stats_format,
        } => {
            let mut settings = settings;
            if let Some(mode) = mode {
                settings.tap.mode = mode;
            }
            if let Some(output) = output {
                settings.output.path = output.to_string_lossy().into_owned();
            }
            demo_command(settings, connections, &stats_format).await
        }
    }
}

/// Load configuration from file/env, with fallback to defaults
fn load_config(cli_path: Option<PathBuf>) -> TapSettings {
    let loader = ConfigLoader::new().with_cli_path(cli_path);
    match loader.load() {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load configuration: {}, using defaults", e);
            TapSettings::default()
        }
    }
}

fn validate_command(cli_path: Option<PathBuf>) -> anyhow::Result<()> {
    // Unlike the other commands, errors are fatal here
    let settings = match &cli_path {
        Some(path) => ConfigLoader::load_path(path)?,
        None => ConfigLoader::new().load()?,
    };

    println!("Configuration is valid");
    println!();
    println!("{}", toml::to_string_pretty(&settings)?);
    Ok(())
}

fn show_command(
    input: &PathBuf,
    trace_id: Option<u64>,
    summary: bool,
    num: usize,
) -> anyhow::Result<()> {
    use std::fs::File;
    use std::io::{BufRead, BufReader};

    let file = File::open(input)?;
    let reader = BufReader::new(file);

    let mut count = 0;
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }

        let record: serde_json::Value = serde_json::from_str(&line)?;
        let (kind, body) = match record.as_object().and_then(|o| o.iter().next()) {
            Some((kind, body)) => (kind.as_str(), body),
            None => continue,
        };

        if let Some(filter) = trace_id {
            if body.get("trace_id").and_then(|v| v.as_u64()) != Some(filter) {
                continue;
            }
        }

        if summary {
            println!("{}", summarize(kind, body));
        } else {
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        count += 1;
        if count >= num {
            break;
        }
    }

    Ok(())
}

fn summarize(kind: &str, body: &serde_json::Value) -> String {
    let trace_id = body.get("trace_id").and_then(|v| v.as_u64()).unwrap_or(0);
    match kind {
        "socket_buffered_trace" => {
            let events = body
                .get("events")
                .and_then(|v| v.as_array())
                .map_or(0, |e| e.len());
            let rx = &body["rx"];
            let tx = &body["tx"];
            format!(
                "trace {} buffered: {} events, rx {}/{} bytes, tx {}/{} bytes",
                trace_id,
                events,
                rx["retained_bytes"],
                rx["observed_bytes"],
                tx["retained_bytes"],
                tx["observed_bytes"],
            )
        }
        "socket_streamed_trace_segment" => {
            let event = body
                .get("event")
                .and_then(|e| e.as_object())
                .and_then(|e| e.keys().find(|k| k.as_str() != "timestamp").cloned())
                .unwrap_or_default();
            let preview = body["event"]
                .get(&event)
                .and_then(|e| e.get("data"))
                .and_then(sockettap_export::format::decode_body)
                .map(|bytes| String::from_utf8_lossy(&bytes).escape_debug().to_string())
                .unwrap_or_default();
            format!(
                "trace {} segment {}: {} \"{}\"",
                trace_id, body["sequence"], event, preview
            )
        }
        other => format!("trace {} {}", trace_id, other),
    }
}

async fn demo_command(
    settings: TapSettings,
    connections: u64,
    stats_format: &str,
) -> anyhow::Result<()> {
    let (sink, drain) = sockettap_export::spawn_sink(&settings.output)?;
    let sink: Arc<dyn TraceSink> = Arc::new(sink);

    let config = Arc::new(SocketTapConfig::from_settings(
        &settings.tap,
        sink,
        Arc::new(SystemTimeSource::new()),
    ));
    info!(mode = ?config.mode(), "Tap configured");

    let store = StatsStore::new();
    let stats = TransportTapStats::new(&store, &settings.stats.prefix);

    let mut tapped = 0;
    for id in 1..=connections {
        let connection = demo_connection(id);
        let Some(mut tapper) = config.create_per_socket_tapper(&stats, &connection) else {
            continue;
        };
        tapped += 1;

        let request = format!(
            "GET /items/{} HTTP/1.1\r\nHost: demo.local\r\nUser-Agent: sockettap\r\n\r\n",
            id
        );
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
            request.len(),
            request
        );

        // The read buffer accumulates; only its tail is new
        let mut read_buffer = Vec::new();
        for chunk in request.as_bytes().chunks(16) {
            read_buffer.extend_from_slice(chunk);
            tapper.on_read(&read_buffer, chunk.len() as u32);
        }
        tapper.on_write(response.as_bytes(), response.len() as u32, true);

        let kind = if id % 2 == 0 {
            CloseKind::LocalClose
        } else {
            CloseKind::RemoteClose
        };
        tapper.close_socket(kind);
    }

    // Dropping the last handle on the sink lets the writer drain and exit
    drop(config);
    let summary = drain.await?;
    info!(
        connections,
        tapped,
        written = summary.written,
        failed = summary.failed,
        "Demo finished"
    );

    match stats_format {
        "json" => println!("{}", serde_json::to_string_pretty(&store.to_json())?),
        _ => print!("{}", store.to_prometheus()),
    }
    Ok(())
}

fn demo_connection(id: u64) -> ConnectionInfo {
    let local_port = if id % 3 == 0 { 8080 } else { 8443 };
    ConnectionInfo::new(id)
        .with_local_address(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            local_port,
        ))
        .with_remote_address(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, (id % 250) as u8 + 1)),
            40000 + (id % 20000) as u16,
        ))
        .with_protocol("http/1.1")
}
