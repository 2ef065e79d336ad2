//! CLI entry point for the wrapped-key messenger.
//!
//! Wires configuration, logging, console input and console output around
//! the library's listener and initiator.

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::mpsc;
use wrapkey_messenger::{
    app::{self, ConnectionOptions, Listener, SessionEvent},
    crypto::generate_keypair,
    utils::{MessengerConfig, DEFAULT_CONFIG_FILE, MAX_KEY_BITS, MIN_KEY_BITS},
};

/// Wrapped-key messenger: RSA-style key wrap, AES-CBC messages
#[derive(Parser)]
#[command(name = "messenger")]
#[command(about = "A peer-to-peer socket messenger with a wrapped session key")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for initiators and print their messages
    Listen {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Modulus size for per-connection keypairs
        #[arg(short, long)]
        key_bits: Option<u32>,
        /// Maximum number of connections served at once
        #[arg(short, long)]
        max_connections: Option<usize>,
    },
    /// Connect to a listener and send lines typed on stdin
    Connect {
        /// Listener host
        #[arg(long)]
        host: Option<String>,
        /// Listener port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Generate and print a demonstration keypair
    Keygen {
        /// Modulus size in bits
        #[arg(short, long)]
        bits: Option<u32>,
        /// Output format (pretty, json)
        #[arg(short, long, default_value = "pretty")]
        format: String,
    },
    /// Generate and validate configuration files
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Generate a default configuration file
    Generate {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        file: Option<PathBuf>,
    },
    /// Show current configuration
    Show {
        /// Show only specific section
        #[arg(short, long)]
        section: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = MessengerConfig::load(cli.config.as_deref())?;
    setup_logging(cli.verbose, cli.quiet, &config.logging.level);

    match cli.command {
        Commands::Listen {
            host,
            port,
            key_bits,
            max_connections,
        } => handle_listen_command(host, port, key_bits, max_connections, config).await,
        Commands::Connect { host, port } => handle_connect_command(host, port, config).await,
        Commands::Keygen { bits, format } => handle_keygen_command(bits, &format, &config),
        Commands::Config { action } => handle_config_commands(action, &config),
    }
}

fn setup_logging(verbose: u8, quiet: bool, configured: &str) {
    let log_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => configured,
            1 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();
}

async fn handle_listen_command(
    host: Option<String>,
    port: Option<u16>,
    key_bits: Option<u32>,
    max_connections: Option<usize>,
    mut config: MessengerConfig,
) -> Result<()> {
    // Override config with command line options
    if let Some(host) = host {
        config.network.host = host;
    }
    if let Some(port) = port {
        config.network.port = port;
    }
    if let Some(bits) = key_bits {
        config.crypto.key_bits = bits;
    }
    if max_connections.is_some() {
        config.network.max_connections = max_connections;
    }
    config.validate()?;

    info!("Key size: {} bits", config.crypto.key_bits);
    if let Some(limit) = config.network.max_connections {
        info!("Serving at most {limit} connections at once");
    }

    let listener = Listener::bind(config.address(), ConnectionOptions::from(&config)).await?;
    let (events, notices) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(notices));

    tokio::select! {
        result = listener.run(events) => {
            if let Err(e) = result {
                error!("Listener error: {e}");
                return Err(e.into());
            }
        }
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {e}");
            }
            info!("Shutting down gracefully...");
        }
    }

    printer.abort();
    Ok(())
}

async fn handle_connect_command(
    host: Option<String>,
    port: Option<u16>,
    mut config: MessengerConfig,
) -> Result<()> {
    if let Some(host) = host {
        config.network.host = host;
    }
    if let Some(port) = port {
        config.network.port = port;
    }
    config.validate()?;

    let stream = app::connect(config.address()).await?;
    let (events, notices) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(notices));

    let (outgoing, lines) = mpsc::unbounded_channel();
    spawn_stdin_reader(outgoing);
    println!(
        "Type messages and press Enter; '{}' ends the session.",
        config.session.quit_command
    );

    let outcome = app::run_initiator(stream, lines, &config.session.quit_command, events).await;
    // the event sender is gone once the session ends, so the printer drains and stops
    if let Err(e) = printer.await {
        warn!("Output task failed: {e}");
    }

    match outcome {
        Ok(stats) => {
            info!(
                "Session lasted {}s, sent {} and received {} messages",
                stats.duration().num_seconds(),
                stats.messages_sent,
                stats.messages_received
            );
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("Session ended with a {} error", e.kind())),
    }
}

/// Forward stdin lines to the send loop from a plain thread, so a pending
/// read never holds up runtime shutdown
fn spawn_stdin_reader(outgoing: mpsc::UnboundedSender<String>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if outgoing.send(line).is_err() {
                break;
            }
        }
    });
}

async fn print_events(mut notices: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = notices.recv().await {
        match &event {
            SessionEvent::Error { .. } => eprintln!("✗ {event}"),
            SessionEvent::MessageReceived { .. } => println!("{event}"),
            _ => println!("• {event}"),
        }
    }
}

fn handle_keygen_command(bits: Option<u32>, format: &str, config: &MessengerConfig) -> Result<()> {
    let bits = bits.unwrap_or(config.crypto.key_bits);
    if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&bits) {
        return Err(anyhow::anyhow!(
            "Key size must be between {MIN_KEY_BITS} and {MAX_KEY_BITS} bits"
        ));
    }

    let keypair = generate_keypair(u64::from(bits))?;
    let public = &keypair.public;

    match format {
        "json" => {
            let output = serde_json::json!({
                "bits": bits,
                "e": public.exponent().to_string(),
                "n": public.modulus().to_string(),
                "d": keypair.private.exponent().to_string(),
                "generated_at": chrono::Utc::now(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        "pretty" => {
            println!("Demonstration keypair ({bits} bits)");
            println!("===============================");
            println!("e: {}", public.exponent());
            println!("n: {} (0x{})", public.modulus(), hex::encode(public.modulus().to_bytes_be()));
            println!("d: {}", keypair.private.exponent());
            warn!("Keys this small offer no real protection");
        }
        _ => return Err(anyhow::anyhow!("Unsupported format: {format}")),
    }

    Ok(())
}

fn handle_config_commands(action: ConfigCommands, config: &MessengerConfig) -> Result<()> {
    match action {
        ConfigCommands::Generate { output } => {
            let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            MessengerConfig::default().save(&output_path)?;
            println!("✓ Configuration generated: {}", output_path.display());
        }
        ConfigCommands::Validate { file } => {
            let config_to_validate = if let Some(path) = file {
                MessengerConfig::from_file(path)?
            } else {
                config.clone()
            };

            config_to_validate.validate()?;
            println!("✓ Configuration is valid");
        }
        ConfigCommands::Show { section } => {
            let config_str = config.to_toml_string()?;

            if let Some(section_name) = section {
                let table: toml::Table = toml::from_str(&config_str)?;
                let value = table
                    .get(&section_name)
                    .ok_or_else(|| anyhow::anyhow!("Unknown section: {section_name}"))?;
                println!("[{section_name}]");
                println!("{}", toml::to_string_pretty(value)?);
            } else {
                println!("{config_str}");
            }
        }
    }
    Ok(())
}
