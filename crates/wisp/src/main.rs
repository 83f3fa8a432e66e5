//! The wisp WebSocket command line.
//!
//! Provides the `wisp` command with the following subcommands:
//!
//! - `wisp serve` - Run the echo server (thread per connection)
//! - `wisp send <addr> <message>...` - Connect, send each message, print the replies
//!
//! `RUST_LOG` overrides the log filter from `--log` or the config file.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use wisp_ws::{ConnectionConfig, Echo, Message, Server, ServerConfig, WsError};

#[derive(Parser)]
#[command(name = "wisp", version, about = "Minimal WebSocket echo server and client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the echo server
    Serve {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address to bind, overrides the config file
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on, overrides the config file
        #[arg(short, long)]
        port: Option<u16>,

        /// Log filter (trace, debug, info, warn, error, or a directive list)
        #[arg(long)]
        log: Option<String>,
    },
    /// Connect to a server, send messages and print the replies
    Send {
        /// Server address, e.g. 127.0.0.1:8000
        addr: String,

        /// Messages to send, one frame each
        #[arg(required = true)]
        messages: Vec<String>,

        /// Request path for the upgrade
        #[arg(long, default_value = "/ws")]
        path: String,

        /// Send messages as binary frames instead of text
        #[arg(long)]
        binary: bool,

        /// Log filter
        #[arg(long, default_value = "warn")]
        log: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            config,
            bind,
            port,
            log,
        } => serve(config, bind, port, log),
        Commands::Send {
            addr,
            messages,
            path,
            binary,
            log,
        } => {
            init_logging(&log);
            send(&addr, &path, &messages, binary)
        }
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Load the config, apply command line overrides, and run the echo server.
fn serve(
    config_path: Option<PathBuf>,
    bind: Option<String>,
    port: Option<u16>,
    log: Option<String>,
) -> Result<(), WsError> {
    let mut config = match &config_path {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = bind {
        config.bind = bind;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(log) = log {
        config.log = log;
    }

    init_logging(&config.log);
    if let Some(path) = &config_path {
        info!(path = %path.display(), "loaded configuration");
    }

    Server::bind(config)?.run(Echo)
}

/// Send each message and print the server's reply to it.
fn send(addr: &str, path: &str, messages: &[String], binary: bool) -> Result<(), WsError> {
    let mut conn = wisp_ws::connect(addr, addr, path, ConnectionConfig::default())?;

    for text in messages {
        let message = if binary {
            Message::Binary(text.clone().into_bytes())
        } else {
            Message::Text(text.clone())
        };
        conn.send(&message)?;
        match conn.receive()? {
            Message::Text(reply) => println!("{}", reply),
            Message::Binary(reply) => println!("<{} bytes> {:02x?}", reply.len(), reply),
        }
    }

    conn.close()
}
