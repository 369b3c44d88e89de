//! Entry point for `rdt`.
//!
//! Parses CLI arguments and runs one demonstration exchange: the client sends
//! a message and waits for the reply, the server waits for the client's
//! message and answers.  All protocol work is delegated to the library;
//! `main.rs` owns only process setup (logging, argument parsing).

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rdt::{
    Channel, Connection, FaultConfig, LossyChannel, Protocol, RdtConfig, RetryPolicy, Role,
    TcpChannel,
};

const CLIENT_MESSAGE: &[u8] = b"MSG_FROM_CLIENT";
const SERVER_MESSAGE: &[u8] = b"MSG_FROM_SERVER";

/// Reliable data transfer over an unreliable TCP channel.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Which end of the exchange to play.
    #[arg(value_enum)]
    role: Role,
    /// Server address (the address to dial, or to bind as a server).
    server: String,
    /// Server port.
    port: u16,

    /// Transfer protocol: 1.0 (no acknowledgements) or 2.1 (alternating bit).
    #[arg(long, value_enum, default_value_t = Protocol::AlternatingBit)]
    protocol: Protocol,

    /// Probability that an outgoing frame is dropped.
    #[arg(long, default_value_t = 0.0)]
    loss: f64,
    /// Probability that an outgoing frame is corrupted.
    #[arg(long, default_value_t = 0.0)]
    corrupt: f64,
    /// Probability that an outgoing frame is sent twice.
    #[arg(long, default_value_t = 0.0)]
    duplicate: f64,
    /// Seed for the fault model, for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// Initial per-attempt retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
    /// Retransmissions allowed per message before giving up.
    #[arg(long, default_value_t = 16)]
    max_retries: u32,
    /// How long to keep answering the peer before disconnecting.
    #[arg(long, default_value_t = 2000)]
    linger_ms: u64,
}

impl Cli {
    fn config(&self) -> RdtConfig {
        let defaults = RdtConfig::default();
        RdtConfig {
            protocol: self.protocol,
            retry: RetryPolicy {
                initial_timeout: Duration::from_millis(self.timeout_ms),
                max_retries: self.max_retries,
                ..defaults.retry
            },
            linger: Duration::from_millis(self.linger_ms),
            ..defaults
        }
    }

    fn faults(&self) -> FaultConfig {
        FaultConfig {
            loss_rate: self.loss,
            corrupt_rate: self.corrupt,
            duplicate_rate: self.duplicate,
            reorder_rate: 0.0,
            seed: self.seed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.config();

    let tcp = TcpChannel::connect(cli.role, &cli.server, cli.port, config.poll_interval)
        .await
        .with_context(|| format!("opening {:?} channel on {}:{}", cli.role, cli.server, cli.port))?;
    log::info!("Connected to {}", tcp.peer_addr);

    let faults = cli.faults();
    let channel: Box<dyn Channel> = if faults.is_transparent() {
        Box::new(tcp)
    } else {
        log::info!("Injecting faults: {faults:?}");
        Box::new(LossyChannel::new(tcp, faults))
    };

    let mut conn = Connection::new(channel, config.clone());
    let reply_wait = config.retry.max_timeout * (config.retry.max_retries + 1);

    match cli.role {
        Role::Client => {
            conn.send(CLIENT_MESSAGE).await.context("sending to server")?;
            log::info!("Delivered {}", String::from_utf8_lossy(CLIENT_MESSAGE));
            let reply = conn
                .receive_timeout(reply_wait)
                .await
                .context("waiting for server reply")?;
            println!("{}", String::from_utf8_lossy(&reply));
        }
        Role::Server => {
            let message = conn
                .receive_timeout(reply_wait)
                .await
                .context("waiting for client message")?;
            println!("{}", String::from_utf8_lossy(&message));
            conn.send(SERVER_MESSAGE).await.context("replying to client")?;
            log::info!("Delivered {}", String::from_utf8_lossy(SERVER_MESSAGE));
        }
    }

    conn.linger(config.linger).await.context("lingering")?;
    conn.disconnect().await.context("disconnecting")?;
    Ok(())
}
