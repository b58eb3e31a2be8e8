//! Scuttle CLI
//!
//! Thin wrapper around scuttle-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Generate a new identity
//! scuttle keygen
//!
//! # Sign a first message with a secret key
//! scuttle sign --secret <hex> '{"type":"post","text":"hello"}' > msg.json
//!
//! # Verify a raw message (file or "-" for stdin)
//! scuttle verify msg.json
//!
//! # Replicate between two in-memory nodes
//! scuttle demo --messages 50
//! scuttle demo --messages 50 --no-ebt -vv
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use scuttle_core::feed::UnsignedMessage;
use scuttle_core::storage::FeedRepository;
use scuttle_core::transport::memory;
use scuttle_core::{
    MessageHmac, PrivateIdentity, RawMessage, RawMessageIdentifier, ReplicationConfig,
    ReplicationEngine, Scuttlebutt, Sequence,
};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Scuttle - feed replication for Scuttlebutt networks
#[derive(Parser)]
#[command(name = "scuttle")]
#[command(version)]
#[command(about = "Scuttle - feed replication for Scuttlebutt networks")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new identity
    Keygen,

    /// Sign content as the first message of a feed
    Sign {
        /// Secret key as 64 hex characters
        #[arg(long)]
        secret: String,

        /// Network HMAC key (base64)
        #[arg(long, default_value = "")]
        hmac: String,

        /// Message content as JSON
        content: String,
    },

    /// Verify a raw message
    Verify {
        /// File holding the message, "-" for stdin
        path: PathBuf,

        /// Network HMAC key (base64)
        #[arg(long, default_value = "")]
        hmac: String,
    },

    /// Replicate a feed between two in-memory nodes
    Demo {
        /// Messages published before connecting
        #[arg(short, long, default_value_t = 20)]
        messages: usize,

        /// Force gossip replication
        #[arg(long)]
        no_ebt: bool,

        /// Replication config file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    scuttle_core::logging::init_tracing(cli.verbose)?;

    match cli.command {
        Commands::Keygen => {
            let identity = PrivateIdentity::generate()?;
            println!("Identity: {}", identity.identity());
            println!("Secret:   {}", hex::encode(identity.to_bytes()));
        }

        Commands::Sign {
            secret,
            hmac,
            content,
        } => {
            let bytes = hex::decode(secret.trim()).context("secret is not hex")?;
            let identity = PrivateIdentity::from_bytes(&bytes)?;
            let content: serde_json::Value =
                serde_json::from_str(&content).context("content is not JSON")?;

            let unsigned = UnsignedMessage::new(None, Sequence::first(), Utc::now(), content)?;
            let message = Scuttlebutt::new(MessageHmac::from_base64(&hmac)?).sign(&unsigned, &identity)?;
            println!("{}", String::from_utf8_lossy(message.raw().as_bytes()));
        }

        Commands::Verify { path, hmac } => {
            let mut bytes = read_input(&path).await?;
            // shells and editors add a trailing newline
            while bytes.last() == Some(&b'\n') {
                bytes.pop();
            }

            let identifier = RawMessageIdentifier::scuttlebutt(MessageHmac::from_base64(&hmac)?);
            let message = identifier
                .verify_raw_message(&RawMessage::new(bytes))
                .context("message is not valid")?;

            println!("Valid message");
            println!("  ID:       {}", message.id());
            println!("  Author:   {}", message.author());
            println!("  Sequence: {}", message.sequence());
            if let Some(previous) = message.previous() {
                println!("  Previous: {}", previous);
            }
            if let Some(kind) = message.content().content_type() {
                println!("  Type:     {}", kind);
            }
        }

        Commands::Demo {
            messages,
            no_ebt,
            config,
            timeout,
        } => {
            let mut config = match config {
                Some(path) => ReplicationConfig::load(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?,
                None => demo_config(),
            };
            if no_ebt {
                config.ebt_enabled = false;
            }
            run_demo(config, messages, Duration::from_secs(timeout)).await?;
        }
    }

    Ok(())
}

async fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut bytes = Vec::new();
        tokio::io::stdin().read_to_end(&mut bytes).await?;
        return Ok(bytes);
    }
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

/// Short intervals so the demo finishes quickly.
fn demo_config() -> ReplicationConfig {
    ReplicationConfig {
        gossip_pass_interval: Duration::from_millis(200),
        message_buffer_flush_interval: Duration::from_millis(20),
        ebt_accept_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

async fn run_demo(config: ReplicationConfig, messages: usize, timeout: Duration) -> Result<()> {
    let alice =
        Arc::new(ReplicationEngine::in_memory(PrivateIdentity::generate()?, config.clone()).await?);
    let bob = Arc::new(ReplicationEngine::in_memory(PrivateIdentity::generate()?, config).await?);

    alice.follow(&bob.identity())?;
    for i in 0..messages {
        bob.publish(serde_json::json!({"type": "post", "text": format!("message {}", i)}))?;
    }
    let feed = bob.main_feed();
    let expected = bob.storage().get_sequence(&feed)?;

    println!("Alice: {}", alice.identity());
    println!("Bob:   {}", bob.identity());
    println!("Bob published {} messages", messages);

    let started = Instant::now();
    let cancel = CancellationToken::new();
    let (to_bob, to_alice) = memory::connect(alice.endpoint(), bob.endpoint(), cancel.clone());

    let initiator = {
        let alice = alice.clone();
        let token = cancel.child_token();
        tokio::spawn(async move { alice.replicate(to_bob, token).await })
    };
    let responder = {
        let bob = bob.clone();
        let token = cancel.child_token();
        tokio::spawn(async move { bob.replicate(to_alice, token).await })
    };

    loop {
        if alice.storage().get_sequence(&feed)? == expected {
            break;
        }
        if started.elapsed() > timeout {
            cancel.cancel();
            bail!("replication did not finish within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let elapsed = started.elapsed();

    cancel.cancel();
    let protocol = initiator.await??;
    responder.await??;
    info!(protocol = ?protocol, elapsed_ms = elapsed.as_millis() as u64, "Demo finished");

    alice.shutdown().await;
    bob.shutdown().await;

    println!("Protocol: {:?}", protocol);
    println!(
        "Replicated {} messages in {} ms",
        expected.map(Sequence::get).unwrap_or(0),
        elapsed.as_millis()
    );
    Ok(())
}
