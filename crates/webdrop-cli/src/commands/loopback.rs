//! Loopback command implementation.
//!
//! Runs a sending and a receiving coordinator in this process, joined over
//! an in-memory network, and writes what the receiver accepts to disk.

use std::collections::HashSet;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use webdrop_core::config::{Config, GeneralConfig};
use webdrop_core::file::{format_size, OutgoingFile};
use webdrop_core::identity::LocalIdentity;
use webdrop_core::protocol::{PeerId, TransferId};
use webdrop_core::sink::FsSinkFactory;
use webdrop_core::transfer::{
    AutoAccept, EventReceiver, IncomingOffer, OfferHandler, OfferQueue, TransferCoordinator,
    TransferDirection, TransferEvent, TransferSettings,
};
use webdrop_core::transport::{MemoryNetwork, TransportEvent};

use super::LoopbackArgs;
use crate::ui;

const SENDER_ID: &str = "loopback-sender";
const RECEIVER_ID: &str = "loopback-receiver";

/// Run the loopback command.
#[allow(clippy::too_many_lines)]
pub async fn run(args: LoopbackArgs) -> Result<()> {
    let config = super::load_config();
    let settings = resolve_settings(&config, args.chunk_size.as_deref())?;
    let output_dir = resolve_output(&config, args.output.clone());
    tokio::fs::create_dir_all(&output_dir)
        .await
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let mut files = Vec::with_capacity(args.paths.len());
    for path in &args.paths {
        let file = OutgoingFile::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        files.push(file);
    }
    let total_size: u64 = files.iter().map(OutgoingFile::size).sum();

    if !args.quiet {
        ui::print_header("WebDrop");
        println!(
            "  Sending {} file(s), {} in {} chunks, to {}",
            files.len(),
            format_size(total_size),
            format_size(settings.chunk_size),
            output_dir.display()
        );
        println!();
    }

    let network = MemoryNetwork::new();
    let sender_id = PeerId::new(SENDER_ID);
    let receiver_id = PeerId::new(RECEIVER_ID);
    let (sender_transport, sender_inbound) = network.join(sender_id.clone()).await;
    let (receiver_transport, receiver_inbound) = network.join(receiver_id.clone()).await;

    let (declined_tx, mut declined_rx) = mpsc::unbounded_channel();
    let offers: Arc<dyn OfferHandler> = if args.yes || config.transfer.auto_accept {
        Arc::new(AutoAccept)
    } else {
        let (queue, pending) = OfferQueue::channel();
        tokio::spawn(prompt_offers(pending, declined_tx));
        Arc::new(queue)
    };

    let (sender, mut sender_events) = TransferCoordinator::new(
        LocalIdentity::new(sender_id, &config.general),
        settings,
        Arc::new(sender_transport),
        Arc::new(FsSinkFactory::new(&output_dir)),
        Arc::new(AutoAccept),
    );
    let (receiver, mut receiver_events) = TransferCoordinator::new(
        LocalIdentity::new(receiver_id.clone(), &GeneralConfig::default()),
        settings,
        Arc::new(receiver_transport),
        Arc::new(FsSinkFactory::new(&output_dir)),
        offers,
    );
    let sender = Arc::new(sender);
    let receiver = Arc::new(receiver);

    let runners = [
        spawn_runner(Arc::clone(&sender), sender_inbound),
        spawn_runner(Arc::clone(&receiver), receiver_inbound),
    ];

    wait_for_peer(&mut sender_events, &receiver_id).await?;

    let start_time = Instant::now();
    let metas = sender
        .send_files(&receiver_id, files)
        .await
        .context("Failed to announce files")?;

    let mut awaiting_receive: HashSet<TransferId> = metas.iter().map(|meta| meta.id).collect();
    let mut awaiting_send = awaiting_receive.clone();
    let mut received = 0usize;
    let mut interrupted = false;

    while !awaiting_receive.is_empty() || !awaiting_send.is_empty() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
                break;
            }
            Some(id) = declined_rx.recv() => {
                awaiting_receive.remove(&id);
                awaiting_send.remove(&id);
            }
            Some(event) = receiver_events.recv() => match &event {
                TransferEvent::ProgressChanged { progress, .. } if !args.quiet => {
                    print!("\r  {}    ", ui::progress_line(*progress));
                    let _ = io::stdout().flush();
                }
                TransferEvent::TransferCompleted { transfer_id, direction: TransferDirection::Receive, .. }
                | TransferEvent::TransferCancelled { transfer_id, direction: TransferDirection::Receive, .. } => {
                    if matches!(event, TransferEvent::TransferCompleted { .. }) {
                        received += 1;
                    }
                    awaiting_receive.remove(transfer_id);
                    if !args.quiet {
                        if let Some(text) = event.notification() {
                            println!("\r  {}{}", text, " ".repeat(24));
                        }
                    }
                }
                _ => {}
            },
            Some(event) = sender_events.recv() => match &event {
                TransferEvent::TransferCompleted { transfer_id, direction: TransferDirection::Send, .. }
                | TransferEvent::TransferCancelled { transfer_id, direction: TransferDirection::Send, .. } => {
                    awaiting_send.remove(transfer_id);
                }
                _ => {}
            },
            else => break,
        }
    }

    receiver.shutdown().await;
    sender.shutdown().await;
    for runner in runners {
        runner.abort();
    }

    if interrupted {
        if !args.quiet {
            println!();
            println!("  Interrupted.");
        }
        bail!("transfer interrupted");
    }

    if !args.quiet {
        println!();
        println!(
            "  Received {} of {} file(s) in {:.1}s",
            received,
            metas.len(),
            start_time.elapsed().as_secs_f64()
        );
        println!();
    }

    Ok(())
}

/// Output directory from the command line, falling back to the configured one.
fn resolve_output(config: &Config, output: Option<PathBuf>) -> PathBuf {
    output.unwrap_or_else(|| config.output_dir())
}

/// Chunk size from the command line, falling back to the configured one.
fn resolve_settings(config: &Config, chunk_size: Option<&str>) -> Result<TransferSettings> {
    let mut settings = TransferSettings::from(&config.transfer);
    if let Some(raw) = chunk_size {
        let size = ui::parse_size(raw).with_context(|| format!("Invalid chunk size: {raw}"))?;
        if size == 0 {
            bail!("Chunk size must be greater than zero");
        }
        settings.chunk_size = size;
    }
    Ok(settings)
}

fn spawn_runner(
    coordinator: Arc<TransferCoordinator>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { coordinator.run(inbound).await })
}

async fn wait_for_peer(events: &mut EventReceiver, peer_id: &PeerId) -> Result<()> {
    while let Some(event) = events.recv().await {
        if matches!(&event, TransferEvent::PeerJoined { peer_id: joined } if joined == peer_id) {
            return Ok(());
        }
    }
    bail!("event stream closed before {peer_id} joined")
}

/// Ask on the terminal whether to accept each offer.
async fn prompt_offers(
    mut offers: mpsc::UnboundedReceiver<IncomingOffer>,
    declined: mpsc::UnboundedSender<TransferId>,
) {
    let mut reader = BufReader::new(tokio::io::stdin());

    while let Some(offer) = offers.recv().await {
        let from = offer.peer_info().await.display_name;
        let meta = offer.meta().clone();
        println!();
        println!(
            "  {} offers {} ({}, {})",
            from,
            meta.name,
            format_size(meta.size),
            meta.mime_type
        );
        print!("  Accept transfer? [Y/n] ");
        let _ = io::stdout().flush();

        let mut input = String::new();
        let accepted = match reader.read_line(&mut input).await {
            Ok(_) => {
                let input = input.trim().to_lowercase();
                input.is_empty() || input == "y" || input == "yes"
            }
            Err(e) => {
                tracing::warn!("Failed to read answer: {}", e);
                false
            }
        };

        let result = if accepted {
            offer.accept().await
        } else {
            let result = offer.decline().await;
            let _ = declined.send(meta.id);
            result
        };
        if let Err(e) = result {
            tracing::warn!("Failed to answer offer for {}: {}", meta.name, e);
        }
    }
}
