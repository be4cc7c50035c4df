//! Common test utilities for `WebDrop` integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Semaphore;

use webdrop_core::config::GeneralConfig;
use webdrop_core::identity::LocalIdentity;
use webdrop_core::protocol::{Chunk, ControlMessage, PeerId};
use webdrop_core::sink::SinkFactory;
use webdrop_core::transfer::{
    EventReceiver, OfferHandler, TransferCoordinator, TransferEvent, TransferSettings,
};
use webdrop_core::transport::{DeliveryProgress, Transport};
use webdrop_core::{Error, Result};

/// How long a test waits for something to happen before failing.
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &std::path::Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &std::path::Path, path2: &std::path::Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1, content2, "File contents differ");
}

/// Build a coordinator for `id` with the given collaborators.
pub fn coordinator(
    id: &str,
    chunk_size: u64,
    transport: Arc<dyn Transport>,
    sinks: Arc<dyn SinkFactory>,
    offers: Arc<dyn OfferHandler>,
) -> (TransferCoordinator, EventReceiver) {
    let identity = LocalIdentity::new(PeerId::new(id), &GeneralConfig::default());
    TransferCoordinator::new(
        identity,
        TransferSettings { chunk_size },
        transport,
        sinks,
        offers,
    )
}

/// Wait for the first event matching `pred`, skipping the others.
pub async fn wait_for_event(
    events: &mut EventReceiver,
    pred: impl Fn(&TransferEvent) -> bool,
) -> TransferEvent {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Take every event already emitted.
pub fn drain_events(events: &mut EventReceiver) -> Vec<TransferEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Poll `check` until it holds.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(TIMEOUT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

/// A transport that records outbound traffic and holds every chunk until
/// the test lets it through.
///
/// A chunk counts as sent as soon as the transport receives it; its
/// delivery completes only once a permit is available.
pub struct GatedTransport {
    gate: Semaphore,
    controls: Mutex<Vec<(PeerId, ControlMessage)>>,
    chunks: Mutex<Vec<Chunk>>,
}

impl GatedTransport {
    /// Create a transport with a closed gate.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            controls: Mutex::new(Vec::new()),
            chunks: Mutex::new(Vec::new()),
        })
    }

    /// Let `n` more chunks complete delivery.
    pub fn open(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Control messages sent so far.
    pub fn controls(&self) -> Vec<(PeerId, ControlMessage)> {
        self.controls.lock().unwrap().clone()
    }

    /// Chunks handed to the transport so far, in order.
    pub fn chunks(&self) -> Vec<Chunk> {
        self.chunks.lock().unwrap().clone()
    }

    /// Indices of the chunks handed to the transport so far.
    pub fn sent_indices(&self) -> Vec<u64> {
        self.chunks().iter().map(Chunk::index).collect()
    }
}

impl Transport for GatedTransport {
    fn send_control<'a>(
        &'a self,
        peer: &'a PeerId,
        message: &'a ControlMessage,
    ) -> BoxFuture<'a, Result<()>> {
        self.controls
            .lock()
            .unwrap()
            .push((peer.clone(), message.clone()));
        Box::pin(async { Ok(()) })
    }

    fn send_chunk<'a>(
        &'a self,
        _peer: &'a PeerId,
        chunk: Chunk,
        progress: DeliveryProgress,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.chunks.lock().unwrap().push(chunk);
            progress.report(0.5);
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| Error::Transport("gate closed".to_string()))?;
            permit.forget();
            progress.report(1.0);
            Ok(())
        })
    }
}
