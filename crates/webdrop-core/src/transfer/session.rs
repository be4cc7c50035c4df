//! Per-peer transfer session.
//!
//! A [`PeerSession`] tracks everything exchanged with one remote peer:
//! outbound transfers offered to it, inbound transfers accepted from it,
//! and the aggregate progress across both.
//!
//! Each accepted transfer runs as its own task:
//!
//! - Outbound: a pump that reads chunk `i` from the source, hands it to the
//!   transport and waits for delivery before moving on to `i + 1`.
//! - Inbound: a consumer that waits for chunk `i` from the reconstruction
//!   buffer, writes it to the output sink and moves on to `i + 1`.
//!
//! All tasks of a session share one cancellation token. Closing the session
//! triggers it, which stops every pump and fails every pending wait, and
//! then waits for the tasks to finish their cleanup.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::accounting::{ByteAccounting, DeliveryTracker};
use super::buffer::{ChunkReconstructionBuffer, ChunkWait};
use super::events::{EventSender, TransferDirection, TransferEvent};
use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::file::{format_size, OutgoingFile};
use crate::protocol::{Chunk, ControlMessage, PeerId, PeerInfo, TransferId, TransferMeta};
use crate::sink::{OutputSink, SinkFactory};
use crate::transport::{DeliveryProgress, Transport};

/// Settings applied to every transfer of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSettings {
    /// Chunk size for outgoing transfers
    pub chunk_size: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl From<&TransferConfig> for TransferSettings {
    fn from(config: &TransferConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
        }
    }
}

/// Collaborators shared by every session of a coordinator.
#[derive(Clone)]
pub struct SessionContext {
    transport: Arc<dyn Transport>,
    sinks: Arc<dyn SinkFactory>,
    events: EventSender,
    settings: TransferSettings,
}

impl SessionContext {
    /// Bundle the transport, sink factory, event channel and settings.
    pub fn new(
        transport: Arc<dyn Transport>,
        sinks: Arc<dyn SinkFactory>,
        events: EventSender,
        settings: TransferSettings,
    ) -> Self {
        Self {
            transport,
            sinks,
            events,
            settings,
        }
    }

    /// Settings applied to new transfers.
    #[must_use]
    pub const fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    pub(crate) fn emit(&self, event: TransferEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutboundPhase {
    /// Announced, waiting for the peer to accept
    Pending,
    /// Accepted; the pump is running
    Streaming,
}

struct OutboundTransfer {
    meta: TransferMeta,
    file: OutgoingFile,
    phase: OutboundPhase,
}

#[derive(Default)]
struct SessionState {
    info: PeerInfo,
    outbound: HashMap<TransferId, OutboundTransfer>,
    inbound: HashMap<TransferId, ChunkReconstructionBuffer>,
    accounting: ByteAccounting,
    tasks: JoinSet<()>,
}

impl SessionState {
    fn spawn<F>(&mut self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        while let Some(finished) = self.tasks.try_join_next() {
            log_task_result(finished);
        }
        self.tasks.spawn(task);
    }
}

fn log_task_result(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            tracing::error!("Transfer task panicked: {}", e);
        }
    }
}

/// Next step of an inbound consumer.
#[derive(Debug, PartialEq, Eq)]
enum ConsumerStep {
    WaitingForIndex(u64),
    Writing(u64, Vec<u8>),
    Done,
}

impl ConsumerStep {
    const fn first(chunk_count: u64) -> Self {
        if chunk_count == 0 {
            Self::Done
        } else {
            Self::WaitingForIndex(0)
        }
    }

    const fn after(index: u64, chunk_count: u64) -> Self {
        if index + 1 >= chunk_count {
            Self::Done
        } else {
            Self::WaitingForIndex(index + 1)
        }
    }
}

struct SessionInner {
    peer_id: PeerId,
    ctx: SessionContext,
    cancel: CancellationToken,
    progress: watch::Sender<f64>,
    state: Mutex<SessionState>,
}

/// Transfer state shared with one remote peer.
///
/// Cloning is cheap; clones refer to the same session.
#[derive(Clone)]
pub struct PeerSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("peer_id", &self.inner.peer_id)
            .field("closed", &self.is_closed())
            .field("progress", &self.progress())
            .finish_non_exhaustive()
    }
}

impl PeerSession {
    /// Create a session for `peer_id`.
    #[must_use]
    pub fn new(peer_id: PeerId, ctx: SessionContext) -> Self {
        let (progress, _) = watch::channel(1.0);
        Self {
            inner: Arc::new(SessionInner {
                peer_id,
                ctx,
                cancel: CancellationToken::new(),
                progress,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    /// Id of the remote peer.
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.inner.peer_id
    }

    /// Whether the session was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Display metadata of the peer ("Unknown" until it introduces itself).
    pub async fn info(&self) -> PeerInfo {
        self.inner.state.lock().await.info.clone()
    }

    /// Update the peer's display metadata. Ignored once closed.
    pub async fn set_info(&self, info: PeerInfo) {
        if self.is_closed() {
            tracing::debug!("Ignoring introduction from closed session {}", self.peer_id());
            return;
        }
        self.inner.state.lock().await.info = info.clone();
        tracing::debug!(
            "{} is {} ({})",
            self.peer_id(),
            info.display_name,
            info.device_name
        );
        self.inner.ctx.emit(TransferEvent::PeerUpdated {
            peer_id: self.peer_id().clone(),
            info,
        });
    }

    /// Aggregate progress across all active transfers, in `[0, 1]`.
    #[must_use]
    pub fn progress(&self) -> f64 {
        *self.inner.progress.borrow()
    }

    /// Watch aggregate progress.
    #[must_use]
    pub fn watch_progress(&self) -> watch::Receiver<f64> {
        self.inner.progress.subscribe()
    }

    /// Snapshot of the session's byte counters.
    pub async fn accounting(&self) -> ByteAccounting {
        self.inner.state.lock().await.accounting
    }

    /// Number of outbound transfers, pending or streaming.
    pub async fn outbound_count(&self) -> usize {
        self.inner.state.lock().await.outbound.len()
    }

    /// Number of inbound transfers being received.
    pub async fn inbound_count(&self) -> usize {
        self.inner.state.lock().await.inbound.len()
    }

    pub(crate) async fn send_control(&self, message: &ControlMessage) -> Result<()> {
        self.inner
            .ctx
            .transport()
            .send_control(&self.inner.peer_id, message)
            .await
    }

    /// Offer files to the peer.
    ///
    /// Each file gets a fresh transfer id and is announced. Nothing is
    /// streamed until the peer accepts. Returns the metadata of every file
    /// that was announced; nothing is announced once the session is closed.
    pub async fn send_files(&self, files: Vec<OutgoingFile>) -> Vec<TransferMeta> {
        let chunk_size = self.inner.ctx.settings.chunk_size;
        let mut announced = Vec::with_capacity(files.len());

        for file in files {
            let meta = TransferMeta::new(
                file.name.clone(),
                file.mime_type.clone(),
                file.size(),
                chunk_size,
            );
            {
                let mut state = self.inner.state.lock().await;
                if self.is_closed() {
                    tracing::debug!("Session {} closed, not announcing more files", self.peer_id());
                    break;
                }
                state.outbound.insert(
                    meta.id,
                    OutboundTransfer {
                        meta: meta.clone(),
                        file,
                        phase: OutboundPhase::Pending,
                    },
                );
            }

            let message = ControlMessage::Announce { meta: meta.clone() };
            match self.send_control(&message).await {
                Ok(()) => {
                    tracing::info!(
                        "Offered {} ({}) to {}",
                        meta.name,
                        format_size(meta.size),
                        self.peer_id()
                    );
                    announced.push(meta);
                }
                Err(e) => {
                    tracing::warn!("Failed to announce {} to {}: {}", meta.name, self.peer_id(), e);
                    self.inner.state.lock().await.outbound.remove(&meta.id);
                }
            }
        }

        announced
    }

    /// Prepare to receive an accepted transfer and start its consumer.
    ///
    /// Must run before the peer is told about the acceptance, so chunks
    /// that arrive right away find their buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransferCancelled`] if the session is closed, or a
    /// protocol error if the metadata is unusable.
    pub async fn init_storage_for_meta(&self, meta: TransferMeta) -> Result<()> {
        meta.validate()?;

        let mut state = self.inner.state.lock().await;
        if self.is_closed() {
            return Err(Error::TransferCancelled);
        }
        if state.inbound.contains_key(&meta.id) {
            tracing::debug!("Transfer {} from {} already accepted", meta.id, self.peer_id());
            return Ok(());
        }

        state
            .inbound
            .insert(meta.id, ChunkReconstructionBuffer::new(meta.chunk_count()));
        state.accounting.start(meta.size);
        self.inner.publish_progress(&state.accounting);

        tracing::info!(
            "Receiving {} ({}) from {}",
            meta.name,
            format_size(meta.size),
            self.peer_id()
        );
        let inner = Arc::clone(&self.inner);
        state.spawn(inner.receive(meta));
        Ok(())
    }

    /// Drop an inbound transfer whose acceptance never reached the peer.
    ///
    /// Its consumer aborts the sink and its bytes leave the counters.
    pub(crate) async fn abandon_inbound(&self, id: TransferId) {
        let mut state = self.inner.state.lock().await;
        if let Some(mut buffer) = state.inbound.remove(&id) {
            tracing::debug!("Abandoning inbound transfer {} from {}", id, self.peer_id());
            buffer.cancel();
        }
    }

    /// Start streaming a transfer the peer accepted.
    ///
    /// Unknown transfers and transfers already streaming are ignored.
    pub async fn on_accept_meta(&self, meta: &TransferMeta) {
        let mut state = self.inner.state.lock().await;
        if self.is_closed() {
            tracing::debug!("Ignoring accept for {} on closed session", meta.id);
            return;
        }

        let Some(transfer) = state.outbound.get_mut(&meta.id) else {
            tracing::debug!("Accept for unknown transfer {} from {}", meta.id, self.peer_id());
            return;
        };
        if transfer.phase == OutboundPhase::Streaming {
            tracing::debug!("Transfer {} is already streaming", meta.id);
            return;
        }
        transfer.phase = OutboundPhase::Streaming;
        let meta = transfer.meta.clone();
        let file = transfer.file.clone();

        state.accounting.start(meta.size);
        self.inner.publish_progress(&state.accounting);

        tracing::info!("{} accepted {}", self.peer_id(), meta.name);
        let inner = Arc::clone(&self.inner);
        state.spawn(inner.send(meta, file));
    }

    /// Discard a transfer the peer declined, if it is still pending.
    pub async fn on_decline_meta(&self, meta: &TransferMeta) {
        let mut state = self.inner.state.lock().await;
        match state.outbound.get(&meta.id).map(|t| t.phase) {
            Some(OutboundPhase::Pending) => {
                state.outbound.remove(&meta.id);
                tracing::info!("{} declined {}", self.peer_id(), meta.name);
            }
            Some(OutboundPhase::Streaming) => {
                tracing::debug!("Ignoring decline for streaming transfer {}", meta.id);
            }
            None => {
                tracing::debug!("Decline for unknown transfer {} from {}", meta.id, self.peer_id());
            }
        }
    }

    /// Hand an arrived chunk to its transfer's buffer.
    pub async fn on_receive_chunk(&self, chunk: Chunk) {
        let id = chunk.transfer_id();
        let index = chunk.index();
        let mut state = self.inner.state.lock().await;
        match state.inbound.get_mut(&id) {
            Some(buffer) => {
                buffer.deliver(index, chunk.data);
            }
            None => {
                tracing::debug!(
                    "Chunk {} for unknown transfer {} from {}",
                    index,
                    id,
                    self.peer_id()
                );
            }
        }
    }

    /// Close the session.
    ///
    /// Stops every transfer, discards all state and waits until every
    /// transfer task has finished its cleanup. Calling it again is a no-op.
    pub async fn close(&self) {
        self.inner.cancel.cancel();

        let mut tasks = {
            let mut state = self.inner.state.lock().await;
            state.outbound.clear();
            for (_, mut buffer) in state.inbound.drain() {
                buffer.cancel();
            }
            if !state.accounting.is_idle() {
                state.accounting.clear();
                self.inner.publish_progress(&state.accounting);
            }
            std::mem::take(&mut state.tasks)
        };

        while let Some(result) = tasks.join_next().await {
            log_task_result(result);
        }
        tracing::debug!("Session with {} closed", self.peer_id());
    }
}

impl SessionInner {
    fn publish_progress(&self, accounting: &ByteAccounting) {
        let progress = accounting.progress();
        self.progress.send_replace(progress);
        self.ctx.emit(TransferEvent::ProgressChanged {
            peer_id: self.peer_id.clone(),
            progress,
        });
    }

    /// Record `bytes` as transferred.
    async fn advance(&self, bytes: u64) {
        if bytes == 0 || self.cancel.is_cancelled() {
            return;
        }
        let mut state = self.state.lock().await;
        state.accounting.advance(bytes);
        self.publish_progress(&state.accounting);
    }

    async fn receive(self: Arc<Self>, meta: TransferMeta) {
        let mut written = 0;
        let result = self.receive_into_sink(&meta, &mut written).await;
        self.finish(TransferDirection::Receive, &meta, written, result)
            .await;
    }

    async fn receive_into_sink(&self, meta: &TransferMeta, written: &mut u64) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::TransferCancelled);
        }

        let mut sink = self
            .ctx
            .sinks
            .create(&meta.name, meta.size)
            .await
            .map_err(|e| sink_error(meta, &e))?;

        match self.consume(meta, sink.as_mut(), written).await {
            Ok(()) => sink.close().await.map_err(|e| sink_error(meta, &e)),
            Err(e) => {
                sink.abort().await;
                Err(e)
            }
        }
    }

    async fn consume(
        &self,
        meta: &TransferMeta,
        sink: &mut dyn OutputSink,
        written: &mut u64,
    ) -> Result<()> {
        let chunk_count = meta.chunk_count();
        let mut step = ConsumerStep::first(chunk_count);

        loop {
            step = match step {
                ConsumerStep::WaitingForIndex(index) => {
                    let wait = self.await_chunk(meta.id, index).await?;
                    let data = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return Err(Error::TransferCancelled),
                        data = wait => data?,
                    };
                    ConsumerStep::Writing(index, data)
                }
                ConsumerStep::Writing(index, data) => {
                    if self.cancel.is_cancelled() {
                        return Err(Error::TransferCancelled);
                    }
                    sink.write(&data).await.map_err(|e| sink_error(meta, &e))?;

                    let len = data.len() as u64;
                    *written += len;
                    self.advance(len).await;
                    tracing::debug!(
                        "Wrote chunk {}/{} of {}",
                        index + 1,
                        chunk_count,
                        meta.name
                    );
                    ConsumerStep::after(index, chunk_count)
                }
                ConsumerStep::Done => return Ok(()),
            };
        }
    }

    async fn await_chunk(&self, id: TransferId, index: u64) -> Result<ChunkWait> {
        let mut state = self.state.lock().await;
        state
            .inbound
            .get_mut(&id)
            .map(|buffer| buffer.await_index(index))
            .ok_or(Error::TransferCancelled)
    }

    async fn send(self: Arc<Self>, meta: TransferMeta, file: OutgoingFile) {
        let mut sent = 0;
        let result = self.stream(&meta, &file, &mut sent).await;
        self.finish(TransferDirection::Send, &meta, sent, result).await;
    }

    async fn stream(&self, meta: &TransferMeta, file: &OutgoingFile, sent: &mut u64) -> Result<()> {
        for index in 0..meta.chunk_count() {
            if self.cancel.is_cancelled() {
                return Err(Error::TransferCancelled);
            }
            let Some(range) = meta.chunk_range(index) else {
                break;
            };

            let data = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Error::TransferCancelled),
                data = file.read_range(range) => data?,
            };
            self.deliver_chunk(meta, index, data, sent).await?;
        }
        Ok(())
    }

    /// Send one chunk and account for its delivery progress.
    async fn deliver_chunk(
        &self,
        meta: &TransferMeta,
        index: u64,
        data: Vec<u8>,
        sent: &mut u64,
    ) -> Result<()> {
        let mut tracker = DeliveryTracker::new(data.len() as u64);
        let (progress, mut fractions) = DeliveryProgress::channel();
        let chunk = Chunk::new(meta.clone(), index, data);
        let mut delivery = self
            .ctx
            .transport()
            .send_chunk(&self.peer_id, chunk, progress);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Error::TransferCancelled),
                Some(fraction) = fractions.recv() => {
                    let delta = tracker.report(fraction);
                    *sent += delta;
                    self.advance(delta).await;
                }
                result = &mut delivery => {
                    result.map_err(|e| delivery_error(meta, index, e))?;
                    break;
                }
            }
        }

        while let Ok(fraction) = fractions.try_recv() {
            let delta = tracker.report(fraction);
            *sent += delta;
            self.advance(delta).await;
        }
        let rest = tracker.finish();
        *sent += rest;
        self.advance(rest).await;

        tracing::debug!(
            "Sent chunk {}/{} of {} to {}",
            index + 1,
            meta.chunk_count(),
            meta.name,
            self.peer_id
        );
        Ok(())
    }

    /// Discard a finished transfer and report how it ended.
    async fn finish(
        &self,
        direction: TransferDirection,
        meta: &TransferMeta,
        transferred: u64,
        result: Result<()>,
    ) {
        let mut state = self.state.lock().await;
        let tracked = match direction {
            TransferDirection::Send => state.outbound.remove(&meta.id).is_some(),
            TransferDirection::Receive => state.inbound.remove(&meta.id).is_some(),
        };

        let verb = match direction {
            TransferDirection::Send => "Sending",
            TransferDirection::Receive => "Receiving",
        };
        let cancelled = self.cancel.is_cancelled();

        match result {
            Err(e) if cancelled || (tracked && e.is_cancellation()) => {
                drop(state);
                tracing::info!("{} {} cancelled ({})", verb, meta.name, self.peer_id);
                self.ctx.emit(TransferEvent::TransferCancelled {
                    peer_id: self.peer_id.clone(),
                    transfer_id: meta.id,
                    name: meta.name.clone(),
                    direction,
                });
            }
            Err(e) => {
                tracing::warn!("{} {} failed ({}): {}", verb, meta.name, self.peer_id, e);
                let unaccounted = meta.size.saturating_sub(transferred);
                if unaccounted > 0 {
                    state.accounting.retire(unaccounted);
                    self.publish_progress(&state.accounting);
                }
            }
            Ok(()) => {
                // short chunks from a misbehaving peer
                let unaccounted = meta.size.saturating_sub(transferred);
                if unaccounted > 0 {
                    state.accounting.retire(unaccounted);
                    self.publish_progress(&state.accounting);
                }
                drop(state);
                tracing::info!("{} {} finished ({})", verb, meta.name, self.peer_id);
                self.ctx.emit(TransferEvent::TransferCompleted {
                    peer_id: self.peer_id.clone(),
                    transfer_id: meta.id,
                    name: meta.name.clone(),
                    direction,
                });
            }
        }
    }
}

fn sink_error(meta: &TransferMeta, e: &Error) -> Error {
    match e {
        Error::TransferCancelled => Error::TransferCancelled,
        other => Error::Sink {
            file: meta.name.clone(),
            reason: other.to_string(),
        },
    }
}

fn delivery_error(meta: &TransferMeta, index: u64, e: Error) -> Error {
    match e {
        Error::DeliveryFailed { .. } => e,
        other if other.is_transport() => Error::DeliveryFailed {
            file: meta.name.clone(),
            chunk: index,
            reason: other.to_string(),
        },
        other => other,
    }
}
