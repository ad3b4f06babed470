//! Per-connection WebSocket session — the synthesis dispatcher.
//!
//! ## Lifecycle
//!
//! 1. The route handler authenticates upstream identity and upgrades.
//! 2. The socket is split. A **writer** task owns the sink and drains an
//!    mpsc of outbound [`StatusMessage`]s; an **ingest** task owns the
//!    session state and handles inbound frames. `tokio::select!` ties the
//!    two lifetimes together: whichever exits first aborts the other.
//! 3. Per document touched, the session lazily subscribes to
//!    `done:{user}:{doc}` and spawns a **relay** task forwarding bus
//!    messages into the writer mpsc.
//! 4. On close: relay tasks are aborted and the pending bookkeeping drops
//!    with the session. Enqueued jobs are deliberately NOT cancelled —
//!    their results land in the cache for the next reader.
//!
//! ## Delivery bookkeeping
//!
//! The pending set — per document, the `(block_index, variant_hash)` pairs
//! requested and not yet delivered — gives the session two properties:
//! at-most-once forwarding per `(variant, block)` within a subscription
//! lifetime, and cursor-driven eviction (`cursor_moved` prunes pairs
//! outside `[cursor, cursor + pending_window]`, so stale prefetch results
//! are dropped at the gateway instead of waking the client).

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lectern_core::domain::{
    BlockStatus, StatusMessage, Subscriber, SynthesisJob, done_channel,
};
use lectern_core::ports::{AudioCache as _, InFlightRegistry as _, JobQueue as _};
use lectern_core::variant::{VariantHash, normalize_text};

use crate::state::AppState;

/// Outbound queue depth per connection; a client this far behind is beyond
/// saving anyway (it will re-request on reconnect).
const OUTBOUND_BUFFER: usize = 64;

/// Pending pairs per document: `(block_index, variant_hash)`.
type PendingSet = Arc<Mutex<HashMap<String, BTreeSet<(u32, VariantHash)>>>>;

/// Entry point from the upgrade handler.
pub async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    info!(user_id = %user_id, "synthesis session opened");

    let (ws_sender, ws_receiver) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<StatusMessage>(OUTBOUND_BUFFER);

    let mut writer = tokio::spawn(write_outbound(ws_sender, out_rx));

    let session = Session {
        state,
        user_id: user_id.clone(),
        out_tx,
        pending: Arc::new(Mutex::new(HashMap::new())),
        relays: HashMap::new(),
    };
    let mut ingest = tokio::spawn(session.run(ws_receiver));

    // Whichever side finishes first (client close, network drop, write
    // failure) tears down the other.
    tokio::select! {
        _ = &mut ingest => { writer.abort(); }
        _ = &mut writer => { ingest.abort(); }
    }

    info!(user_id = %user_id, "synthesis session closed");
}

/// Writer half: outbound mpsc → JSON text frames.
async fn write_outbound(
    mut sender: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<StatusMessage>,
) {
    while let Some(message) = out_rx.recv().await {
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "failed to serialize status message");
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            // Client gone; ingest will notice via the select in
            // handle_socket.
            break;
        }
    }
}

struct Session {
    state: AppState,
    user_id: String,
    out_tx: mpsc::Sender<StatusMessage>,
    pending: PendingSet,
    relays: HashMap<String, JoinHandle<()>>,
}

impl Session {
    /// Ingest loop: one inbound frame at a time until the socket closes.
    async fn run(mut self, mut receiver: SplitStream<WebSocket>) {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_text(&text).await,
                Ok(Message::Close(_)) | Err(_) => break,
                // Binary frames are not part of the protocol; ping/pong is
                // handled by axum.
                Ok(_) => {}
            }
        }
        for (_, relay) in self.relays.drain() {
            relay.abort();
        }
    }

    async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<crate::protocol::ClientMessage>(text) {
            Ok(crate::protocol::ClientMessage::Synthesize {
                document_id,
                block_index,
                text,
                model_id,
                voice_id,
                voice_parameters,
                context_tokens_b64,
            }) => {
                self.handle_synthesize(
                    document_id,
                    block_index,
                    &text,
                    model_id,
                    voice_id,
                    voice_parameters,
                    context_tokens_b64,
                )
                .await;
            }
            Ok(crate::protocol::ClientMessage::CursorMoved { document_id, cursor_index }) => {
                self.handle_cursor_moved(&document_id, cursor_index);
            }
            Err(err) => {
                debug!(user_id = %self.user_id, error = %err, "malformed client message");
                self.send(StatusMessage::error(
                    String::new(),
                    0,
                    VariantHash::from_hex(""),
                    String::new(),
                    String::new(),
                    format!("malformed message: {err}"),
                ))
                .await;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_synthesize(
        &mut self,
        document_id: String,
        block_index: u32,
        text: &str,
        model_id: String,
        voice_id: String,
        voice_parameters: std::collections::BTreeMap<String, f64>,
        context_tokens_b64: Option<String>,
    ) {
        let normalized = normalize_text(text);
        let variant_hash =
            VariantHash::compute(&normalized, &model_id, &voice_id, &voice_parameters);

        let context_tokens = match context_tokens_b64.map(|encoded| BASE64.decode(encoded)) {
            None => None,
            Some(Ok(raw)) => Some(bytes::Bytes::from(raw)),
            Some(Err(_)) => {
                self.send(StatusMessage::error(
                    document_id,
                    block_index,
                    variant_hash,
                    model_id,
                    voice_id,
                    "contextTokensB64 is not valid base64",
                ))
                .await;
                return;
            }
        };

        // First touch of this document: subscribe before anything can
        // complete, so no done message can slip past the relay.
        self.ensure_subscribed(&document_id);

        // Cache fast path.
        match self.state.cache.get(&variant_hash).await {
            Ok(Some(_entry)) => {
                debug!(
                    user_id = %self.user_id,
                    variant_hash = %variant_hash,
                    block_index,
                    "cache hit"
                );
                self.send(StatusMessage::cached(
                    document_id,
                    block_index,
                    variant_hash,
                    model_id,
                    voice_id,
                ))
                .await;
                return;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "cache unavailable");
                self.send(StatusMessage::error(
                    document_id,
                    block_index,
                    variant_hash,
                    model_id,
                    voice_id,
                    "store_unavailable",
                ))
                .await;
                return;
            }
        }

        // Dedup critical section: exactly one registrant enqueues.
        let subscriber = Subscriber::new(&self.user_id, &document_id, block_index);
        let first = self.state.inflight.register(&variant_hash, subscriber).await;

        let status = if first {
            let job = SynthesisJob::new(
                variant_hash.clone(),
                block_index,
                document_id.clone(),
                self.user_id.clone(),
                model_id.clone(),
                voice_id.clone(),
                voice_parameters,
                normalized,
                context_tokens,
            );
            if let Err(err) = self.state.queue.push(&model_id, job).await {
                warn!(error = %err, "queue push failed");
                // Without a job the record would dedupe forever; drop it so
                // a retry can start clean.
                self.state.inflight.clear(&variant_hash).await;
                self.send(StatusMessage::error(
                    document_id,
                    block_index,
                    variant_hash,
                    model_id,
                    voice_id,
                    "store_unavailable",
                ))
                .await;
                return;
            }
            BlockStatus::Queued
        } else {
            BlockStatus::Processing
        };

        self.pending
            .lock()
            .expect("pending set lock poisoned")
            .entry(document_id.clone())
            .or_default()
            .insert((block_index, variant_hash.clone()));

        self.send(StatusMessage {
            document_id,
            block_index,
            variant_hash,
            status,
            model_id,
            voice_id,
            audio_url: None,
            error: None,
        })
        .await;
    }

    /// Prune pending pairs outside the playback window. Jobs already
    /// enqueued keep running; their results are cached for future readers.
    fn handle_cursor_moved(&self, document_id: &str, cursor_index: u32) {
        let window_end = cursor_index.saturating_add(self.state.settings.pending_window);
        let mut pending = self.pending.lock().expect("pending set lock poisoned");
        if let Some(blocks) = pending.get_mut(document_id) {
            let before = blocks.len();
            blocks.retain(|(block, _)| *block >= cursor_index && *block <= window_end);
            debug!(
                user_id = %self.user_id,
                document_id,
                cursor_index,
                evicted = before - blocks.len(),
                "cursor moved"
            );
        }
    }

    /// Lazy per-document subscription, alive until the connection closes.
    fn ensure_subscribed(&mut self, document_id: &str) {
        if self.relays.contains_key(document_id) {
            return;
        }
        let channel = done_channel(&self.user_id, document_id);
        let receiver = self.state.bus.subscribe(&channel);
        debug!(user_id = %self.user_id, channel = %channel, "subscribed to document channel");
        let relay = tokio::spawn(relay_done_messages(
            receiver,
            self.out_tx.clone(),
            Arc::clone(&self.pending),
            document_id.to_string(),
        ));
        self.relays.insert(document_id.to_string(), relay);
    }

    async fn send(&self, message: StatusMessage) {
        // Writer gone means the connection is tearing down; nothing to do.
        let _ = self.out_tx.send(message).await;
    }
}

/// Relay task: one document channel → the connection's outbound queue.
///
/// Forwards a done message only when its `(block, variant)` pair is still
/// pending, then removes the pair — at-most-once per pair per subscription
/// lifetime, and silence for cursor-evicted prefetches.
async fn relay_done_messages(
    mut receiver: broadcast::Receiver<StatusMessage>,
    out_tx: mpsc::Sender<StatusMessage>,
    pending: PendingSet,
    document_id: String,
) {
    loop {
        match receiver.recv().await {
            Ok(message) => {
                let wanted = pending
                    .lock()
                    .expect("pending set lock poisoned")
                    .get_mut(&document_id)
                    .is_some_and(|blocks| {
                        blocks.remove(&(message.block_index, message.variant_hash.clone()))
                    });
                if wanted {
                    if out_tx.send(message).await.is_err() {
                        break;
                    }
                } else {
                    debug!(
                        document_id = %document_id,
                        block_index = message.block_index,
                        "done message dropped (delivered or evicted)"
                    );
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Pubsub drops are allowed; the client re-requests anything
                // it still needs and hits the cache.
                warn!(document_id = %document_id, skipped, "session lagged behind done channel");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
