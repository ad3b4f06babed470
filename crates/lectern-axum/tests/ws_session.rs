//! Live WebSocket tests: a real server on an ephemeral port, real client
//! connections, in-process tone workers behind the embedded store.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use lectern_axum::bootstrap::bootstrap_with_store;
use lectern_axum::routes::{CorsConfig, create_router};
use lectern_axum::state::AppState;
use lectern_core::domain::{BlockStatus, StatusMessage, done_channel};
use lectern_core::ports::{AudioCache as _, JobQueue, ResultsStream};
use lectern_core::settings::Settings;
use lectern_core::variant::VariantHash;
use lectern_store::MemoryBackend;
use lectern_worker::{TestToneSynthesizer, WorkerLoop};

const DEADLINE: Duration = Duration::from_secs(10);

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestGateway {
    addr: SocketAddr,
    state: AppState,
    backend: Arc<MemoryBackend>,
    cancel: CancellationToken,
}

impl TestGateway {
    async fn start() -> Self {
        let settings = Settings {
            queue_poll_interval_ms: 20,
            models: vec!["m1".to_string()],
            ..Settings::default()
        };
        let backend = MemoryBackend::from_settings(&settings);
        let gateway = bootstrap_with_store(
            settings,
            Arc::clone(&backend) as Arc<dyn JobQueue>,
            Arc::clone(&backend) as Arc<dyn ResultsStream>,
        )
        .unwrap();

        let app = create_router(gateway.state.clone(), &CorsConfig::AllowAll);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state: gateway.state,
            backend,
            cancel: CancellationToken::new(),
        }
    }

    async fn connect(&self, user: &str) -> WsClient {
        let (client, _) = connect_async(format!("ws://{}/ws?user={user}", self.addr))
            .await
            .expect("websocket connect");
        client
    }

    fn spawn_worker(&self) {
        let worker = WorkerLoop::new(
            "w-test",
            "m1",
            Arc::clone(&self.backend) as Arc<dyn JobQueue>,
            Arc::clone(&self.backend) as Arc<dyn ResultsStream>,
            Arc::new(TestToneSynthesizer::new()),
        );
        tokio::spawn(worker.run(self.cancel.clone()));
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn synthesize_json(doc: &str, block: u32, text: &str, voice: &str) -> String {
    json!({
        "type": "synthesize",
        "documentId": doc,
        "blockIndex": block,
        "text": text,
        "modelId": "m1",
        "voiceId": voice,
    })
    .to_string()
}

async fn send_text(client: &mut WsClient, payload: String) {
    client.send(WsMessage::Text(payload.into())).await.unwrap();
}

/// Read status messages until one matches, within the deadline.
async fn recv_until(
    client: &mut WsClient,
    predicate: impl Fn(&StatusMessage) -> bool,
) -> StatusMessage {
    timeout(DEADLINE, async {
        loop {
            let frame = client.next().await.expect("socket open").expect("frame ok");
            if let WsMessage::Text(text) = frame {
                let message: StatusMessage = serde_json::from_str(&text).unwrap();
                if predicate(&message) {
                    return message;
                }
            }
        }
    })
    .await
    .expect("status deadline")
}

#[tokio::test]
async fn cache_hit_answers_directly_without_enqueue() {
    let gateway = TestGateway::start().await;

    // Pre-populate the cache under the hash the dispatcher will compute.
    let hash = VariantHash::compute("hello", "m1", "v1", &BTreeMap::new());
    gateway
        .state
        .cache
        .put(&hash, bytes::Bytes::from_static(&[0u8; 48]), 2400, "m1", "v1")
        .await
        .unwrap();

    let mut client = gateway.connect("u1").await;
    send_text(&mut client, synthesize_json("doc-a", 0, "hello", "v1")).await;

    let msg = recv_until(&mut client, |m| m.status == BlockStatus::Cached).await;
    assert_eq!(msg.variant_hash, hash);
    assert_eq!(msg.audio_url.as_deref(), Some(format!("/api/audio/{hash}").as_str()));
    assert_eq!(msg.model_id, "m1");
    assert_eq!(msg.voice_id, "v1");
    assert_eq!(gateway.backend.depth("m1").await.unwrap(), 0, "no queue push on cache hit");
}

#[tokio::test]
async fn concurrent_identical_requests_dedupe_to_one_job() {
    let gateway = TestGateway::start().await;

    let mut first = gateway.connect("u1").await;
    let mut second = gateway.connect("u2").await;

    send_text(&mut first, synthesize_json("doc-a", 0, "same text", "v1")).await;
    send_text(&mut second, synthesize_json("doc-b", 3, "same text", "v1")).await;

    // Both get an acknowledgement; exactly one job was enqueued.
    let ack_first = recv_until(&mut first, |m| m.status != BlockStatus::Error).await;
    let ack_second = recv_until(&mut second, |m| m.status != BlockStatus::Error).await;
    let acks = [ack_first.status, ack_second.status];
    assert!(acks.contains(&BlockStatus::Queued));
    assert_eq!(gateway.backend.depth("m1").await.unwrap(), 1);

    gateway.spawn_worker();

    let done_first = recv_until(&mut first, |m| m.status == BlockStatus::Cached).await;
    let done_second = recv_until(&mut second, |m| m.status == BlockStatus::Cached).await;
    assert_eq!(done_first.variant_hash, done_second.variant_hash);
    assert_eq!(done_first.block_index, 0);
    assert_eq!(done_second.block_index, 3);
    assert_eq!(done_second.document_id, "doc-b");
}

#[tokio::test]
async fn voice_switch_yields_two_tagged_results() {
    let gateway = TestGateway::start().await;
    gateway.spawn_worker();

    let mut client = gateway.connect("u1").await;
    send_text(&mut client, synthesize_json("doc-a", 0, "x", "v1")).await;
    send_text(&mut client, synthesize_json("doc-a", 0, "x", "v2")).await;

    let done_v1 = recv_until(&mut client, |m| {
        m.status == BlockStatus::Cached && m.voice_id == "v1"
    })
    .await;
    let done_v2 = recv_until(&mut client, |m| {
        m.status == BlockStatus::Cached && m.voice_id == "v2"
    })
    .await;

    // Distinct renditions, each tagged with its voice; the client filters
    // by its current selection.
    assert_ne!(done_v1.variant_hash, done_v2.variant_hash);
    assert_eq!(done_v1.block_index, 0);
    assert_eq!(done_v2.block_index, 0);
}

#[tokio::test]
async fn sessions_never_see_other_documents_channels() {
    let gateway = TestGateway::start().await;

    let mut client = gateway.connect("u1").await;
    send_text(&mut client, synthesize_json("doc-a", 0, "isolated", "v1")).await;
    recv_until(&mut client, |m| m.status == BlockStatus::Queued).await;

    // Someone publishes a done for the same user on a DIFFERENT document.
    let foreign = StatusMessage::cached(
        "doc-b",
        0,
        VariantHash::from_hex("beef"),
        "m1",
        "v1",
    );
    gateway.state.bus.publish(&done_channel("u1", "doc-b"), foreign);

    // The session is only subscribed to doc-a; nothing may arrive.
    let nothing = timeout(Duration::from_millis(400), client.next()).await;
    assert!(nothing.is_err(), "received a frame for a foreign document");
}
