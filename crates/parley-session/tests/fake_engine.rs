//! End-to-end runs against a fake intent engine on a local socket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use parley_core::config::SearchMode;
use parley_core::rules::SkipList;
use parley_core::types::{CommandReply, CommandSource, RequestContext};
use parley_index::{AutolearnStore, CorrectionSearch, MemoryIndex, SearchSettings};
use parley_resolve::{FallbackResolver, ResolverConfig};
use parley_session::{ConnectionState, SessionManager, SessionSettings};

const TOKEN: &str = "test-token";

/// Commands the fake engine understands.
const KNOWN: [&str; 2] = ["turn on kitchen", "turn on kitchen light"];

#[derive(Default)]
struct Engine {
    runs: Mutex<Vec<String>>,
    connections: AtomicUsize,
}

impl Engine {
    fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }
}

fn intent_end(id: u64, text: &str) -> String {
    let response = if KNOWN.contains(&text) {
        json!({
            "response_type": "action_done",
            "speech": { "plain": { "speech": "Turned on the light" } }
        })
    } else {
        json!({
            "response_type": "error",
            "speech": { "plain": { "speech": "Sorry, I couldn't understand that" } },
            "data": { "code": "no_intent_match" }
        })
    };
    json!({
        "id": id,
        "type": "event",
        "event": { "type": "intent-end", "data": { "intent_output": { "response": response } } }
    })
    .to_string()
}

async fn serve_connection(stream: TcpStream, engine: Arc<Engine>, drop_after_auth: bool) {
    let mut ws = accept_async(stream).await.unwrap();
    ws.send(Message::Text(json!({"type": "auth_required"}).to_string()))
        .await
        .unwrap();

    let Some(Ok(Message::Text(auth))) = ws.next().await else {
        return;
    };
    let auth: Value = serde_json::from_str(&auth).unwrap();
    if auth["type"] != "auth" || auth["access_token"] != TOKEN {
        let _ = ws
            .send(Message::Text(json!({"type": "auth_invalid", "message": "bad"}).to_string()))
            .await;
        return;
    }
    if drop_after_auth {
        return;
    }
    ws.send(Message::Text(json!({"type": "auth_ok"}).to_string()))
        .await
        .unwrap();

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let run: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(run["type"], "assist_pipeline/run");
        assert!(run["input"].get("language").is_none());
        let id = run["id"].as_u64().unwrap();
        let command = run["input"]["text"].as_str().unwrap().to_string();
        engine.runs.lock().unwrap().push(command.clone());

        let ack = json!({"id": id, "type": "result", "success": true, "result": null});
        ws.send(Message::Text(ack.to_string())).await.unwrap();
        ws.send(Message::Text(intent_end(id, &command))).await.unwrap();
    }
}

/// Serve forever. The first `drops` connections hang up instead of accepting auth.
async fn start_engine(drops: usize) -> (String, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let engine = Arc::new(Engine::default());
    let served = Arc::clone(&engine);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let n = served.connections.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve_connection(stream, Arc::clone(&served), n < drops));
        }
    });
    (format!("ws://{}/api/websocket", addr), engine)
}

fn session(url: String, index: Arc<MemoryIndex>) -> SessionManager {
    let search = CorrectionSearch::new(
        index,
        SearchSettings {
            mode: SearchMode::Token,
            ..SearchSettings::default()
        },
    );
    let resolver = FallbackResolver::new(ResolverConfig {
        correction: true,
        autolearn: true,
        ..ResolverConfig::default()
    })
    .with_search(search.clone());
    let settings = SessionSettings {
        url,
        token: TOKEN.to_string(),
        reconnect_delay: Duration::from_millis(20),
        pending_ttl: Duration::from_secs(30),
        sweep_interval: Duration::from_secs(1),
        feedback: true,
        command_learned: "I learned that command".to_string(),
        command_not_found: "Sorry, I can't find that command".to_string(),
    };
    SessionManager::new(
        settings,
        resolver,
        Some(AutolearnStore::new(search, SkipList::default())),
    )
}

async fn ask(manager: &SessionManager, context: RequestContext) -> CommandReply {
    tokio::time::timeout(Duration::from_secs(5), manager.ask(context))
        .await
        .expect("reply within timeout")
}

#[tokio::test]
async fn test_success_is_answered_and_learned() {
    let (url, engine) = start_engine(0).await;
    let index = Arc::new(MemoryIndex::new());
    let manager = session(url, Arc::clone(&index));
    let runner = manager.clone();
    let task = tokio::spawn(async move { runner.run().await });

    tokio::time::timeout(Duration::from_secs(5), manager.wait_ready())
        .await
        .expect("ready within timeout");
    assert_eq!(manager.state(), ConnectionState::Ready);

    let reply = ask(&manager, RequestContext::new("turn on kitchen").with_hostname("willow")).await;

    assert_eq!(
        reply,
        CommandReply::new("Turned on the light. I learned that command", true)
    );
    assert_eq!(engine.runs(), vec!["turn on kitchen"]);
    assert_eq!(index.commands()[0].command, "turn on kitchen");
    assert_eq!(manager.state(), ConnectionState::Ready);
    task.abort();
}

#[tokio::test]
async fn test_typo_is_corrected_and_resubmitted() {
    let (url, engine) = start_engine(0).await;
    let index = Arc::new(MemoryIndex::new());
    index.add("turn on kitchen light", CommandSource::Manual);
    let manager = session(url, Arc::clone(&index));
    let runner = manager.clone();
    let task = tokio::spawn(async move { runner.run().await });

    let reply = ask(&manager, RequestContext::new("tern on ktchen light")).await;

    assert_eq!(reply, CommandReply::new("Turned on the light", true));
    assert_eq!(
        engine.runs(),
        vec!["tern on ktchen light", "turn on kitchen light"]
    );
    assert_eq!(index.len(), 1);
    assert_eq!(manager.pending(), 0);
    task.abort();
}

#[tokio::test]
async fn test_unknown_command_is_answered_once() {
    let (url, engine) = start_engine(0).await;
    let index = Arc::new(MemoryIndex::new());
    let manager = session(url, index);
    let runner = manager.clone();
    let task = tokio::spawn(async move { runner.run().await });

    let reply = ask(&manager, RequestContext::new("play some jazz")).await;

    assert_eq!(
        reply,
        CommandReply::new("Sorry, I couldn't understand that", false)
    );
    assert_eq!(engine.runs(), vec!["play some jazz"]);
    task.abort();
}

#[tokio::test]
async fn test_queued_before_connect_and_reconnects() {
    let (url, engine) = start_engine(1).await;
    let index = Arc::new(MemoryIndex::new());
    let manager = session(url, index);

    // Submitted while disconnected; goes out on the first usable connection.
    let rx = manager
        .submit(RequestContext::new("turn on kitchen light"))
        .unwrap();

    let runner = manager.clone();
    let task = tokio::spawn(async move { runner.run().await });

    let reply = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("reply within timeout")
        .unwrap();
    assert!(reply.ok);
    assert!(engine.connections.load(Ordering::SeqCst) >= 2);
    assert_eq!(engine.runs(), vec!["turn on kitchen light"]);
    task.abort();
}
