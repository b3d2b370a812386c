//! Fake Firestore REST endpoint
//!
//! Answers each `:action` (beginTransaction, batchGet, runQuery, commit,
//! rollback) from its own scripted queue and records every request, so a
//! test can check both what the client sent and how it read the answer.
//! An action with nothing queued gets a 500 INTERNAL.

use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use serde_json::Value as Json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use super::fixtures::rpc_error;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path as sent on the wire, still percent-encoded
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    /// Parsed JSON body, `Null` when empty or not JSON
    pub body: Json,
}

impl RecordedRequest {
    /// The `:action` suffix of the path, e.g. `commit`
    pub fn action(&self) -> &str {
        action_of(&self.path)
    }
}

#[derive(Default)]
struct Script {
    responses: HashMap<String, VecDeque<(u16, Json)>>,
    requests: Vec<RecordedRequest>,
}

type SharedScript = Arc<Mutex<Script>>;

/// Fake server instance; shuts down when dropped.
pub struct FakeFirestore {
    /// `host:port`, the form `FIRESTORE_EMULATOR_HOST` takes
    pub host: String,
    script: SharedScript,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl FakeFirestore {
    /// Spawns the server on a random port. The listener is bound before
    /// this returns, so requests can be sent right away.
    pub async fn spawn() -> Self {
        let script = SharedScript::default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let app = Router::new().fallback(handle).with_state(script.clone());

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Fake Firestore failed");
        });

        Self {
            host: format!("127.0.0.1:{}", port),
            script,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Queue the next answer for `action`.
    pub fn respond(&self, action: &str, status: u16, body: Json) -> &Self {
        self.script
            .lock()
            .unwrap()
            .responses
            .entry(action.to_string())
            .or_default()
            .push_back((status, body));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.script.lock().unwrap().requests.clone()
    }

    /// Actions in the order they were called
    pub fn actions(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|request| request.action().to_string())
            .collect()
    }
}

fn action_of(path: &str) -> &str {
    path.rsplit_once(':').map(|(_, action)| action).unwrap_or("")
}

async fn handle(
    State(script): State<SharedScript>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let request = RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_str(&body).unwrap_or(Json::Null),
    };

    let mut script = script.lock().unwrap();
    let next = script
        .responses
        .get_mut(request.action())
        .and_then(VecDeque::pop_front);
    script.requests.push(request);

    let (status, body) =
        next.unwrap_or_else(|| (500, rpc_error(500, "INTERNAL", "no scripted response")));
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, body.to_string())
}
