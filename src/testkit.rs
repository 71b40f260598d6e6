// ===============================
// src/testkit.rs (fake GitHub contents + Telegram servers for tests)
// ===============================
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server};
use serde_json::{json, Value};

use crate::store::{ContentStore, StoreConfig};
use crate::telegram::{TelegramClient, TelegramConfig};

pub const TOKEN: &str = "test-token";
const REPO_PREFIX: &str = "/repos/acme/bot-state/contents/data/";

fn spawn_server<H, Fut>(handler: H) -> SocketAddr
where
    H: Fn(Request<Body>) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = Response<Body>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.set_nonblocking(true).expect("nonblocking");
    let addr = listener.local_addr().expect("addr");
    let make_svc = make_service_fn(move |_conn| {
        let handler = handler.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let fut = handler(req);
                async move { Ok::<_, Infallible>(fut.await) }
            }))
        }
    });
    let server = Server::from_tcp(listener).expect("server").serve(make_svc);
    tokio::spawn(async move {
        let _ = server.await;
    });
    addr
}

fn json_response(status: u16, body: Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ---------------------------------------------------------------------------
// GitHub contents API
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GhState {
    // (branch, path) -> (base64 content, sha)
    objects: HashMap<(String, String), (String, String)>,
    next_sha: u64,
    fail_next: u32,
    fail_status: u16,
    delay: Duration,
    requests: u32,
    last_put_branch: Option<String>,
}

impl GhState {
    fn sha(&mut self) -> String {
        self.next_sha += 1;
        format!("sha-{:04}", self.next_sha)
    }
}

pub struct FakeGithub {
    base_url: String,
    state: Arc<Mutex<GhState>>,
}

impl FakeGithub {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(GhState::default()));
        let st = state.clone();
        let addr = spawn_server(move |req| gh_handle(req, st.clone()));
        Self { base_url: format!("http://{addr}"), state }
    }

    pub fn config(api_url: &str) -> StoreConfig {
        StoreConfig {
            api_url: api_url.to_string(),
            repo: "acme/bot-state".into(),
            branch: "data".into(),
            dir: "data".into(),
            token: TOKEN.into(),
            timeout: Duration::from_secs(2),
            max_attempts: 3,
            backoff: Duration::from_millis(10),
        }
    }

    pub fn store_config(&self) -> StoreConfig { Self::config(&self.base_url) }

    pub fn store(&self) -> ContentStore { ContentStore::new(self.store_config()).unwrap() }

    pub fn put_raw(&self, key: &str, content: &str) {
        let mut st = self.state.lock().unwrap();
        let sha = st.sha();
        st.objects.insert(
            ("data".into(), format!("{REPO_PREFIX}{key}")),
            (content.to_string(), sha),
        );
    }

    pub fn decoded(&self, key: &str) -> Option<Value> {
        let st = self.state.lock().unwrap();
        let (content, _) = st.objects.get(&("data".into(), format!("{REPO_PREFIX}{key}")))?;
        let bytes = BASE64.decode(content).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn fail_next(&self, n: u32, status: u16) {
        let mut st = self.state.lock().unwrap();
        st.fail_next = n;
        st.fail_status = status;
    }

    pub fn set_delay(&self, d: Duration) { self.state.lock().unwrap().delay = d; }

    pub fn request_count(&self) -> u32 { self.state.lock().unwrap().requests }

    pub fn last_put_branch(&self) -> Option<String> { self.state.lock().unwrap().last_put_branch.clone() }
}

fn wrap60(s: &str) -> String {
    s.as_bytes()
        .chunks(60)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

async fn gh_handle(req: Request<Body>, state: Arc<Mutex<GhState>>) -> Response<Body> {
    let delay = {
        let mut st = state.lock().unwrap();
        st.requests += 1;
        st.delay
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let authorized = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {TOKEN}"))
        .unwrap_or(false);
    if !authorized {
        return json_response(401, json!({"message": "Bad credentials"}));
    }

    {
        let mut st = state.lock().unwrap();
        if st.fail_next > 0 {
            st.fail_next -= 1;
            return json_response(st.fail_status, json!({"message": "injected failure"}));
        }
    }

    let path = req.uri().path().to_string();
    let method = req.method().clone();
    match method {
        Method::GET => {
            let branch = req
                .uri()
                .query()
                .and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("ref=")))
                .unwrap_or("main")
                .to_string();
            let st = state.lock().unwrap();
            match st.objects.get(&(branch, path)) {
                Some((content, sha)) => json_response(
                    200,
                    json!({"sha": sha, "encoding": "base64", "content": wrap60(content)}),
                ),
                None => json_response(404, json!({"message": "Not Found"})),
            }
        }
        Method::PUT => {
            let bytes = hyper::body::to_bytes(req.into_body()).await.unwrap_or_default();
            let body: Value = match serde_json::from_slice(&bytes) {
                Ok(v) => v,
                Err(_) => return json_response(400, json!({"message": "Problems parsing JSON"})),
            };
            let branch = body["branch"].as_str().unwrap_or("main").to_string();
            let content = body["content"].as_str().unwrap_or_default().to_string();
            let given = body["sha"].as_str().map(str::to_string);
            if body["message"].as_str().unwrap_or_default().is_empty() {
                return json_response(422, json!({"message": "message required"}));
            }

            let mut st = state.lock().unwrap();
            st.last_put_branch = Some(branch.clone());
            let id = (branch, path);
            let status = match (st.objects.get(&id), given) {
                (Some(_), None) => return json_response(422, json!({"message": "\"sha\" wasn't supplied."})),
                (Some((_, current)), Some(g)) if *current != g => {
                    return json_response(409, json!({"message": "does not match"}))
                }
                (Some(_), Some(_)) => 200,
                (None, _) => 201,
            };
            let sha = st.sha();
            st.objects.insert(id, (content, sha.clone()));
            json_response(status, json!({"content": {"sha": sha}, "commit": {"message": body["message"]}}))
        }
        _ => json_response(405, json!({"message": "method not allowed"})),
    }
}

// ---------------------------------------------------------------------------
// Telegram Bot API
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TgState {
    sent: Vec<Value>,
    updates: Vec<Value>,
}

pub struct FakeTelegram {
    base_url: String,
    state: Arc<Mutex<TgState>>,
}

pub const CHAT_ID: i64 = 4242;

impl FakeTelegram {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(TgState::default()));
        let st = state.clone();
        let addr = spawn_server(move |req| tg_handle(req, st.clone()));
        Self { base_url: format!("http://{addr}"), state }
    }

    pub fn client(&self) -> TelegramClient {
        TelegramClient::new(TelegramConfig {
            api_url: self.base_url.clone(),
            bot_token: "123:abc".into(),
            chat_id: CHAT_ID,
            poll_timeout: Duration::from_secs(0),
        })
        .unwrap()
    }

    pub fn push_message(&self, update_id: i64, chat_id: i64, text: &str) {
        self.state.lock().unwrap().updates.push(json!({
            "update_id": update_id,
            "message": {"message_id": update_id, "chat": {"id": chat_id, "type": "private"}, "text": text}
        }));
    }

    pub fn sent(&self) -> Vec<Value> { self.state.lock().unwrap().sent.clone() }
}

async fn tg_handle(req: Request<Body>, state: Arc<Mutex<TgState>>) -> Response<Body> {
    let path = req.uri().path().to_string();
    if !path.starts_with("/bot123:abc/") {
        return json_response(404, json!({"ok": false, "description": "Not Found"}));
    }
    if path.ends_with("/sendMessage") {
        let bytes = hyper::body::to_bytes(req.into_body()).await.unwrap_or_default();
        let body: Value = serde_json::from_slice(&bytes).unwrap_or_default();
        if body["text"].as_str().unwrap_or_default().is_empty() {
            return json_response(400, json!({"ok": false, "description": "Bad Request: message text is empty"}));
        }
        state.lock().unwrap().sent.push(body);
        return json_response(200, json!({"ok": true, "result": {"message_id": 1}}));
    }
    if path.ends_with("/getUpdates") {
        let offset = req
            .uri()
            .query()
            .and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("offset=")))
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let st = state.lock().unwrap();
        let pending: Vec<Value> = st
            .updates
            .iter()
            .filter(|u| u["update_id"].as_i64().unwrap_or(0) >= offset)
            .cloned()
            .collect();
        return json_response(200, json!({"ok": true, "result": pending}));
    }
    json_response(404, json!({"ok": false, "description": "Not Found"}))
}
