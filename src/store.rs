// ===============================
// src/store.rs (GitHub contents-backed state store)
// ===============================
/*
=============================================================================
Project : qflow_bot — Telegram status relay for a Bybit trading account
Module  : store.rs
Version : 2.1.1
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Keeps bot state (balance, positions, daily trades, PnL) in a JSON
          document versioned on GitHub, checkpoints it every cycle, relays
          status to Telegram, and answers read-only chat commands.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
use std::future::Future;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use rand::Rng;
use reqwest::{header::ACCEPT, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::BotState;
use crate::metrics::{STORE_LATENCY, STORE_REQUESTS, STORE_RETRIES};

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub api_url: String,
    /// "owner/repo"
    pub repo: String,
    pub branch: String,
    /// Direktori di dalam repo tempat file state disimpan
    pub dir: String,
    pub token: String,
    pub timeout: Duration,
    /// Total percobaan untuk fault transient (>= 1)
    pub max_attempts: u32,
    pub backoff: Duration,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("unauthorized ({0})")]
    Unauthorized(StatusCode),
    #[error("stale revision token, object was updated by another writer")]
    Conflict,
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("content is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("content is not a valid state document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad store url: {0}")]
    Url(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() { StoreError::Timeout } else { StoreError::Transport(e) }
    }
}

impl StoreError {
    /// Fault yang layak dicoba ulang. Conflict tidak termasuk: store sudah
    /// melakukan compare-and-swap pada sha, jadi conflict berarti ada writer lain.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transport(_) | StoreError::Timeout => true,
            StoreError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// Opaque revision token (git blob sha) assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision(String);

impl Revision {
    pub fn as_str(&self) -> &str { &self.0 }
}

/// Result of a load that keeps "absent" and "failed" apart.
#[derive(Debug)]
pub enum LoadOutcome {
    Found(BotState),
    Absent,
    Failed(StoreError),
}

// Envelope GET /contents
#[derive(Debug, Deserialize)]
struct StoredDocument {
    sha: String,
    #[serde(default)]
    content: String,
}

// Body PUT /contents
#[derive(Debug, Serialize)]
struct PutBody<'a> {
    message: String,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

pub struct ContentStore {
    http: reqwest::Client,
    cfg: StoreConfig,
    base: Url,
}

impl ContentStore {
    pub fn new(cfg: StoreConfig) -> Result<Self, StoreError> {
        let base = Url::parse(&cfg.api_url).map_err(|e| StoreError::Url(format!("{}: {e}", cfg.api_url)))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::Url(cfg.api_url.clone()));
        }
        // GitHub menolak request tanpa User-Agent
        let http = reqwest::Client::builder()
            .user_agent(concat!("qflow_bot/", env!("CARGO_PKG_VERSION")))
            .timeout(cfg.timeout)
            .connect_timeout(cfg.timeout)
            .build()?;
        Ok(Self { http, cfg, base })
    }

    /// `{api}/repos/{owner}/{repo}/contents/{dir}/{key}`
    fn object_url(&self, key: &str) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        {
            let mut seg = url
                .path_segments_mut()
                .map_err(|_| StoreError::Url(self.cfg.api_url.clone()))?;
            seg.pop_if_empty().push("repos");
            for part in self.cfg.repo.split('/').filter(|p| !p.is_empty()) {
                seg.push(part);
            }
            seg.push("contents");
            for part in self.cfg.dir.split('/').filter(|p| !p.is_empty()) {
                seg.push(part);
            }
            seg.push(key);
        }
        Ok(url)
    }

    fn authed(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.bearer_auth(&self.cfg.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn fetch(&self, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        let mut url = self.object_url(key)?;
        url.query_pairs_mut().append_pair("ref", &self.cfg.branch);

        let started = Instant::now();
        let rsp = self.authed(self.http.get(url)).send().await;
        let rsp = observe("get", started, rsp)?;

        match rsp.status() {
            StatusCode::OK => Ok(Some(rsp.json::<StoredDocument>().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(status_error(status, rsp).await),
        }
    }

    /// Read half of read-before-write: current revision token, `None` if the
    /// object does not exist yet.
    pub async fn fetch_revision(&self, key: &str) -> Result<Option<Revision>, StoreError> {
        Ok(self.fetch(key).await?.map(|doc| Revision(doc.sha)))
    }

    /// Write half: create-or-replace `key` guarded by `prior`.
    /// A stale `prior` comes back as [`StoreError::Conflict`].
    pub async fn write(
        &self,
        state: &BotState,
        key: &str,
        prior: Option<&Revision>,
    ) -> Result<Revision, StoreError> {
        let body = PutBody {
            message: format!("Update {} - {}", key, Utc::now().to_rfc3339()),
            content: BASE64.encode(state.to_document()?),
            branch: &self.cfg.branch,
            sha: prior.map(|r| r.as_str()),
        };
        let url = self.object_url(key)?;

        let started = Instant::now();
        let rsp = self.authed(self.http.put(url)).json(&body).send().await;
        let rsp = observe("put", started, rsp)?;

        match rsp.status() {
            StatusCode::OK | StatusCode::CREATED => {
                // Write sudah diterima; sha baru hanya informatif.
                let v = rsp.json::<serde_json::Value>().await.unwrap_or_default();
                let sha = v
                    .pointer("/content/sha")
                    .and_then(|s| s.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(Revision(sha))
            }
            status => Err(status_error(status, rsp).await),
        }
    }

    pub async fn load_outcome(&self, key: &str) -> LoadOutcome {
        match self.with_retry("load", key, move || self.fetch(key)).await {
            Ok(None) => LoadOutcome::Absent,
            Ok(Some(doc)) => match decode(&doc) {
                Ok(state) => LoadOutcome::Found(state),
                Err(e) => LoadOutcome::Failed(e),
            },
            Err(e) => LoadOutcome::Failed(e),
        }
    }

    /// Baseline load: any fault reads as "no prior state".
    pub async fn load(&self, key: &str) -> Option<BotState> {
        match self.load_outcome(key).await {
            LoadOutcome::Found(state) => Some(state),
            LoadOutcome::Absent => None,
            LoadOutcome::Failed(e) => {
                warn!(%key, error = %e, "state load failed, treating as absent");
                None
            }
        }
    }

    /// Read-before-write save. Transient faults restart from the read step;
    /// conflicts are reported as-is.
    pub async fn try_save(&self, state: &BotState, key: &str) -> Result<Revision, StoreError> {
        self.with_retry("save", key, move || async move {
            let prior = self.fetch_revision(key).await?;
            self.write(state, key, prior.as_ref()).await
        })
        .await
    }

    /// Baseline save: `true` only when the store accepted the write.
    pub async fn save(&self, state: &BotState, key: &str) -> bool {
        match self.try_save(state, key).await {
            Ok(rev) => {
                debug!(%key, sha = %rev.as_str(), "state saved");
                true
            }
            Err(e) => {
                warn!(%key, error = %e, "state save failed");
                false
            }
        }
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, key: &str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max = self.cfg.max_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match f().await {
                Err(e) if e.is_transient() && attempt < max => {
                    let delay = backoff_delay(self.cfg.backoff, attempt);
                    info!(op, %key, attempt, ?delay, error = %e, "store fault, retrying");
                    STORE_RETRIES.inc();
                    sleep(delay).await;
                }
                res => return res,
            }
        }
    }
}

fn decode(doc: &StoredDocument) -> Result<BotState, StoreError> {
    // GitHub memecah base64 per 60 karakter dengan '\n'
    let compact: String = doc.content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = BASE64.decode(compact)?;
    Ok(BotState::from_document(&bytes)?)
}

fn observe(
    op: &'static str,
    started: Instant,
    rsp: Result<Response, reqwest::Error>,
) -> Result<Response, StoreError> {
    STORE_LATENCY.observe(started.elapsed().as_secs_f64() * 1000.0);
    match rsp {
        Ok(r) => {
            let class = if r.status().is_success() {
                "ok"
            } else if r.status() == StatusCode::NOT_FOUND {
                "absent"
            } else {
                "http_error"
            };
            STORE_REQUESTS.with_label_values(&[op, class]).inc();
            Ok(r)
        }
        Err(e) => {
            STORE_REQUESTS.with_label_values(&[op, "transport_error"]).inc();
            Err(e.into())
        }
    }
}

async fn status_error(status: StatusCode, rsp: Response) -> StoreError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized(status),
        // 409: sha basi; 422: sha tidak dikirim padahal file sudah ada (create race)
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => StoreError::Conflict,
        _ => {
            let mut body = rsp.text().await.unwrap_or_default();
            body.truncate(200);
            StoreError::Status { status, body }
        }
    }
}

/// Exponential backoff + jitter, capped at 8s.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(5);
    let base_ms = (base.as_millis() as u64).saturating_mul(1u64 << shift).min(8_000);
    let jitter = rand::thread_rng().gen_range(0..=base_ms / 4);
    Duration::from_millis(base_ms + jitter)
}
