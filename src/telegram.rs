// ===============================
// src/telegram.rs (notifications + command polling)
// ===============================
/*
=============================================================================
Project : qflow_bot — Telegram status relay for a Bybit trading account
Module  : telegram.rs
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
use std::time::Duration;

use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::watch, time::sleep};
use tracing::{debug, error, info, warn};

use crate::commands::{self, Command};
use crate::domain::{BotState, Environment};
use crate::metrics::{COMMANDS, NOTIFICATIONS};

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub api_url: String,
    pub bot_token: String,
    /// Satu-satunya chat yang boleh menerima notifikasi & memberi perintah
    pub chat_id: i64,
    /// Long-poll timeout untuk getUpdates
    pub poll_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("telegram api error ({status}): {description}")]
    Api { status: u16, description: String },
}

// ---- Minimal Bot API models ----
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    cfg: TelegramConfig,
}

impl TelegramClient {
    pub fn new(cfg: TelegramConfig) -> Result<Self, TelegramError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("qflow_bot/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { http, cfg })
    }

    pub fn chat_id(&self) -> i64 { self.cfg.chat_id }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.cfg.api_url.trim_end_matches('/'), self.cfg.bot_token, method)
    }

    async fn unwrap_api<T: DeserializeOwned>(rsp: reqwest::Response) -> Result<Option<T>, TelegramError> {
        let status = rsp.status().as_u16();
        let body = rsp.json::<ApiResponse<T>>().await?;
        if !body.ok {
            return Err(TelegramError::Api {
                status,
                description: body.description.unwrap_or_default(),
            });
        }
        Ok(body.result)
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let rsp = self
            .http
            .post(self.method_url("sendMessage"))
            .timeout(Duration::from_secs(10))
            .json(&SendMessage { chat_id, text, parse_mode: "Markdown" })
            .send()
            .await?;
        Self::unwrap_api::<serde_json::Value>(rsp).await?;
        Ok(())
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TelegramError> {
        let poll = self.cfg.poll_timeout.as_secs();
        let rsp = self
            .http
            .get(self.method_url("getUpdates"))
            .query(&[("offset", offset.to_string()), ("timeout", poll.to_string())])
            // request timeout harus lebih lama dari long-poll
            .timeout(Duration::from_secs(poll + 10))
            .send()
            .await?;
        Ok(Self::unwrap_api::<Vec<Update>>(rsp).await?.unwrap_or_default())
    }
}

/// Outgoing notifications with the environment prefix. Without a Telegram
/// client the messages only go to the log.
#[derive(Clone)]
pub struct Notifier {
    client: Option<TelegramClient>,
    environment: Environment,
}

impl Notifier {
    pub fn new(client: Option<TelegramClient>, environment: Environment) -> Self {
        Self { client, environment }
    }

    pub fn disabled(environment: Environment) -> Self { Self::new(None, environment) }

    pub async fn notify(&self, text: &str) {
        let Some(client) = &self.client else {
            info!(message = %text, "notify (telegram disabled)");
            return;
        };
        let full = format!("{}{}", self.environment.message_prefix(), text);
        match client.send_message(client.chat_id(), &full).await {
            Ok(()) => NOTIFICATIONS.with_label_values(&["ok"]).inc(),
            Err(e) => {
                NOTIFICATIONS.with_label_values(&["error"]).inc();
                error!(error = %e, "failed to send telegram message");
            }
        }
    }
}

/// Answer every command in `updates` addressed from the configured chat.
/// Returns the next getUpdates offset.
pub async fn dispatch(client: &TelegramClient, updates: &[Update], state: &BotState, offset: i64) -> i64 {
    let mut next = offset;
    for up in updates {
        next = next.max(up.update_id + 1);
        let Some(msg) = &up.message else { continue };
        if msg.chat.id != client.chat_id() {
            debug!(chat_id = msg.chat.id, "ignoring update from foreign chat");
            continue;
        }
        let Some(text) = msg.text.as_deref() else { continue };
        let reply = match Command::parse(text) {
            Some(cmd) => {
                COMMANDS.with_label_values(&[cmd.name()]).inc();
                commands::render(cmd, state, Utc::now())
            }
            None if text.trim_start().starts_with('/') => commands::unknown_reply(),
            None => continue,
        };
        if let Err(e) = client.send_message(msg.chat.id, &reply).await {
            warn!(error = %e, "failed to answer command");
        }
    }
    next
}

/// Long-poll loop; reads only the published state snapshot.
pub async fn run_poller(
    client: TelegramClient,
    snapshot: watch::Receiver<BotState>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("telegram: command poller started");
    let mut offset: i64 = 0;
    loop {
        tokio::select! {
            res = client.get_updates(offset) => match res {
                Ok(updates) => {
                    let state = snapshot.borrow().clone();
                    offset = dispatch(&client, &updates, &state, offset).await;
                }
                Err(e) => {
                    warn!(error = %e, "telegram: getUpdates failed, backing off");
                    tokio::select! {
                        _ = sleep(Duration::from_secs(5)) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            },
            _ = shutdown.changed() => break,
        }
    }
    info!("telegram: command poller stopped");
}
