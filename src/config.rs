// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : qflow_bot — Telegram status relay for a Bybit trading account
Module  : config.rs
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
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::domain::Environment;
use crate::store::StoreConfig;
use crate::telegram::TelegramConfig;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "qflow_bot", version, about = "Bot state relay: GitHub-backed state + Telegram status")]
pub struct Cli {
    /// Jalankan satu cycle, flush state, lalu keluar
    #[arg(long)]
    pub once: bool,

    /// Override CYCLE_INTERVAL_SECS
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Override METRICS_PORT
    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// File .env alternatif
    #[arg(long)]
    pub env_file: Option<PathBuf>,
}

/// Kebijakan reset counter harian (`daily_trades`, `today_trades`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DailyReset {
    /// Reset saat tanggal UTC berganti
    UtcMidnight,
    /// Tidak pernah reset (perilaku bot versi lama)
    Off,
}

impl DailyReset {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "utc_midnight" | "utc" | "midnight" => Some(DailyReset::UtcMidnight),
            "off" | "never" | "none" => Some(DailyReset::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub environment: Environment,
    pub store: StoreConfig,
    pub telegram: Option<TelegramConfig>,
    pub cycle_interval: Duration,
    pub daily_reset: DailyReset,
    pub metrics_port: u16,
    pub record_file: Option<String>,
}

pub fn load(cli: &Cli) -> Result<Settings, ConfigError> {
    // Pastikan .env dibaca (GITHUB_TOKEN, TELEGRAM_*, dll)
    match &cli.env_file {
        Some(path) => {
            let _ = dotenvy::from_path(path);
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }
    from_lookup(|k| env::var(k).ok(), cli)
}

/// Bangun Settings dari sumber variabel apa pun (env proses, map di test).
pub fn from_lookup<F>(lookup: F, cli: &Cli) -> Result<Settings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let num = |k: &str, default: u64| get(k).and_then(|s| s.parse::<u64>().ok()).unwrap_or(default);

    // ===== Environment =====
    // Selain nilai "false" yang eksplisit, tetap di testnet.
    let use_testnet = match get("USE_TESTNET").map(|s| s.to_ascii_lowercase()) {
        Some(v) => !matches!(v.as_str(), "false" | "0" | "no"),
        None => true,
    };
    let environment = Environment::from_testnet_flag(use_testnet);

    // ===== State store (GitHub contents) =====
    let token = get("GITHUB_TOKEN").ok_or(ConfigError::Missing("GITHUB_TOKEN"))?;
    let repo = get("STATE_REPO").ok_or(ConfigError::Missing("STATE_REPO"))?;
    if repo.split('/').filter(|p| !p.is_empty()).count() != 2 {
        return Err(ConfigError::Invalid { key: "STATE_REPO", value: repo });
    }

    let store = StoreConfig {
        api_url: get("GITHUB_API_URL").unwrap_or_else(|| "https://api.github.com".to_string()),
        repo,
        branch: get("STATE_BRANCH").unwrap_or_else(|| "data".to_string()),
        dir: get("STATE_DIR").unwrap_or_else(|| "data".to_string()),
        token,
        timeout: Duration::from_secs(num("STORE_TIMEOUT_SECS", 5).max(1)),
        max_attempts: num("STORE_MAX_ATTEMPTS", 3).clamp(1, 10) as u32,
        backoff: Duration::from_millis(num("STORE_BACKOFF_MS", 250)),
    };

    // ===== Telegram (opsional: butuh token + chat id) =====
    let telegram = match (get("TELEGRAM_BOT_TOKEN"), get("TELEGRAM_CHAT_ID")) {
        (Some(bot_token), Some(chat)) => {
            let chat_id = chat
                .parse::<i64>()
                .map_err(|_| ConfigError::Invalid { key: "TELEGRAM_CHAT_ID", value: chat.clone() })?;
            Some(TelegramConfig {
                api_url: get("TELEGRAM_API_URL").unwrap_or_else(|| "https://api.telegram.org".to_string()),
                bot_token,
                chat_id,
                poll_timeout: Duration::from_secs(num("TELEGRAM_POLL_SECS", 25)),
            })
        }
        _ => None,
    };

    // ===== Cycle =====
    let cycle_secs = cli.interval_secs.unwrap_or_else(|| num("CYCLE_INTERVAL_SECS", 300)).max(1);
    let daily_reset = match get("DAILY_RESET") {
        Some(v) => DailyReset::parse(&v).ok_or(ConfigError::Invalid { key: "DAILY_RESET", value: v })?,
        None => DailyReset::UtcMidnight,
    };

    let metrics_port = cli
        .metrics_port
        .or_else(|| get("METRICS_PORT").and_then(|s| s.parse().ok()))
        .unwrap_or(9898);

    Ok(Settings {
        environment,
        store,
        telegram,
        cycle_interval: Duration::from_secs(cycle_secs),
        daily_reset,
        metrics_port,
        record_file: get("RECORD_FILE"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let m = vars(pairs);
        from_lookup(|k| m.get(k).cloned(), &Cli::default())
    }

    #[test]
    fn defaults_apply_when_only_required_vars_set() {
        let s = settings(&[("GITHUB_TOKEN", "ghp_x"), ("STATE_REPO", "acme/bot-state")]).unwrap();
        assert_eq!(s.environment, Environment::Testnet);
        assert_eq!(s.store.api_url, "https://api.github.com");
        assert_eq!(s.store.branch, "data");
        assert_eq!(s.store.dir, "data");
        assert_eq!(s.store.timeout, Duration::from_secs(5));
        assert_eq!(s.store.max_attempts, 3);
        assert_eq!(s.cycle_interval, Duration::from_secs(300));
        assert_eq!(s.daily_reset, DailyReset::UtcMidnight);
        assert_eq!(s.metrics_port, 9898);
        assert!(s.telegram.is_none());
        assert!(s.record_file.is_none());
    }

    #[test]
    fn missing_token_is_an_error() {
        let err = settings(&[("STATE_REPO", "acme/bot-state")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("GITHUB_TOKEN"));
    }

    #[test]
    fn repo_must_be_owner_slash_name() {
        let err = settings(&[("GITHUB_TOKEN", "t"), ("STATE_REPO", "bot-state")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "STATE_REPO", .. }));
    }

    #[test]
    fn mainnet_and_telegram_are_picked_up() {
        let s = settings(&[
            ("GITHUB_TOKEN", "t"),
            ("STATE_REPO", "acme/bot-state"),
            ("USE_TESTNET", "False"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_ID", "-100200300"),
            ("DAILY_RESET", "off"),
        ])
        .unwrap();
        assert_eq!(s.environment, Environment::Mainnet);
        assert_eq!(s.daily_reset, DailyReset::Off);
        let tg = s.telegram.expect("telegram enabled");
        assert_eq!(tg.chat_id, -100200300);
        assert_eq!(tg.api_url, "https://api.telegram.org");
    }

    #[test]
    fn bad_chat_id_is_rejected() {
        let err = settings(&[
            ("GITHUB_TOKEN", "t"),
            ("STATE_REPO", "acme/bot-state"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_ID", "@channel"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TELEGRAM_CHAT_ID", .. }));
    }

    #[test]
    fn cli_overrides_env() {
        let m = vars(&[
            ("GITHUB_TOKEN", "t"),
            ("STATE_REPO", "acme/bot-state"),
            ("CYCLE_INTERVAL_SECS", "60"),
        ]);
        let cli = Cli { interval_secs: Some(5), metrics_port: Some(9100), ..Cli::default() };
        let s = from_lookup(|k| m.get(k).cloned(), &cli).unwrap();
        assert_eq!(s.cycle_interval, Duration::from_secs(5));
        assert_eq!(s.metrics_port, 9100);
    }
}
