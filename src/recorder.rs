// ===============================
// src/recorder.rs (JSONL journal of session events)
// ===============================
/*
=============================================================================
Project : qflow_bot — Telegram status relay for a Bybit trading account
Module  : recorder.rs
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
use std::path::Path;

use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

async fn open_writer(path: &str) -> std::io::Result<BufWriter<fs::File>> {
    // Pastikan parent directory ada (kalau ada)
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<fs::File>, ev: &Event) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(ev)?;
    line.push(b'\n');
    writer.write_all(&line).await
}

/// Drain journal events into `path` until every sender is dropped.
/// Flushes once per second; journal entries are small and few per cycle.
pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(?e, %path, "recorder: open failed, journal disabled");
            // tetap kuras channel supaya pengirim tidak penuh
            while rx.recv().await.is_some() {}
            return;
        }
    };
    info!(%path, "recorder: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => match maybe_ev {
                Some(ev) => {
                    if let Err(e) = write_line(&mut writer, &ev).await {
                        error!(?e, "recorder: write failed, reopening");
                        match open_writer(&path).await {
                            Ok(w) => {
                                writer = w;
                                if let Err(e2) = write_line(&mut writer, &ev).await {
                                    error!(?e2, "recorder: write failed again after reopen, drop event");
                                }
                            }
                            Err(e2) => error!(?e2, "recorder: reopen failed, drop event"),
                        }
                    }
                }
                None => {
                    let _ = writer.flush().await;
                    info!("recorder: channel closed, stopped");
                    break;
                }
            },
            _ = tick.tick() => {
                let _ = writer.flush().await;
            }
        }
    }
}
