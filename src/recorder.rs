// ===============================
// src/recorder.rs
// ===============================
//
// JSONL recorder:
// - append setiap Event sebagai satu baris JSON
// - BufWriter + flush periodik tiap 1s dan tiap 1000 event
// - gagal tulis -> reopen file dan coba sekali lagi; gagal open tidak
//   mematikan task, dicoba ulang di event berikutnya
//
// Aktifkan lewat RECORD_FILE=/path/to/events.jsonl (lihat main.rs). File yang
// dihasilkan bisa dibaca balik oleh feed::load_ticks untuk simulator.
//
use std::io;
use std::path::Path;

use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

async fn open_writer(path: &str) -> io::Result<BufWriter<File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<File>, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    info!(%path, "recorder started");
    let mut writer = match open_writer(&path).await {
        Ok(w) => Some(w),
        Err(e) => {
            error!(?e, %path, "recorder open failed, retrying on next event");
            None
        }
    };

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => match maybe_ev {
                Some(ev) => {
                    let line = match serde_json::to_string(&ev) {
                        Ok(s) => s,
                        Err(e) => {
                            error!(?e, "recorder serialize error, skip event");
                            continue;
                        }
                    };

                    if writer.is_none() {
                        match open_writer(&path).await {
                            Ok(w) => writer = Some(w),
                            Err(e) => {
                                error!(?e, %path, "recorder reopen failed, drop event");
                                continue;
                            }
                        }
                    }
                    let Some(w) = writer.as_mut() else { continue };

                    if write_line(w, &line).await.is_err() {
                        error!("recorder write failed, attempting reopen");
                        writer = open_writer(&path).await.ok();
                        match writer.as_mut() {
                            Some(w) => {
                                if let Err(e) = write_line(w, &line).await {
                                    error!(?e, "recorder write failed after reopen, drop event");
                                    continue;
                                }
                            }
                            None => continue,
                        }
                    }

                    since_last_flush += 1;
                    if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                        if let Some(w) = writer.as_mut() {
                            let _ = w.flush().await;
                        }
                        since_last_flush = 0;
                    }
                }
                None => {
                    if let Some(w) = writer.as_mut() {
                        let _ = w.flush().await;
                    }
                    info!("recorder channel closed, stopped");
                    break;
                }
            },

            _ = tick.tick() => {
                if let Some(w) = writer.as_mut() {
                    let _ = w.flush().await;
                }
                since_last_flush = 0;
            }
        }
    }
}
