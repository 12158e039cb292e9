//! Per-torrent progress reporting.
//!
//! Terminal mode renders one percent bar per task, sampled every 250 ms.
//! When no terminal is available (or in debug mode, where alert logging
//! would fight the bars) the reporter falls back to one status line per
//! task every 30 seconds. The mode is chosen once at startup.

use std::collections::HashMap;
use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressStyle};

use crate::swarm::descriptor::TorrentDescriptor;
use crate::swarm::session::SwarmClient;
use crate::swarm::signal::Signal;

/// Sampling cadence in terminal mode.
const BAR_INTERVAL: Duration = Duration::from_millis(250);

/// Sampling cadence in log mode.
const LOG_INTERVAL: Duration = Duration::from_secs(30);

enum Mode {
    Bars {
        multi: MultiProgress,
        bars: HashMap<String, ProgressBar>,
    },
    Logs,
}

struct Inner {
    mode: Mode,
    titles: HashMap<String, String>,
    stop: StdMutex<Option<Signal>>,
}

/// Samples the swarm session and renders per-torrent progress.
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<Inner>,
}

impl ProgressReporter {
    /// Start reporting for the given torrents, sampling the session until
    /// `stop()`. Terminal mode requires a tty and no debug logging.
    pub fn start(
        client: Arc<SwarmClient>,
        torrents: &[TorrentDescriptor],
        debug: bool,
    ) -> Self {
        let mode = if debug || !std::io::stdout().is_terminal() {
            Mode::Logs
        } else {
            let multi = MultiProgress::new();
            let style = ProgressStyle::with_template("{prefix:<20} [{bar:40}] {percent:>3}%{msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            let mut bars = HashMap::new();
            for torrent in torrents {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(style.clone());
                bar.set_prefix(torrent.display_title().to_string());
                bar.set_message(" Initializing");
                bars.insert(torrent.id.clone(), bar);
            }
            Mode::Bars { multi, bars }
        };

        let titles = torrents
            .iter()
            .map(|t| (t.id.clone(), t.display_title().to_string()))
            .collect();

        let (stop, stop_handle) = Signal::new();
        let reporter = Self {
            inner: Arc::new(Inner {
                mode,
                titles,
                stop: StdMutex::new(Some(stop)),
            }),
        };

        let sampler = reporter.clone();
        let sampled: Vec<(String, String)> = torrents
            .iter()
            .map(|t| (t.id.clone(), t.url.clone()))
            .collect();
        let interval = match sampler.inner.mode {
            Mode::Bars { .. } => BAR_INTERVAL,
            Mode::Logs => LOG_INTERVAL,
        };
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_handle.wait() => return,
                    _ = tokio::time::sleep(interval) => {
                        for (id, url) in &sampled {
                            if let Ok(status) = client.status(url).await {
                                sampler.update(id, &status);
                            }
                        }
                    }
                }
            }
        });

        reporter
    }

    fn update(&self, id: &str, status: &crate::swarm::backend::TorrentStatus) {
        let rates = format!(
            " {} DL{}/s UL{}/s",
            status.state,
            HumanBytes((status.download_rate * 1024.0) as u64),
            HumanBytes((status.upload_rate * 1024.0) as u64),
        );
        match &self.inner.mode {
            Mode::Bars { bars, .. } => {
                if let Some(bar) = bars.get(id) {
                    bar.set_position((status.progress * 100.0) as u64);
                    bar.set_message(rates);
                }
            }
            Mode::Logs => {
                let title = self.inner.titles.get(id).map(String::as_str).unwrap_or(id);
                tracing::info!("Torrent {title}:{rates}");
            }
        }
    }

    /// Mark one task's row as completed.
    pub fn complete(&self, id: &str) {
        match &self.inner.mode {
            Mode::Bars { bars, .. } => {
                if let Some(bar) = bars.get(id) {
                    bar.set_position(100);
                    bar.finish_with_message(" Completed");
                }
            }
            Mode::Logs => tracing::info!("Completed download of layer {id}"),
        }
    }

    /// Note that a task entered its seeding window.
    pub fn seeding(&self, id: &str) {
        if let Mode::Logs = self.inner.mode {
            tracing::info!("Seeding layer {id}");
        }
    }

    /// Stop sampling and clear the bar pool so log output can resume.
    /// Idempotent.
    pub fn stop(&self) {
        let stop = self.inner.stop.lock().expect("reporter lock poisoned").take();
        if let Some(stop) = stop {
            stop.close();
        }
        if let Mode::Bars { multi, bars } = &self.inner.mode {
            for bar in bars.values() {
                if !bar.is_finished() {
                    bar.finish();
                }
            }
            let _ = multi.clear();
        }
    }
}
