//! The embedded swarm session.
//!
//! At most one `SwarmClient` exists per process. It owns the native
//! backend, the map of active torrents keyed by descriptor URL, and the
//! alert-consumer task. The native library is single-threaded: every call
//! into it happens under the session lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use peerpull_core::error::{PullError, Result};
use tokio::sync::Mutex;

use super::backend::{
    AddTorrentParams, SessionConfig, SwarmAlert, SwarmBackend, TorrentHandle, TorrentSource,
    TorrentStatus, ALERT_POLL_INTERVAL,
};
use super::descriptor::{fetch_descriptor, normalize_descriptor, DescriptorOptions};
use super::signal::{Signal, SignalHandle};

/// Session lifecycle; transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    New,
    Running,
    Stopped,
}

/// One active torrent.
struct TorrentEntry {
    handle: TorrentHandle,
    downloaded: Option<Signal>,
    /// Held here for seed-forever tasks so `stop()` releases them.
    release: Option<Signal>,
}

struct SessionInner {
    /// The native session; dropped on stop to destroy it.
    backend: Option<Box<dyn SwarmBackend>>,
    /// Active torrents keyed by descriptor URL.
    torrents: HashMap<String, TorrentEntry>,
    state: SessionState,
}

/// The embedded swarm client.
pub struct SwarmClient {
    inner: Mutex<SessionInner>,
    /// Fast-path view of the running state for the alert loop and
    /// download admission; authoritative transitions happen under the lock.
    running: AtomicBool,
    config: SessionConfig,
    descriptor_options: DescriptorOptions,
    http: reqwest::Client,
}

impl SwarmClient {
    /// Create a client over the given backend. The session is not started.
    pub fn new(
        backend: Box<dyn SwarmBackend>,
        config: SessionConfig,
        descriptor_options: DescriptorOptions,
    ) -> Result<Arc<Self>> {
        config.fingerprint.validate()?;
        Ok(Arc::new(Self {
            inner: Mutex::new(SessionInner {
                backend: Some(backend),
                torrents: HashMap::new(),
                state: SessionState::New,
            }),
            running: AtomicBool::new(false),
            config,
            descriptor_options,
            http: reqwest::Client::new(),
        }))
    }

    /// Whether the session is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The configuration this session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start the session: apply settings, bind a listen port, start
    /// discovery services and launch the alert consumer.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::New {
            return Err(PullError::other("swarm session was already started"));
        }

        let backend = inner
            .backend
            .as_mut()
            .ok_or_else(|| PullError::other("swarm session has no backend"))?;

        backend.apply_settings(&self.config);

        let (lower, upper) = (self.config.lower_listen_port, self.config.upper_listen_port);
        let port = backend
            .listen_on(lower, upper)
            .map_err(|e| PullError::BindFailed {
                lower,
                upper,
                message: e.to_string(),
            })?;
        backend.start_discovery();

        inner.state = SessionState::Running;
        self.running.store(true, Ordering::SeqCst);
        drop(inner);

        self.spawn_alert_consumer();
        tracing::info!(port, "Swarm session listening");
        Ok(())
    }

    /// Stop the session: remove every active torrent, stop discovery and
    /// destroy the native session. Idempotent; all blocked tasks observe
    /// their signals released.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Stopped {
            return;
        }
        inner.state = SessionState::Stopped;

        let SessionInner {
            backend, torrents, ..
        } = &mut *inner;
        if let Some(backend) = backend.as_mut() {
            for (_, entry) in torrents.drain() {
                backend.remove_torrent(&entry.handle);
                if let Some(release) = entry.release {
                    release.close();
                }
            }
            backend.stop_discovery();
        }
        // Destroying the backend drops any remaining task signals.
        *backend = None;

        tracing::info!("Swarm session stopped");
    }

    /// Download one torrent, blocking until its content is complete.
    ///
    /// Seeding after completion is controlled by `seed_window`:
    /// - `None`: no seeding, the torrent is removed right away and the
    ///   release signal is closed before returning.
    /// - `Some(d)` with `d > 0`: the torrent seeds for `d`, then is
    ///   removed and the release signal closed.
    /// - `Some(0)`: the torrent seeds until `stop()`.
    ///
    /// Returns the downloaded file path and the release signal.
    pub async fn download(
        self: &Arc<Self>,
        source_url: &str,
        save_dir: &Path,
        seed_window: Option<Duration>,
    ) -> Result<(PathBuf, SignalHandle)> {
        if !self.is_running() {
            return Err(PullError::NotRunning);
        }

        // Fail fast on duplicates before any network work.
        {
            let inner = self.inner.lock().await;
            if inner.torrents.contains_key(source_url) {
                return Err(PullError::Duplicate(source_url.to_string()));
            }
        }

        // The native library cannot use web seeds when handed a URL, so
        // http(s) descriptors are fetched to a temporary file first. The
        // file is removed when `_descriptor_file` drops, on every path.
        let mut descriptor_file = None;
        let source = if source_url.starts_with("http://") || source_url.starts_with("https://") {
            let file = fetch_descriptor(&self.http, source_url).await?;
            normalize_descriptor(file.path(), &self.descriptor_options)?;
            let path = file.path().to_path_buf();
            descriptor_file = Some(file);
            TorrentSource::DescriptorFile(path)
        } else {
            TorrentSource::Magnet(source_url.to_string())
        };

        let params = AddTorrentParams {
            source,
            save_path: save_dir.to_path_buf(),
            auto_managed: false,
        };

        // Add under the lock; the map insert and the native add are one
        // critical section so alerts can always be matched to an entry.
        let (handle, downloaded) = {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Running {
                return Err(PullError::NotRunning);
            }
            if inner.torrents.contains_key(source_url) {
                return Err(PullError::Duplicate(source_url.to_string()));
            }

            let backend = inner.backend.as_mut().ok_or(PullError::NotRunning)?;
            let handle = match backend.add_torrent(params) {
                Ok(handle) => handle,
                Err(PullError::AddFailed(message)) => return Err(PullError::AddFailed(message)),
                Err(e) => return Err(PullError::AddFailed(e.to_string())),
            };

            let (signal, signal_handle) = Signal::new();
            inner.torrents.insert(
                source_url.to_string(),
                TorrentEntry {
                    handle: handle.clone(),
                    downloaded: Some(signal),
                    release: None,
                },
            );
            (handle, signal_handle)
        };
        drop(descriptor_file);

        // Block until the alert consumer marks the torrent finished.
        downloaded.wait().await;
        if !self.is_running() {
            return Err(PullError::DownloadAborted(
                "session stopped while downloading".to_string(),
            ));
        }

        let name = {
            let inner = self.inner.lock().await;
            let backend = inner.backend.as_ref().ok_or(PullError::NotRunning)?;
            backend.torrent_name(&handle).ok_or_else(|| {
                PullError::DownloadAborted("torrent has no content name".to_string())
            })?
        };
        let file_path = save_dir.join(name);

        let (release, release_handle) = Signal::new();
        match seed_window {
            None => {
                self.remove_torrent(source_url).await;
                release.close();
            }
            Some(window) if !window.is_zero() => {
                let client = Arc::clone(self);
                let url = source_url.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(window).await;
                    client.remove_torrent(&url).await;
                    release.close();
                });
            }
            Some(_) => {
                // Seed until stop(); park the signal in the entry so stop
                // closes it.
                let mut inner = self.inner.lock().await;
                if let Some(entry) = inner.torrents.get_mut(source_url) {
                    entry.release = Some(release);
                } else {
                    // Stopped in the meantime.
                    release.close();
                }
            }
        }

        Ok((file_path, release_handle))
    }

    /// Status snapshot for an active torrent, by descriptor URL.
    pub async fn status(&self, source_url: &str) -> Result<TorrentStatus> {
        let inner = self.inner.lock().await;
        let entry = inner
            .torrents
            .get(source_url)
            .ok_or_else(|| PullError::other("torrent not found"))?;
        let backend = inner.backend.as_ref().ok_or(PullError::NotRunning)?;
        backend
            .status(&entry.handle)
            .ok_or_else(|| PullError::other("torrent has no status"))
    }

    /// Remove one torrent from the session and the task map.
    async fn remove_torrent(&self, source_url: &str) {
        let mut inner = self.inner.lock().await;
        let SessionInner {
            backend, torrents, ..
        } = &mut *inner;
        if let Some(entry) = torrents.remove(source_url) {
            if let Some(backend) = backend.as_mut() {
                backend.remove_torrent(&entry.handle);
            }
        }
    }

    /// Poll the native alert queue on a fixed cadence, marking torrents
    /// finished. Runs until the session stops.
    fn spawn_alert_consumer(self: &Arc<Self>) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            while client.running.load(Ordering::SeqCst) {
                client.drain_alerts().await;
                tokio::time::sleep(ALERT_POLL_INTERVAL).await;
            }
        });
    }

    async fn drain_alerts(&self) {
        let mut inner = self.inner.lock().await;
        let SessionInner {
            backend, torrents, ..
        } = &mut *inner;
        let backend = match backend.as_mut() {
            Some(backend) => backend,
            None => return,
        };

        while let Some(alert) = backend.pop_alert() {
            match alert {
                SwarmAlert::TorrentFinished { handle } => {
                    // Handles expose equality only; scan for the owner.
                    let entry = torrents.values_mut().find(|entry| entry.handle == handle);
                    match entry {
                        Some(entry) => {
                            if let Some(signal) = entry.downloaded.take() {
                                signal.close();
                            }
                        }
                        None => tracing::warn!(?handle, "Unknown torrent finished"),
                    }
                }
                SwarmAlert::Message { what, message } => {
                    if self.config.debug {
                        tracing::debug!("swarm: {what}: {message}");
                    }
                }
            }
        }
    }
}
