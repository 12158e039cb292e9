//! Batch download fan-out.
//!
//! `download_torrents` spawns one task per descriptor and returns a
//! handle exposing per-task *downloaded* signals, per-task *completed*
//! signals, an aggregate *finished* signal and the id → file-path map.
//!
//! Ordering guarantees: within a task, the file path is stored before
//! *downloaded* closes, and *downloaded* closes strictly before
//! *completed*. The aggregate *finished* signal closes only after every
//! task's *completed* signal, with the session stopped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use peerpull_core::error::PullError;
use tokio::sync::RwLock;

use super::descriptor::TorrentDescriptor;
use super::session::SwarmClient;
use super::signal::{Signal, SignalHandle};
use crate::progress::ProgressReporter;

/// Options for one batch of torrent downloads.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Directory torrents are downloaded into.
    pub save_dir: PathBuf,
    /// Seeding after download: `None` no seeding, `Some(0)` until stop,
    /// `Some(d)` for the window `d`.
    pub seed_window: Option<Duration>,
    /// Install the process-termination handler that stops the session
    /// cleanly and exits.
    pub handle_signals: bool,
}

/// Handle over an in-flight batch of torrent downloads.
pub struct DownloadHandle {
    downloaded: HashMap<String, SignalHandle>,
    completed: HashMap<String, SignalHandle>,
    finished: SignalHandle,
    paths: Arc<RwLock<HashMap<String, PathBuf>>>,
    error: Arc<StdMutex<Option<PullError>>>,
    /// The batch's progress reporter; stop it before emitting log output.
    pub reporter: ProgressReporter,
}

impl DownloadHandle {
    /// Signal closed once the task's content is fully downloaded.
    pub fn downloaded(&self, id: &str) -> Option<SignalHandle> {
        self.downloaded.get(id).cloned()
    }

    /// Signal closed once the task has also finished seeding.
    pub fn completed(&self, id: &str) -> Option<SignalHandle> {
        self.completed.get(id).cloned()
    }

    /// Signal closed after every task completed and the session stopped.
    pub fn finished(&self) -> SignalHandle {
        self.finished.clone()
    }

    /// Downloaded file path for a task; set before its *downloaded*
    /// signal closes.
    pub async fn path(&self, id: &str) -> Option<PathBuf> {
        self.paths.read().await.get(id).cloned()
    }

    /// The first unrecoverable per-task failure, if any.
    pub fn take_error(&self) -> Option<PullError> {
        self.error.lock().expect("batch error lock poisoned").take()
    }
}

/// Start downloading all the given torrents, with optional seeding.
/// Returns immediately; await the handle's signals for progress.
///
/// Any per-task failure stops the whole batch: the session is shut down,
/// remaining tasks observe their signals released, and the error is
/// surfaced through the handle.
pub fn download_torrents(
    client: Arc<SwarmClient>,
    torrents: &[TorrentDescriptor],
    options: BatchOptions,
) -> DownloadHandle {
    let paths: Arc<RwLock<HashMap<String, PathBuf>>> = Arc::new(RwLock::new(HashMap::new()));
    let error: Arc<StdMutex<Option<PullError>>> = Arc::new(StdMutex::new(None));

    let reporter = ProgressReporter::start(Arc::clone(&client), torrents, client.config().debug);

    if options.handle_signals {
        spawn_shutdown_handler(Arc::clone(&client), reporter.clone());
    }

    let mut downloaded_handles = HashMap::new();
    let mut completed_handles = HashMap::new();
    let mut completed_waits = Vec::new();

    for torrent in torrents {
        let (downloaded, downloaded_handle) = Signal::new();
        let (completed, completed_handle) = Signal::new();
        downloaded_handles.insert(torrent.id.clone(), downloaded_handle);
        completed_handles.insert(torrent.id.clone(), completed_handle.clone());
        completed_waits.push(completed_handle);

        let client = Arc::clone(&client);
        let reporter = reporter.clone();
        let paths = Arc::clone(&paths);
        let error = Arc::clone(&error);
        let torrent = torrent.clone();
        let save_dir = options.save_dir.clone();
        let seed_window = options.seed_window;

        tokio::spawn(async move {
            match client.download(&torrent.url, &save_dir, seed_window).await {
                Ok((path, release)) => {
                    paths.write().await.insert(torrent.id.clone(), path);
                    reporter.complete(&torrent.id);
                    downloaded.close();

                    if seed_window.is_some() {
                        reporter.seeding(&torrent.id);
                        release.wait().await;
                    }

                    completed.close();
                }
                Err(e) => {
                    tracing::error!("Download of {} failed: {e}", torrent.id);
                    error
                        .lock()
                        .expect("batch error lock poisoned")
                        .get_or_insert(e);
                    reporter.stop();
                    client.stop().await;
                    // Dropping the task's signals releases any waiters.
                }
            }
        });
    }

    // Aggregate waiter: all tasks complete, then the session stops.
    let (finished, finished_handle) = Signal::new();
    {
        let client = Arc::clone(&client);
        let reporter = reporter.clone();
        tokio::spawn(async move {
            for completed in completed_waits {
                completed.wait().await;
            }
            reporter.stop();
            client.stop().await;
            finished.close();
        });
    }

    DownloadHandle {
        downloaded: downloaded_handles,
        completed: completed_handles,
        finished: finished_handle,
        paths,
        error,
        reporter,
    }
}

/// Stop the session cleanly and exit on SIGINT/SIGTERM.
fn spawn_shutdown_handler(client: Arc<SwarmClient>, reporter: ProgressReporter) {
    tokio::spawn(async move {
        wait_for_termination().await;

        reporter.stop();
        client.stop().await;
        tracing::info!("Received signal and cleanly shut down");
        std::process::exit(0);
    });
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
