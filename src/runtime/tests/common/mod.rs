//! Shared fixtures for the pipeline tests: a signed-manifest builder, a
//! loopback registry endpoint, a scripted swarm backend and a recording
//! container engine.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use peerpull_core::error::Result;
use peerpull_runtime::engine::{ArchiveSource, ContainerEngine};
use peerpull_runtime::swarm::backend::{
    AddTorrentParams, SwarmAlert, SwarmBackend, TorrentHandle, TorrentState, TorrentStatus,
};
use peerpull_runtime::Credentials;

/// Build the raw bytes of a correctly signed v1 manifest. Each layer is
/// `(id, blob_sum)`, topmost first.
pub fn signed_manifest_bytes(name: &str, tag: &str, layers: &[(&str, &str)]) -> Vec<u8> {
    let fs_layers: Vec<serde_json::Value> = layers
        .iter()
        .map(|(_, blob)| serde_json::json!({ "blobSum": blob }))
        .collect();
    let history: Vec<serde_json::Value> = layers
        .iter()
        .enumerate()
        .map(|(i, (id, _))| {
            let compat = match layers.get(i + 1) {
                Some((parent, _)) => format!("{{\"id\":\"{id}\",\"parent\":\"{parent}\"}}"),
                None => format!("{{\"id\":\"{id}\"}}"),
            };
            serde_json::json!({ "v1Compatibility": compat })
        })
        .collect();

    let body = serde_json::to_string(&serde_json::json!({
        "schemaVersion": 1,
        "name": name,
        "tag": tag,
        "architecture": "amd64",
        "fsLayers": fs_layers,
        "history": history,
    }))
    .unwrap();

    let head = &body[..body.len() - 1];
    let protected = serde_json::json!({
        "formatLength": head.len(),
        "formatTail": URL_SAFE_NO_PAD.encode("}"),
        "time": "2016-03-01T00:00:00Z",
    });
    let signature = serde_json::json!({
        "header": { "alg": "ES256" },
        "signature": URL_SAFE_NO_PAD.encode("not-a-real-signature"),
        "protected": URL_SAFE_NO_PAD.encode(protected.to_string()),
    });

    format!("{head},\"signatures\":[{signature}]}}").into_bytes()
}

/// A loopback registry serving one manifest plus bencoded descriptors for
/// every `/c1/...` path, recording the request paths it sees.
pub struct TestRegistry {
    addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<String>>>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestRegistry {
    pub async fn serve(manifest: Vec<u8>) -> Self {
        use axum::body::Body;
        use axum::http::{Response, StatusCode, Uri};

        let requests: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        let app = axum::Router::new().fallback(move |uri: Uri| {
            let manifest = manifest.clone();
            let seen = Arc::clone(&seen);
            async move {
                let path = uri.path().to_string();
                seen.lock().unwrap().push(path.clone());

                if path.contains("/manifests/") {
                    return Response::builder()
                        .status(StatusCode::OK)
                        .body(Body::from(manifest))
                        .unwrap();
                }
                if path.starts_with("/c1/") {
                    // A minimal bencoded descriptor.
                    return Response::builder()
                        .status(StatusCode::OK)
                        .body(Body::from(&b"d4:infod4:name5:layeree"[..]))
                        .unwrap();
                }
                Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::empty())
                    .unwrap()
            }
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await;
        });

        Self {
            addr,
            requests,
            shutdown: Some(shutdown),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn request_paths(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for TestRegistry {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Scripted swarm backend: every added torrent finishes immediately and
/// its content file is written to the save path.
#[derive(Debug, Default)]
pub struct BackendState {
    next_handle: u64,
    pub added: Vec<AddTorrentParams>,
    pub removed: Vec<u64>,
    alerts: VecDeque<SwarmAlert>,
}

#[derive(Clone)]
pub struct ScriptedBackend {
    pub state: Arc<Mutex<BackendState>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState::default())),
        }
    }

    pub fn added_count(&self) -> usize {
        self.state.lock().unwrap().added.len()
    }
}

impl SwarmBackend for ScriptedBackend {
    fn apply_settings(&mut self, _config: &peerpull_runtime::SessionConfig) {}

    fn listen_on(&mut self, lower: u16, _upper: u16) -> Result<u16> {
        Ok(lower)
    }

    fn start_discovery(&mut self) {}

    fn stop_discovery(&mut self) {}

    fn add_torrent(&mut self, params: AddTorrentParams) -> Result<TorrentHandle> {
        let mut state = self.state.lock().unwrap();
        let raw = state.next_handle;
        state.next_handle += 1;

        // Materialize the "downloaded" content.
        std::fs::create_dir_all(&params.save_path).unwrap();
        std::fs::write(
            params.save_path.join(format!("content-{raw}")),
            format!("content of torrent {raw}"),
        )
        .unwrap();

        state.added.push(params);
        state.alerts.push_back(SwarmAlert::TorrentFinished {
            handle: TorrentHandle::from_raw(raw),
        });
        Ok(TorrentHandle::from_raw(raw))
    }

    fn remove_torrent(&mut self, handle: &TorrentHandle) {
        let mut state = self.state.lock().unwrap();
        let raw = (0..state.next_handle)
            .find(|raw| TorrentHandle::from_raw(*raw) == *handle)
            .unwrap_or(u64::MAX);
        state.removed.push(raw);
    }

    fn torrent_name(&self, handle: &TorrentHandle) -> Option<String> {
        let state = self.state.lock().unwrap();
        (0..state.next_handle)
            .find(|raw| TorrentHandle::from_raw(*raw) == *handle)
            .map(|raw| format!("content-{raw}"))
    }

    fn status(&self, handle: &TorrentHandle) -> Option<TorrentStatus> {
        self.torrent_name(handle).map(|name| TorrentStatus {
            name,
            state: TorrentState::Downloading,
            progress: 0.5,
            download_rate: 64.0,
            upload_rate: 16.0,
            num_peers: 2,
            num_seeds: 1,
        })
    }

    fn pop_alert(&mut self) -> Option<SwarmAlert> {
        self.state.lock().unwrap().alerts.pop_front()
    }
}

/// Container engine stub recording calls and captured archives.
pub struct RecordingEngine {
    present: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    archives: Mutex<Vec<Vec<u8>>>,
    archive_files: Mutex<Vec<PathBuf>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self {
            present: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            archives: Mutex::new(Vec::new()),
            archive_files: Mutex::new(Vec::new()),
        }
    }

    pub fn with_layers(self, ids: &[&str]) -> Self {
        {
            let mut present = self.present.lock().unwrap();
            for id in ids {
                present.insert(id.to_string());
            }
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn loaded_archives(&self) -> Vec<Vec<u8>> {
        self.archives.lock().unwrap().clone()
    }

    pub fn loaded_files(&self) -> Vec<PathBuf> {
        self.archive_files.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerEngine for RecordingEngine {
    async fn has_image(&self, id: &str) -> Result<bool> {
        Ok(self.present.lock().unwrap().contains(id))
    }

    async fn pull_image(&self, reference: &str, _auth: Option<&Credentials>) -> Result<()> {
        self.calls.lock().unwrap().push(format!("pull {reference}"));
        Ok(())
    }

    async fn tag_image(&self, source: &str, repository: &str, tag: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("tag {source} -> {repository}:{tag}"));
        Ok(())
    }

    async fn remove_image(&self, reference: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("remove {reference}"));
        Ok(())
    }

    async fn load_archive(&self, archive: ArchiveSource) -> Result<()> {
        let bytes = match archive {
            ArchiveSource::Buffer(bytes) => bytes.to_vec(),
            ArchiveSource::File(path) => {
                self.archive_files.lock().unwrap().push(path.clone());
                std::fs::read(path)?
            }
            ArchiveSource::Reader(mut reader) => {
                tokio::task::spawn_blocking(move || {
                    let mut bytes = Vec::new();
                    std::io::Read::read_to_end(&mut reader, &mut bytes)?;
                    Ok::<_, std::io::Error>(bytes)
                })
                .await
                .unwrap()?
            }
        };
        self.calls.lock().unwrap().push("load".to_string());
        self.archives.lock().unwrap().push(bytes);
        Ok(())
    }
}
