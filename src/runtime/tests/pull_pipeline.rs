//! End-to-end pipeline tests over a scripted backend, a recording engine
//! and a loopback registry.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use peerpull_core::error::PullError;
use peerpull_runtime::distribution::credentials::CredentialStore;
use peerpull_runtime::pull::{LoadOption, PullOptions};
use peerpull_runtime::swarm::DescriptorOptions;
use peerpull_runtime::{LayerSelection, Puller, Resolver, SessionConfig, SwarmClient};

use common::{signed_manifest_bytes, RecordingEngine, ScriptedBackend, TestRegistry};

fn test_client(backend: ScriptedBackend) -> Arc<SwarmClient> {
    SwarmClient::new(
        Box::new(backend),
        SessionConfig {
            // Log-mode progress keeps test output clean.
            debug: true,
            ..SessionConfig::default()
        },
        DescriptorOptions::default(),
    )
    .unwrap()
}

fn test_puller(engine: Arc<RecordingEngine>, client: Arc<SwarmClient>) -> Puller {
    // An empty credential store keeps the host environment out of tests.
    let resolver =
        Resolver::with_credential_store(CredentialStore::at_path(PathBuf::from("/nonexistent")));
    Puller::with_resolver(engine, client, resolver)
}

fn test_options(save_dir: PathBuf) -> PullOptions {
    PullOptions {
        insecure: true,
        save_dir,
        shim_addr: "127.0.0.1:0".to_string(),
        handle_signals: false,
        ..PullOptions::default()
    }
}

#[tokio::test]
async fn test_basic_pull() {
    let manifest = signed_manifest_bytes(
        "ns/img",
        "v1",
        &[("id0", "sha256:b1"), ("id1", "sha256:b2")],
    );
    let registry = TestRegistry::serve(manifest).await;
    let image = format!("{}/ns/img:v1", registry.addr());

    let backend = ScriptedBackend::new();
    let client = test_client(backend.clone());
    let engine = Arc::new(RecordingEngine::new());
    let puller = test_puller(Arc::clone(&engine), client);

    let save_dir = tempfile::tempdir().unwrap();
    puller
        .pull(&image, &test_options(save_dir.path().to_path_buf()))
        .await
        .unwrap();

    // Two parallel downloads, one per blob.
    assert_eq!(backend.added_count(), 2);
    let requests = registry.request_paths();
    assert!(requests.contains(&"/c1/torrent/ns/img/blobs/sha256:b1".to_string()));
    assert!(requests.contains(&"/c1/torrent/ns/img/blobs/sha256:b2".to_string()));

    // The engine pulled from the shim, then the image was re-tagged and
    // the temporary tag removed.
    let calls = engine.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[0].starts_with("pull localhost:"));
    assert!(calls[0].ends_with("/ns/img:v1"));
    assert!(calls[1].contains(&format!("-> {}/ns/img:v1", registry.addr())));
    assert!(calls[2].starts_with("remove localhost:"));
}

#[tokio::test]
async fn test_partial_pull_downloads_only_missing_blobs() {
    let manifest = signed_manifest_bytes(
        "ns/img",
        "v1",
        &[("id0", "sha256:b1"), ("id1", "sha256:b2")],
    );
    let registry = TestRegistry::serve(manifest).await;
    let image = format!("{}/ns/img:v1", registry.addr());

    let backend = ScriptedBackend::new();
    let client = test_client(backend.clone());
    let engine = Arc::new(RecordingEngine::new().with_layers(&["id1"]));
    let puller = test_puller(Arc::clone(&engine), client);

    let save_dir = tempfile::tempdir().unwrap();
    puller
        .pull(&image, &test_options(save_dir.path().to_path_buf()))
        .await
        .unwrap();

    // Only the missing top layer was downloaded.
    assert_eq!(backend.added_count(), 1);
    let requests = registry.request_paths();
    assert!(requests.contains(&"/c1/torrent/ns/img/blobs/sha256:b1".to_string()));
    assert!(!requests.contains(&"/c1/torrent/ns/img/blobs/sha256:b2".to_string()));
}

#[tokio::test]
async fn test_pull_with_everything_present_is_a_noop() {
    let manifest = signed_manifest_bytes(
        "ns/img",
        "v1",
        &[("id0", "sha256:b1"), ("id1", "sha256:b2")],
    );
    let registry = TestRegistry::serve(manifest).await;
    let image = format!("{}/ns/img:v1", registry.addr());

    let backend = ScriptedBackend::new();
    let client = test_client(backend.clone());
    let engine = Arc::new(RecordingEngine::new().with_layers(&["id0", "id1"]));
    let puller = test_puller(Arc::clone(&engine), client);

    let save_dir = tempfile::tempdir().unwrap();
    puller
        .pull(&image, &test_options(save_dir.path().to_path_buf()))
        .await
        .unwrap();

    assert_eq!(backend.added_count(), 0);
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_squashed_pull() {
    let manifest = signed_manifest_bytes("ns/img", "v1", &[("id0", "sha256:b1")]);
    let registry = TestRegistry::serve(manifest).await;
    let image = format!("{}/ns/img:v1", registry.addr());

    let backend = ScriptedBackend::new();
    let client = test_client(backend.clone());
    let engine = Arc::new(RecordingEngine::new());
    let puller = test_puller(Arc::clone(&engine), client);

    let save_dir = tempfile::tempdir().unwrap();
    let options = PullOptions {
        squashed: true,
        ..test_options(save_dir.path().to_path_buf())
    };
    puller.pull(&image, &options).await.unwrap();

    // Exactly one descriptor, fetched from the squash endpoint.
    assert_eq!(backend.added_count(), 1);
    assert!(registry
        .request_paths()
        .contains(&"/c1/squash/ns/img/v1".to_string()));

    // The downloaded file went to the engine's load endpoint unchanged.
    assert_eq!(engine.calls(), vec!["load"]);
    assert_eq!(engine.loaded_archives()[0], b"content of torrent 0");
    assert_eq!(
        engine.loaded_files(),
        vec![save_dir.path().join("content-0")]
    );
}

#[tokio::test]
async fn test_duplicate_fingerprints_collapse_to_one_download() {
    let manifest = signed_manifest_bytes(
        "ns/img",
        "v1",
        &[("id0", "sha256:same"), ("id1", "sha256:same")],
    );
    let registry = TestRegistry::serve(manifest).await;
    let image = format!("{}/ns/img:v1", registry.addr());

    let backend = ScriptedBackend::new();
    let client = test_client(backend.clone());
    let engine = Arc::new(RecordingEngine::new());
    let puller = test_puller(Arc::clone(&engine), client);

    let save_dir = tempfile::tempdir().unwrap();
    puller
        .pull(&image, &test_options(save_dir.path().to_path_buf()))
        .await
        .unwrap();

    assert_eq!(backend.added_count(), 1);
}

#[tokio::test]
async fn test_seed_window_defers_completion() {
    let manifest = signed_manifest_bytes("ns/img", "v1", &[("id0", "sha256:b1")]);
    let registry = TestRegistry::serve(manifest).await;
    let image = format!("{}/ns/img:v1", registry.addr());

    let backend = ScriptedBackend::new();
    let client = test_client(backend.clone());
    let engine = Arc::new(RecordingEngine::new());
    let puller = test_puller(Arc::clone(&engine), client);

    let save_dir = tempfile::tempdir().unwrap();
    let options = PullOptions {
        seed_window: Some(Duration::from_secs(1)),
        ..test_options(save_dir.path().to_path_buf())
    };

    let started = Instant::now();
    puller.pull(&image, &options).await.unwrap();

    // The pull completed the load but stayed alive through the window.
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(engine.calls().len(), 3);
}

#[tokio::test]
async fn test_legacy_archive_load() {
    let manifest = signed_manifest_bytes(
        "ns/img",
        "v1",
        &[("id0", "sha256:b1"), ("id1", "sha256:b2")],
    );
    let registry = TestRegistry::serve(manifest).await;
    let image = format!("{}/ns/img:v1", registry.addr());

    let backend = ScriptedBackend::new();
    let client = test_client(backend.clone());
    let engine = Arc::new(RecordingEngine::new());
    let puller = test_puller(Arc::clone(&engine), client);

    let save_dir = tempfile::tempdir().unwrap();
    let options = PullOptions {
        legacy_archive_load: true,
        ..test_options(save_dir.path().to_path_buf())
    };
    puller.pull(&image, &options).await.unwrap();

    // One streamed archive, no registry shim involved.
    assert_eq!(engine.calls(), vec!["load"]);
    let archives = engine.loaded_archives();
    assert_eq!(archives.len(), 1);

    let mut tar = tar::Archive::new(archives[0].as_slice());
    let names: Vec<String> = tar
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(
        names,
        vec![
            "VERSION",
            "repositories",
            "id0/json",
            "id0/layer.tar",
            "id1/json",
            "id1/layer.tar",
        ]
    );
}

#[tokio::test]
async fn test_tampered_manifest_is_rejected() {
    let manifest = signed_manifest_bytes("ns/img", "v1", &[("id0", "sha256:b1")]);
    let tampered = String::from_utf8(manifest)
        .unwrap()
        .replace("sha256:b1", "sha256:ee")
        .into_bytes();
    let registry = TestRegistry::serve(tampered).await;
    let image = format!("{}/ns/img:v1", registry.addr());

    let backend = ScriptedBackend::new();
    let client = test_client(backend.clone());
    let engine = Arc::new(RecordingEngine::new());
    let puller = test_puller(Arc::clone(&engine), client);

    let save_dir = tempfile::tempdir().unwrap();
    let err = puller
        .pull(&image, &test_options(save_dir.path().to_path_buf()))
        .await
        .unwrap_err();
    assert!(matches!(err, PullError::SignatureInvalid(_)));
    assert_eq!(backend.added_count(), 0);
}

#[tokio::test]
async fn test_unreachable_registry_is_manifest_unavailable() {
    let backend = ScriptedBackend::new();
    let client = test_client(backend);
    let engine = Arc::new(RecordingEngine::new());
    let puller = test_puller(engine, client);

    let save_dir = tempfile::tempdir().unwrap();
    // Nothing listens on the reserved port.
    let err = puller
        .pull(
            "127.0.0.1:1/ns/img:v1",
            &test_options(save_dir.path().to_path_buf()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PullError::ManifestUnavailable { .. }));
}

#[tokio::test]
async fn test_seed_skips_the_engine_load() {
    let manifest = signed_manifest_bytes("ns/img", "v1", &[("id0", "sha256:b1")]);
    let registry = TestRegistry::serve(manifest).await;
    let image = format!("{}/ns/img:v1", registry.addr());

    let backend = ScriptedBackend::new();
    let client = test_client(backend.clone());
    let engine = Arc::new(RecordingEngine::new());
    let puller = test_puller(Arc::clone(&engine), client);

    let save_dir = tempfile::tempdir().unwrap();
    let options = PullOptions {
        load: LoadOption::Skip,
        selection: LayerSelection::All,
        seed_window: Some(Duration::from_millis(500)),
        ..test_options(save_dir.path().to_path_buf())
    };
    puller.pull(&image, &options).await.unwrap();

    assert_eq!(backend.added_count(), 1);
    // Download-only: the engine never saw a load, pull or tag.
    assert!(engine.calls().is_empty());
}
