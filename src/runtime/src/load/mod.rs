//! Image assembly.
//!
//! Once the required blobs are downloaded, the image is fed back into the
//! container engine one of two ways:
//!
//! - **Registry path** (preferred): stand up the local registry shim over
//!   the downloaded files and instruct the engine to pull from it, then
//!   re-tag to the user-facing name. Layer ordering is the engine's
//!   problem.
//! - **Archive path** (legacy, and the squashed format): synthesize the
//!   engine's V1 load archive and hand it to the load endpoint, either
//!   materialized or streamed through a bounded pipe.

pub mod archive;
pub mod channeled;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use peerpull_core::error::{PullError, Result};

use crate::distribution::{ImageReference, LayerInfo, SignedManifest};
use crate::engine::{ArchiveSource, ContainerEngine};
use crate::registry::{LocalServeDriver, RegistryServer};
use crate::swarm::DownloadHandle;

pub use archive::build_load_archive;
pub use channeled::{channeled_pipe, ChanneledReader, ChanneledWriter};

/// Wait for the blobs backing the given layers, topmost to base, and
/// collect their downloaded file paths.
pub async fn wait_for_blobs(
    manifest: &SignedManifest,
    layers: &[LayerInfo],
    handle: &DownloadHandle,
) -> Result<HashMap<String, PathBuf>> {
    let mut blob_paths = HashMap::new();
    for layer in layers {
        let blob_sum = &manifest.fs_layers[layer.index].blob_sum;
        if blob_paths.contains_key(blob_sum) {
            continue;
        }

        let downloaded = handle
            .downloaded(blob_sum)
            .ok_or_else(|| PullError::assembly(format!("no download task for {blob_sum}")))?;
        downloaded.wait().await;

        let path = handle.path(blob_sum).await.ok_or_else(|| {
            match handle.take_error() {
                Some(e) => e,
                None => PullError::assembly(format!("no downloaded file for {blob_sum}")),
            }
        })?;
        blob_paths.insert(blob_sum.clone(), path);
    }
    Ok(blob_paths)
}

/// Load a layered image through the local registry shim.
///
/// The engine pulls the image from the loopback registry under a
/// temporary name, which is then re-tagged to the user-facing one.
pub async fn load_layered(
    engine: &dyn ContainerEngine,
    reference: &ImageReference,
    manifest: &SignedManifest,
    blob_paths: &HashMap<String, PathBuf>,
    local_ip: &str,
    shim_addr: &str,
) -> Result<()> {
    let (driver, digest) = LocalServeDriver::for_image(reference, manifest, blob_paths);
    let server = RegistryServer::serve(driver, reference.repository.clone(), shim_addr).await?;

    let tag = &manifest.tag;
    let shim_reference = format!(
        "{local_ip}:{}/{}:{tag}",
        server.addr().port(),
        reference.repository
    );

    tracing::info!(manifest = %digest, "Pulling {shim_reference} from local registry");
    let pulled = engine.pull_image(&shim_reference, None).await;
    server.shutdown().await;
    pulled?;

    // Re-tag to the requested name and drop the shim-scoped tag.
    let repository = format!("{}/{}", reference.registry, reference.repository);
    engine.tag_image(&shim_reference, &repository, tag).await?;
    engine.remove_image(&shim_reference).await?;

    tracing::info!("Loaded {repository}:{tag}");
    Ok(())
}

/// Load a layered image through the engine's legacy archive endpoint,
/// materializing the archive in memory.
pub async fn load_archive_buffered(
    engine: &dyn ContainerEngine,
    reference: &ImageReference,
    manifest: &SignedManifest,
    blob_paths: &HashMap<String, PathBuf>,
) -> Result<()> {
    let mut buf = Vec::new();
    build_load_archive(reference, manifest, blob_paths, &mut buf)?;
    engine.load_archive(ArchiveSource::Buffer(Bytes::from(buf))).await
}

/// Load a layered image through the engine's legacy archive endpoint,
/// streaming the archive through a bounded pipe so the engine reads as
/// bytes are written.
pub async fn load_archive_streaming(
    engine: &dyn ContainerEngine,
    reference: &ImageReference,
    manifest: &SignedManifest,
    blob_paths: &HashMap<String, PathBuf>,
) -> Result<()> {
    let (writer, reader, _read_count) = channeled_pipe();

    let producer = {
        let reference = reference.clone();
        let manifest = manifest.clone();
        let blob_paths = blob_paths.clone();
        tokio::task::spawn_blocking(move || {
            build_load_archive(&reference, &manifest, &blob_paths, writer)
        })
    };

    let loaded = engine
        .load_archive(ArchiveSource::Reader(Box::new(reader)))
        .await;
    let built = producer
        .await
        .map_err(|e| PullError::assembly(format!("archive producer panicked: {e}")))?;

    match (loaded, built) {
        (Err(e), _) => Err(e),
        (Ok(()), result) => result,
    }
}

/// Hand a squashed archive file to the engine's load endpoint unchanged.
pub async fn load_squashed(engine: &dyn ContainerEngine, path: &Path) -> Result<()> {
    tracing::info!("Importing squashed image from {}", path.display());
    engine
        .load_archive(ArchiveSource::File(path.to_path_buf()))
        .await
}
