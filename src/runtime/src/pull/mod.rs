//! Pull orchestration.
//!
//! Wires the resolver, the plan builder, the swarm coordinator and the
//! assembler into the complete flow: resolve the manifest, fan out one
//! download per missing blob, assemble into the engine, keep seeding if
//! asked.

pub mod plan;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use peerpull_core::error::{PullError, Result};

use crate::distribution::{resolver, LayerSelection, Resolver};
use crate::engine::ContainerEngine;
use crate::load;
use crate::registry::SHIM_ADDR;
use crate::swarm::coordinator::{download_torrents, BatchOptions, DownloadHandle};
use crate::swarm::session::SwarmClient;

/// Whether the downloaded image is loaded into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOption {
    /// Assemble and load the image after download.
    Perform,
    /// Download (and seed) only.
    Skip,
}

/// Options for one pull operation.
#[derive(Debug, Clone)]
pub struct PullOptions {
    /// Use HTTP instead of HTTPS towards the registry.
    pub insecure: bool,
    /// Pull the squashed single-archive form of the image.
    pub squashed: bool,
    /// Load the image into the engine, or download-only.
    pub load: LoadOption,
    /// Which layers to fetch.
    pub selection: LayerSelection,
    /// Seeding after download: `None` no seeding, `Some(0)` until
    /// interrupted, `Some(d)` for the window `d`.
    pub seed_window: Option<Duration>,
    /// Address the engine reaches this host under, for the registry shim.
    pub local_ip: String,
    /// Directory torrents are downloaded into.
    pub save_dir: PathBuf,
    /// Listen address of the registry shim.
    pub shim_addr: String,
    /// Use the engine's legacy load-archive format instead of the shim.
    pub legacy_archive_load: bool,
    /// Install the process-termination handler.
    pub handle_signals: bool,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            insecure: false,
            squashed: false,
            load: LoadOption::Perform,
            selection: LayerSelection::Missing,
            seed_window: None,
            local_ip: "localhost".to_string(),
            save_dir: std::env::temp_dir().join("peerpull").join("torrents"),
            shim_addr: SHIM_ADDR.to_string(),
            legacy_archive_load: false,
            handle_signals: false,
        }
    }
}

/// High-level image puller over the swarm.
pub struct Puller {
    engine: Arc<dyn ContainerEngine>,
    client: Arc<SwarmClient>,
    resolver: Resolver,
}

impl Puller {
    /// Create a puller over an engine and a (not yet started) session.
    pub fn new(engine: Arc<dyn ContainerEngine>, client: Arc<SwarmClient>) -> Self {
        Self {
            engine,
            client,
            resolver: Resolver::new(),
        }
    }

    /// Create a puller with a specific resolver.
    pub fn with_resolver(
        engine: Arc<dyn ContainerEngine>,
        client: Arc<SwarmClient>,
        resolver: Resolver,
    ) -> Self {
        Self {
            engine,
            client,
            resolver,
        }
    }

    /// Pull an image through the swarm, per the options.
    pub async fn pull(&self, image: &str, options: &PullOptions) -> Result<()> {
        if options.squashed {
            self.pull_squashed(image, options).await
        } else {
            self.pull_layered(image, options).await
        }
    }

    async fn pull_layered(&self, image: &str, options: &PullOptions) -> Result<()> {
        let credentials = self.resolver.resolve_auth(image).unwrap_or_else(|e| {
            tracing::warn!("Credential lookup failed, going anonymous: {e}");
            None
        });

        let (reference, manifest) = self.resolver.fetch_manifest(image, options.insecure).await?;
        tracing::info!("Downloaded manifest for image {image}");

        // The legacy archive format requires every layer's blob.
        let selection = if options.legacy_archive_load {
            LayerSelection::All
        } else {
            options.selection
        };
        let (layers, blobs) =
            resolver::select_layers(&manifest, selection, self.engine.as_ref()).await?;

        if selection == LayerSelection::Missing
            && layers.is_empty()
            && options.seed_window.is_none()
        {
            tracing::info!("All layers already downloaded");
            return Ok(());
        }

        let torrents =
            plan::blob_torrents(&reference, &blobs, credentials.as_ref(), options.insecure)?;

        std::fs::create_dir_all(&options.save_dir)?;
        self.client.start().await?;
        let handle = download_torrents(
            Arc::clone(&self.client),
            &torrents,
            BatchOptions {
                save_dir: options.save_dir.clone(),
                seed_window: options.seed_window,
                handle_signals: options.handle_signals,
            },
        );

        if options.load == LoadOption::Perform && !layers.is_empty() {
            if let Err(e) = self.assemble(&reference, &manifest, &layers, &handle, options).await {
                handle.reporter.stop();
                self.client.stop().await;
                return Err(e);
            }
        }

        // Wait until every torrent (including seeding windows) completes.
        handle.finished().wait().await;
        match handle.take_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn assemble(
        &self,
        reference: &crate::distribution::ImageReference,
        manifest: &crate::distribution::SignedManifest,
        layers: &[crate::distribution::LayerInfo],
        handle: &DownloadHandle,
        options: &PullOptions,
    ) -> Result<()> {
        let blob_paths = load::wait_for_blobs(manifest, layers, handle).await?;

        // Bars are done with; anything further is log output.
        handle.reporter.stop();

        if options.legacy_archive_load {
            load::load_archive_streaming(self.engine.as_ref(), reference, manifest, &blob_paths)
                .await
        } else {
            load::load_layered(
                self.engine.as_ref(),
                reference,
                manifest,
                &blob_paths,
                &options.local_ip,
                &options.shim_addr,
            )
            .await
        }
    }

    async fn pull_squashed(&self, image: &str, options: &PullOptions) -> Result<()> {
        let credentials = self.resolver.resolve_auth(image).unwrap_or_else(|e| {
            tracing::warn!("Credential lookup failed, going anonymous: {e}");
            None
        });

        let reference = crate::distribution::ImageReference::parse(image)?;
        let torrent = plan::squashed_torrent(&reference, credentials.as_ref(), options.insecure)?;

        std::fs::create_dir_all(&options.save_dir)?;
        self.client.start().await?;

        tracing::info!("Starting download of squashed image");
        let handle = download_torrents(
            Arc::clone(&self.client),
            std::slice::from_ref(&torrent),
            BatchOptions {
                save_dir: options.save_dir.clone(),
                seed_window: options.seed_window,
                handle_signals: options.handle_signals,
            },
        );

        handle.finished().wait().await;
        if let Some(e) = handle.take_error() {
            return Err(e);
        }

        if options.load == LoadOption::Perform {
            let path = handle
                .path("squashed")
                .await
                .ok_or_else(|| PullError::assembly("squashed download has no file"))?;
            load::load_squashed(self.engine.as_ref(), &path).await?;
        }

        Ok(())
    }
}
