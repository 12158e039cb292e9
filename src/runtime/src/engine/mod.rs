//! Container engine collaborator.
//!
//! The pull pipeline only needs a handful of capabilities from the local
//! engine: an image-exists probe, pull-from-registry, tagging, removal,
//! and loading an image archive. Orchestration code depends on the
//! [`ContainerEngine`] trait; `docker.rs` implements it over the Docker
//! Engine HTTP API.

mod docker;

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use peerpull_core::error::Result;

use crate::distribution::Credentials;

pub use docker::DockerEngine;

/// An image archive handed to the engine's load endpoint.
pub enum ArchiveSource {
    /// A fully materialized archive.
    Buffer(Bytes),
    /// An archive file on disk, passed unchanged.
    File(PathBuf),
    /// A producer-driven archive; the engine reads as bytes are written.
    Reader(Box<dyn std::io::Read + Send>),
}

/// Capabilities consumed from the local container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Whether the engine already has the image (or layer) with this id.
    async fn has_image(&self, id: &str) -> Result<bool>;

    /// Pull an image from a registry, optionally authenticated.
    async fn pull_image(&self, reference: &str, auth: Option<&Credentials>) -> Result<()>;

    /// Tag an existing image under a new repository and tag.
    async fn tag_image(&self, source: &str, repository: &str, tag: &str) -> Result<()>;

    /// Remove an image reference.
    async fn remove_image(&self, reference: &str) -> Result<()>;

    /// Load an image archive into the engine.
    async fn load_archive(&self, archive: ArchiveSource) -> Result<()>;
}
