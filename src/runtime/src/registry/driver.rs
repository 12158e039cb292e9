//! Read-only storage driver serving one image's content.
//!
//! Path layout (fixed):
//!
//! ```text
//! /docker/registry/v2/repositories/<repo>/_manifests/revisions/sha256/<hex>/link
//! /docker/registry/v2/repositories/<repo>/_manifests/tags/<tag>/current/link
//! /docker/registry/v2/repositories/<repo>/_layers/sha256/<hex>/link
//! /docker/registry/v2/blobs/sha256/<aa>/<hex>/data
//! ```
//!
//! Link files hold digest text; blob data is either inline bytes (the
//! manifest) or streamed from the downloaded file on disk.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use peerpull_core::error::{PullError, Result};
use sha2::{Digest, Sha256};

use crate::distribution::{ImageReference, SignedManifest};

/// Read-only in-memory storage driver.
#[derive(Debug, Default)]
pub struct LocalServeDriver {
    /// Request path -> direct data.
    content_paths: HashMap<String, Vec<u8>>,
    /// Request path -> on-disk file.
    external_content_paths: HashMap<String, PathBuf>,
}

impl LocalServeDriver {
    /// Build a driver serving the given image: the manifest blob is
    /// registered with a content-addressed write, the tag and every layer
    /// are linked. Returns the driver and the manifest digest.
    pub fn for_image(
        reference: &ImageReference,
        manifest: &SignedManifest,
        blob_paths: &HashMap<String, PathBuf>,
    ) -> (Self, String) {
        let mut driver = Self::default();
        let repository = &reference.repository;

        let digest = driver.add_linked_data(repository, "_manifests/revisions", manifest.raw());

        driver.add_link(
            repository,
            &format!("_manifests/tags/{}/current/link", manifest.tag),
            &digest,
        );

        for (blob_digest, blob_location) in blob_paths {
            driver.add_linked_file(repository, "_layers", blob_digest, blob_location.clone());
        }

        (driver, digest)
    }

    /// Add a link from a repository-scoped location to a digest.
    fn add_link(&mut self, repository: &str, location: &str, digest: &str) {
        let link_path = format!("/docker/registry/v2/repositories/{repository}/{location}");
        self.content_paths.insert(link_path, digest.into());
    }

    fn add_digest_link(&mut self, repository: &str, prefix: &str, digest: &str) {
        let hex = hex_of(digest);
        self.add_link(repository, &format!("{prefix}/sha256/{hex}/link"), digest);
    }

    /// Register an on-disk file under its digest.
    fn add_linked_file(&mut self, repository: &str, prefix: &str, digest: &str, path: PathBuf) {
        self.add_digest_link(repository, prefix, digest);
        self.external_content_paths.insert(data_path(digest), path);
    }

    /// Register inline data with a content-addressed write, returning its
    /// digest.
    fn add_linked_data(&mut self, repository: &str, prefix: &str, data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let digest = format!("sha256:{}", hex::encode(hasher.finalize()));

        self.add_digest_link(repository, prefix, &digest);
        self.content_paths.insert(data_path(&digest), data.to_vec());
        digest
    }

    /// Bytes for a recognized manifest or link path.
    pub fn get_content(&self, path: &str) -> Result<&[u8]> {
        self.content_paths
            .get(path)
            .map(Vec::as_slice)
            .ok_or_else(|| PullError::other(format!("unknown file {path}")))
    }

    /// A seekable reader over a blob-data path, positioned at `offset`.
    pub fn read_stream(&self, path: &str, offset: u64) -> Result<std::fs::File> {
        let location = self
            .external_content_paths
            .get(path)
            .ok_or_else(|| PullError::other(format!("unknown file {path}")))?;

        let mut file = std::fs::File::open(location)?;
        let position = file.seek(SeekFrom::Start(offset))?;
        if position < offset {
            return Err(PullError::other(format!(
                "invalid offset {offset} into {path}"
            )));
        }
        Ok(file)
    }

    /// Size of the content at a path, either form.
    pub fn stat(&self, path: &str) -> Result<u64> {
        if let Some(data) = self.content_paths.get(path) {
            return Ok(data.len() as u64);
        }
        if let Some(location) = self.external_content_paths.get(path) {
            return Ok(std::fs::metadata(location)?.len());
        }
        Err(PullError::other(format!("unknown file {path}")))
    }

    /// All mutations are unsupported; the driver is read-only.
    pub fn put_content(&mut self, _path: &str, _contents: &[u8]) -> Result<()> {
        Err(PullError::Unsupported("registry shim is read-only".into()))
    }

    /// All mutations are unsupported; the driver is read-only.
    pub fn write_stream(&mut self, _path: &str, _offset: u64, _reader: &mut dyn Read) -> Result<u64> {
        Err(PullError::Unsupported("registry shim is read-only".into()))
    }

    /// Deletion is unsupported; the driver is read-only.
    pub fn delete(&mut self, _path: &str) -> Result<()> {
        Err(PullError::Unsupported("registry shim is read-only".into()))
    }

    /// Whether a path resolves to streamed (on-disk) content.
    pub fn is_external(&self, path: &str) -> bool {
        self.external_content_paths.contains_key(path)
    }
}

/// The blob-data path for a digest; the `<aa>` component is the first
/// two hex characters.
pub fn data_path(digest: &str) -> String {
    let hex = hex_of(digest);
    format!("/docker/registry/v2/blobs/sha256/{}/{hex}/data", &hex[..2])
}

fn hex_of(digest: &str) -> &str {
    digest.strip_prefix("sha256:").unwrap_or(digest)
}
