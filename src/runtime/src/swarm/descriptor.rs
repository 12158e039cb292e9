//! Swarm descriptors: fetchable URLs resolving to bencoded descriptor files.

use std::path::Path;

use peerpull_core::error::{PullError, Result};
use serde_bencode::value::Value;
use tempfile::NamedTempFile;

/// Media type requested when fetching a descriptor.
const DESCRIPTOR_ACCEPT: &str = "application/x-bittorrent";

/// Longest display title before shortening.
const TITLE_WIDTH: usize = 19;

/// A fetchable swarm descriptor for exactly one blob (or one squashed archive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentDescriptor {
    /// Task id: the blob fingerprint, or "squashed".
    pub id: String,
    /// Descriptor URL (http/https, credentials as basic-auth user-info)
    /// or a magnet URI.
    pub url: String,
    /// Human-readable title for progress rows.
    pub title: String,
}

impl TorrentDescriptor {
    /// The title shortened for display.
    pub fn display_title(&self) -> &str {
        if self.title.len() > TITLE_WIDTH {
            &self.title[..TITLE_WIDTH]
        } else {
            &self.title
        }
    }
}

/// Descriptor rewriting applied before hand-off to the native session.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorOptions {
    /// Strip the `url-list` field (web seeds).
    pub clear_web_seeds: bool,
    /// Strip the `announce` field (trackers).
    pub clear_trackers: bool,
}

impl DescriptorOptions {
    fn is_noop(&self) -> bool {
        !self.clear_web_seeds && !self.clear_trackers
    }
}

/// Fetch a descriptor URL into a temporary file.
///
/// The native library cannot use web seeds when handed a URL directly, so
/// descriptors are always materialized first. The temporary file is
/// removed when the returned handle drops.
pub async fn fetch_descriptor(http: &reqwest::Client, url: &str) -> Result<NamedTempFile> {
    let response = http
        .get(url)
        .header(reqwest::header::ACCEPT, DESCRIPTOR_ACCEPT)
        .send()
        .await
        .map_err(|e| PullError::descriptor_fetch(url, e.to_string()))?;

    if response.status().as_u16() >= 400 {
        return Err(PullError::descriptor_fetch(
            url,
            format!("got {}", response.status()),
        ));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PullError::descriptor_fetch(url, e.to_string()))?;

    let file = NamedTempFile::new()?;
    std::fs::write(file.path(), &bytes)?;
    Ok(file)
}

/// Rewrite a descriptor file in place, stripping web seeds and/or trackers.
pub fn normalize_descriptor(path: &Path, options: &DescriptorOptions) -> Result<()> {
    if options.is_noop() {
        return Ok(());
    }

    let bytes = std::fs::read(path)?;
    let value: Value = serde_bencode::from_bytes(&bytes)
        .map_err(|e| PullError::descriptor_fetch(path.display().to_string(), e.to_string()))?;

    let mut dict = match value {
        Value::Dict(dict) => dict,
        _ => {
            return Err(PullError::descriptor_fetch(
                path.display().to_string(),
                "descriptor is not a bencoded dictionary",
            ))
        }
    };

    if options.clear_web_seeds {
        dict.remove(b"url-list".as_slice());
    }
    if options.clear_trackers {
        dict.remove(b"announce".as_slice());
    }

    let encoded = serde_bencode::to_bytes(&Value::Dict(dict))
        .map_err(|e| PullError::descriptor_fetch(path.display().to_string(), e.to_string()))?;
    std::fs::write(path, encoded)?;
    Ok(())
}
