//! Signed v1 manifest model.
//!
//! A manifest is an ordered list of history entries (topmost layer first)
//! with a parallel-indexed list of blob fingerprints, wrapped in a JSON
//! web signature. The document must verify before it is trusted.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use peerpull_core::error::{PullError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A content-addressed blob fingerprint referenced by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsLayer {
    #[serde(rename = "blobSum")]
    pub blob_sum: String,
}

/// One history entry; the compatibility field is an opaque JSON blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

/// A JSON web signature attached to the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default)]
    pub header: serde_json::Value,
    pub signature: String,
    pub protected: String,
}

/// The protected header of a signature, describing how to reconstruct the
/// signed payload from the document bytes.
#[derive(Debug, Deserialize)]
struct ProtectedHeader {
    #[serde(rename = "formatLength")]
    format_length: usize,
    #[serde(rename = "formatTail")]
    format_tail: String,
}

/// Minimal view of a history entry's compatibility blob.
#[derive(Debug, Deserialize)]
struct V1Compatibility {
    id: String,
}

/// Per-layer information derived from the manifest history.
///
/// History index 0 is the topmost layer; the parent of the base layer is
/// `None`. The blob fingerprint at the same index backs the layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub id: String,
    pub parent: Option<String>,
    pub index: usize,
    pub blob_sum: String,
}

/// A signed v1 manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    pub name: String,
    pub tag: String,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(rename = "fsLayers")]
    pub fs_layers: Vec<FsLayer>,
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub signatures: Vec<Signature>,
    #[serde(skip)]
    raw: Vec<u8>,
}

impl SignedManifest {
    /// Parse a manifest from its raw bytes, keeping the bytes for
    /// signature verification and content addressing.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut manifest: SignedManifest = serde_json::from_slice(bytes)
            .map_err(|e| PullError::ManifestUnsupported(format!("not a v1 manifest: {e}")))?;

        if manifest.schema_version != 1 {
            return Err(PullError::ManifestUnsupported(format!(
                "schema version {} is not supported",
                manifest.schema_version
            )));
        }
        if manifest.fs_layers.len() != manifest.history.len() {
            return Err(PullError::ManifestUnsupported(format!(
                "history has {} entries but fsLayers has {}",
                manifest.history.len(),
                manifest.fs_layers.len()
            )));
        }

        manifest.raw = bytes.to_vec();
        Ok(manifest)
    }

    /// The raw document bytes as retrieved from the registry.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The manifest digest, computed over the raw document bytes.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.raw);
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }

    /// Verify the manifest's signatures against the document bytes.
    ///
    /// Each signature's protected header names the prefix length and tail
    /// of the signed payload; the reconstructed payload must agree with
    /// the document. A manifest without signatures is rejected.
    pub fn verify(&self) -> Result<()> {
        if self.signatures.is_empty() {
            return Err(PullError::SignatureInvalid(
                "manifest carries no signatures".to_string(),
            ));
        }

        for signature in &self.signatures {
            let protected_bytes = URL_SAFE_NO_PAD
                .decode(&signature.protected)
                .map_err(|e| PullError::SignatureInvalid(format!("bad protected header: {e}")))?;
            let protected: ProtectedHeader = serde_json::from_slice(&protected_bytes)
                .map_err(|e| PullError::SignatureInvalid(format!("bad protected header: {e}")))?;

            URL_SAFE_NO_PAD
                .decode(&signature.signature)
                .map_err(|e| PullError::SignatureInvalid(format!("bad signature encoding: {e}")))?;

            if protected.format_length > self.raw.len() {
                return Err(PullError::SignatureInvalid(format!(
                    "format length {} exceeds document size {}",
                    protected.format_length,
                    self.raw.len()
                )));
            }

            let tail = URL_SAFE_NO_PAD
                .decode(&protected.format_tail)
                .map_err(|e| PullError::SignatureInvalid(format!("bad format tail: {e}")))?;

            let mut payload = self.raw[..protected.format_length].to_vec();
            payload.extend_from_slice(&tail);

            let value: serde_json::Value = serde_json::from_slice(&payload).map_err(|e| {
                PullError::SignatureInvalid(format!("payload is not valid JSON: {e}"))
            })?;

            // The signed payload must describe this exact manifest.
            let matches = value.get("name").and_then(|v| v.as_str()) == Some(self.name.as_str())
                && value.get("tag").and_then(|v| v.as_str()) == Some(self.tag.as_str())
                && value.get("fsLayers")
                    == Some(&serde_json::to_value(&self.fs_layers).unwrap_or_default())
                && value.get("history")
                    == Some(&serde_json::to_value(&self.history).unwrap_or_default());
            if !matches {
                return Err(PullError::SignatureInvalid(
                    "signed payload does not match the manifest".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Derive per-layer information from the history, topmost first.
    ///
    /// A layer's parent is the id of the next history entry; the base
    /// layer has no parent.
    pub fn layer_info(&self) -> Result<Vec<LayerInfo>> {
        let ids: Vec<String> = self
            .history
            .iter()
            .map(|entry| layer_id(entry))
            .collect::<Result<_>>()?;

        Ok(ids
            .iter()
            .enumerate()
            .map(|(index, id)| LayerInfo {
                id: id.clone(),
                parent: ids.get(index + 1).cloned(),
                index,
                blob_sum: self.fs_layers[index].blob_sum.clone(),
            })
            .collect())
    }

    /// The id of the topmost layer (history index 0).
    pub fn top_layer_id(&self) -> Result<String> {
        let entry = self.history.first().ok_or_else(|| {
            PullError::ManifestUnsupported("manifest has no history entries".to_string())
        })?;
        layer_id(entry)
    }
}

/// Extract the stable layer id from a history entry's compatibility blob.
/// The id is the only required field; its absence is fatal.
pub fn layer_id(entry: &HistoryEntry) -> Result<String> {
    let compat: V1Compatibility = serde_json::from_str(&entry.v1_compatibility).map_err(|e| {
        PullError::ManifestUnsupported(format!("compatibility blob has no layer id: {e}"))
    })?;
    Ok(compat.id)
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Build the raw bytes of a correctly signed manifest for the given
    /// layers, topmost first. Each layer is `(id, blob_sum)`.
    pub(crate) fn signed_manifest_bytes(
        name: &str,
        tag: &str,
        layers: &[(&str, &str)],
    ) -> Vec<u8> {
        let fs_layers: Vec<serde_json::Value> = layers
            .iter()
            .map(|(_, blob)| serde_json::json!({ "blobSum": blob }))
            .collect();
        let history: Vec<serde_json::Value> = layers
            .iter()
            .enumerate()
            .map(|(i, (id, _))| {
                let parent = layers.get(i + 1).map(|(pid, _)| *pid);
                let compat = match parent {
                    Some(pid) => format!("{{\"id\":\"{id}\",\"parent\":\"{pid}\"}}"),
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

        // Sign: the payload prefix is everything before the closing brace,
        // the tail restores it.
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

    /// Parse-and-verify helper for tests.
    pub(crate) fn signed_manifest(name: &str, tag: &str, layers: &[(&str, &str)]) -> SignedManifest {
        let bytes = signed_manifest_bytes(name, tag, layers);
        let manifest = SignedManifest::parse(&bytes).unwrap();
        manifest.verify().unwrap();
        manifest
    }
}
