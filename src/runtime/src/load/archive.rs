//! Engine load archive (legacy V1 format).
//!
//! Layout, bit-exact:
//!
//! ```text
//! VERSION              "1.0"
//! repositories         JSON: { "<host>/<repo>": { "<tag>": "<topLayerId>" } }
//! <layerId>/json       raw per-layer compatibility blob
//! <layerId>/layer.tar  raw blob bytes
//! ```

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use peerpull_core::error::{PullError, Result};

use crate::distribution::manifest::layer_id;
use crate::distribution::{ImageReference, SignedManifest};

/// Build the V1 load archive for a manifest, streaming each blob file
/// into the writer.
pub fn build_load_archive<W: Write>(
    reference: &ImageReference,
    manifest: &SignedManifest,
    blob_paths: &HashMap<String, PathBuf>,
    writer: W,
) -> Result<()> {
    let mut tar = tar::Builder::new(writer);

    append_file(&mut tar, "VERSION", b"1.0")?;

    // { "host/repo": { "tag": "<topLayerId>" } }
    let mut tag_map = serde_json::Map::new();
    tag_map.insert(
        manifest.tag.clone(),
        serde_json::Value::String(manifest.top_layer_id()?),
    );
    let mut repositories = serde_json::Map::new();
    repositories.insert(
        format!("{}/{}", reference.registry, reference.repository),
        serde_json::Value::Object(tag_map),
    );
    let repositories = serde_json::Value::Object(repositories).to_string();
    append_file(&mut tar, "repositories", repositories.as_bytes())?;

    for (index, layer) in manifest.fs_layers.iter().enumerate() {
        let entry = &manifest.history[index];
        let id = layer_id(entry)?;

        append_file(
            &mut tar,
            &format!("{id}/json"),
            entry.v1_compatibility.as_bytes(),
        )?;

        let blob_path = blob_paths.get(&layer.blob_sum).ok_or_else(|| {
            PullError::assembly(format!("no downloaded file for blob {}", layer.blob_sum))
        })?;
        let mut blob = std::fs::File::open(blob_path).map_err(|e| {
            PullError::assembly(format!("could not open {}: {e}", blob_path.display()))
        })?;
        let size = blob.metadata()?.len();

        let mut header = tar::Header::new_gnu();
        header.set_size(size);
        header.set_mode(0o600);
        header.set_cksum();
        tar.append_data(&mut header, format!("{id}/layer.tar"), &mut blob)
            .map_err(|e| PullError::assembly(format!("could not append layer {id}: {e}")))?;
    }

    tar.finish()
        .map_err(|e| PullError::assembly(format!("could not finish archive: {e}")))?;
    Ok(())
}

fn append_file<W: Write>(tar: &mut tar::Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o600);
    header.set_cksum();
    tar.append_data(&mut header, name, data)
        .map_err(|e| PullError::assembly(format!("could not append {name}: {e}")))
}
