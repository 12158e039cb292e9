//! Manifest resolution against the registry's distribution API.

use std::collections::HashMap;

use peerpull_core::error::{PullError, Result};
use reqwest::StatusCode;
use serde::Deserialize;

use super::credentials::{CredentialStore, Credentials};
use super::manifest::{FsLayer, LayerInfo, SignedManifest};
use super::reference::ImageReference;
use crate::engine::ContainerEngine;

/// Accept header values for the signed v1 manifest schema.
const MANIFEST_MEDIA_TYPES: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws, \
     application/vnd.docker.distribution.manifest.v1+json";

/// Which layers to select for assembly and download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerSelection {
    /// Every history entry and every blob, even those already present.
    All,
    /// Only the layers missing from the engine, scanning top to base.
    Missing,
}

/// Token endpoint response for bearer-auth registries.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Resolves image references to verified manifests.
pub struct Resolver {
    http: reqwest::Client,
    credentials: CredentialStore,
}

impl Resolver {
    /// Create a resolver reading credentials from the engine configuration.
    pub fn new() -> Self {
        Self::with_credential_store(CredentialStore::from_engine_config())
    }

    /// Create a resolver with a specific credential store.
    pub fn with_credential_store(credentials: CredentialStore) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
        }
    }

    /// Look up stored credentials for the image's registry host.
    ///
    /// Absence of credentials is not an error; anonymous requests are
    /// attempted in that case.
    pub fn resolve_auth(&self, image: &str) -> Result<Option<Credentials>> {
        let reference = ImageReference::parse(image)?;
        self.credentials.lookup(&reference.registry)
    }

    /// Fetch and verify the manifest for the given image.
    pub async fn fetch_manifest(
        &self,
        image: &str,
        insecure: bool,
    ) -> Result<(ImageReference, SignedManifest)> {
        let reference = ImageReference::parse(image)?;

        let credentials = self.credentials.lookup(&reference.registry).unwrap_or_else(|e| {
            tracing::warn!(registry = %reference.registry, "Credential lookup failed: {e}");
            None
        });

        let scheme = if insecure { "http" } else { "https" };
        let url = format!(
            "{scheme}://{}/v2/{}/manifests/{}",
            reference.registry,
            reference.repository,
            reference.tag_or_digest()
        );

        tracing::info!(image = %reference, "Downloading manifest");
        let response = self
            .get_manifest(&url, credentials.as_ref(), None)
            .await
            .map_err(|e| PullError::manifest_unavailable(image, e.to_string()))?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(reqwest::header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let token = match challenge {
                Some(header) => {
                    self.fetch_token(&header, &reference, credentials.as_ref())
                        .await?
                }
                None => None,
            };
            match token {
                Some(token) => self
                    .get_manifest(&url, None, Some(&token))
                    .await
                    .map_err(|e| PullError::manifest_unavailable(image, e.to_string()))?,
                None => {
                    return Err(PullError::manifest_unavailable(
                        image,
                        "registry requires authentication",
                    ))
                }
            }
        } else {
            response
        };

        if !response.status().is_success() {
            return Err(PullError::manifest_unavailable(
                image,
                format!("registry returned {}", response.status()),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PullError::manifest_unavailable(image, e.to_string()))?;

        let manifest = SignedManifest::parse(&bytes)?;
        manifest.verify()?;

        Ok((reference, manifest))
    }

    async fn get_manifest(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        bearer: Option<&str>,
    ) -> std::result::Result<reqwest::Response, reqwest::Error> {
        let mut request = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, MANIFEST_MEDIA_TYPES);
        if let Some(creds) = credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        request.send().await
    }

    /// Obtain a pull token from the endpoint named in a bearer challenge.
    async fn fetch_token(
        &self,
        challenge: &str,
        reference: &ImageReference,
        credentials: Option<&Credentials>,
    ) -> Result<Option<String>> {
        let params = match parse_bearer_challenge(challenge) {
            Some(params) => params,
            None => return Ok(None),
        };
        let realm = match params.get("realm") {
            Some(realm) => realm.clone(),
            None => return Ok(None),
        };

        let scope = format!("repository:{}:pull", reference.repository);
        let mut request = self.http.get(&realm).query(&[("scope", scope.as_str())]);
        if let Some(service) = params.get("service") {
            request = request.query(&[("service", service.as_str())]);
        }
        if let Some(creds) = credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request.send().await.map_err(|e| {
            PullError::manifest_unavailable(reference.full_reference(), e.to_string())
        })?;
        if !response.status().is_success() {
            return Err(PullError::manifest_unavailable(
                reference.full_reference(),
                format!("token endpoint returned {}", response.status()),
            ));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            PullError::manifest_unavailable(reference.full_reference(), e.to_string())
        })?;
        Ok(token.token.or(token.access_token))
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Select the layers to assemble and the blobs to download.
///
/// In `Missing` mode the history is walked from the topmost layer down;
/// the first layer the engine already has terminates the scan, because
/// every layer below it is present as well. Layers above the hit are
/// returned for assembly and only their blobs for download.
pub async fn select_layers(
    manifest: &SignedManifest,
    selection: LayerSelection,
    engine: &dyn ContainerEngine,
) -> Result<(Vec<LayerInfo>, Vec<FsLayer>)> {
    let info = manifest.layer_info()?;

    if selection == LayerSelection::All {
        return Ok((info, manifest.fs_layers.clone()));
    }

    let mut blobs = Vec::new();
    for (index, layer) in info.iter().enumerate() {
        let found = engine.has_image(&layer.id).await.unwrap_or(false);
        if found {
            return Ok((info[..index].to_vec(), blobs));
        }
        blobs.push(manifest.fs_layers[index].clone());
    }

    Ok((info, blobs))
}

/// Parse a `Bearer realm="...",service="..."` challenge header.
fn parse_bearer_challenge(header: &str) -> Option<HashMap<String, String>> {
    let rest = header.strip_prefix("Bearer ")?;
    let mut params = HashMap::new();
    for part in rest.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            params.insert(key.to_string(), value.trim_matches('"').to_string());
        }
    }
    Some(params)
}
