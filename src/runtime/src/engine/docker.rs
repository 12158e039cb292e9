//! Docker Engine HTTP API client.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use peerpull_core::error::{PullError, Result};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use super::{ArchiveSource, ContainerEngine};
use crate::distribution::Credentials;

/// Default engine endpoint when `DOCKER_HOST` is unset.
const DEFAULT_DOCKER_HOST: &str = "http://localhost:2375";

/// Read chunk size when streaming a producer-driven archive.
const STREAM_CHUNK: usize = 64 * 1024;

/// A message from the engine's streamed pull/load logs.
#[derive(Debug, Default, Deserialize)]
struct EngineLogLine {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageInspect {
    #[serde(rename = "Id")]
    id: String,
}

/// Container engine client speaking the Docker Engine HTTP API.
pub struct DockerEngine {
    http: reqwest::Client,
    base: String,
}

impl DockerEngine {
    /// Connect to the engine named by `DOCKER_HOST`, defaulting to the
    /// local TCP endpoint.
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("DOCKER_HOST").unwrap_or_else(|_| DEFAULT_DOCKER_HOST.to_string());
        Self::new(&host)
    }

    /// Connect to a specific engine endpoint.
    pub fn new(host: &str) -> Result<Self> {
        let base = normalize_host(host)?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    /// Consume a streamed engine log body, failing on the first error line.
    async fn consume_log_stream(&self, response: reqwest::Response, context: &str) -> Result<()> {
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| PullError::EngineLoadFailed(format!("{context}: {e}")))?;
            buffer.extend_from_slice(&chunk);

            // The engine emits one JSON object per line but a chunk may end
            // mid-object; keep the remainder for the next read.
            while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                check_log_line(&line, context)?;
            }
        }
        check_log_line(&buffer, context)?;

        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn has_image(&self, id: &str) -> Result<bool> {
        let url = format!("{}/images/{}/json", self.base, id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| PullError::other(format!("engine inspect failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(PullError::other(format!(
                "engine inspect returned {}",
                response.status()
            )));
        }

        let inspect: ImageInspect = response
            .json()
            .await
            .map_err(|e| PullError::other(format!("engine inspect failed: {e}")))?;
        Ok(inspect.id == id || inspect.id.trim_start_matches("sha256:") == id)
    }

    async fn pull_image(&self, reference: &str, auth: Option<&Credentials>) -> Result<()> {
        let (from_image, tag) = split_reference(reference);
        let url = format!("{}/images/create", self.base);

        let mut request = self
            .http
            .post(&url)
            .query(&[("fromImage", from_image), ("tag", tag)]);
        if let Some(creds) = auth {
            request = request.header("X-Registry-Auth", registry_auth_header(creds));
        }

        let response = request
            .send()
            .await
            .map_err(|e| PullError::EngineLoadFailed(format!("pull of {reference}: {e}")))?;
        if !response.status().is_success() {
            return Err(PullError::EngineLoadFailed(format!(
                "pull of {reference} returned {}",
                response.status()
            )));
        }

        self.consume_log_stream(response, "pull").await
    }

    async fn tag_image(&self, source: &str, repository: &str, tag: &str) -> Result<()> {
        let url = format!("{}/images/{}/tag", self.base, source);
        let response = self
            .http
            .post(&url)
            .query(&[("repo", repository), ("tag", tag)])
            .send()
            .await
            .map_err(|e| PullError::other(format!("engine tag failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PullError::other(format!(
                "engine tag of {source} returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn remove_image(&self, reference: &str) -> Result<()> {
        let url = format!("{}/images/{}", self.base, reference);
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| PullError::other(format!("engine remove failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PullError::other(format!(
                "engine remove of {reference} returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn load_archive(&self, archive: ArchiveSource) -> Result<()> {
        let body = match archive {
            ArchiveSource::Buffer(bytes) => reqwest::Body::from(bytes),
            ArchiveSource::File(path) => {
                let file = tokio::fs::File::open(&path).await.map_err(|e| {
                    PullError::EngineLoadFailed(format!("could not open {}: {e}", path.display()))
                })?;
                reqwest::Body::wrap_stream(ReaderStream::new(file))
            }
            ArchiveSource::Reader(reader) => reqwest::Body::wrap_stream(reader_stream(reader)),
        };

        let url = format!("{}/images/load", self.base);
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-tar")
            .body(body)
            .send()
            .await
            .map_err(|e| PullError::EngineLoadFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PullError::EngineLoadFailed(format!(
                "engine load returned {}",
                response.status()
            )));
        }

        self.consume_log_stream(response, "load").await
    }
}

/// Adapt a blocking reader into a byte stream without buffering the whole
/// archive; the engine applies back-pressure through the bounded channel.
fn reader_stream(
    mut reader: Box<dyn std::io::Read + Send>,
) -> futures::channel::mpsc::Receiver<std::io::Result<Bytes>> {
    let (mut tx, rx) = futures::channel::mpsc::channel::<std::io::Result<Bytes>>(8);

    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; STREAM_CHUNK];
        loop {
            match std::io::Read::read(&mut reader, &mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    if futures::executor::block_on(tx.send(Ok(chunk))).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = futures::executor::block_on(tx.send(Err(e)));
                    break;
                }
            }
        }
    });

    rx
}

/// Fail on an `{"error": ...}` line from the engine's log stream.
fn check_log_line(line: &[u8], context: &str) -> Result<()> {
    let trimmed = line
        .iter()
        .position(|&b| !b.is_ascii_whitespace())
        .map(|start| &line[start..])
        .unwrap_or(&[]);
    if trimmed.is_empty() {
        return Ok(());
    }

    match serde_json::from_slice::<EngineLogLine>(trimmed) {
        Ok(EngineLogLine {
            error: Some(error), ..
        }) => Err(PullError::EngineLoadFailed(format!("{context}: {error}"))),
        Ok(line) => {
            if let (Some(id), Some(status)) = (&line.id, &line.status) {
                tracing::debug!("engine {context}: {id}: {status}");
            }
            Ok(())
        }
        // Non-JSON noise in the stream is not fatal.
        Err(_) => Ok(()),
    }
}

/// Split an image reference into the engine's `fromImage` and `tag` parts.
fn split_reference(reference: &str) -> (&str, &str) {
    match reference.rfind('/') {
        Some(slash) => match reference[slash + 1..].rfind(':') {
            Some(colon) => (
                &reference[..slash + 1 + colon],
                &reference[slash + 2 + colon..],
            ),
            None => (reference, "latest"),
        },
        None => match reference.rfind(':') {
            Some(colon) => (&reference[..colon], &reference[colon + 1..]),
            None => (reference, "latest"),
        },
    }
}

/// Base64-encoded auth payload for the `X-Registry-Auth` header.
fn registry_auth_header(credentials: &Credentials) -> String {
    let payload = serde_json::json!({
        "username": credentials.username,
        "password": credentials.password,
    });
    STANDARD.encode(payload.to_string())
}

/// Normalize a `DOCKER_HOST` value to an HTTP base URL.
fn normalize_host(host: &str) -> Result<String> {
    let host = host.trim_end_matches('/');
    if let Some(rest) = host.strip_prefix("tcp://") {
        return Ok(format!("http://{rest}"));
    }
    if host.starts_with("http://") || host.starts_with("https://") {
        return Ok(host.to_string());
    }
    if host.starts_with("unix://") {
        return Err(PullError::Unsupported(
            "unix socket engine endpoints are not supported; set DOCKER_HOST to a tcp:// address"
                .to_string(),
        ));
    }
    Err(PullError::other(format!("unrecognized engine host {host}")))
}
