//! Loopback HTTP server exposing the read-only distribution v2 surface
//! over the storage driver.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use axum::response::Response;
use axum::Router;
use peerpull_core::error::{PullError, Result};
use tokio_util::io::ReaderStream;

use super::driver::{data_path, LocalServeDriver};
use crate::swarm::signal::{Signal, SignalHandle};

/// Media type the manifest is served under.
const MANIFEST_CONTENT_TYPE: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";

struct ServeState {
    driver: LocalServeDriver,
    repository: String,
}

/// A running registry shim.
pub struct RegistryServer {
    addr: SocketAddr,
    shutdown: Signal,
    served: tokio::task::JoinHandle<()>,
}

impl RegistryServer {
    /// Serve the driver on the given address (e.g. `127.0.0.1:5000`).
    pub async fn serve(driver: LocalServeDriver, repository: String, addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| PullError::other(format!("could not bind registry shim {addr}: {e}")))?;
        let addr = listener.local_addr()?;

        let state = Arc::new(ServeState { driver, repository });
        let app = Router::new().fallback(handle).with_state(state);

        let (shutdown, shutdown_handle) = Signal::new();
        let served = tokio::spawn(async move {
            let shutdown_handle: SignalHandle = shutdown_handle;
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown_handle.wait().await })
                .await
            {
                tracing::error!("registry shim failed: {e}");
            }
        });

        tracing::info!(%addr, "Serving local registry");
        Ok(Self {
            addr,
            shutdown,
            served,
        })
    }

    /// The bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shut the server down and wait for it to drain.
    pub async fn shutdown(self) {
        self.shutdown.close();
        let _ = self.served.await;
    }
}

async fn handle(
    State(state): State<Arc<ServeState>>,
    method: Method,
    uri: Uri,
) -> Response {
    let head_only = match method {
        Method::GET => false,
        Method::HEAD => true,
        // The shim is read-only.
        _ => return status(StatusCode::METHOD_NOT_ALLOWED),
    };

    let path = uri.path();
    if path == "/v2/" || path == "/v2" {
        return Response::builder()
            .status(StatusCode::OK)
            .header("Docker-Distribution-Api-Version", "registry/2.0")
            .body(Body::from("{}"))
            .unwrap_or_else(|_| status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    let rest = match path.strip_prefix("/v2/") {
        Some(rest) => rest,
        None => return status(StatusCode::NOT_FOUND),
    };

    if let Some((repository, reference)) = split_once_str(rest, "/manifests/") {
        if repository != state.repository {
            return status(StatusCode::NOT_FOUND);
        }
        return manifest_response(&state, reference, head_only);
    }

    if let Some((repository, digest)) = split_once_str(rest, "/blobs/") {
        if repository != state.repository {
            return status(StatusCode::NOT_FOUND);
        }
        return blob_response(&state, digest, head_only);
    }

    status(StatusCode::NOT_FOUND)
}

fn manifest_response(state: &ServeState, reference: &str, head_only: bool) -> Response {
    // Resolve a tag through its current link; digests resolve directly.
    let digest = if reference.starts_with("sha256:") {
        reference.to_string()
    } else {
        let link = format!(
            "/docker/registry/v2/repositories/{}/_manifests/tags/{}/current/link",
            state.repository, reference
        );
        match state.driver.get_content(&link) {
            Ok(bytes) => String::from_utf8_lossy(bytes).to_string(),
            Err(_) => return status(StatusCode::NOT_FOUND),
        }
    };

    let revision_link = format!(
        "/docker/registry/v2/repositories/{}/_manifests/revisions/sha256/{}/link",
        state.repository,
        digest.strip_prefix("sha256:").unwrap_or(&digest)
    );
    if state.driver.get_content(&revision_link).is_err() {
        return status(StatusCode::NOT_FOUND);
    }

    let bytes = match state.driver.get_content(&data_path(&digest)) {
        Ok(bytes) => bytes.to_vec(),
        Err(_) => return status(StatusCode::NOT_FOUND),
    };

    let body = if head_only {
        Body::empty()
    } else {
        Body::from(bytes.clone())
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, MANIFEST_CONTENT_TYPE)
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(
            "Docker-Content-Digest",
            HeaderValue::from_str(&digest)
                .unwrap_or_else(|_| HeaderValue::from_static("invalid")),
        )
        .body(body)
        .unwrap_or_else(|_| status(StatusCode::INTERNAL_SERVER_ERROR))
}

fn blob_response(state: &ServeState, digest: &str, head_only: bool) -> Response {
    let path = data_path(digest);
    let size = match state.driver.stat(&path) {
        Ok(size) => size,
        Err(_) => return status(StatusCode::NOT_FOUND),
    };

    let body = if head_only {
        Body::empty()
    } else if state.driver.is_external(&path) {
        match state.driver.read_stream(&path, 0) {
            Ok(file) => Body::from_stream(ReaderStream::new(tokio::fs::File::from_std(file))),
            Err(_) => return status(StatusCode::NOT_FOUND),
        }
    } else {
        match state.driver.get_content(&path) {
            Ok(bytes) => Body::from(bytes.to_vec()),
            Err(_) => return status(StatusCode::NOT_FOUND),
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, size)
        .header(
            "Docker-Content-Digest",
            HeaderValue::from_str(digest).unwrap_or_else(|_| HeaderValue::from_static("invalid")),
        )
        .body(body)
        .unwrap_or_else(|_| status(StatusCode::INTERNAL_SERVER_ERROR))
}

fn status(code: StatusCode) -> Response {
    Response::builder()
        .status(code)
        .body(Body::empty())
        .unwrap_or_default()
}

fn split_once_str<'a>(haystack: &'a str, separator: &str) -> Option<(&'a str, &'a str)> {
    let at = haystack.find(separator)?;
    Some((&haystack[..at], &haystack[at + separator.len()..]))
}
