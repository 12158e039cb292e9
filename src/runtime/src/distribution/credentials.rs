//! Registry credential lookup from the engine's configuration file.
//!
//! Reads per-registry credentials from the Docker CLI configuration
//! (`$DOCKER_CONFIG/config.json` or `~/.docker/config.json`). Absence of
//! the file or of an entry for a registry is not an error.

use std::collections::HashMap;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use peerpull_core::error::{PullError, Result};
use serde::Deserialize;

/// Basic-auth credentials for a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// One entry in the engine configuration's auth map.
#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// The subset of the engine configuration file we consume.
#[derive(Debug, Default, Deserialize)]
struct EngineConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

/// Credential store backed by the engine's configuration file.
pub struct CredentialStore {
    path: Option<PathBuf>,
}

impl CredentialStore {
    /// Create a store at the engine's default configuration path.
    pub fn from_engine_config() -> Self {
        let path = std::env::var_os("DOCKER_CONFIG")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".docker")))
            .map(|dir| dir.join("config.json"));
        Self { path }
    }

    /// Create a store reading from a specific configuration file.
    pub fn at_path(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    /// Look up credentials for the given registry host.
    ///
    /// Returns `None` when no configuration exists or no entry matches.
    pub fn lookup(&self, registry: &str) -> Result<Option<Credentials>> {
        let path = match &self.path {
            Some(path) if path.exists() => path,
            _ => return Ok(None),
        };

        let data = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&data).map_err(|e| {
            PullError::AuthLookupFailed(format!("could not parse {}: {e}", path.display()))
        })?;

        let wanted = normalize_registry(registry);
        for (host, entry) in &config.auths {
            if normalize_registry(strip_scheme(host)) == wanted {
                return entry.credentials().map(Some);
            }
        }

        Ok(None)
    }
}

impl AuthEntry {
    fn credentials(&self) -> Result<Credentials> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Ok(Credentials {
                username: username.clone(),
                password: password.clone(),
            });
        }

        let auth = self
            .auth
            .as_deref()
            .ok_or_else(|| PullError::AuthLookupFailed("auth entry has no credentials".into()))?;
        let decoded = STANDARD
            .decode(auth)
            .map_err(|e| PullError::AuthLookupFailed(format!("bad auth encoding: {e}")))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|e| PullError::AuthLookupFailed(format!("bad auth encoding: {e}")))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| PullError::AuthLookupFailed("auth entry is not user:pass".into()))?;

        Ok(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Registry hosts may appear in the config as full index URLs
/// (e.g. "https://index.docker.io/v1/"); reduce them to the host name.
fn strip_scheme(host: &str) -> &str {
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);
    host.split('/').next().unwrap_or(host)
}

/// Normalize Docker Hub aliases to a single host name.
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    if r == "docker.io" || r == "registry-1.docker.io" || r == "index.docker.io" {
        "index.docker.io".to_string()
    } else {
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, contents: &str) -> CredentialStore {
        let path = dir.path().join("config.json");
        std::fs::write(&path, contents).unwrap();
        CredentialStore::at_path(path)
    }

    #[test]
    fn test_lookup_encoded_auth() {
        let dir = TempDir::new().unwrap();
        let auth = STANDARD.encode("user:pass");
        let store = write_config(
            &dir,
            &format!("{{\"auths\":{{\"q.example\":{{\"auth\":\"{auth}\"}}}}}}"),
        );

        let creds = store.lookup("q.example").unwrap().unwrap();
        assert_eq!(creds.username, "user");
        assert_eq!(creds.password, "pass");
    }

    #[test]
    fn test_lookup_plain_fields() {
        let dir = TempDir::new().unwrap();
        let store = write_config(
            &dir,
            "{\"auths\":{\"q.example\":{\"username\":\"u\",\"password\":\"p\"}}}",
        );

        let creds = store.lookup("q.example").unwrap().unwrap();
        assert_eq!(creds.username, "u");
        assert_eq!(creds.password, "p");
    }

    #[test]
    fn test_lookup_scheme_prefixed_host() {
        let dir = TempDir::new().unwrap();
        let auth = STANDARD.encode("u:p");
        let store = write_config(
            &dir,
            &format!("{{\"auths\":{{\"https://q.example/\":{{\"auth\":\"{auth}\"}}}}}}"),
        );

        assert!(store.lookup("q.example").unwrap().is_some());
    }

    #[test]
    fn test_lookup_docker_hub_aliases() {
        let dir = TempDir::new().unwrap();
        let auth = STANDARD.encode("u:p");
        let store = write_config(
            &dir,
            &format!("{{\"auths\":{{\"https://index.docker.io/v1/\":{{\"auth\":\"{auth}\"}}}}}}"),
        );

        assert!(store.lookup("docker.io").unwrap().is_some());
        assert!(store.lookup("registry-1.docker.io").unwrap().is_some());
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let store = CredentialStore::at_path(PathBuf::from("/nonexistent/config.json"));
        assert!(store.lookup("q.example").unwrap().is_none());
    }

    #[test]
    fn test_missing_entry_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let store = write_config(&dir, "{\"auths\":{}}");
        assert!(store.lookup("q.example").unwrap().is_none());
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = write_config(&dir, "not json");
        assert!(matches!(
            store.lookup("q.example"),
            Err(PullError::AuthLookupFailed(_))
        ));
    }
}
