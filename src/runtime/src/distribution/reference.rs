//! Image reference parsing.
//!
//! Parses references like `quay.example/ns/img:v1` into structured components.

use peerpull_core::error::{PullError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when neither a tag nor a digest is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname, possibly with a port (e.g., "quay.example:8443")
    pub registry: String,
    /// Repository path (e.g., "ns/img")
    pub repository: String,
    /// Tag (e.g., "latest", "v1")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string of the form `host[/path]*[:tag|@digest]`.
    ///
    /// A leading component is treated as a registry host when it contains a
    /// dot, a colon, or is "localhost"; otherwise the default registry is
    /// assumed and single-segment names are expanded under `library/`.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(PullError::bad_reference(reference, "empty reference"));
        }

        // Split off the digest first.
        let (rest, digest) = match reference.rsplit_once('@') {
            Some((rest, digest)) => {
                if !digest.contains(':') {
                    return Err(PullError::bad_reference(
                        reference,
                        "digest must be of the form algorithm:hex",
                    ));
                }
                (rest, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A colon after the last slash separates the tag, unless it marks a
        // registry port in a single-component name.
        let (name, tag) = match rest.rfind('/') {
            Some(slash) => match rest[slash + 1..].rfind(':') {
                Some(colon) => (
                    &rest[..slash + 1 + colon],
                    Some(rest[slash + 2 + colon..].to_string()),
                ),
                None => (rest, None),
            },
            None => match rest.rfind(':') {
                Some(colon) if !rest[colon + 1..].chars().all(|c| c.is_ascii_digit()) => {
                    (&rest[..colon], Some(rest[colon + 1..].to_string()))
                }
                _ => (rest, None),
            },
        };

        if tag.as_deref() == Some("") {
            return Err(PullError::bad_reference(reference, "empty tag"));
        }

        let (registry, repository) = split_registry_repository(reference, name)?;

        // Apply the default tag only when no digest pins the manifest.
        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// The tag or digest used to address the manifest, defaulting to "latest".
    pub fn tag_or_digest(&self) -> &str {
        if let Some(ref tag) = self.tag {
            tag
        } else if let Some(ref digest) = self.digest {
            digest
        } else {
            DEFAULT_TAG
        }
    }

    /// The tag, defaulting to "latest" when the reference carries none.
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// The full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(reference: &str, name: &str) -> Result<(String, String)> {
    if let Some(slash) = name.find('/') {
        let first = &name[..slash];
        if first.contains('.') || first.contains(':') || first == "localhost" {
            let repository = &name[slash + 1..];
            if repository.is_empty() {
                return Err(PullError::bad_reference(reference, "empty repository"));
            }
            return Ok((first.to_string(), repository.to_string()));
        }
    }

    // No registry detected
    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };

    Ok((DEFAULT_REGISTRY.to_string(), repository))
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_repo_tag() {
        let r = ImageReference::parse("q.example/ns/img:v1").unwrap();
        assert_eq!(r.registry, "q.example");
        assert_eq!(r.repository, "ns/img");
        assert_eq!(r.tag, Some("v1".to_string()));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_default_tag() {
        let r = ImageReference::parse("q.example/ns/img").unwrap();
        assert_eq!(r.tag, Some("latest".to_string()));
        assert_eq!(r.tag_or_digest(), "latest");
    }

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, Some("latest".to_string()));
    }

    #[test]
    fn test_parse_user_repo_with_tag() {
        let r = ImageReference::parse("myuser/myimage:v1.0").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "myuser/myimage");
        assert_eq!(r.tag, Some("v1.0".to_string()));
    }

    #[test]
    fn test_parse_digest() {
        let r = ImageReference::parse(
            "q.example/ns/img@sha256:abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890",
        )
        .unwrap();
        assert_eq!(r.registry, "q.example");
        assert_eq!(r.repository, "ns/img");
        assert_eq!(r.tag, None);
        assert!(r.tag_or_digest().starts_with("sha256:"));
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageReference::parse("q.example/ns/img:v1@sha256:abc123").unwrap();
        assert_eq!(r.tag, Some("v1".to_string()));
        assert_eq!(r.digest, Some("sha256:abc123".to_string()));
        // The tag wins for manifest addressing.
        assert_eq!(r.tag_or_digest(), "v1");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("registry.example:5000/img:v1").unwrap();
        assert_eq!(r.registry, "registry.example:5000");
        assert_eq!(r.repository, "img");
        assert_eq!(r.tag, Some("v1".to_string()));
    }

    #[test]
    fn test_parse_localhost() {
        let r = ImageReference::parse("localhost/img:test").unwrap();
        assert_eq!(r.registry, "localhost");
        assert_eq!(r.repository, "img");
    }

    #[test]
    fn test_parse_alphanumeric_tag_on_bare_name() {
        let r = ImageReference::parse("myimage:1234abc").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/myimage");
        assert_eq!(r.tag, Some("1234abc".to_string()));
    }

    #[test]
    fn test_parse_empty() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("  ").is_err());
    }

    #[test]
    fn test_parse_bad_digest() {
        assert!(ImageReference::parse("nginx@notadigest").is_err());
    }

    #[test]
    fn test_full_reference_round_trip() {
        let r = ImageReference::parse("q.example/ns/img:v1").unwrap();
        assert_eq!(r.full_reference(), "q.example/ns/img:v1");
        assert_eq!(format!("{}", r), "q.example/ns/img:v1");
    }
}
