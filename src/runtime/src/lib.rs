//! peerpull Runtime - swarm-accelerated container image pulls.
//!
//! This crate implements the pull pipeline: manifest resolution against
//! the registry's distribution API, a torrent plan per blob, a swarm
//! download coordinator over an embedded peer-to-peer session, and the
//! assembly of the downloaded blobs back into the local container engine
//! (either through a loopback registry the engine pulls from, or through
//! the engine's legacy load-archive format).

pub mod distribution;
pub mod engine;
pub mod load;
pub mod progress;
pub mod pull;
pub mod registry;
pub mod swarm;

// Re-export commonly used types
pub use distribution::{
    Credentials, ImageReference, LayerInfo, LayerSelection, Resolver, SignedManifest,
};
pub use engine::{ArchiveSource, ContainerEngine, DockerEngine};
pub use pull::{LoadOption, PullOptions, Puller};
pub use swarm::{
    ClientFingerprint, DescriptorOptions, DownloadHandle, EncryptionMode, SessionConfig,
    SwarmBackend, SwarmClient, TorrentDescriptor,
};

/// peerpull runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
