//! Registry distribution support.
//!
//! This module resolves an image reference into a verified signed
//! manifest and the set of blobs that still need to be downloaded:
//!
//! - Image reference parsing (`host[/path]*[:tag|@digest]`)
//! - Signed v1 manifest model and verification
//! - Credential lookup from the engine's configuration file
//! - Manifest fetch over the distribution v2 API and layer selection

pub mod credentials;
pub mod manifest;
pub mod reference;
pub mod resolver;

pub use credentials::Credentials;
pub use manifest::{FsLayer, HistoryEntry, LayerInfo, SignedManifest};
pub use reference::ImageReference;
pub use resolver::{LayerSelection, Resolver};
