//! Swarm download coordination.
//!
//! Owns the embedded peer-to-peer session and turns a list of torrent
//! descriptors into parallel downloads with per-task completion signals:
//!
//! - `backend` - the opaque native-library seam
//! - `descriptor` - descriptor URLs, fetch and normalization
//! - `session` - the at-most-one swarm session and its task map
//! - `coordinator` - batch fan-out, aggregate completion, shutdown
//! - `signal` - closed-exactly-once completion signals

pub mod backend;
pub mod coordinator;
pub mod descriptor;
pub mod session;
pub mod signal;

pub use backend::{
    native_backend, ClientFingerprint, EncryptionMode, SessionConfig, SwarmBackend, TorrentHandle,
    TorrentState, TorrentStatus,
};
pub use coordinator::{download_torrents, BatchOptions, DownloadHandle};
pub use descriptor::{DescriptorOptions, TorrentDescriptor};
pub use session::SwarmClient;
pub use signal::{Signal, SignalHandle};
