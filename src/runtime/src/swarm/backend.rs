//! The native swarm-library seam.
//!
//! The embedded peer-to-peer library is an external collaborator. This
//! module defines the narrow capability surface the session consumes:
//! listen-port binding, discovery services, add/remove torrent, status
//! queries and the alert queue. The library is single-threaded; every
//! call through this trait is serialized under the session lock.

use std::path::PathBuf;
use std::time::Duration;

use peerpull_core::error::{PullError, Result};

/// Interval between alert-queue polls.
pub const ALERT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// An opaque handle to a torrent in the native session.
///
/// Handles expose equality only; mapping an alert back to a task is a
/// linear scan over the session's task map.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentHandle {
    raw: u64,
}

impl TorrentHandle {
    /// Wrap a raw native handle value.
    pub fn from_raw(raw: u64) -> Self {
        Self { raw }
    }
}

/// A torrent's current task, as reported by the native session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentState {
    QueuedForChecking,
    CheckingFiles,
    DownloadingMetadata,
    Downloading,
    Finished,
    Seeding,
    Allocating,
    CheckingResumeData,
    Unknown,
}

impl std::fmt::Display for TorrentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TorrentState::QueuedForChecking => "Queued for checking",
            TorrentState::CheckingFiles => "Checking files",
            TorrentState::DownloadingMetadata => "Downloading metadata",
            TorrentState::Downloading => "Downloading",
            TorrentState::Finished => "Finished",
            TorrentState::Seeding => "Seeding",
            TorrentState::Allocating => "Allocating",
            TorrentState::CheckingResumeData => "Checking resume data",
            TorrentState::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

/// Status snapshot for one torrent.
#[derive(Debug, Clone)]
pub struct TorrentStatus {
    /// The torrent's name (the root name of its content).
    pub name: String,
    /// Current state.
    pub state: TorrentState,
    /// Download completion in `[0, 1]`.
    pub progress: f32,
    /// Total download rate across peers, in kB/s.
    pub download_rate: f32,
    /// Total upload rate across peers, in kB/s.
    pub upload_rate: f32,
    /// Peer connections for this torrent.
    pub num_peers: u32,
    /// Connected peers that are seeding.
    pub num_seeds: u32,
}

/// A notification from the native session's alert queue.
#[derive(Debug, Clone)]
pub enum SwarmAlert {
    /// A torrent finished downloading.
    TorrentFinished { handle: TorrentHandle },
    /// Any other alert; logged verbatim in debug mode.
    Message { what: String, message: String },
}

/// Identifies this client and its version, encoded into the peer id.
#[derive(Debug, Clone)]
pub struct ClientFingerprint {
    /// Exactly two characters identifying the client.
    pub id: String,
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
    pub tag: u8,
}

impl ClientFingerprint {
    pub fn new(id: &str, major: u8, minor: u8, revision: u8, tag: u8) -> Self {
        Self {
            id: id.to_string(),
            major,
            minor,
            revision,
            tag,
        }
    }

    /// Validate the two-character id and single-digit version parts.
    pub fn validate(&self) -> Result<()> {
        if self.id.chars().count() != 2 {
            return Err(PullError::other(format!(
                "client fingerprint id '{}' must be exactly two characters",
                self.id
            )));
        }
        for (part, value) in [
            ("major", self.major),
            ("minor", self.minor),
            ("revision", self.revision),
            ("tag", self.tag),
        ] {
            if value > 9 {
                return Err(PullError::other(format!(
                    "client fingerprint {part} version {value} must be within 0..=9"
                )));
            }
        }
        Ok(())
    }
}

/// Peer protocol encryption policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    /// Only encrypted connections are allowed.
    Forced,
    /// Encryption is preferred but unencrypted connections are accepted.
    Enabled,
    /// Only unencrypted connections are allowed.
    Disabled,
}

impl EncryptionMode {
    /// Parse the numeric flag value (0 forced, 1 enabled, 2 disabled).
    pub fn from_flag(value: u8) -> Result<Self> {
        match value {
            0 => Ok(EncryptionMode::Forced),
            1 => Ok(EncryptionMode::Enabled),
            2 => Ok(EncryptionMode::Disabled),
            _ => Err(PullError::other(format!(
                "encryption mode {value} must be 0, 1 or 2"
            ))),
        }
    }
}

/// Configuration applied to the native session before it starts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub fingerprint: ClientFingerprint,
    /// Lowest port the session will try to listen on.
    pub lower_listen_port: u16,
    /// Highest port the session will try to listen on.
    pub upper_listen_port: u16,
    /// Maximum outgoing connection attempts per second.
    pub connections_per_second: u32,
    /// Maximum download bandwidth in bytes/s; zero means unlimited.
    pub max_download_rate: u32,
    /// Maximum upload bandwidth in bytes/s; zero means unlimited.
    pub max_upload_rate: u32,
    pub encryption: EncryptionMode,
    /// Emit every available alert instead of status and errors only.
    pub debug: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fingerprint: ClientFingerprint::new("PP", 0, 1, 0, 0),
            lower_listen_port: 6881,
            upper_listen_port: 6889,
            connections_per_second: 200,
            max_download_rate: 0,
            max_upload_rate: 0,
            encryption: EncryptionMode::Forced,
            debug: false,
        }
    }
}

/// Where the torrent content comes from.
#[derive(Debug, Clone)]
pub enum TorrentSource {
    /// A magnet URI, passed through to the native session.
    Magnet(String),
    /// A swarm-descriptor file on disk.
    DescriptorFile(PathBuf),
}

/// Parameters for adding one torrent to the session.
#[derive(Debug, Clone)]
pub struct AddTorrentParams {
    pub source: TorrentSource,
    /// Directory the content is downloaded into.
    pub save_path: PathBuf,
    /// Auto-management must stay off so the session never pauses tasks.
    pub auto_managed: bool,
}

/// Capability surface of the native swarm library.
///
/// Implementations are not assumed to be safe for concurrent entry; the
/// session serializes all calls.
pub trait SwarmBackend: Send {
    /// Apply session-wide settings (rates, encryption, fingerprint, alert mask).
    fn apply_settings(&mut self, config: &SessionConfig);

    /// Bind to the first free port in `[lower, upper]`, returning it.
    fn listen_on(&mut self, lower: u16, upper: u16) -> Result<u16>;

    /// Start LAN/UPnP/NAT-PMP discovery services.
    fn start_discovery(&mut self);

    /// Stop discovery services.
    fn stop_discovery(&mut self);

    /// Add a torrent, returning its opaque handle.
    fn add_torrent(&mut self, params: AddTorrentParams) -> Result<TorrentHandle>;

    /// Remove a torrent from the session.
    fn remove_torrent(&mut self, handle: &TorrentHandle);

    /// The torrent's content root name, once metadata is known.
    fn torrent_name(&self, handle: &TorrentHandle) -> Option<String>;

    /// Status snapshot for a torrent.
    fn status(&self, handle: &TorrentHandle) -> Option<TorrentStatus>;

    /// Pop the next queued alert, if any.
    fn pop_alert(&mut self) -> Option<SwarmAlert>;
}

/// Construct the native swarm backend.
///
/// The bindings are gated behind the `native-swarm` cargo feature; when
/// built without it, only injected backends (tests, embedders) can drive
/// the session.
pub fn native_backend() -> Result<Box<dyn SwarmBackend>> {
    Err(PullError::Unsupported(
        "this build carries no native swarm backend".to_string(),
    ))
}
