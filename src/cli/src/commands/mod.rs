//! CLI command definitions and dispatch.

mod pull;
mod seed;
mod version;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use peerpull_runtime::swarm::backend::native_backend;
use peerpull_runtime::{
    ClientFingerprint, DescriptorOptions, EncryptionMode, SessionConfig, SwarmClient,
};

/// Client fingerprint encoded into the peer id.
const CLIENT_FINGERPRINT: (&str, u8, u8, u8, u8) = ("PP", 0, 1, 0, 0);

/// peerpull: pull container images through a peer-to-peer swarm.
#[derive(Parser)]
#[command(name = "peerpull", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Pull a container image through the swarm
    Pull(pull::PullArgs),
    /// Download a container image and keep seeding it to other clients
    Seed(seed::SeedArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Swarm session flags shared by the pull and seed commands.
#[derive(Args)]
pub struct SwarmFlags {
    /// Lower port that listens for peer connections
    #[arg(long, default_value_t = 6881)]
    pub lower_port: u16,

    /// Upper port that listens for peer connections
    #[arg(long, default_value_t = 6889)]
    pub upper_port: u16,

    /// Number of connection attempts that are made per second
    #[arg(long, default_value_t = 200)]
    pub connections_per_second: u32,

    /// Maximum download rate in kB/s. 0 means unlimited.
    #[arg(long, default_value_t = 0)]
    pub download_rate: u32,

    /// Maximum upload rate in kB/s. 0 means unlimited.
    #[arg(long, default_value_t = 0)]
    pub upload_rate: u32,

    /// Encryption mode for connections: 0 forced, 1 enabled, 2 disabled
    #[arg(long, default_value_t = 0)]
    pub encryption_mode: u8,

    /// Swarm protocol verbosity
    #[arg(long)]
    pub debug: bool,

    /// Use HTTP in place of HTTPS to talk to the registry
    #[arg(long)]
    pub insecure: bool,

    /// IP address of the local machine, used to connect the engine to peerpull
    #[arg(long, default_value = "localhost")]
    pub local_ip: String,

    /// Directory where torrents are downloaded
    #[arg(long)]
    pub torrent_folder: Option<PathBuf>,

    /// Strip web seeds from swarm descriptors before hand-off
    #[arg(long)]
    pub clear_web_seeds: bool,

    /// Strip trackers from swarm descriptors before hand-off
    #[arg(long)]
    pub clear_trackers: bool,

    /// Load through the engine's legacy archive endpoint instead of the
    /// local registry
    #[arg(long)]
    pub legacy_load: bool,
}

impl SwarmFlags {
    /// Session configuration from the flags; rates are given in kB/s.
    pub fn session_config(&self) -> Result<SessionConfig, Box<dyn std::error::Error>> {
        let (id, major, minor, revision, tag) = CLIENT_FINGERPRINT;
        Ok(SessionConfig {
            fingerprint: ClientFingerprint::new(id, major, minor, revision, tag),
            lower_listen_port: self.lower_port,
            upper_listen_port: self.upper_port,
            connections_per_second: self.connections_per_second,
            max_download_rate: self.download_rate * 1024,
            max_upload_rate: self.upload_rate * 1024,
            encryption: EncryptionMode::from_flag(self.encryption_mode)?,
            debug: self.debug,
        })
    }

    pub fn descriptor_options(&self) -> DescriptorOptions {
        DescriptorOptions {
            clear_web_seeds: self.clear_web_seeds,
            clear_trackers: self.clear_trackers,
        }
    }

    /// Directory torrents are downloaded into.
    pub fn save_dir(&self) -> PathBuf {
        self.torrent_folder
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("peerpull").join("torrents"))
    }

    /// Build the swarm client over the native backend.
    pub fn build_client(&self) -> Result<Arc<SwarmClient>, Box<dyn std::error::Error>> {
        let backend = native_backend()?;
        let client = SwarmClient::new(backend, self.session_config()?, self.descriptor_options())?;
        Ok(client)
    }
}

/// Open the container engine collaborator.
pub(crate) fn open_engine(
) -> Result<Arc<peerpull_runtime::DockerEngine>, Box<dyn std::error::Error>> {
    Ok(Arc::new(peerpull_runtime::DockerEngine::from_env()?))
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Pull(args) => pull::execute(args).await,
        Command::Seed(args) => seed::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
