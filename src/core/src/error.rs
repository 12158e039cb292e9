use thiserror::Error;

/// peerpull error types
#[derive(Error, Debug)]
pub enum PullError {
    /// Image reference could not be parsed
    #[error("Bad image reference '{reference}': {message}")]
    BadReference { reference: String, message: String },

    /// Credential lookup from the engine configuration failed
    #[error("Credential lookup failed: {0}")]
    AuthLookupFailed(String),

    /// Manifest could not be fetched from the registry
    #[error("Manifest unavailable for {reference}: {message}")]
    ManifestUnavailable { reference: String, message: String },

    /// Manifest was fetched but is not of the supported schema
    #[error("Unsupported manifest: {0}")]
    ManifestUnsupported(String),

    /// Manifest signature did not verify
    #[error("Invalid manifest signature: {0}")]
    SignatureInvalid(String),

    /// No listen port in the configured range was available
    #[error("Could not bind swarm session to ports {lower}..{upper}: {message}")]
    BindFailed {
        lower: u16,
        upper: u16,
        message: String,
    },

    /// Session operation attempted outside the running state
    #[error("Swarm session is not running")]
    NotRunning,

    /// A download for the same descriptor URL is already active
    #[error("Torrent {0} is already being downloaded")]
    Duplicate(String),

    /// Swarm descriptor could not be fetched
    #[error("Could not fetch swarm descriptor {url}: {message}")]
    DescriptorFetchFailed { url: String, message: String },

    /// The native session rejected the torrent
    #[error("Could not add torrent: {0}")]
    AddFailed(String),

    /// Download interrupted before completion
    #[error("Download aborted: {0}")]
    DownloadAborted(String),

    /// Image assembly failed
    #[error("Assembly failed: {0}")]
    AssemblyFailed(String),

    /// The container engine rejected the image
    #[error("Engine load failed: {0}")]
    EngineLoadFailed(String),

    /// Operation is not supported
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl PullError {
    /// Create a bad-reference error
    pub fn bad_reference<R: Into<String>, M: Into<String>>(reference: R, message: M) -> Self {
        PullError::BadReference {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Create a manifest-unavailable error
    pub fn manifest_unavailable<R: Into<String>, M: Into<String>>(reference: R, message: M) -> Self {
        PullError::ManifestUnavailable {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Create a descriptor-fetch error
    pub fn descriptor_fetch<U: Into<String>, M: Into<String>>(url: U, message: M) -> Self {
        PullError::DescriptorFetchFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an assembly error
    pub fn assembly<S: Into<String>>(msg: S) -> Self {
        PullError::AssemblyFailed(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        PullError::Other(msg.into())
    }
}

/// Result type alias for peerpull operations
pub type Result<T> = std::result::Result<T, PullError>;
