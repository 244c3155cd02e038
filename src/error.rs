// Error taxonomy for the bootstrap pipeline.

use thiserror::Error;

/// Network and status failures while fetching a ROM.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Failed to fetch ROM \"{name}\": {status} {reason}")]
    Status {
        name: String,
        status: u16,
        reason: String,
    },

    #[error("Failed to fetch ROM \"{name}\": {source}")]
    Request {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Error reading ROM data for \"{name}\": {message}")]
    Stream { name: String, message: String },

    #[error("invalid ROM url for \"{name}\": {message}")]
    Url { name: String, message: String },
}

/// Heuristic validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("ROM file \"{name}\" appears to be too small ({len} bytes). Possible server error.")]
    TooSmall { name: String, len: usize },

    #[error("ROM file \"{name}\" not found. Server returned HTML error page instead of ROM data.")]
    LooksLikeHtml { name: String },
}

/// Cache-layer failures. Never escalated past the bootstrap; only logged.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Fatal bootstrap and session errors, annotated with the ROM name.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error("Failed to install ROM \"{name}\" into the emulator: {source:#}")]
    EngineInstall {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to load ROM \"{name}\": {message}")]
    EngineStart { name: String, message: String },

    #[error("The emulator has encountered a fatal error and needs to restart. Please reload the page.")]
    EngineCrash,

    #[error("session already bootstrapped")]
    AlreadyStarted,

    #[error("unknown button \"{0}\"")]
    UnknownButton(String),
}

impl LaunchError {
    /// Short kind label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LaunchError::Transfer(_) => "transfer",
            LaunchError::Verification(_) => "verification",
            LaunchError::EngineInstall { .. } => "engine_install",
            LaunchError::EngineStart { .. } => "engine_start",
            LaunchError::EngineCrash => "engine_crash",
            LaunchError::AlreadyStarted => "already_started",
            LaunchError::UnknownButton(_) => "unknown_button",
        }
    }
}

pub type LaunchResult<T> = std::result::Result<T, LaunchError>;
