//! Error types for MeshWifi

use thiserror::Error;

/// Result type alias using MeshWifi Error
pub type Result<T> = std::result::Result<T, Error>;

/// MeshWifi error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("No elevation binary confirmed a root identity")]
    PrivilegeUnavailable,

    #[error("Mesh device unavailable: found {found} device(s), need {required}")]
    DeviceUnavailable { found: usize, required: usize },

    #[error("Interface command `{command}` failed: {stderr}")]
    InterfaceFailure { command: String, stderr: String },

    #[error("Topology collection failed: {0}")]
    Collection(#[source] Box<Error>),

    #[error("Malformed tool output `{line}`: {reason}")]
    MalformedOutput { line: String, reason: String },

    #[error("Subscriber channel already connected: {id}")]
    DuplicateChannel { id: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Mesh controller is no longer running")]
    ControllerStopped,
}

impl Error {
    /// Wrap an error raised while collecting topology
    pub fn collection(inner: Error) -> Self {
        match inner {
            already @ Error::Collection(_) => already,
            other => Error::Collection(Box::new(other)),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
