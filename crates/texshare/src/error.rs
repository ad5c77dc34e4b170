use gpu_interop::{ApiKind, InteropError, PixelFormat};
use texshare_registry::RegistryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A live sender already uses this name.
    #[error("sender name {0:?} is already in use")]
    NameInUse(String),

    /// An empty name means the active sender was asked for and none is live.
    #[error("no sender named {0:?}")]
    NotFound(String),

    #[error("{format} cannot be shared with {api}")]
    FormatIncompatible { format: PixelFormat, api: ApiKind },

    /// A texture or frame no longer matches the sender's geometry.
    #[error("stale texture: {0}")]
    StaleTexture(String),

    /// The shared directory was written by an incompatible version.
    #[error("incompatible registry: {0}")]
    RegistryIncompatible(String),

    #[error("invalid sender name: {0}")]
    InvalidName(String),

    #[error("registry is full ({0} senders)")]
    RegistryFull(usize),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("receiver is not bound to a sender")]
    NotBound,

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Driver-level failure. The interop session involved has been torn down.
    #[error("interop failure: {0:#}")]
    InteropFailure(#[source] anyhow::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Registry(RegistryError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NameInUse(name) => Error::NameInUse(name),
            RegistryError::NotFound(name) => Error::NotFound(name),
            RegistryError::Incompatible(why) => Error::RegistryIncompatible(why),
            RegistryError::InvalidName(why) => Error::InvalidName(why),
            RegistryError::Full(n) => Error::RegistryFull(n),
            other => Error::Registry(other),
        }
    }
}

impl From<InteropError> for Error {
    fn from(e: InteropError) -> Self {
        match e {
            InteropError::FormatIncompatible { format, api } => {
                Error::FormatIncompatible { format, api }
            }
            InteropError::StaleTexture(why) => Error::StaleTexture(why),
            InteropError::InvalidFrame(why) => Error::InvalidFrame(why),
            InteropError::Failure(e) => Error::InteropFailure(e),
            e @ (InteropError::UnsupportedApi { .. } | InteropError::AlreadyShared) => {
                Error::InvalidState(e.to_string())
            }
        }
    }
}

impl Error {
    /// Whether the session that returned this error has been torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InteropFailure(_) | Error::RegistryIncompatible(_)
        )
    }
}
