//! Errors returned by [`InteropSession`](crate::InteropSession).

use thiserror::Error;

use crate::format::{ApiKind, PixelFormat};

#[derive(Error, Debug)]
pub enum InteropError {
    /// The pair is not on the interop allow-list. Nothing was bound.
    #[error("{format} cannot be shared with {api}")]
    FormatIncompatible { format: PixelFormat, api: ApiKind },

    /// The texture was replaced or closed, or the frame geometry does not
    /// match it.
    #[error("stale texture: {0}")]
    StaleTexture(String),

    /// The backend cannot produce handles for this API at all.
    #[error("{backend} backend cannot bind textures for {api}")]
    UnsupportedApi { backend: ApiKind, api: ApiKind },

    /// A shared texture already exists; resize through `prepare_shared`.
    #[error("session already owns a shared texture")]
    AlreadyShared,

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Driver-level failure. The session has been closed.
    #[error("interop failure: {0:#}")]
    Failure(#[from] anyhow::Error),
}
