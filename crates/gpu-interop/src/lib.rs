//! Cross-API, cross-process GPU texture interop.
//!
//! An [`InteropSession`] owns one graphics device (through an
//! [`InteropBackend`]), at most one shared texture that other processes can
//! open, and a cache of bindings that expose foreign share handles to a
//! requested graphics API. Which `(format, API)` pairs may be bound is decided
//! by an [`InteropPolicy`] allow-list.
//!
//! Backends:
//!
//! - [`host`]: host-memory textures, every platform, in-process handles only.
//! - `dx11` (Windows): D3D11 shared handles; OpenGL consumers via
//!   `WGL_NV_DX_interop2`.
//! - `metal` (macOS): global IOSurface IDs; Metal and OpenGL consumers.

pub mod backend;
pub mod error;
pub mod format;
pub mod frame;
pub mod host;
pub mod session;
pub mod texture;

pub use backend::InteropBackend;
pub use error::InteropError;
pub use format::{ApiKind, InteropPolicy, PixelFormat, PolicyRule};
pub use frame::{FrameBuffer, FrameBufferMut, FrameSource, FrameTarget};
pub use host::HostBackend;
pub use session::{AccessGuard, InteropSession, PendingShared};
pub use texture::{LocalTexture, RawTexture, ShareDescriptor, TextureDesc, TextureId};

// Platform-specific implementations.

#[cfg(target_os = "macos")]
pub mod metal;
#[cfg(target_os = "macos")]
pub use metal::MetalBackend;

#[cfg(target_os = "windows")]
pub mod dx11;
#[cfg(target_os = "windows")]
pub use dx11::Dx11Backend;
