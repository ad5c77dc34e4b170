//! Common interface for graphics API backends.

use anyhow::Result;

use crate::format::ApiKind;
use crate::frame::{FrameBuffer, FrameBufferMut};
use crate::texture::{RawTexture, TextureDesc};

/// Driver-level operations behind an [`InteropSession`](crate::InteropSession).
///
/// Implementations exist for D3D11 (Windows, shared handles plus
/// `WGL_NV_DX_interop2` for OpenGL consumers), Metal (macOS, global IOSurface
/// IDs) and host memory (every platform, in-process only).
///
/// Backends do no bookkeeping of their own beyond what the driver needs:
/// allow-list checks, binding caches and staleness checks live in the session.
pub trait InteropBackend {
    /// Downcast to a concrete type, e.g. to reach the D3D11 device.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Mutable downcast to a concrete type.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;

    /// The API textures created by this backend belong to.
    fn api_kind(&self) -> ApiKind;

    /// Whether [`open_shared`](Self::open_shared) can produce handles for `api`.
    fn supports(&self, api: ApiKind) -> bool;

    /// Allocate a texture other processes can open, returning it together with
    /// the OS-level share handle.
    fn create_shared(&mut self, desc: &TextureDesc) -> Result<(RawTexture, u64)>;

    /// Open a share handle published by `creator` as a texture usable by `api`.
    fn open_shared(
        &mut self,
        creator: ApiKind,
        handle: u64,
        desc: &TextureDesc,
        api: ApiKind,
    ) -> Result<RawTexture>;

    /// Copy `src` into `dst`. Completes before returning.
    fn copy_in(&mut self, dst: &RawTexture, desc: &TextureDesc, src: &FrameBuffer<'_>)
        -> Result<()>;

    /// Copy `src` out into `dst`. Completes before returning.
    fn copy_out(
        &mut self,
        src: &RawTexture,
        desc: &TextureDesc,
        dst: &mut FrameBufferMut<'_>,
    ) -> Result<()>;

    /// Take exclusive access to `texture` for the local API.
    fn lock(&mut self, _texture: &RawTexture) -> Result<()> {
        Ok(())
    }

    /// Release access taken by [`lock`](Self::lock).
    fn unlock(&mut self, _texture: &RawTexture) {}

    /// Free everything the driver holds for `texture`.
    fn release(&mut self, texture: RawTexture);
}
