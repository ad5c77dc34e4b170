//! Host-memory backend.
//!
//! Textures live in process memory and share handles are keys into a
//! process-wide table, so handles are only meaningful inside the process that
//! created them. Bindings for other API kinds alias the same surface. This is
//! the backend used on platforms without a GPU path and in tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::backend::InteropBackend;
use crate::format::ApiKind;
use crate::frame::{copy_rows, FrameBuffer, FrameBufferMut, FrameSource, FrameTarget};
use crate::texture::{RawTexture, TextureDesc};

pub type HostSurfaceRef = Arc<RwLock<HostSurface>>;

/// Tightly packed pixels plus their description.
pub struct HostSurface {
    desc: TextureDesc,
    pixels: Vec<u8>,
    locked: bool,
}

impl HostSurface {
    pub(crate) fn allocate(desc: TextureDesc) -> Option<HostSurfaceRef> {
        let len = desc.image_bytes()?;
        Some(Arc::new(RwLock::new(Self {
            desc,
            pixels: vec![0; len],
            locked: false,
        })))
    }

    pub fn desc(&self) -> TextureDesc {
        self.desc
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[cfg(target_os = "macos")]
    pub(crate) fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }
}

impl fmt::Debug for HostSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostSurface")
            .field("desc", &self.desc)
            .field("locked", &self.locked)
            .finish()
    }
}

static SHARED: Lazy<Mutex<HashMap<u64, HostSurfaceRef>>> = Lazy::new(Default::default);
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn host_surface(texture: &RawTexture) -> Result<&HostSurfaceRef> {
    match texture {
        RawTexture::Host(surface) => Ok(surface),
        other => bail!("host backend cannot access {other:?}"),
    }
}

/// Host-memory [`InteropBackend`].
#[derive(Default)]
pub struct HostBackend {
    /// Handles published by this backend, removed from the table on release.
    published: HashMap<u64, HostSurfaceRef>,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of surfaces this backend currently publishes.
    pub fn published_count(&self) -> usize {
        self.published.len()
    }
}

impl InteropBackend for HostBackend {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn api_kind(&self) -> ApiKind {
        ApiKind::Host
    }

    fn supports(&self, _api: ApiKind) -> bool {
        true
    }

    fn create_shared(&mut self, desc: &TextureDesc) -> Result<(RawTexture, u64)> {
        let Some(surface) = HostSurface::allocate(*desc) else {
            bail!("no texel size known for {}", desc.format);
        };
        let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        SHARED.lock().insert(handle, surface.clone());
        self.published.insert(handle, surface.clone());
        debug!("host surface {handle} created ({}x{})", desc.width, desc.height);
        Ok((RawTexture::Host(surface), handle))
    }

    fn open_shared(
        &mut self,
        creator: ApiKind,
        handle: u64,
        desc: &TextureDesc,
        _api: ApiKind,
    ) -> Result<RawTexture> {
        if creator != ApiKind::Host {
            bail!("host backend cannot open {creator} share handles");
        }
        let Some(surface) = SHARED.lock().get(&handle).cloned() else {
            bail!("unknown host share handle {handle}");
        };
        let found = surface.read().desc;
        if found != *desc {
            bail!("share handle {handle} holds {found:?}, expected {desc:?}");
        }
        Ok(RawTexture::Host(surface))
    }

    fn copy_in(
        &mut self,
        dst: &RawTexture,
        desc: &TextureDesc,
        src: &FrameBuffer<'_>,
    ) -> Result<()> {
        let dst = host_surface(dst)?;
        let row = desc.row_bytes().unwrap_or(0);
        let height = desc.height as usize;
        match &src.source {
            FrameSource::Bytes(bytes) => {
                let mut dst = dst.write();
                copy_rows(bytes, src.stride, &mut dst.pixels, row, row, height, src.invert);
            }
            FrameSource::Texture(texture) => {
                let from = host_surface(texture.raw())?;
                if Arc::ptr_eq(from, dst) {
                    if src.invert {
                        let mut surface = dst.write();
                        let copy = surface.pixels.clone();
                        copy_rows(&copy, row, &mut surface.pixels, row, row, height, true);
                    }
                    return Ok(());
                }
                let from = from.read();
                let mut dst = dst.write();
                copy_rows(&from.pixels, row, &mut dst.pixels, row, row, height, src.invert);
            }
        }
        Ok(())
    }

    fn copy_out(
        &mut self,
        src: &RawTexture,
        desc: &TextureDesc,
        dst: &mut FrameBufferMut<'_>,
    ) -> Result<()> {
        let src_surface = host_surface(src)?;
        let row = desc.row_bytes().unwrap_or(0);
        let height = desc.height as usize;
        let (stride, invert) = (dst.stride, dst.invert);
        match &mut dst.target {
            FrameTarget::Bytes(bytes) => {
                let from = src_surface.read();
                copy_rows(&from.pixels, row, bytes, stride, row, height, invert);
            }
            FrameTarget::Texture(texture) => {
                let to = host_surface(texture.raw())?;
                if Arc::ptr_eq(src_surface, to) {
                    bail!("copy_out source and destination are the same surface");
                }
                let from = src_surface.read();
                let mut to = to.write();
                copy_rows(&from.pixels, row, &mut to.pixels, row, row, height, invert);
            }
        }
        Ok(())
    }

    fn lock(&mut self, texture: &RawTexture) -> Result<()> {
        let mut surface = host_surface(texture)?.write();
        if surface.locked {
            bail!("surface is already locked");
        }
        surface.locked = true;
        Ok(())
    }

    fn unlock(&mut self, texture: &RawTexture) {
        if let Ok(surface) = host_surface(texture) {
            surface.write().locked = false;
        }
    }

    fn release(&mut self, texture: RawTexture) {
        let Ok(surface) = host_surface(&texture) else {
            return;
        };
        let handle = self
            .published
            .iter()
            .find(|(_, published)| Arc::ptr_eq(published, surface))
            .map(|(handle, _)| *handle);
        if let Some(handle) = handle {
            self.published.remove(&handle);
            SHARED.lock().remove(&handle);
            debug!("host surface {handle} released");
        }
    }
}

impl Drop for HostBackend {
    fn drop(&mut self) {
        let mut shared = SHARED.lock();
        for handle in self.published.keys() {
            shared.remove(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PixelFormat;

    fn desc() -> TextureDesc {
        TextureDesc::new(2, 2, PixelFormat::Bgra8Unorm)
    }

    #[test]
    fn handles_resolve_until_released() {
        let mut creator = HostBackend::new();
        let mut opener = HostBackend::new();
        let (texture, handle) = creator.create_shared(&desc()).unwrap();

        assert!(opener
            .open_shared(ApiKind::Host, handle, &desc(), ApiKind::OpenGl)
            .is_ok());

        creator.release(texture);
        assert_eq!(creator.published_count(), 0);
        assert!(opener
            .open_shared(ApiKind::Host, handle, &desc(), ApiKind::OpenGl)
            .is_err());
    }

    #[test]
    fn mismatched_description_is_refused() {
        let mut backend = HostBackend::new();
        let (_texture, handle) = backend.create_shared(&desc()).unwrap();
        let other = TextureDesc::new(4, 4, PixelFormat::Bgra8Unorm);
        assert!(backend
            .open_shared(ApiKind::Host, handle, &other, ApiKind::Host)
            .is_err());
    }

    #[test]
    fn dropping_the_backend_withdraws_its_handles() {
        let handle = {
            let mut backend = HostBackend::new();
            backend.create_shared(&desc()).unwrap().1
        };
        let mut opener = HostBackend::new();
        assert!(opener
            .open_shared(ApiKind::Host, handle, &desc(), ApiKind::Host)
            .is_err());
    }

    #[test]
    fn double_lock_fails() {
        let mut backend = HostBackend::new();
        let (texture, _) = backend.create_shared(&desc()).unwrap();
        backend.lock(&texture).unwrap();
        assert!(backend.lock(&texture).is_err());
        backend.unlock(&texture);
        assert!(backend.lock(&texture).is_ok());
    }
}
