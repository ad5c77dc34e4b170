//! [`InteropSession`]: shared texture ownership, cross-API bindings and frame
//! copies on top of an [`InteropBackend`].

use std::collections::HashMap;

use tracing::{debug, error};

use crate::backend::InteropBackend;
use crate::error::InteropError;
use crate::format::{ApiKind, InteropPolicy, PixelFormat};
use crate::frame::{FrameBuffer, FrameBufferMut};
use crate::texture::{LocalTexture, RawTexture, ShareDescriptor, TextureDesc};

/// A shared texture that has been allocated but not yet made current.
///
/// Hand it to [`InteropSession::commit_shared`] or
/// [`InteropSession::discard_shared`]; dropping it leaks the driver texture
/// until the backend itself is dropped.
#[must_use]
#[derive(Debug)]
pub struct PendingShared {
    texture: LocalTexture,
    share: ShareDescriptor,
}

impl PendingShared {
    pub fn share(&self) -> ShareDescriptor {
        self.share
    }

    pub fn desc(&self) -> TextureDesc {
        self.texture.desc()
    }
}

/// Exclusive local-API access to a texture, released on drop.
pub struct AccessGuard<'a> {
    backend: &'a mut dyn InteropBackend,
    texture: RawTexture,
}

impl AccessGuard<'_> {
    pub fn texture(&self) -> &RawTexture {
        &self.texture
    }
}

impl Drop for AccessGuard<'_> {
    fn drop(&mut self) {
        self.backend.unlock(&self.texture);
    }
}

/// Owns one backend device, at most one shared texture, and at most one
/// binding per `(share descriptor, consumer API)` pair.
///
/// The shared texture is never resized in place: a new geometry means a new
/// texture, and the old [`LocalTexture`] becomes stale.
pub struct InteropSession {
    backend: Box<dyn InteropBackend>,
    policy: InteropPolicy,
    shared: Option<(LocalTexture, ShareDescriptor)>,
    bindings: HashMap<(ShareDescriptor, ApiKind), LocalTexture>,
}

impl InteropSession {
    pub fn new(backend: Box<dyn InteropBackend>, policy: InteropPolicy) -> Self {
        Self {
            backend,
            policy,
            shared: None,
            bindings: HashMap::new(),
        }
    }

    /// Session with the default allow-list.
    pub fn with_backend(backend: impl InteropBackend + 'static) -> Self {
        Self::new(Box::new(backend), InteropPolicy::default())
    }

    pub fn api_kind(&self) -> ApiKind {
        self.backend.api_kind()
    }

    pub fn policy(&self) -> &InteropPolicy {
        &self.policy
    }

    pub fn backend(&self) -> &dyn InteropBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn InteropBackend {
        self.backend.as_mut()
    }

    /// The current shared texture, if any.
    pub fn shared_texture(&self) -> Option<&LocalTexture> {
        self.shared.as_ref().map(|(texture, _)| texture)
    }

    pub fn share_descriptor(&self) -> Option<ShareDescriptor> {
        self.shared.as_ref().map(|(_, share)| *share)
    }

    /// Number of cached cross-API bindings.
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Allocate the session's shared texture.
    ///
    /// Fails with [`InteropError::AlreadyShared`] if one exists; replacing it
    /// goes through [`prepare_shared`](Self::prepare_shared).
    pub fn create_shared(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<(LocalTexture, ShareDescriptor), InteropError> {
        if self.shared.is_some() {
            return Err(InteropError::AlreadyShared);
        }
        let pending = self.prepare_shared(TextureDesc::new(width, height, format))?;
        Ok(self.commit_shared(pending))
    }

    /// Allocate a replacement shared texture while the current one stays
    /// valid.
    pub fn prepare_shared(&mut self, desc: TextureDesc) -> Result<PendingShared, InteropError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(InteropError::InvalidFrame(format!(
                "cannot share a {}x{} texture",
                desc.width, desc.height
            )));
        }
        let api = self.backend.api_kind();
        if !self.policy.allows(desc.format, api) {
            return Err(InteropError::FormatIncompatible {
                format: desc.format,
                api,
            });
        }

        let (raw, handle) = match self.backend.create_shared(&desc) {
            Ok(created) => created,
            Err(e) => return Err(self.fail(e)),
        };
        Ok(PendingShared {
            texture: LocalTexture::new(desc, api, raw),
            share: ShareDescriptor { api, handle },
        })
    }

    /// Make `pending` the shared texture, tearing down the previous one and
    /// every binding to it.
    pub fn commit_shared(&mut self, pending: PendingShared) -> (LocalTexture, ShareDescriptor) {
        if let Some((old, share)) = self.shared.take() {
            self.release_bindings_for(share);
            self.backend.release(old.raw().clone());
        }
        debug!(
            "shared texture {}x{} {} committed (handle {:#x})",
            pending.texture.desc().width,
            pending.texture.desc().height,
            pending.texture.desc().format,
            pending.share.handle
        );
        self.shared = Some((pending.texture.clone(), pending.share));
        (pending.texture, pending.share)
    }

    /// Free a texture from [`prepare_shared`](Self::prepare_shared) without
    /// touching the current one.
    pub fn discard_shared(&mut self, pending: PendingShared) {
        self.backend.release(pending.texture.raw().clone());
    }

    /// Open `share` as a texture usable by `api`.
    ///
    /// Rejected pairs fail before any driver call. Bindings are cached per
    /// `(share, api)` until [`close`](Self::close).
    pub fn open_shared(
        &mut self,
        share: ShareDescriptor,
        width: u32,
        height: u32,
        format: PixelFormat,
        api: ApiKind,
    ) -> Result<LocalTexture, InteropError> {
        if !self.policy.allows(format, api) {
            return Err(InteropError::FormatIncompatible { format, api });
        }
        if !self.backend.supports(api) {
            return Err(InteropError::UnsupportedApi {
                backend: self.backend.api_kind(),
                api,
            });
        }
        let desc = TextureDesc::new(width, height, format);

        if let Some((texture, own)) = &self.shared {
            if *own == share && api == texture.api() && texture.desc() == desc {
                return Ok(texture.clone());
            }
        }

        if let Some(cached) = self.bindings.get(&(share, api)) {
            if cached.desc() == desc {
                return Ok(cached.clone());
            }
            // The handle was reused for a different texture.
            if let Some(stale) = self.bindings.remove(&(share, api)) {
                self.backend.release(stale.raw().clone());
            }
        }

        let raw = match self.backend.open_shared(share.api, share.handle, &desc, api) {
            Ok(raw) => raw,
            Err(e) => return Err(self.fail(e)),
        };
        let texture = LocalTexture::new(desc, api, raw);
        debug!(
            "bound {} handle {:#x} for {api} ({}x{} {format})",
            share.api, share.handle, width, height
        );
        self.bindings.insert((share, api), texture.clone());
        Ok(texture)
    }

    /// Copy a frame into `texture`, which must be this session's current
    /// shared texture or one of its bindings.
    pub fn copy_in(
        &mut self,
        texture: &LocalTexture,
        frame: &FrameBuffer<'_>,
    ) -> Result<(), InteropError> {
        self.ensure_current(texture)?;
        frame.validate()?;
        ensure_same_geometry(&texture.desc(), &frame.desc)?;
        let desc = texture.desc();
        self.backend
            .copy_in(texture.raw(), &desc, frame)
            .map_err(|e| self.fail(e))
    }

    /// Copy `texture` out into a frame.
    pub fn copy_out(
        &mut self,
        texture: &LocalTexture,
        frame: &mut FrameBufferMut<'_>,
    ) -> Result<(), InteropError> {
        self.ensure_current(texture)?;
        frame.validate()?;
        ensure_same_geometry(&texture.desc(), &frame.desc)?;
        let desc = texture.desc();
        self.backend
            .copy_out(texture.raw(), &desc, frame)
            .map_err(|e| self.fail(e))
    }

    /// Lock `texture` for direct use through the local API.
    pub fn access(&mut self, texture: &LocalTexture) -> Result<AccessGuard<'_>, InteropError> {
        self.ensure_current(texture)?;
        if let Err(e) = self.backend.lock(texture.raw()) {
            return Err(self.fail(e));
        }
        Ok(AccessGuard {
            backend: self.backend.as_mut(),
            texture: texture.raw().clone(),
        })
    }

    /// Whether `texture` is the current shared texture or a live binding.
    pub fn is_current(&self, texture: &LocalTexture) -> bool {
        let id = texture.id();
        self.shared.as_ref().is_some_and(|(t, _)| t.id() == id)
            || self.bindings.values().any(|t| t.id() == id)
    }

    /// Release every binding and the shared texture. The session stays usable.
    pub fn close(&mut self) {
        let bindings: Vec<_> = self.bindings.drain().map(|(_, t)| t).collect();
        for texture in bindings {
            self.backend.release(texture.raw().clone());
        }
        if let Some((texture, share)) = self.shared.take() {
            debug!("shared texture handle {:#x} closed", share.handle);
            self.backend.release(texture.raw().clone());
        }
    }

    fn ensure_current(&self, texture: &LocalTexture) -> Result<(), InteropError> {
        if self.is_current(texture) {
            Ok(())
        } else {
            Err(InteropError::StaleTexture(format!(
                "{}x{} texture is no longer held by this session",
                texture.desc().width,
                texture.desc().height
            )))
        }
    }

    fn release_bindings_for(&mut self, share: ShareDescriptor) {
        let keys: Vec<_> = self
            .bindings
            .keys()
            .filter(|(s, _)| *s == share)
            .copied()
            .collect();
        for key in keys {
            if let Some(texture) = self.bindings.remove(&key) {
                self.backend.release(texture.raw().clone());
            }
        }
    }

    fn fail(&mut self, e: anyhow::Error) -> InteropError {
        error!("{} interop failure: {e:#}", self.backend.api_kind());
        self.close();
        InteropError::Failure(e)
    }
}

impl Drop for InteropSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn ensure_same_geometry(texture: &TextureDesc, frame: &TextureDesc) -> Result<(), InteropError> {
    if (texture.width, texture.height) != (frame.width, frame.height) {
        return Err(InteropError::StaleTexture(format!(
            "frame is {}x{} but the texture is {}x{}",
            frame.width, frame.height, texture.width, texture.height
        )));
    }
    if texture.format != frame.format {
        return Err(InteropError::InvalidFrame(format!(
            "frame format {} does not match texture format {}",
            frame.format, texture.format
        )));
    }
    Ok(())
}
