//! Producer side: owns one shared texture and the registry entry naming it.

use std::sync::Arc;

use gpu_interop::{FrameBuffer, InteropSession, LocalTexture, PixelFormat, TextureDesc};
use texshare_registry::{validate_name, SenderEntry, SenderRegistry};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Unbound,
    Active,
    /// Between allocating a resized texture and publishing it.
    Updating,
    Released,
}

/// A named texture stream published to the registry.
///
/// The texture is replaced, never resized, on [`update`](Self::update). The
/// registry entry and the current shared texture always describe the same
/// texture, including after a failed update.
pub struct SenderSession {
    registry: Arc<SenderRegistry>,
    interop: InteropSession,
    state: SenderState,
    texture: Option<LocalTexture>,
    entry: Option<SenderEntry>,
}

impl SenderSession {
    pub fn new(registry: Arc<SenderRegistry>, interop: InteropSession) -> Self {
        Self {
            registry,
            interop,
            state: SenderState::Unbound,
            texture: None,
            entry: None,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    /// The published entry while active.
    pub fn entry(&self) -> Option<&SenderEntry> {
        self.entry.as_ref()
    }

    /// The shared texture, for rendering into it directly.
    pub fn texture(&self) -> Option<&LocalTexture> {
        self.texture.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.entry.as_ref().map(|e| e.name.as_str())
    }

    /// Allocate the shared texture and register it as `name`.
    ///
    /// On failure nothing is left behind and the session stays unbound.
    pub fn create(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<SenderEntry> {
        if self.state != SenderState::Unbound {
            return Err(Error::InvalidState(format!(
                "create on a {:?} sender",
                self.state
            )));
        }
        validate_name(name)?;

        let (texture, share) = self.interop.create_shared(width, height, format)?;
        let entry = match self.registry.register(name, width, height, format, share) {
            Ok(entry) => entry,
            Err(e) => {
                self.interop.close();
                return Err(e.into());
            }
        };

        info!("sender {name:?} created ({width}x{height} {format})");
        self.texture = Some(texture);
        self.entry = Some(entry.clone());
        self.state = SenderState::Active;
        Ok(entry)
    }

    /// Replace the shared texture with one of the new size. The format stays.
    ///
    /// A failed update leaves the previous texture and entry published, unless
    /// the failure came from the driver, in which case the sender is released.
    pub fn update(&mut self, width: u32, height: u32) -> Result<()> {
        if self.state != SenderState::Active {
            return Err(Error::InvalidState(format!(
                "update on a {:?} sender",
                self.state
            )));
        }
        let Some(entry) = self.entry.clone() else {
            return Err(Error::InvalidState("active sender without an entry".into()));
        };
        if (entry.width, entry.height) == (width, height) {
            return Ok(());
        }

        self.state = SenderState::Updating;
        match self.replace_texture(&entry, width, height) {
            Ok(()) => {
                self.state = SenderState::Active;
                debug!(
                    "sender {:?} resized {}x{} -> {width}x{height}",
                    entry.name, entry.width, entry.height
                );
                Ok(())
            }
            Err(e) => {
                self.state = SenderState::Active;
                if e.is_fatal() {
                    self.release();
                }
                Err(e)
            }
        }
    }

    fn replace_texture(&mut self, entry: &SenderEntry, width: u32, height: u32) -> Result<()> {
        let pending = self
            .interop
            .prepare_shared(TextureDesc::new(width, height, entry.format))?;
        match self
            .registry
            .update(&entry.name, width, height, entry.format, pending.share())
        {
            Ok(updated) => {
                let (texture, _) = self.interop.commit_shared(pending);
                self.texture = Some(texture);
                self.entry = Some(updated);
                Ok(())
            }
            Err(e) => {
                self.interop.discard_shared(pending);
                Err(e.into())
            }
        }
    }

    /// Copy `frame` into the shared texture.
    ///
    /// Returns `Ok(false)` without doing anything unless the sender is active.
    /// A frame whose geometry differs from the sender's is `StaleTexture`.
    pub fn publish_frame(&mut self, frame: &FrameBuffer<'_>) -> Result<bool> {
        let Some(texture) = self.texture.as_ref().filter(|_| self.state == SenderState::Active)
        else {
            trace!("frame dropped by {:?} sender", self.state);
            return Ok(false);
        };
        match self.interop.copy_in(texture, frame) {
            Ok(()) => Ok(true),
            Err(e) => {
                let e = Error::from(e);
                if e.is_fatal() {
                    self.release();
                }
                Err(e)
            }
        }
    }

    /// Run `f` while the shared texture is locked for the local API.
    pub fn with_access<R>(&mut self, f: impl FnOnce(&LocalTexture) -> R) -> Result<R> {
        let Some(texture) = self.texture.clone().filter(|_| self.state == SenderState::Active)
        else {
            return Err(Error::InvalidState(format!(
                "access on a {:?} sender",
                self.state
            )));
        };
        let result = match self.interop.access(&texture) {
            Ok(_guard) => Ok(f(&texture)),
            Err(e) => Err(Error::from(e)),
        };
        if result.as_ref().is_err_and(Error::is_fatal) {
            self.release();
        }
        result
    }

    /// Unregister and free the texture. Safe to call more than once.
    pub fn release(&mut self) {
        if self.state == SenderState::Released {
            return;
        }
        if let Some(entry) = self.entry.take() {
            match self.registry.unregister(&entry.name) {
                Ok(()) => info!("sender {:?} released", entry.name),
                Err(e) => warn!("sender {:?} could not unregister: {e}", entry.name),
            }
        }
        self.texture = None;
        self.interop.close();
        self.state = SenderState::Released;
    }
}

impl Drop for SenderSession {
    fn drop(&mut self) {
        self.release();
    }
}
