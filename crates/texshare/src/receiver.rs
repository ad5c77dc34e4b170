//! Consumer side: follows one sender by name and copies its frames out.

use std::sync::Arc;

use gpu_interop::{ApiKind, FrameBufferMut, InteropSession, LocalTexture};
use texshare_registry::{RegistryError, SenderEntry, SenderRegistry};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Which sender [`ReceiverSession::bind`] connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderTarget {
    Named(String),
    /// Whatever the registry's active sender is at bind time.
    Active,
}

impl From<&str> for SenderTarget {
    fn from(name: &str) -> Self {
        SenderTarget::Named(name.to_string())
    }
}

/// Outcome of one [`ReceiverSession::receive_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// The frame buffer holds the sender's current texture.
    Delivered,
    /// The sender changed size or format. Nothing was copied; the receiver is
    /// already bound to the new texture.
    SizeChanged,
    /// The sender unregistered or its process died. The receiver is unbound.
    SenderGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Unbound,
    Bound,
    Released,
}

struct Binding {
    entry: SenderEntry,
    texture: LocalTexture,
}

/// Reads a sender's texture through this process's graphics API.
///
/// Receivers never write to the registry; dropping one only releases its
/// interop bindings.
pub struct ReceiverSession {
    registry: Arc<SenderRegistry>,
    interop: InteropSession,
    api: ApiKind,
    state: ReceiverState,
    binding: Option<Binding>,
}

impl ReceiverSession {
    pub fn new(registry: Arc<SenderRegistry>, interop: InteropSession, api: ApiKind) -> Self {
        Self {
            registry,
            interop,
            api,
            state: ReceiverState::Unbound,
            binding: None,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn api(&self) -> ApiKind {
        self.api
    }

    /// The sender as of the last successful bind or rebind.
    pub fn bound_entry(&self) -> Option<&SenderEntry> {
        self.binding.as_ref().map(|b| &b.entry)
    }

    /// The sender's texture as opened for this receiver's API.
    pub fn texture(&self) -> Option<&LocalTexture> {
        self.binding.as_ref().map(|b| &b.texture)
    }

    /// Connect to a sender, replacing any current binding.
    pub fn bind(&mut self, target: impl Into<SenderTarget>) -> Result<SenderEntry> {
        if self.state == ReceiverState::Released {
            return Err(Error::InvalidState("bind on a released receiver".into()));
        }
        let name = match target.into() {
            SenderTarget::Named(name) => name,
            SenderTarget::Active => self
                .registry
                .get_active()?
                .ok_or_else(|| Error::NotFound(String::new()))?,
        };
        let entry = self.registry.lookup(&name)?;
        self.unbind();
        self.open(entry.clone())?;
        info!(
            "receiver bound to {name:?} ({}x{} {} for {})",
            entry.width, entry.height, entry.format, self.api
        );
        Ok(entry)
    }

    fn open(&mut self, entry: SenderEntry) -> Result<()> {
        let texture = self.interop.open_shared(
            entry.share,
            entry.width,
            entry.height,
            entry.format,
            self.api,
        )?;
        self.binding = Some(Binding { entry, texture });
        self.state = ReceiverState::Bound;
        Ok(())
    }

    fn unbind(&mut self) {
        self.binding = None;
        self.interop.close();
        if self.state == ReceiverState::Bound {
            self.state = ReceiverState::Unbound;
        }
    }

    /// Check the sender and copy its current texture into `frame`.
    ///
    /// `frame` must match the bound geometry; after
    /// [`SizeChanged`](ReceiveStatus::SizeChanged) read the new one from
    /// [`bound_entry`](Self::bound_entry).
    pub fn receive_frame(&mut self, frame: &mut FrameBufferMut<'_>) -> Result<ReceiveStatus> {
        let Some(binding) = self.binding.as_ref().filter(|_| self.state == ReceiverState::Bound)
        else {
            return Err(Error::NotBound);
        };
        let bound = binding.entry.clone();

        let current = match self.registry.lookup(&bound.name) {
            Ok(current) => current,
            Err(RegistryError::NotFound(_)) => {
                info!("sender {:?} is gone", bound.name);
                self.unbind();
                return Ok(ReceiveStatus::SenderGone);
            }
            Err(e) => return Err(e.into()),
        };

        if current != bound {
            let resized = (current.width, current.height, current.format)
                != (bound.width, bound.height, bound.format);
            debug!(
                "sender {:?} changed: {}x{} {} handle {:#x}",
                current.name, current.width, current.height, current.format, current.share.handle
            );
            self.unbind();
            self.open(current)?;
            if resized {
                return Ok(ReceiveStatus::SizeChanged);
            }
        }

        let Some(binding) = self.binding.as_ref() else {
            return Err(Error::NotBound);
        };
        match self.interop.copy_out(&binding.texture, frame) {
            Ok(()) => Ok(ReceiveStatus::Delivered),
            Err(e) => {
                let e = Error::from(e);
                if e.is_fatal() {
                    self.unbind();
                }
                Err(e)
            }
        }
    }

    /// Drop the binding for good. Safe to call more than once.
    pub fn release(&mut self) {
        if self.state != ReceiverState::Released {
            self.unbind();
            self.state = ReceiverState::Released;
        }
    }
}

impl Drop for ReceiverSession {
    fn drop(&mut self) {
        self.release();
    }
}
