use std::sync::Arc;

use gpu_interop::{ApiKind, InteropBackend, InteropSession};
use texshare_registry::{ProcessIdentity, SenderRegistry};
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::receiver::ReceiverSession;
use crate::sender::SenderSession;

/// One open registry plus the configuration sessions are created with.
///
/// Senders and receivers made from the same context share the registry
/// handle; each gets its own [`InteropSession`] over the backend it is given.
pub struct Context {
    config: Config,
    registry: Arc<SenderRegistry>,
}

impl Context {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_identity(config, ProcessIdentity::current())
    }

    /// Open the registry acting as `identity` rather than the calling process.
    pub fn with_identity(config: Config, identity: ProcessIdentity) -> Result<Self> {
        let registry = SenderRegistry::open_with(config.registry.clone(), identity)?;
        info!(
            "texshare registry {:?} open ({} slots)",
            config.registry.segment_name,
            registry.max_senders()
        );
        Ok(Self {
            config,
            registry: Arc::new(registry),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SenderRegistry> {
        &self.registry
    }

    fn interop(&self, backend: Box<dyn InteropBackend>) -> InteropSession {
        InteropSession::new(backend, self.config.interop_policy.clone())
    }

    /// An unbound sender publishing through `backend`.
    pub fn sender(&self, backend: Box<dyn InteropBackend>) -> SenderSession {
        SenderSession::new(self.registry.clone(), self.interop(backend))
    }

    /// An unbound receiver that opens senders' textures for `api`.
    pub fn receiver(&self, backend: Box<dyn InteropBackend>, api: ApiKind) -> ReceiverSession {
        ReceiverSession::new(self.registry.clone(), self.interop(backend), api)
    }

    /// Names of live senders.
    pub fn senders(&self) -> Vec<String> {
        self.registry.enumerate()
    }
}

/// The native backend for this platform: D3D11 on Windows, Metal on macOS,
/// host memory elsewhere.
pub fn default_backend() -> anyhow::Result<Box<dyn InteropBackend>> {
    #[cfg(target_os = "windows")]
    {
        Ok(Box::new(gpu_interop::Dx11Backend::new()?))
    }
    #[cfg(target_os = "macos")]
    {
        Ok(Box::new(gpu_interop::MetalBackend::new()?))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        Ok(Box::new(gpu_interop::HostBackend::new()))
    }
}
