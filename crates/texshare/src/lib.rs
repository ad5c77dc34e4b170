//! Named GPU texture sharing between processes.
//!
//! A [`SenderSession`] publishes a shared texture under a name in a
//! shared-memory [`SenderRegistry`]; any number of [`ReceiverSession`]s find
//! it by name (or through the registry's active sender) and read its frames
//! through their own graphics API without copying pixels when the driver
//! allows it.
//!
//! ```no_run
//! use gpu_interop::{ApiKind, FrameBuffer, HostBackend, PixelFormat};
//! use texshare::{Config, Context};
//!
//! # fn main() -> texshare::Result<()> {
//! texshare::logging::init_tracing();
//! let context = Context::new(Config::default().with_env_overrides()?)?;
//!
//! let mut sender = context.sender(Box::new(HostBackend::new()));
//! sender.create("camera", 640, 480, PixelFormat::Bgra8Unorm)?;
//! let pixels = vec![0u8; 640 * 480 * 4];
//! sender.publish_frame(&FrameBuffer::from_bytes(&pixels, 640, 480, PixelFormat::Bgra8Unorm)?)?;
//!
//! let mut receiver = context.receiver(Box::new(HostBackend::new()), ApiKind::OpenGl);
//! let entry = receiver.bind("camera")?;
//! # let _ = entry;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod receiver;
pub mod sender;

pub use config::Config;
pub use context::{default_backend, Context};
pub use error::{Error, Result};
pub use receiver::{ReceiveStatus, ReceiverSession, ReceiverState, SenderTarget};
pub use sender::{SenderSession, SenderState};

pub use gpu_interop;
pub use texshare_registry;
