//! Shared-memory directory of named texture senders.
//!
//! Any process on the host can open the directory by name; there is no
//! coordinating service. The segment starts with a versioned header, holds
//! the active-sender pointer, and then a fixed table of sender slots. See
//! [`layout`] for the exact word layout.

pub mod config;
pub mod error;
pub mod layout;
pub mod liveness;
mod lock;
pub mod registry;
mod seqlock;
mod shm;

pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use liveness::{OsProcessProbe, ProcessIdentity, ProcessProbe};
pub use registry::{validate_name, SenderEntry, SenderRegistry};
