//! Metal backend (macOS). Share handles are global IOSurface IDs.

pub mod device;
pub mod interop;

pub use device::MetalDevice;
pub use interop::MetalBackend;
