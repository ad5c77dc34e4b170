//! D3D11 backend (Windows). OpenGL consumers go through WGL_NV_DX_interop2.

pub mod device;
pub mod interop;

pub use device::Dx11Device;
pub use interop::Dx11Backend;
