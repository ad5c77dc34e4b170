//! Texture descriptions and API-tagged texture handles.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use gl::types::{GLenum, GLuint};

use crate::format::{ApiKind, PixelFormat};
use crate::host::HostSurfaceRef;

/// Geometry and format of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Bytes in one unpadded row, or `None` if the format has no known size.
    pub fn row_bytes(&self) -> Option<usize> {
        Some(self.width as usize * self.format.bytes_per_pixel()?)
    }

    /// Bytes in a tightly packed image.
    pub fn image_bytes(&self) -> Option<usize> {
        Some(self.row_bytes()? * self.height as usize)
    }
}

/// The value a producer publishes so that other processes can open its
/// texture: the creating API plus the OS-level handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShareDescriptor {
    pub api: ApiKind,
    pub handle: u64,
}

/// Process-unique identity of a [`LocalTexture`]. Used to detect use of a
/// texture after the session that produced it has replaced or closed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(u64);

impl TextureId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// API-specific texture object.
#[derive(Clone)]
pub enum RawTexture {
    Host(HostSurfaceRef),
    Gl {
        name: GLuint,
        target: GLenum,
    },
    #[cfg(target_os = "windows")]
    Dx11(windows::Win32::Graphics::Direct3D11::ID3D11Texture2D),
    #[cfg(target_os = "macos")]
    Metal(
        objc2::rc::Retained<
            objc2::runtime::ProtocolObject<dyn objc2_metal::MTLTexture>,
        >,
    ),
}

impl fmt::Debug for RawTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawTexture::Host(surface) => write!(f, "Host({:?})", surface.read().desc()),
            RawTexture::Gl { name, target } => write!(f, "Gl({name}, {target:#x})"),
            #[cfg(target_os = "windows")]
            RawTexture::Dx11(_) => f.write_str("Dx11"),
            #[cfg(target_os = "macos")]
            RawTexture::Metal(_) => f.write_str("Metal"),
        }
    }
}

/// A texture usable by one graphics API in this process.
#[derive(Debug, Clone)]
pub struct LocalTexture {
    id: TextureId,
    desc: TextureDesc,
    api: ApiKind,
    raw: RawTexture,
}

impl LocalTexture {
    pub(crate) fn new(desc: TextureDesc, api: ApiKind, raw: RawTexture) -> Self {
        Self {
            id: TextureId::next(),
            desc,
            api,
            raw,
        }
    }

    /// Wrap a caller-owned GL texture as a copy source or destination.
    pub fn from_gl(name: GLuint, target: GLenum, desc: TextureDesc) -> Self {
        Self::new(desc, ApiKind::OpenGl, RawTexture::Gl { name, target })
    }

    /// Allocate a private host-memory texture, zero-filled.
    ///
    /// Returns `None` for formats without a known texel size.
    pub fn new_host(desc: TextureDesc) -> Option<Self> {
        let surface = crate::host::HostSurface::allocate(desc)?;
        Some(Self::new(desc, ApiKind::Host, RawTexture::Host(surface)))
    }

    /// Wrap a caller-owned D3D11 texture.
    #[cfg(target_os = "windows")]
    pub fn from_dx11(
        texture: windows::Win32::Graphics::Direct3D11::ID3D11Texture2D,
        desc: TextureDesc,
    ) -> Self {
        Self::new(desc, ApiKind::Dx11, RawTexture::Dx11(texture))
    }

    /// Wrap a caller-owned Metal texture.
    #[cfg(target_os = "macos")]
    pub fn from_metal(
        texture: objc2::rc::Retained<
            objc2::runtime::ProtocolObject<dyn objc2_metal::MTLTexture>,
        >,
        desc: TextureDesc,
    ) -> Self {
        Self::new(desc, ApiKind::Metal, RawTexture::Metal(texture))
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn desc(&self) -> TextureDesc {
        self.desc
    }

    pub fn api(&self) -> ApiKind {
        self.api
    }

    pub fn raw(&self) -> &RawTexture {
        &self.raw
    }

    /// Read back a host texture as tightly packed rows. Mostly useful in tests
    /// and diagnostics; GPU textures return `None`.
    pub fn host_pixels(&self) -> Option<Vec<u8>> {
        match &self.raw {
            RawTexture::Host(surface) => Some(surface.read().pixels().to_vec()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }
}
