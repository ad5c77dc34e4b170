//! Metal backend over global IOSurfaces.
//!
//! Shared textures are IOSurfaces created with `kIOSurfaceIsGlobal`, so their
//! `IOSurfaceID` can be looked up from any process; that ID is the published
//! handle. Metal consumers get a texture built on the surface, OpenGL
//! consumers a `TEXTURE_RECTANGLE` bound through `CGLTexImageIOSurface2D`.

// The CGL / OpenGL API is deprecated by Apple but still what GL consumers run
// on.
#![allow(deprecated)]

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr::NonNull;

use anyhow::{bail, Context, Result};
use gl::types::{GLenum, GLint, GLsizei, GLuint};
use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2_core_foundation::{CFBoolean, CFDictionary, CFNumber, CFRetained, CFString, CFType};
use objc2_io_surface::{IOSurfaceLockOptions, IOSurfaceRef};
use objc2_metal::{
    MTLBlitCommandEncoder, MTLCommandBuffer, MTLCommandEncoder, MTLCommandQueue, MTLDevice,
    MTLOrigin, MTLPixelFormat, MTLRegion, MTLSize, MTLStorageMode, MTLTexture,
    MTLTextureDescriptor, MTLTextureType, MTLTextureUsage,
};
use objc2_open_gl::{CGLError, CGLGetCurrentContext, CGLTexImageIOSurface2D};
use tracing::{debug, warn};

use super::MetalDevice;
use crate::backend::InteropBackend;
use crate::format::{ApiKind, PixelFormat};
use crate::frame::{copy_rows, FrameBuffer, FrameBufferMut, FrameSource, FrameTarget};
use crate::texture::{RawTexture, TextureDesc};

/// `GL_TEXTURE_RECTANGLE` is not in the `gl` crate's default API.
const GL_TEXTURE_RECTANGLE: GLenum = 0x84F5;

const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*code)
}

/// IOSurface FourCC, Metal format and GL transfer triple for a pixel format.
struct SurfaceFormat {
    fourcc: u32,
    metal: MTLPixelFormat,
    gl_internal: GLenum,
    gl_format: GLenum,
    gl_type: GLenum,
}

fn surface_format(format: PixelFormat) -> Result<SurfaceFormat> {
    let (code, metal, gl_internal, gl_format, gl_type) = match format {
        PixelFormat::Bgra8Unorm | PixelFormat::Bgrx8Unorm => (
            b"BGRA",
            MTLPixelFormat::BGRA8Unorm,
            gl::RGBA,
            gl::BGRA,
            gl::UNSIGNED_INT_8_8_8_8_REV,
        ),
        PixelFormat::Bgra8UnormSrgb => (
            b"BGRA",
            MTLPixelFormat::BGRA8Unorm_sRGB,
            gl::SRGB8_ALPHA8,
            gl::BGRA,
            gl::UNSIGNED_INT_8_8_8_8_REV,
        ),
        PixelFormat::Rgba8Unorm => (
            b"RGBA",
            MTLPixelFormat::RGBA8Unorm,
            gl::RGBA,
            gl::RGBA,
            gl::UNSIGNED_BYTE,
        ),
        PixelFormat::Rgba8UnormSrgb => (
            b"RGBA",
            MTLPixelFormat::RGBA8Unorm_sRGB,
            gl::SRGB8_ALPHA8,
            gl::RGBA,
            gl::UNSIGNED_BYTE,
        ),
        PixelFormat::Rgb10A2Unorm => (
            b"l10r",
            MTLPixelFormat::RGB10A2Unorm,
            gl::RGB10_A2,
            gl::RGBA,
            gl::UNSIGNED_INT_2_10_10_10_REV,
        ),
        PixelFormat::Rgba16Float => (
            b"RGhA",
            MTLPixelFormat::RGBA16Float,
            gl::RGBA16F,
            gl::RGBA,
            gl::HALF_FLOAT,
        ),
        PixelFormat::Rgba32Float => (
            b"RGfA",
            MTLPixelFormat::RGBA32Float,
            gl::RGBA32F,
            gl::RGBA,
            gl::FLOAT,
        ),
        other => bail!("{other} has no IOSurface layout"),
    };
    Ok(SurfaceFormat {
        fourcc: fourcc(code),
        metal,
        gl_internal,
        gl_format,
        gl_type,
    })
}

/// Create a global IOSurface for `desc`.
fn create_iosurface(desc: &TextureDesc) -> Result<CFRetained<IOSurfaceRef>> {
    let format = surface_format(desc.format)?;
    let bpe = desc
        .format
        .bytes_per_pixel()
        .context("no texel size known")?;
    unsafe {
        let v_width = CFNumber::new_i32(desc.width as i32);
        let v_height = CFNumber::new_i32(desc.height as i32);
        let v_bpe = CFNumber::new_i32(bpe as i32);
        let v_pf = CFNumber::new_i32(format.fourcc as i32);
        let v_global = CFBoolean::new(true);

        let keys: &[&CFString] = &[
            objc2_io_surface::kIOSurfaceWidth,
            objc2_io_surface::kIOSurfaceHeight,
            objc2_io_surface::kIOSurfaceBytesPerElement,
            objc2_io_surface::kIOSurfacePixelFormat,
            objc2_io_surface::kIOSurfaceIsGlobal,
        ];
        let values: &[&CFType] = &[&v_width, &v_height, &v_bpe, &v_pf, v_global];

        let props = CFDictionary::from_slices(keys, values);
        let props_untyped: &CFDictionary = props.cast_unchecked();
        IOSurfaceRef::new(props_untyped).context("IOSurfaceCreate failed")
    }
}

/// Create a GL `TEXTURE_RECTANGLE` backed by `surface`.
///
/// # Safety
/// A valid CGL context must be current.
unsafe fn create_gl_texture_from_iosurface(
    surface: &IOSurfaceRef,
    desc: &TextureDesc,
) -> Result<GLuint> {
    let format = surface_format(desc.format)?;
    let cgl_ctx = CGLGetCurrentContext();
    if cgl_ctx.is_null() {
        bail!("No current CGL context for IOSurface texture creation");
    }

    let mut tex: GLuint = 0;
    gl::GenTextures(1, &mut tex);
    gl::BindTexture(GL_TEXTURE_RECTANGLE, tex);
    gl::TexParameteri(
        GL_TEXTURE_RECTANGLE,
        gl::TEXTURE_MIN_FILTER,
        gl::NEAREST as GLint,
    );
    gl::TexParameteri(
        GL_TEXTURE_RECTANGLE,
        gl::TEXTURE_MAG_FILTER,
        gl::NEAREST as GLint,
    );

    let err = CGLTexImageIOSurface2D(
        cgl_ctx,
        GL_TEXTURE_RECTANGLE,
        format.gl_internal,
        desc.width as GLsizei,
        desc.height as GLsizei,
        format.gl_format,
        format.gl_type,
        surface,
        0,
    );
    gl::BindTexture(GL_TEXTURE_RECTANGLE, 0);

    if err != CGLError::NoError {
        gl::DeleteTextures(1, &tex);
        bail!("CGLTexImageIOSurface2D failed with error: {err:?}");
    }
    Ok(tex)
}

fn create_metal_texture_from_iosurface(
    device: &ProtocolObject<dyn MTLDevice>,
    surface: &IOSurfaceRef,
    desc: &TextureDesc,
) -> Result<Retained<ProtocolObject<dyn MTLTexture>>> {
    let format = surface_format(desc.format)?;
    let texture_desc = MTLTextureDescriptor::new();
    texture_desc.setTextureType(MTLTextureType::Type2D);
    texture_desc.setPixelFormat(format.metal);
    unsafe {
        texture_desc.setWidth(desc.width as usize);
        texture_desc.setHeight(desc.height as usize);
    }
    texture_desc.setStorageMode(MTLStorageMode::Shared);
    texture_desc.setUsage(
        MTLTextureUsage::ShaderRead | MTLTextureUsage::ShaderWrite | MTLTextureUsage::RenderTarget,
    );

    device
        .newTextureWithDescriptor_iosurface_plane(&texture_desc, surface, 0)
        .context("newTextureWithDescriptor:iosurface:plane failed")
}

fn whole_region(desc: &TextureDesc) -> MTLRegion {
    MTLRegion {
        origin: MTLOrigin { x: 0, y: 0, z: 0 },
        size: MTLSize {
            width: desc.width as usize,
            height: desc.height as usize,
            depth: 1,
        },
    }
}

/// CPU view of a locked IOSurface. Unlocks on drop.
struct LockedSurface<'a> {
    surface: &'a IOSurfaceRef,
    read_only: bool,
    base: NonNull<c_void>,
    stride: usize,
    len: usize,
}

impl<'a> LockedSurface<'a> {
    fn lock(surface: &'a IOSurfaceRef, desc: &TextureDesc, read_only: bool) -> Result<Self> {
        let options = if read_only {
            IOSurfaceLockOptions::ReadOnly
        } else {
            IOSurfaceLockOptions::empty()
        };
        let status = unsafe { surface.lock(options, std::ptr::null_mut()) };
        if status != 0 {
            bail!("IOSurfaceLock failed with {status}");
        }
        let stride = surface.bytes_per_row();
        let row = desc.row_bytes().unwrap_or(0);
        Ok(Self {
            surface,
            read_only,
            base: surface.base_address(),
            stride,
            len: stride * (desc.height as usize - 1) + row,
        })
    }

    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base.as_ptr() as *const u8, self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr() as *mut u8, self.len) }
    }
}

impl Drop for LockedSurface<'_> {
    fn drop(&mut self) {
        let options = if self.read_only {
            IOSurfaceLockOptions::ReadOnly
        } else {
            IOSurfaceLockOptions::empty()
        };
        unsafe {
            self.surface.unlock(options, std::ptr::null_mut());
        }
    }
}

/// [`InteropBackend`] over the system Metal device and global IOSurfaces.
pub struct MetalBackend {
    device: MetalDevice,
    /// Surfaces created here, by IOSurface ID. Holding them keeps the IDs
    /// resolvable for other processes.
    published: HashMap<u64, CFRetained<IOSurfaceRef>>,
    /// GL names bound to IOSurfaces, both bindings handed out and aliases.
    gl_surfaces: HashMap<GLuint, CFRetained<IOSurfaceRef>>,
    /// GL alias of a surface, by IOSurface ID.
    gl_aliases: HashMap<u64, GLuint>,
    read_fbo: GLuint,
    draw_fbo: GLuint,
}

impl MetalBackend {
    pub fn new() -> Result<Self> {
        let device = MetalDevice::new()?;
        Ok(Self::from_device(device))
    }

    pub fn from_device(device: MetalDevice) -> Self {
        Self {
            device,
            published: HashMap::new(),
            gl_surfaces: HashMap::new(),
            gl_aliases: HashMap::new(),
            read_fbo: 0,
            draw_fbo: 0,
        }
    }

    pub fn device(&self) -> &MetalDevice {
        &self.device
    }

    /// The IOSurface behind a texture handed out by this backend, if any.
    fn surface_of(&self, texture: &RawTexture) -> Option<CFRetained<IOSurfaceRef>> {
        match texture {
            RawTexture::Metal(texture) => texture.iosurface(),
            RawTexture::Gl { name, .. } => self.gl_surfaces.get(name).cloned(),
            RawTexture::Host(_) => None,
        }
    }

    fn bind_gl(&mut self, surface: CFRetained<IOSurfaceRef>, desc: &TextureDesc) -> Result<GLuint> {
        let name = unsafe { create_gl_texture_from_iosurface(&surface, desc)? };
        if self.read_fbo == 0 {
            unsafe {
                gl::GenFramebuffers(1, &mut self.read_fbo);
                gl::GenFramebuffers(1, &mut self.draw_fbo);
            }
        }
        self.gl_surfaces.insert(name, surface);
        Ok(name)
    }

    fn gl_alias(&mut self, surface: &CFRetained<IOSurfaceRef>, desc: &TextureDesc) -> Result<GLuint> {
        let id = surface.id() as u64;
        if let Some(&name) = self.gl_aliases.get(&id) {
            return Ok(name);
        }
        let name = self.bind_gl(surface.clone(), desc)?;
        self.gl_aliases.insert(id, name);
        Ok(name)
    }

    fn unbind_gl(&mut self, name: GLuint) {
        if self.gl_surfaces.remove(&name).is_some() {
            unsafe { gl::DeleteTextures(1, &name) };
        }
    }

    /// Framebuffer blit between two GL textures, flipping if asked.
    fn blit_gl(
        &self,
        (src, src_target): (GLuint, GLenum),
        (dst, dst_target): (GLuint, GLenum),
        desc: &TextureDesc,
        invert: bool,
    ) -> Result<()> {
        let (w, h) = (desc.width as GLsizei, desc.height as GLsizei);
        unsafe {
            gl::BindFramebuffer(gl::READ_FRAMEBUFFER, self.read_fbo);
            gl::FramebufferTexture2D(
                gl::READ_FRAMEBUFFER,
                gl::COLOR_ATTACHMENT0,
                src_target,
                src,
                0,
            );
            if gl::CheckFramebufferStatus(gl::READ_FRAMEBUFFER) != gl::FRAMEBUFFER_COMPLETE {
                gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
                bail!("READ_FRAMEBUFFER incomplete for GL texture {src}");
            }
            gl::ReadBuffer(gl::COLOR_ATTACHMENT0);

            gl::BindFramebuffer(gl::DRAW_FRAMEBUFFER, self.draw_fbo);
            gl::FramebufferTexture2D(
                gl::DRAW_FRAMEBUFFER,
                gl::COLOR_ATTACHMENT0,
                dst_target,
                dst,
                0,
            );
            gl::DrawBuffer(gl::COLOR_ATTACHMENT0);

            let (y0, y1) = if invert { (h, 0) } else { (0, h) };
            gl::BlitFramebuffer(0, 0, w, h, 0, y0, w, y1, gl::COLOR_BUFFER_BIT, gl::NEAREST);

            gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
            gl::Finish();
        }
        Ok(())
    }

    /// GPU copy between two Metal textures. Waits for completion.
    fn blit_metal(
        &self,
        src: &ProtocolObject<dyn MTLTexture>,
        dst: &ProtocolObject<dyn MTLTexture>,
    ) -> Result<()> {
        let command_buffer = self
            .device
            .command_queue()
            .commandBuffer()
            .context("Failed to create Metal command buffer")?;
        let encoder = command_buffer
            .blitCommandEncoder()
            .context("Failed to create blit encoder")?;
        unsafe { encoder.copyFromTexture_toTexture(src, dst) };
        encoder.endEncoding();
        command_buffer.commit();
        command_buffer.waitUntilCompleted();
        Ok(())
    }

    fn read_metal(texture: &ProtocolObject<dyn MTLTexture>, desc: &TextureDesc) -> Vec<u8> {
        let row = desc.row_bytes().unwrap_or(0);
        let mut tight = vec![0u8; row * desc.height as usize];
        unsafe {
            texture.getBytes_bytesPerRow_fromRegion_mipmapLevel(
                NonNull::new_unchecked(tight.as_mut_ptr() as *mut c_void),
                row,
                whole_region(desc),
                0,
            );
        }
        tight
    }

    fn write_metal(texture: &ProtocolObject<dyn MTLTexture>, desc: &TextureDesc, tight: &[u8]) {
        let row = desc.row_bytes().unwrap_or(0);
        unsafe {
            texture.replaceRegion_mipmapLevel_withBytes_bytesPerRow(
                whole_region(desc),
                0,
                NonNull::new_unchecked(tight.as_ptr() as *mut c_void),
                row,
            );
        }
    }
}

impl InteropBackend for MetalBackend {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn api_kind(&self) -> ApiKind {
        ApiKind::Metal
    }

    fn supports(&self, api: ApiKind) -> bool {
        matches!(api, ApiKind::Metal | ApiKind::OpenGl)
    }

    fn create_shared(&mut self, desc: &TextureDesc) -> Result<(RawTexture, u64)> {
        let surface = create_iosurface(desc)?;
        let texture = create_metal_texture_from_iosurface(self.device.device(), &surface, desc)?;
        let handle = surface.id() as u64;
        debug!(
            "IOSurface {handle} created ({}x{} {})",
            desc.width, desc.height, desc.format
        );
        self.published.insert(handle, surface);
        Ok((RawTexture::Metal(texture), handle))
    }

    fn open_shared(
        &mut self,
        creator: ApiKind,
        handle: u64,
        desc: &TextureDesc,
        api: ApiKind,
    ) -> Result<RawTexture> {
        if creator != ApiKind::Metal {
            bail!("Metal backend cannot open {creator} share handles");
        }
        let id = u32::try_from(handle).context("IOSurface IDs are 32-bit")?;
        let surface = IOSurfaceRef::lookup(id)
            .with_context(|| format!("IOSurface {id} does not exist"))?;
        let found = (surface.width() as u32, surface.height() as u32);
        if found != (desc.width, desc.height) {
            bail!(
                "IOSurface {id} is {}x{}, expected {}x{}",
                found.0,
                found.1,
                desc.width,
                desc.height
            );
        }

        match api {
            ApiKind::Metal => Ok(RawTexture::Metal(create_metal_texture_from_iosurface(
                self.device.device(),
                &surface,
                desc,
            )?)),
            ApiKind::OpenGl => Ok(RawTexture::Gl {
                name: self.bind_gl(surface, desc)?,
                target: GL_TEXTURE_RECTANGLE,
            }),
            other => bail!("Metal backend cannot bind for {other}"),
        }
    }

    fn copy_in(
        &mut self,
        dst: &RawTexture,
        desc: &TextureDesc,
        src: &FrameBuffer<'_>,
    ) -> Result<()> {
        let row = desc.row_bytes().unwrap_or(0);
        let height = desc.height as usize;
        let dst_surface = self
            .surface_of(dst)
            .context("copy target is not IOSurface-backed")?;

        let source = match &src.source {
            FrameSource::Bytes(bytes) => {
                let mut locked = LockedSurface::lock(&dst_surface, desc, false)?;
                let stride = locked.stride;
                copy_rows(bytes, src.stride, locked.bytes_mut(), stride, row, height, src.invert);
                return Ok(());
            }
            FrameSource::Texture(texture) => texture,
        };

        if let Some(from) = self.surface_of(source.raw()) {
            let from = LockedSurface::lock(&from, desc, true)?;
            let mut to = LockedSurface::lock(&dst_surface, desc, false)?;
            let (from_stride, to_stride) = (from.stride, to.stride);
            copy_rows(from.bytes(), from_stride, to.bytes_mut(), to_stride, row, height, src.invert);
            return Ok(());
        }

        match (source.raw(), dst) {
            (RawTexture::Metal(from), RawTexture::Metal(to)) if !src.invert => {
                self.blit_metal(from, to)
            }
            (RawTexture::Metal(from), _) => {
                let tight = Self::read_metal(from, desc);
                let mut to = LockedSurface::lock(&dst_surface, desc, false)?;
                let stride = to.stride;
                copy_rows(&tight, row, to.bytes_mut(), stride, row, height, src.invert);
                Ok(())
            }
            (RawTexture::Gl { name, target }, _) => {
                let alias = self.gl_alias(&dst_surface, desc)?;
                self.blit_gl((*name, *target), (alias, GL_TEXTURE_RECTANGLE), desc, src.invert)
            }
            (RawTexture::Host(surface), _) => {
                let surface = surface.read();
                let mut to = LockedSurface::lock(&dst_surface, desc, false)?;
                let stride = to.stride;
                copy_rows(surface.pixels(), row, to.bytes_mut(), stride, row, height, src.invert);
                Ok(())
            }
        }
    }

    fn copy_out(
        &mut self,
        src: &RawTexture,
        desc: &TextureDesc,
        dst: &mut FrameBufferMut<'_>,
    ) -> Result<()> {
        let row = desc.row_bytes().unwrap_or(0);
        let height = desc.height as usize;
        let (stride, invert) = (dst.stride, dst.invert);
        let src_surface = self
            .surface_of(src)
            .context("copy source is not IOSurface-backed")?;

        let target = match &mut dst.target {
            FrameTarget::Bytes(bytes) => {
                let from = LockedSurface::lock(&src_surface, desc, true)?;
                copy_rows(from.bytes(), from.stride, bytes, stride, row, height, invert);
                return Ok(());
            }
            FrameTarget::Texture(texture) => *texture,
        };

        if let Some(to) = self.surface_of(target.raw()) {
            if to.id() == src_surface.id() {
                bail!("copy_out source and destination are the same surface");
            }
            let from = LockedSurface::lock(&src_surface, desc, true)?;
            let mut to = LockedSurface::lock(&to, desc, false)?;
            let to_stride = to.stride;
            copy_rows(from.bytes(), from.stride, to.bytes_mut(), to_stride, row, height, invert);
            return Ok(());
        }

        match (src, target.raw()) {
            (RawTexture::Metal(from), RawTexture::Metal(to)) if !invert => self.blit_metal(from, to),
            (_, RawTexture::Metal(to)) => {
                let from = LockedSurface::lock(&src_surface, desc, true)?;
                let mut tight = vec![0u8; row * height];
                copy_rows(from.bytes(), from.stride, &mut tight, row, row, height, invert);
                drop(from);
                Self::write_metal(to, desc, &tight);
                Ok(())
            }
            (_, RawTexture::Gl { name, target }) => {
                let alias = self.gl_alias(&src_surface, desc)?;
                self.blit_gl((alias, GL_TEXTURE_RECTANGLE), (*name, *target), desc, invert)
            }
            (_, RawTexture::Host(surface)) => {
                let from = LockedSurface::lock(&src_surface, desc, true)?;
                let mut to = surface.write();
                copy_rows(from.bytes(), from.stride, to.pixels_mut(), row, row, height, invert);
                Ok(())
            }
        }
    }

    fn release(&mut self, texture: RawTexture) {
        match texture {
            RawTexture::Gl { name, .. } => self.unbind_gl(name),
            RawTexture::Metal(texture) => {
                let Some(surface) = texture.iosurface() else {
                    return;
                };
                let id = surface.id() as u64;
                if let Some(alias) = self.gl_aliases.remove(&id) {
                    self.unbind_gl(alias);
                }
                if self.published.remove(&id).is_some() {
                    debug!("IOSurface {id} released");
                }
            }
            RawTexture::Host(_) => warn!("host surface handed to the Metal backend"),
        }
    }
}

impl Drop for MetalBackend {
    fn drop(&mut self) {
        let names: Vec<_> = self.gl_surfaces.keys().copied().collect();
        for name in names {
            self.unbind_gl(name);
        }
        unsafe {
            if self.read_fbo != 0 {
                gl::DeleteFramebuffers(1, &self.read_fbo);
            }
            if self.draw_fbo != 0 {
                gl::DeleteFramebuffers(1, &self.draw_fbo);
            }
        }
        if !self.published.is_empty() {
            debug!("withdrawing {} IOSurfaces", self.published.len());
        }
        self.published.clear();
    }
}
