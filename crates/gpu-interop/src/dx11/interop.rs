//! D3D11 backend: legacy DXGI shared handles, plus OpenGL bindings through
//! WGL_NV_DX_interop2.
//!
//! A shared texture is a `D3D11_RESOURCE_MISC_SHARED` texture; its
//! `IDXGIResource::GetSharedHandle` value is what gets published. Consumers in
//! other processes call `OpenSharedResource` on that value. OpenGL consumers
//! get a GL texture name registered against the opened D3D11 texture and must
//! lock it (`wglDXLockObjectsNV`) around GL access.

use std::collections::HashMap;
use std::ffi::{c_void, CStr};

use anyhow::{bail, Context, Result};
use gl::types::{GLenum, GLint, GLsizei, GLuint, GLvoid};
use tracing::{debug, error, warn};
use windows::core::Interface;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::IDXGIResource;
use windows::Win32::Graphics::Gdi::HDC;
use windows::Win32::Graphics::OpenGL::*;

use super::Dx11Device;
use crate::backend::InteropBackend;
use crate::format::{ApiKind, PixelFormat};
use crate::frame::{copy_rows, FrameBuffer, FrameBufferMut, FrameSource, FrameTarget};
use crate::texture::{RawTexture, TextureDesc};

/// WGL_NV_DX_interop2 constants.
const WGL_ACCESS_READ_WRITE_NV: GLenum = 0x0001;

// ---------------------------------------------------------------------------
// WGL function pointer types
// ---------------------------------------------------------------------------

type WglDxOpenDeviceNv = unsafe extern "system" fn(dx_device: *mut GLvoid) -> *mut GLvoid;
type WglDxCloseDeviceNv = unsafe extern "system" fn(h_device: *mut GLvoid) -> i32;
type WglDxRegisterObjectNv = unsafe extern "system" fn(
    h_device: *mut GLvoid,
    dx_object: *mut GLvoid,
    name: GLuint,
    obj_type: GLenum,
    access: GLenum,
) -> *mut GLvoid;
type WglDxUnregisterObjectNv =
    unsafe extern "system" fn(h_device: *mut GLvoid, h_object: *mut GLvoid) -> i32;
type WglDxLockObjectsNv = unsafe extern "system" fn(
    h_device: *mut GLvoid,
    count: GLint,
    h_objects: *mut *mut GLvoid,
) -> i32;
type WglDxUnlockObjectsNv = unsafe extern "system" fn(
    h_device: *mut GLvoid,
    count: GLint,
    h_objects: *mut *mut GLvoid,
) -> i32;
type WglGetExtensionsStringArb = unsafe extern "system" fn(hdc: HDC) -> *const i8;

/// Loaded WGL_NV_DX_interop2 function pointers.
struct WglInteropFunctions {
    dx_open_device: WglDxOpenDeviceNv,
    dx_close_device: WglDxCloseDeviceNv,
    dx_register_object: WglDxRegisterObjectNv,
    dx_unregister_object: WglDxUnregisterObjectNv,
    dx_lock_objects: WglDxLockObjectsNv,
    dx_unlock_objects: WglDxUnlockObjectsNv,
}

impl WglInteropFunctions {
    /// Load all WGL_NV_DX_interop2 function pointers via wglGetProcAddress.
    fn load() -> Option<Self> {
        unsafe {
            let load = |name: &CStr| -> Option<*mut GLvoid> {
                let addr = wglGetProcAddress(windows::core::PCSTR(name.as_ptr() as *const u8));
                let addr = addr?;
                let ptr = addr as usize as *mut GLvoid;
                if ptr.is_null() {
                    None
                } else {
                    Some(ptr)
                }
            };

            Some(Self {
                dx_open_device: std::mem::transmute::<*mut GLvoid, WglDxOpenDeviceNv>(load(
                    c"wglDXOpenDeviceNV",
                )?),
                dx_close_device: std::mem::transmute::<*mut GLvoid, WglDxCloseDeviceNv>(load(
                    c"wglDXCloseDeviceNV",
                )?),
                dx_register_object: std::mem::transmute::<*mut GLvoid, WglDxRegisterObjectNv>(
                    load(c"wglDXRegisterObjectNV")?,
                ),
                dx_unregister_object: std::mem::transmute::<*mut GLvoid, WglDxUnregisterObjectNv>(
                    load(c"wglDXUnregisterObjectNV")?,
                ),
                dx_lock_objects: std::mem::transmute::<*mut GLvoid, WglDxLockObjectsNv>(load(
                    c"wglDXLockObjectsNV",
                )?),
                dx_unlock_objects: std::mem::transmute::<*mut GLvoid, WglDxUnlockObjectsNv>(load(
                    c"wglDXUnlockObjectsNV",
                )?),
            })
        }
    }
}

/// The interop device opened against our D3D11 device.
struct GlInterop {
    fns: WglInteropFunctions,
    device: *mut GLvoid,
}

/// A GL texture name registered against a D3D11 texture.
struct GlObject {
    /// Keeps the D3D11 texture alive while GL refers to it.
    _d3d: ID3D11Texture2D,
    handle: *mut GLvoid,
}

/// GL upload/readback format for a DXGI format.
fn gl_pixel_format(format: PixelFormat) -> Result<(GLenum, GLenum)> {
    Ok(match format {
        PixelFormat::Bgra8Unorm | PixelFormat::Bgrx8Unorm | PixelFormat::Bgra8UnormSrgb => {
            (gl::BGRA, gl::UNSIGNED_BYTE)
        }
        PixelFormat::Rgba8Unorm | PixelFormat::Rgba8UnormSrgb => (gl::RGBA, gl::UNSIGNED_BYTE),
        PixelFormat::Rgba16Unorm => (gl::RGBA, gl::UNSIGNED_SHORT),
        PixelFormat::Rgba16Float => (gl::RGBA, gl::HALF_FLOAT),
        PixelFormat::Rgba32Float => (gl::RGBA, gl::FLOAT),
        other => bail!("{other} has no GL transfer format"),
    })
}

fn texture_desc(desc: &TextureDesc, usage: D3D11_USAGE, bind: u32, cpu: u32, misc: u32)
    -> D3D11_TEXTURE2D_DESC
{
    D3D11_TEXTURE2D_DESC {
        Width: desc.width,
        Height: desc.height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT(desc.format.code() as i32),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: usage,
        BindFlags: bind,
        CPUAccessFlags: cpu,
        MiscFlags: misc,
    }
}

/// [`InteropBackend`] over a D3D11 device.
///
/// The GL side is opened lazily on the first OpenGL binding, because it needs
/// a current GL context on the calling thread.
pub struct Dx11Backend {
    device: Dx11Device,
    gl: Option<GlInterop>,
    /// Registered GL names, by GL name.
    gl_objects: HashMap<GLuint, GlObject>,
    /// GL aliases of D3D11 textures, by COM pointer.
    aliases: HashMap<usize, GLuint>,
    /// Reusable CPU-readable copy target.
    staging: Option<(TextureDesc, ID3D11Texture2D)>,
    read_fbo: GLuint,
    draw_fbo: GLuint,
}

// SAFETY: the backend is only driven from the thread that owns the session;
// the raw WGL handles are never shared.
unsafe impl Send for Dx11Backend {}

impl Dx11Backend {
    pub fn new() -> Result<Self> {
        let device = Dx11Device::new()?;
        Ok(Self::from_device(device))
    }

    pub fn from_device(device: Dx11Device) -> Self {
        Self {
            device,
            gl: None,
            gl_objects: HashMap::new(),
            aliases: HashMap::new(),
            staging: None,
            read_fbo: 0,
            draw_fbo: 0,
        }
    }

    /// Borrow the D3D11 device held by this backend.
    pub fn device(&self) -> &Dx11Device {
        &self.device
    }

    /// Check if the WGL_NV_DX_interop2 extension is available in the current
    /// GL context.
    pub fn is_gl_interop_available() -> bool {
        unsafe {
            let get_ext: Option<WglGetExtensionsStringArb> = {
                let addr = wglGetProcAddress(windows::core::PCSTR(
                    c"wglGetExtensionsStringARB".as_ptr() as *const u8,
                ));
                addr.map(|a| {
                    std::mem::transmute::<
                        unsafe extern "system" fn() -> isize,
                        WglGetExtensionsStringArb,
                    >(a)
                })
            };

            let ext_fn = match get_ext {
                Some(f) => f,
                None => return false,
            };

            let hdc = wglGetCurrentDC();
            let ext_str = ext_fn(hdc);
            if ext_str.is_null() {
                return false;
            }

            CStr::from_ptr(ext_str)
                .to_string_lossy()
                .contains("WGL_NV_DX_interop2")
        }
    }

    fn ensure_gl(&mut self) -> Result<()> {
        if self.gl.is_some() {
            return Ok(());
        }
        let fns = WglInteropFunctions::load().context("WGL_NV_DX_interop2 is not available")?;
        let device = unsafe {
            let d3d_raw = self.device.device().as_raw() as *mut GLvoid;
            (fns.dx_open_device)(d3d_raw)
        };
        if device.is_null() {
            bail!("wglDXOpenDeviceNV failed");
        }
        unsafe {
            gl::GenFramebuffers(1, &mut self.read_fbo);
            gl::GenFramebuffers(1, &mut self.draw_fbo);
        }
        debug!("GL-D3D11 interop opened via WGL_NV_DX_interop2");
        self.gl = Some(GlInterop { fns, device });
        Ok(())
    }

    /// Register `d3d` with GL under a fresh texture name.
    fn register_gl(&mut self, d3d: &ID3D11Texture2D) -> Result<GLuint> {
        self.ensure_gl()?;
        let Some(interop) = self.gl.as_ref() else {
            bail!("GL interop device missing");
        };

        let mut name: GLuint = 0;
        unsafe { gl::GenTextures(1, &mut name) };
        if name == 0 {
            bail!("Failed to generate GL texture name for interop");
        }

        let handle = unsafe {
            (interop.fns.dx_register_object)(
                interop.device,
                d3d.as_raw() as *mut GLvoid,
                name,
                gl::TEXTURE_2D,
                WGL_ACCESS_READ_WRITE_NV,
            )
        };
        if handle.is_null() {
            unsafe { gl::DeleteTextures(1, &name) };
            bail!("wglDXRegisterObjectNV failed for GL texture {name}");
        }

        self.gl_objects.insert(
            name,
            GlObject {
                _d3d: d3d.clone(),
                handle,
            },
        );
        Ok(name)
    }

    /// GL name aliasing a D3D11 texture, registered on first use.
    fn gl_alias(&mut self, d3d: &ID3D11Texture2D) -> Result<GLuint> {
        let key = d3d.as_raw() as usize;
        if let Some(&name) = self.aliases.get(&key) {
            return Ok(name);
        }
        let name = self.register_gl(d3d)?;
        self.aliases.insert(key, name);
        Ok(name)
    }

    fn unregister_gl(&mut self, name: GLuint) {
        let Some(object) = self.gl_objects.remove(&name) else {
            return;
        };
        if let Some(interop) = &self.gl {
            unsafe {
                (interop.fns.dx_unregister_object)(interop.device, object.handle);
                gl::DeleteTextures(1, &name);
            }
        }
    }

    /// Lock registered GL names for GL access. Names that were not registered
    /// through this backend are ignored.
    fn lock_gl(&self, names: &[GLuint]) -> Result<()> {
        let mut handles: Vec<_> = names
            .iter()
            .filter_map(|n| self.gl_objects.get(n).map(|o| o.handle))
            .collect();
        let Some(interop) = &self.gl else {
            return Ok(());
        };
        if handles.is_empty() {
            return Ok(());
        }
        let ok = unsafe {
            (interop.fns.dx_lock_objects)(
                interop.device,
                handles.len() as GLint,
                handles.as_mut_ptr(),
            )
        };
        if ok == 0 {
            bail!("wglDXLockObjectsNV failed");
        }
        Ok(())
    }

    fn unlock_gl(&self, names: &[GLuint]) {
        let mut handles: Vec<_> = names
            .iter()
            .filter_map(|n| self.gl_objects.get(n).map(|o| o.handle))
            .collect();
        if let (Some(interop), false) = (&self.gl, handles.is_empty()) {
            unsafe {
                (interop.fns.dx_unlock_objects)(
                    interop.device,
                    handles.len() as GLint,
                    handles.as_mut_ptr(),
                );
            }
        }
    }

    /// Framebuffer blit between two GL textures, flipping if asked.
    fn blit_gl(&self, src: GLuint, dst: GLuint, desc: &TextureDesc, invert: bool) -> Result<()> {
        let (w, h) = (desc.width as GLsizei, desc.height as GLsizei);
        self.lock_gl(&[src, dst])?;
        unsafe {
            gl::BindFramebuffer(gl::READ_FRAMEBUFFER, self.read_fbo);
            gl::FramebufferTexture2D(
                gl::READ_FRAMEBUFFER,
                gl::COLOR_ATTACHMENT0,
                gl::TEXTURE_2D,
                src,
                0,
            );
            if gl::CheckFramebufferStatus(gl::READ_FRAMEBUFFER) != gl::FRAMEBUFFER_COMPLETE {
                gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
                self.unlock_gl(&[src, dst]);
                bail!("READ_FRAMEBUFFER incomplete for GL texture {src}");
            }
            gl::ReadBuffer(gl::COLOR_ATTACHMENT0);

            gl::BindFramebuffer(gl::DRAW_FRAMEBUFFER, self.draw_fbo);
            gl::FramebufferTexture2D(
                gl::DRAW_FRAMEBUFFER,
                gl::COLOR_ATTACHMENT0,
                gl::TEXTURE_2D,
                dst,
                0,
            );
            gl::DrawBuffer(gl::COLOR_ATTACHMENT0);

            let (y0, y1) = if invert { (h, 0) } else { (0, h) };
            gl::BlitFramebuffer(0, 0, w, h, 0, y0, w, y1, gl::COLOR_BUFFER_BIT, gl::NEAREST);

            gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
            gl::Finish();
        }
        self.unlock_gl(&[src, dst]);
        Ok(())
    }

    fn upload_gl(&self, dst: GLuint, desc: &TextureDesc, tight: &[u8]) -> Result<()> {
        let (format, ty) = gl_pixel_format(desc.format)?;
        self.lock_gl(&[dst])?;
        unsafe {
            gl::BindTexture(gl::TEXTURE_2D, dst);
            gl::PixelStorei(gl::UNPACK_ALIGNMENT, 1);
            gl::TexSubImage2D(
                gl::TEXTURE_2D,
                0,
                0,
                0,
                desc.width as GLsizei,
                desc.height as GLsizei,
                format,
                ty,
                tight.as_ptr() as *const GLvoid,
            );
            gl::BindTexture(gl::TEXTURE_2D, 0);
            gl::Finish();
        }
        self.unlock_gl(&[dst]);
        Ok(())
    }

    fn download_gl(&self, src: GLuint, desc: &TextureDesc) -> Result<Vec<u8>> {
        let (format, ty) = gl_pixel_format(desc.format)?;
        let mut tight = vec![0u8; desc.image_bytes().unwrap_or(0)];
        self.lock_gl(&[src])?;
        unsafe {
            gl::BindTexture(gl::TEXTURE_2D, src);
            gl::PixelStorei(gl::PACK_ALIGNMENT, 1);
            gl::GetTexImage(
                gl::TEXTURE_2D,
                0,
                format,
                ty,
                tight.as_mut_ptr() as *mut GLvoid,
            );
            gl::BindTexture(gl::TEXTURE_2D, 0);
        }
        self.unlock_gl(&[src]);
        Ok(tight)
    }

    /// Texture-to-texture copy on the D3D11 side; row by row when flipping.
    fn copy_d3d(
        &self,
        dst: &ID3D11Texture2D,
        src: &ID3D11Texture2D,
        desc: &TextureDesc,
        invert: bool,
    ) {
        let context = self.device.context();
        unsafe {
            if !invert {
                context.CopyResource(dst, src);
                return;
            }
            for row in 0..desc.height {
                let region = D3D11_BOX {
                    left: 0,
                    top: desc.height - 1 - row,
                    front: 0,
                    right: desc.width,
                    bottom: desc.height - row,
                    back: 1,
                };
                context.CopySubresourceRegion(dst, 0, 0, row, 0, src, 0, Some(&region));
            }
        }
    }

    fn upload_d3d(&self, dst: &ID3D11Texture2D, bytes: &[u8], stride: usize) {
        unsafe {
            self.device.context().UpdateSubresource(
                dst,
                0,
                None,
                bytes.as_ptr() as *const c_void,
                stride as u32,
                0,
            );
        }
    }

    /// Read a D3D11 texture back into `dst` through the staging texture.
    fn download_d3d(
        &mut self,
        src: &ID3D11Texture2D,
        desc: &TextureDesc,
        dst: &mut [u8],
        stride: usize,
        invert: bool,
    ) -> Result<()> {
        let staging = match &self.staging {
            Some((staged, texture)) if staged == desc => texture.clone(),
            _ => {
                let staging_desc = texture_desc(
                    desc,
                    D3D11_USAGE_STAGING,
                    0,
                    D3D11_CPU_ACCESS_READ.0 as u32,
                    0,
                );
                let mut texture = None;
                unsafe {
                    self.device.device().CreateTexture2D(
                        &staging_desc,
                        None,
                        Some(&mut texture as *mut _),
                    )
                }
                .context("CreateTexture2D (staging) failed")?;
                let texture = texture.context("CreateTexture2D returned no staging texture")?;
                self.staging = Some((*desc, texture.clone()));
                texture
            }
        };

        let context = self.device.context();
        let row = desc.row_bytes().unwrap_or(0);
        unsafe {
            context.CopyResource(&staging, src);
            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            context
                .Map(&staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                .context("Map (staging) failed")?;
            let pitch = mapped.RowPitch as usize;
            let mapped_bytes = std::slice::from_raw_parts(
                mapped.pData as *const u8,
                pitch * (desc.height as usize - 1) + row,
            );
            copy_rows(mapped_bytes, pitch, dst, stride, row, desc.height as usize, invert);
            context.Unmap(&staging, 0);
        }
        Ok(())
    }
}

impl InteropBackend for Dx11Backend {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn api_kind(&self) -> ApiKind {
        ApiKind::Dx11
    }

    fn supports(&self, api: ApiKind) -> bool {
        matches!(api, ApiKind::Dx11 | ApiKind::OpenGl)
    }

    fn create_shared(&mut self, desc: &TextureDesc) -> Result<(RawTexture, u64)> {
        let d3d_desc = texture_desc(
            desc,
            D3D11_USAGE_DEFAULT,
            (D3D11_BIND_SHADER_RESOURCE.0 | D3D11_BIND_RENDER_TARGET.0) as u32,
            0,
            D3D11_RESOURCE_MISC_SHARED.0 as u32,
        );
        let mut texture = None;
        unsafe {
            self.device
                .device()
                .CreateTexture2D(&d3d_desc, None, Some(&mut texture as *mut _))
        }
        .with_context(|| format!("CreateTexture2D {}x{} {}", desc.width, desc.height, desc.format))?;
        let texture: ID3D11Texture2D = texture.context("CreateTexture2D returned no texture")?;

        let resource: IDXGIResource = texture.cast().context("texture is not a DXGI resource")?;
        let handle = unsafe { resource.GetSharedHandle() }.context("GetSharedHandle failed")?;
        debug!(
            "D3D11 shared texture {}x{} {} handle {:?}",
            desc.width, desc.height, desc.format, handle.0
        );
        Ok((RawTexture::Dx11(texture), handle.0 as usize as u64))
    }

    fn open_shared(
        &mut self,
        creator: ApiKind,
        handle: u64,
        desc: &TextureDesc,
        api: ApiKind,
    ) -> Result<RawTexture> {
        if !matches!(creator, ApiKind::Dx11 | ApiKind::Dx9) {
            bail!("D3D11 cannot open {creator} share handles");
        }
        let texture: ID3D11Texture2D = unsafe {
            self.device
                .device()
                .OpenSharedResource(HANDLE(handle as usize as *mut c_void))
        }
        .with_context(|| format!("OpenSharedResource({handle:#x}) failed"))?;

        let mut found = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut found) };
        if (found.Width, found.Height) != (desc.width, desc.height)
            || found.Format.0 as u32 != desc.format.code()
        {
            bail!(
                "share handle {handle:#x} is {}x{} format {}, expected {:?}",
                found.Width,
                found.Height,
                found.Format.0,
                desc
            );
        }

        match api {
            ApiKind::Dx11 => Ok(RawTexture::Dx11(texture)),
            ApiKind::OpenGl => {
                let name = self.register_gl(&texture)?;
                Ok(RawTexture::Gl {
                    name,
                    target: gl::TEXTURE_2D,
                })
            }
            other => bail!("D3D11 backend cannot bind for {other}"),
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
        match (dst, &src.source) {
            (RawTexture::Dx11(dst), FrameSource::Bytes(bytes)) => {
                if src.invert {
                    let mut tight = vec![0u8; row * height];
                    copy_rows(bytes, src.stride, &mut tight, row, row, height, true);
                    self.upload_d3d(dst, &tight, row);
                } else {
                    self.upload_d3d(dst, bytes, src.stride);
                }
            }
            (RawTexture::Dx11(dst), FrameSource::Texture(texture)) => match texture.raw() {
                RawTexture::Dx11(from) => self.copy_d3d(dst, from, desc, src.invert),
                RawTexture::Gl { name, .. } => {
                    let alias = self.gl_alias(dst)?;
                    self.blit_gl(*name, alias, desc, src.invert)?;
                }
                RawTexture::Host(surface) => {
                    let surface = surface.read();
                    if src.invert {
                        let mut tight = vec![0u8; row * height];
                        copy_rows(surface.pixels(), row, &mut tight, row, row, height, true);
                        self.upload_d3d(dst, &tight, row);
                    } else {
                        self.upload_d3d(dst, surface.pixels(), row);
                    }
                }
            },
            (RawTexture::Gl { name, .. }, FrameSource::Bytes(bytes)) => {
                let mut tight = vec![0u8; row * height];
                copy_rows(bytes, src.stride, &mut tight, row, row, height, src.invert);
                self.upload_gl(*name, desc, &tight)?;
            }
            (RawTexture::Gl { name, .. }, FrameSource::Texture(texture)) => match texture.raw() {
                RawTexture::Gl { name: from, .. } => self.blit_gl(*from, *name, desc, src.invert)?,
                RawTexture::Dx11(from) => {
                    let alias = self.gl_alias(from)?;
                    self.blit_gl(alias, *name, desc, src.invert)?;
                }
                other => bail!("D3D11 backend cannot copy from {other:?} into GL"),
            },
            (other, _) => bail!("D3D11 backend cannot copy into {other:?}"),
        }
        self.device.wait_idle();
        Ok(())
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
        match (src, &mut dst.target) {
            (RawTexture::Dx11(from), FrameTarget::Bytes(bytes)) => {
                self.download_d3d(from, desc, bytes, stride, invert)?;
            }
            (RawTexture::Dx11(from), FrameTarget::Texture(texture)) => match texture.raw() {
                RawTexture::Dx11(to) => self.copy_d3d(to, from, desc, invert),
                RawTexture::Gl { name, .. } => {
                    let alias = self.gl_alias(from)?;
                    self.blit_gl(alias, *name, desc, invert)?;
                }
                other => bail!("D3D11 backend cannot copy into {other:?}"),
            },
            (RawTexture::Gl { name, .. }, FrameTarget::Bytes(bytes)) => {
                let tight = self.download_gl(*name, desc)?;
                copy_rows(&tight, row, bytes, stride, row, height, invert);
            }
            (RawTexture::Gl { name, .. }, FrameTarget::Texture(texture)) => match texture.raw() {
                RawTexture::Gl { name: to, .. } => self.blit_gl(*name, *to, desc, invert)?,
                RawTexture::Dx11(to) => {
                    let alias = self.gl_alias(to)?;
                    self.blit_gl(*name, alias, desc, invert)?;
                }
                other => bail!("D3D11 backend cannot copy GL into {other:?}"),
            },
            (other, _) => bail!("D3D11 backend cannot copy from {other:?}"),
        }
        self.device.wait_idle();
        Ok(())
    }

    fn lock(&mut self, texture: &RawTexture) -> Result<()> {
        match texture {
            RawTexture::Gl { name, .. } => self.lock_gl(&[*name]),
            _ => Ok(()),
        }
    }

    fn unlock(&mut self, texture: &RawTexture) {
        if let RawTexture::Gl { name, .. } = texture {
            self.unlock_gl(&[*name]);
        }
    }

    fn release(&mut self, texture: RawTexture) {
        match texture {
            RawTexture::Gl { name, .. } => self.unregister_gl(name),
            RawTexture::Dx11(d3d) => {
                if let Some(alias) = self.aliases.remove(&(d3d.as_raw() as usize)) {
                    self.unregister_gl(alias);
                }
                if let Some((_, staging)) = &self.staging {
                    if staging.as_raw() == d3d.as_raw() {
                        self.staging = None;
                    }
                }
            }
            RawTexture::Host(_) => warn!("host surface handed to the D3D11 backend"),
        }
    }
}

impl Drop for Dx11Backend {
    fn drop(&mut self) {
        let names: Vec<_> = self.gl_objects.keys().copied().collect();
        for name in names {
            self.unregister_gl(name);
        }
        self.aliases.clear();
        if let Some(interop) = self.gl.take() {
            unsafe {
                if self.read_fbo != 0 {
                    gl::DeleteFramebuffers(1, &self.read_fbo);
                }
                if self.draw_fbo != 0 {
                    gl::DeleteFramebuffers(1, &self.draw_fbo);
                }
                if (interop.fns.dx_close_device)(interop.device) == 0 {
                    error!("wglDXCloseDeviceNV failed");
                }
            }
        }
    }
}
