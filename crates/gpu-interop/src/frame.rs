//! Caller-supplied frame buffers for [`copy_in`](crate::InteropSession::copy_in)
//! and [`copy_out`](crate::InteropSession::copy_out).
//!
//! A frame is either CPU memory (with an optional row stride larger than the
//! packed row size) or another local texture. Frames are borrowed for the
//! duration of one call only.

use crate::error::InteropError;
use crate::format::PixelFormat;
use crate::texture::{LocalTexture, TextureDesc};

/// Pixels to be copied into a shared texture.
#[derive(Debug)]
pub enum FrameSource<'a> {
    Bytes(&'a [u8]),
    Texture(&'a LocalTexture),
}

/// Where pixels read from a shared texture end up.
#[derive(Debug)]
pub enum FrameTarget<'a> {
    Bytes(&'a mut [u8]),
    Texture(&'a LocalTexture),
}

/// Read-only frame description.
///
/// Only the constructors can build one, so the layout always fits the source.
#[derive(Debug)]
pub struct FrameBuffer<'a> {
    pub(crate) desc: TextureDesc,
    /// Bytes between the starts of two consecutive rows.
    pub(crate) stride: usize,
    /// Flip rows vertically while copying.
    pub(crate) invert: bool,
    pub(crate) source: FrameSource<'a>,
}

/// Writable frame description.
#[derive(Debug)]
pub struct FrameBufferMut<'a> {
    pub(crate) desc: TextureDesc,
    pub(crate) stride: usize,
    pub(crate) invert: bool,
    pub(crate) target: FrameTarget<'a>,
}

fn checked_layout(desc: TextureDesc, stride: usize, len: usize) -> Result<(), InteropError> {
    let row = desc.row_bytes().ok_or_else(|| {
        InteropError::InvalidFrame(format!("no texel size known for {}", desc.format))
    })?;
    if desc.width == 0 || desc.height == 0 {
        return Err(InteropError::InvalidFrame(format!(
            "empty frame {}x{}",
            desc.width, desc.height
        )));
    }
    if stride < row {
        return Err(InteropError::InvalidFrame(format!(
            "stride {stride} is shorter than a {row}-byte row"
        )));
    }
    let needed = stride * (desc.height as usize - 1) + row;
    if len < needed {
        return Err(InteropError::InvalidFrame(format!(
            "buffer holds {len} bytes, {}x{} {} needs {needed}",
            desc.width, desc.height, desc.format
        )));
    }
    Ok(())
}

fn checked_texture(desc: TextureDesc, texture: &LocalTexture) -> Result<(), InteropError> {
    if texture.desc() != desc {
        return Err(InteropError::InvalidFrame(format!(
            "frame describes {desc:?} but its texture is {:?}",
            texture.desc()
        )));
    }
    Ok(())
}

impl<'a> FrameBuffer<'a> {
    /// A tightly packed CPU frame.
    pub fn from_bytes(
        bytes: &'a [u8],
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, InteropError> {
        let desc = TextureDesc::new(width, height, format);
        let stride = desc.row_bytes().unwrap_or(0);
        Self::from_padded_bytes(bytes, desc, stride)
    }

    /// A CPU frame whose rows are `stride` bytes apart.
    pub fn from_padded_bytes(
        bytes: &'a [u8],
        desc: TextureDesc,
        stride: usize,
    ) -> Result<Self, InteropError> {
        checked_layout(desc, stride, bytes.len())?;
        Ok(Self {
            desc,
            stride,
            invert: false,
            source: FrameSource::Bytes(bytes),
        })
    }

    pub fn from_texture(texture: &'a LocalTexture) -> Self {
        let desc = texture.desc();
        Self {
            desc,
            stride: desc.row_bytes().unwrap_or(0),
            invert: false,
            source: FrameSource::Texture(texture),
        }
    }

    pub fn inverted(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    pub fn desc(&self) -> TextureDesc {
        self.desc
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn is_inverted(&self) -> bool {
        self.invert
    }

    pub fn source(&self) -> &FrameSource<'a> {
        &self.source
    }

    /// Re-check that the layout still fits the source before any copy.
    pub(crate) fn validate(&self) -> Result<(), InteropError> {
        match &self.source {
            FrameSource::Bytes(bytes) => checked_layout(self.desc, self.stride, bytes.len()),
            FrameSource::Texture(texture) => checked_texture(self.desc, texture),
        }
    }
}

impl<'a> FrameBufferMut<'a> {
    pub fn from_bytes(
        bytes: &'a mut [u8],
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, InteropError> {
        let desc = TextureDesc::new(width, height, format);
        let stride = desc.row_bytes().unwrap_or(0);
        Self::from_padded_bytes(bytes, desc, stride)
    }

    pub fn from_padded_bytes(
        bytes: &'a mut [u8],
        desc: TextureDesc,
        stride: usize,
    ) -> Result<Self, InteropError> {
        checked_layout(desc, stride, bytes.len())?;
        Ok(Self {
            desc,
            stride,
            invert: false,
            target: FrameTarget::Bytes(bytes),
        })
    }

    pub fn from_texture(texture: &'a LocalTexture) -> Self {
        let desc = texture.desc();
        Self {
            desc,
            stride: desc.row_bytes().unwrap_or(0),
            invert: false,
            target: FrameTarget::Texture(texture),
        }
    }

    pub fn inverted(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    pub fn desc(&self) -> TextureDesc {
        self.desc
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn is_inverted(&self) -> bool {
        self.invert
    }

    pub fn target_mut(&mut self) -> &mut FrameTarget<'a> {
        &mut self.target
    }

    pub(crate) fn validate(&self) -> Result<(), InteropError> {
        match &self.target {
            FrameTarget::Bytes(bytes) => checked_layout(self.desc, self.stride, bytes.len()),
            FrameTarget::Texture(texture) => checked_texture(self.desc, texture),
        }
    }
}

/// Copy `height` rows of `row_bytes` each between buffers with independent
/// strides, dropping any row padding and optionally flipping vertically.
///
/// # Panics
///
/// Panics if either buffer is shorter than its stride layout requires.
pub fn copy_rows(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_bytes: usize,
    height: usize,
    invert: bool,
) {
    if src_stride == row_bytes && dst_stride == row_bytes && !invert {
        let len = row_bytes * height;
        dst[..len].copy_from_slice(&src[..len]);
        return;
    }

    for row in 0..height {
        let src_row = if invert { height - 1 - row } else { row };
        let from = src_row * src_stride;
        let to = row * dst_stride;
        dst[to..to + row_bytes].copy_from_slice(&src[from..from + row_bytes]);
    }
}
