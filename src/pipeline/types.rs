//! Core types exchanged by the relay: timestamps, frames and samples

use bytes::Bytes;

use super::caps::{CapsDescriptor, PixelFormat};
use super::error::RelayError;

/// Timestamp representation for media samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    /// Microseconds since the clock base
    pub micros: i64,
}

impl Timestamp {
    /// Create a new timestamp from microseconds
    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    /// Timestamp in units of a `clock_rate` Hz media clock (e.g. 90 kHz RTP)
    pub fn to_clock_rate(&self, clock_rate: u32) -> u64 {
        (self.micros.max(0) as u128 * clock_rate as u128 / 1_000_000) as u64
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}µs", self.micros)
    }
}

/// Canonical in-process image: geometry, pixel format and an owned buffer.
///
/// Rows are `stride` bytes apart; `data.len() >= stride * height`. Fields are
/// private so a frame handed around by reference cannot be altered; whoever
/// owns a frame can still mutate it through [`Frame::row_mut`].
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    stride: usize,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap an owned buffer, validating stride and length
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        stride: usize,
        data: Vec<u8>,
    ) -> Result<Self, RelayError> {
        let row = width as usize * format.bytes_per_pixel();
        if stride < row {
            return Err(RelayError::BufferMap {
                reason: format!("stride {} shorter than row of {} bytes", stride, row),
            });
        }
        let needed = stride * height as usize;
        if data.len() < needed {
            return Err(RelayError::BufferMap {
                reason: format!("buffer holds {} bytes, frame needs {}", data.len(), needed),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            stride,
            data,
        })
    }

    /// A tightly packed frame with every pixel set to `pixel`
    pub fn filled(width: u32, height: u32, format: PixelFormat, pixel: &[u8]) -> Self {
        let bpp = format.bytes_per_pixel();
        let stride = width as usize * bpp;
        let mut data = Vec::with_capacity(stride * height as usize);
        for _ in 0..(width as usize * height as usize) {
            data.extend((0..bpp).map(|c| pixel.get(c).copied().unwrap_or(0)));
        }
        Self {
            width,
            height,
            format,
            stride,
            data,
        }
    }

    /// A zero-area frame
    pub fn empty(format: PixelFormat) -> Self {
        Self {
            width: 0,
            height: 0,
            format,
            stride: 0,
            data: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    /// Bytes of pixel data in one row, excluding padding
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.row_bytes()]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        let len = self.row_bytes();
        &mut self.data[start..start + len]
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let bpp = self.format.bytes_per_pixel();
        let start = y as usize * self.stride + x as usize * bpp;
        &self.data[start..start + bpp]
    }

    /// Pixel intensity in 0..=255, whatever the format
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        let p = self.pixel(x, y);
        let (r, g, b) = match self.format {
            PixelFormat::Gray8 => return p[0],
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => (p[0], p[1], p[2]),
            PixelFormat::Bgr8 | PixelFormat::Bgra8 => (p[2], p[1], p[0]),
        };
        ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114 + 500) / 1000) as u8
    }

    /// Paint one pixel given as a blue/green/red triple; out of bounds is a no-op
    pub fn put_bgr(&mut self, x: i64, y: i64, bgr: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let bpp = self.format.bytes_per_pixel();
        let start = y as usize * self.stride + x as usize * bpp;
        let px = &mut self.data[start..start + bpp];
        let [b, g, r] = bgr;
        match self.format {
            PixelFormat::Bgr8 => px.copy_from_slice(&[b, g, r]),
            PixelFormat::Rgb8 => px.copy_from_slice(&[r, g, b]),
            PixelFormat::Bgra8 => px.copy_from_slice(&[b, g, r, 255]),
            PixelFormat::Rgba8 => px.copy_from_slice(&[r, g, b, 255]),
            PixelFormat::Gray8 => {
                px[0] = ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114 + 500) / 1000) as u8
            }
        }
    }

    /// Copy of this frame with rows packed back to back
    pub fn to_packed(&self) -> Frame {
        if self.stride == self.row_bytes() && self.data.len() == self.row_bytes() * self.height as usize {
            return self.clone();
        }
        let mut data = Vec::with_capacity(self.row_bytes() * self.height as usize);
        for y in 0..self.height {
            data.extend_from_slice(self.row(y));
        }
        Frame {
            width: self.width,
            height: self.height,
            format: self.format,
            stride: self.row_bytes(),
            data,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("stride", &self.stride)
            .field("size", &self.data.len())
            .finish()
    }
}

/// One timestamped buffer exchanged with an external pipeline.
///
/// Samples are created fresh for every frame and consumed exactly once by
/// whoever receives them.
#[derive(Clone)]
pub struct Sample {
    buffer: Bytes,
    caps: CapsDescriptor,
    stride: usize,
    pts: Timestamp,
}

impl Sample {
    /// A sample whose rows are tightly packed
    pub fn new(buffer: Bytes, caps: CapsDescriptor, pts: Timestamp) -> Self {
        let stride = caps.tight_stride();
        Self::with_stride(buffer, caps, stride, pts)
    }

    /// A sample whose rows are `stride` bytes apart
    pub fn with_stride(buffer: Bytes, caps: CapsDescriptor, stride: usize, pts: Timestamp) -> Self {
        Self {
            buffer,
            caps,
            stride,
            pts,
        }
    }

    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    pub fn caps(&self) -> &CapsDescriptor {
        &self.caps
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn pts(&self) -> Timestamp {
        self.pts
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("caps", &self.caps.to_caps_string())
            .field("stride", &self.stride)
            .field("pts", &self.pts)
            .field("size", &self.size())
            .finish()
    }
}
