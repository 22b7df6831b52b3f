//! Frame bridge: the only place where sample memory is read as pixels
//!
//! The bridge converts between [`Sample`]s exchanged with the two pipelines
//! and canonical [`Frame`]s. Three-channel data is held internally as BGR8;
//! RGB8 samples are swapped on the way in and swapped back on the way out.
//! The bridge keeps no state between calls.

use bytes::Bytes;

use super::caps::{CapsDescriptor, PixelFormat};
use super::clock::MediaClock;
use super::error::RelayError;
use super::types::{Frame, Sample};

/// Stateless converter between samples and frames
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameBridge;

impl FrameBridge {
    pub fn new() -> Self {
        Self
    }

    /// Internal format a sample of `format` is decoded into
    pub fn canonical_format(format: PixelFormat) -> PixelFormat {
        match format {
            PixelFormat::Rgb8 => PixelFormat::Bgr8,
            other => other,
        }
    }

    /// Interpret a capture sample as a frame.
    ///
    /// The sample must carry exactly `expected`; anything else is a
    /// negotiation error. Rows are read `sample.stride()` bytes apart and
    /// copied into a tightly packed, exclusively owned buffer.
    pub fn decode(&self, sample: &Sample, expected: &CapsDescriptor) -> Result<Frame, RelayError> {
        let caps = sample.caps();
        if caps != expected {
            return Err(RelayError::negotiation(format!(
                "capture produced {} but the bridge expects {}",
                caps, expected
            )));
        }
        if caps.width == 0 || caps.height == 0 {
            return Err(RelayError::EmptyFrame {
                width: caps.width,
                height: caps.height,
            });
        }

        let row = caps.tight_stride();
        let stride = sample.stride();
        if stride < row {
            return Err(RelayError::BufferMap {
                reason: format!("stride {} shorter than row of {} bytes", stride, row),
            });
        }
        let src = sample.buffer();
        // the last row need not carry its padding
        let needed = stride * (caps.height as usize - 1) + row;
        if src.len() < needed {
            return Err(RelayError::BufferMap {
                reason: format!("buffer holds {} bytes, caps need {}", src.len(), needed),
            });
        }

        let height = caps.height as usize;
        let mut data = vec![0u8; row * height];
        if stride == row {
            data.copy_from_slice(&src[..row * height]);
        } else {
            for (y, dst) in data.chunks_exact_mut(row).enumerate() {
                let start = y * stride;
                dst.copy_from_slice(&src[start..start + row]);
            }
        }

        let format = Self::canonical_format(caps.format);
        if format != caps.format {
            swap_red_blue(&mut data, caps.format.bytes_per_pixel());
        }

        Frame::new(caps.width, caps.height, format, row, data)
    }

    /// Turn a frame into a fresh sample carrying `target`.
    ///
    /// The output buffer is newly allocated, tightly packed and never
    /// aliases the frame, so the caller may reuse or drop the frame right
    /// away. Each sample gets a new, strictly increasing timestamp.
    pub fn encode(
        &self,
        frame: &Frame,
        target: &CapsDescriptor,
        clock: &MediaClock,
    ) -> Result<Sample, RelayError> {
        if frame.is_empty() {
            return Err(RelayError::EmptyFrame {
                width: frame.width(),
                height: frame.height(),
            });
        }
        if frame.width() != target.width || frame.height() != target.height {
            return Err(RelayError::negotiation(format!(
                "frame is {}x{} but transmit expects {}x{}",
                frame.width(),
                frame.height(),
                target.width,
                target.height
            )));
        }
        if !frame.format().converts_to(target.format) {
            return Err(RelayError::negotiation(format!(
                "cannot encode {} frame as {}",
                frame.format(),
                target.format
            )));
        }

        let row = target.tight_stride();
        let height = frame.height() as usize;
        let src = frame.data();
        let mut data = if frame.stride() == row {
            src[..row * height].to_vec()
        } else {
            let mut data = Vec::with_capacity(row * height);
            for y in 0..frame.height() {
                data.extend_from_slice(frame.row(y));
            }
            data
        };

        if frame.format() != target.format {
            swap_red_blue(&mut data, target.format.bytes_per_pixel());
        }

        let pts = clock.next_pts();
        Ok(Sample::new(Bytes::from(data), *target, pts))
    }
}

/// Exchange the first and third channel of every pixel
fn swap_red_blue(data: &mut [u8], bpp: usize) {
    for px in data.chunks_exact_mut(bpp) {
        px.swap(0, 2);
    }
}
