//! Frame squaring
//!
//! Turns a `w x h` frame into a `max(w, h)` square, either by padding the
//! short dimension with black or by resampling the whole frame.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, Pixel, Rgb, Rgba};
use log::warn;

use super::Transform;
use crate::config::SquareMethod;
use crate::pipeline::caps::CapsDescriptor;
use crate::pipeline::types::Frame;

/// Black, opaque where the format has alpha
const FILL: [u8; 4] = [0, 0, 0, 255];

#[derive(Debug, Clone, Copy)]
pub struct SquareTransform {
    method: SquareMethod,
}

impl SquareTransform {
    pub fn new(method: SquareMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> SquareMethod {
        self.method
    }

    fn pad(frame: &Frame, side: u32, centred: bool) -> Frame {
        let (w, h) = (frame.width(), frame.height());
        let (x0, y0) = if centred {
            ((side - w) / 2, (side - h) / 2)
        } else {
            (0, 0)
        };
        let bpp = frame.format().bytes_per_pixel();
        let mut out = Frame::filled(side, side, frame.format(), &FILL);
        let start = x0 as usize * bpp;
        for y in 0..h {
            let src = frame.row(y);
            out.row_mut(y0 + y)[start..start + src.len()].copy_from_slice(src);
        }
        out
    }

    fn stretch(frame: &Frame, side: u32) -> Option<Frame> {
        let packed = frame.to_packed();
        let (w, h, format) = (packed.width(), packed.height(), packed.format());
        let data = packed.into_data();
        let resized = match format.bytes_per_pixel() {
            1 => resize::<Luma<u8>>(w, h, data, side)?,
            3 => resize::<Rgb<u8>>(w, h, data, side)?,
            4 => resize::<Rgba<u8>>(w, h, data, side)?,
            _ => return None,
        };
        Frame::new(side, side, format, side as usize * format.bytes_per_pixel(), resized).ok()
    }
}

/// Bilinear resample of a packed buffer; channel order does not matter
fn resize<P>(width: u32, height: u32, data: Vec<u8>, side: u32) -> Option<Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let image = ImageBuffer::<P, Vec<u8>>::from_raw(width, height, data)?;
    Some(imageops::resize(&image, side, side, FilterType::Triangle).into_raw())
}

impl Transform for SquareTransform {
    fn name(&self) -> &'static str {
        "square"
    }

    fn apply(&self, frame: &Frame) -> Frame {
        if frame.is_empty() {
            return Frame::empty(frame.format());
        }
        let side = frame.width().max(frame.height());
        if frame.width() == frame.height() {
            return frame.to_packed();
        }
        match self.method {
            SquareMethod::PadCenter => Self::pad(frame, side, true),
            SquareMethod::PadEdge => Self::pad(frame, side, false),
            SquareMethod::Stretch => Self::stretch(frame, side).unwrap_or_else(|| {
                warn!("square: could not resample {:?}, padding instead", frame);
                Self::pad(frame, side, true)
            }),
        }
    }

    fn output_caps(&self, input: &CapsDescriptor) -> CapsDescriptor {
        let side = input.width.max(input.height);
        input.with_size(side, side)
    }
}
