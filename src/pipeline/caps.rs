//! Capability descriptors and negotiation
//!
//! A [`CapsDescriptor`] is the format contract (pixel format, resolution,
//! frame rate) that a pipeline endpoint and the frame bridge agree on before
//! any frame flows. The descriptor is fixed up-front by configuration:
//! negotiation only checks that both endpoints accept it and fails fast
//! otherwise.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use super::error::RelayError;
use super::types::Timestamp;

/// Raw pixel layouts understood by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    #[serde(rename = "RGB", alias = "RGB8", alias = "rgb")]
    Rgb8,
    #[serde(rename = "BGR", alias = "BGR8", alias = "bgr")]
    Bgr8,
    #[serde(rename = "RGBA", alias = "RGBA8", alias = "rgba")]
    Rgba8,
    #[serde(rename = "BGRA", alias = "BGRA8", alias = "bgra")]
    Bgra8,
    #[serde(rename = "GRAY8", alias = "gray8", alias = "GRAY")]
    Gray8,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 5] = [
        PixelFormat::Rgb8,
        PixelFormat::Bgr8,
        PixelFormat::Rgba8,
        PixelFormat::Bgra8,
        PixelFormat::Gray8,
    ];

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Wire token used in caps strings
    pub fn token(&self) -> &'static str {
        match self {
            PixelFormat::Rgb8 => "RGB",
            PixelFormat::Bgr8 => "BGR",
            PixelFormat::Rgba8 => "RGBA",
            PixelFormat::Bgra8 => "BGRA",
            PixelFormat::Gray8 => "GRAY8",
        }
    }

    /// The format reachable through the single supported conversion
    /// (red/blue channel reordering)
    pub fn channel_swapped(&self) -> Option<PixelFormat> {
        match self {
            PixelFormat::Rgb8 => Some(PixelFormat::Bgr8),
            PixelFormat::Bgr8 => Some(PixelFormat::Rgb8),
            _ => None,
        }
    }

    /// Whether a frame in `self` can be written as `target` without any
    /// conversion other than an RGB/BGR swap
    pub fn converts_to(&self, target: PixelFormat) -> bool {
        *self == target || self.channel_swapped() == Some(target)
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

impl FromStr for PixelFormat {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let format = match upper.as_str() {
            "RGB" | "RGB8" => PixelFormat::Rgb8,
            "BGR" | "BGR8" => PixelFormat::Bgr8,
            "RGBA" | "RGBA8" => PixelFormat::Rgba8,
            "BGRA" | "BGRA8" => PixelFormat::Bgra8,
            "GRAY8" | "GRAY" => PixelFormat::Gray8,
            _ => {
                return Err(RelayError::Config(format!(
                    "unknown pixel format '{}' (expected RGB, BGR, RGBA, BGRA or GRAY8)",
                    s
                )));
            }
        };
        Ok(format)
    }
}

/// Frame rate as a rational number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Duration of one frame; a zero numerator means "as fast as possible"
    pub fn frame_duration(&self) -> Duration {
        if self.numerator == 0 || self.denominator == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(1_000_000_000u64 * self.denominator as u64 / self.numerator as u64)
    }

    /// Presentation time of frame `index`, counted from the first frame
    pub fn frame_pts(&self, index: u64) -> Timestamp {
        if self.numerator == 0 || self.denominator == 0 {
            return Timestamp::default();
        }
        let micros = index as u128 * 1_000_000 * self.denominator as u128 / self.numerator as u128;
        Timestamp::from_micros(micros.min(i64::MAX as u128) as i64)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::new(30, 1)
    }
}

impl std::fmt::Display for FrameRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl FromStr for FrameRate {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || RelayError::Config(format!("invalid frame rate '{}'", s));
        let (num, den) = match s.trim().split_once('/') {
            Some((n, d)) => (n.trim(), d.trim()),
            None => (s.trim(), "1"),
        };
        let numerator = num.parse::<u32>().map_err(|_| bad())?;
        let denominator = den.parse::<u32>().map_err(|_| bad())?;
        if denominator == 0 {
            return Err(bad());
        }
        Ok(Self::new(numerator, denominator))
    }
}

impl TryFrom<String> for FrameRate {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FrameRate> for String {
    fn from(rate: FrameRate) -> Self {
        rate.to_string()
    }
}

/// The negotiated format contract of one pipeline endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapsDescriptor {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub framerate: FrameRate,
}

impl CapsDescriptor {
    /// Create a validated descriptor: width and height must be positive
    pub fn new(
        format: PixelFormat,
        width: u32,
        height: u32,
        framerate: FrameRate,
    ) -> Result<Self, RelayError> {
        if width == 0 || height == 0 {
            return Err(RelayError::Config(format!(
                "caps dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        if framerate.denominator == 0 {
            return Err(RelayError::Config(format!(
                "frame rate denominator must be positive, got {}",
                framerate
            )));
        }
        Ok(Self {
            format,
            width,
            height,
            framerate,
        })
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Bytes of one packed row
    pub fn tight_stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Bytes of one packed frame
    pub fn frame_size(&self) -> usize {
        self.tight_stride() * self.height as usize
    }

    /// Caps string in the `video/x-raw` notation
    pub fn to_caps_string(&self) -> String {
        format!(
            "video/x-raw,format={},width={},height={},framerate={}",
            self.format, self.width, self.height, self.framerate
        )
    }
}

impl std::fmt::Display for CapsDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_caps_string())
    }
}

/// What a pipeline endpoint is able to accept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsFilter {
    pub formats: Vec<PixelFormat>,
    pub max_width: u32,
    pub max_height: u32,
}

impl CapsFilter {
    /// Any supported format up to the given resolution
    pub fn any(max_width: u32, max_height: u32) -> Self {
        Self {
            formats: PixelFormat::ALL.to_vec(),
            max_width,
            max_height,
        }
    }

    pub fn with_formats(mut self, formats: &[PixelFormat]) -> Self {
        self.formats = formats.to_vec();
        self
    }

    /// Check a descriptor against this filter, returning why it is rejected
    pub fn check(&self, caps: &CapsDescriptor) -> Result<(), String> {
        if !self.formats.contains(&caps.format) {
            return Err(format!(
                "format {} not in [{}]",
                caps.format,
                self.formats
                    .iter()
                    .map(|f| f.token())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        if caps.width > self.max_width || caps.height > self.max_height {
            return Err(format!(
                "{}x{} exceeds {}x{}",
                caps.width, caps.height, self.max_width, self.max_height
            ));
        }
        if caps.framerate.denominator == 0 {
            return Err(format!("invalid frame rate {}", caps.framerate));
        }
        Ok(())
    }
}

/// Result of a successful negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// Descriptor attached to samples leaving the capture side
    pub capture: CapsDescriptor,
    /// Descriptor attached to samples entering the transmit side
    pub transmit: Option<CapsDescriptor>,
}

/// Check that both endpoints accept the configured descriptors.
///
/// `output` is what the transform stage produces for `requested` input; it
/// is what the transmit side must accept. Rejection by either side is a
/// [`RelayError::Negotiation`] and is never retried.
pub fn negotiate(
    requested: &CapsDescriptor,
    capture: &CapsFilter,
    transmit: Option<&CapsFilter>,
    output: &CapsDescriptor,
) -> Result<Negotiated, RelayError> {
    capture
        .check(requested)
        .map_err(|reason| RelayError::negotiation(format!("capture rejected {}: {}", requested, reason)))?;

    let transmit = match transmit {
        Some(filter) => {
            filter.check(output).map_err(|reason| {
                RelayError::negotiation(format!("transmit rejected {}: {}", output, reason))
            })?;
            Some(*output)
        }
        None => None,
    };

    Ok(Negotiated {
        capture: *requested,
        transmit,
    })
}
