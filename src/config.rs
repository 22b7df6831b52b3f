//! Relay configuration
//!
//! One struct covers every way of running the relay: capture only, capture
//! plus transmit, with or without a transform. It is read from JSON and
//! then patched by command line overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::assets::{
    DEFAULT_BITRATE_KBPS, DEFAULT_HOST, DEFAULT_MTU, DEFAULT_PORT, DEFAULT_SPEED_PRESET,
    FRAME_HEIGHT, FRAME_RATE, FRAME_WIDTH, MAX_UDP_PAYLOAD, STATS_INTERVAL, X264_SPEED_PRESETS,
};
use crate::pipeline::caps::{CapsDescriptor, FrameRate, PixelFormat};
use crate::pipeline::error::RelayError;

/// Format contract requested for the capture side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapsConfig {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub framerate: FrameRate,
}

impl Default for CapsConfig {
    fn default() -> Self {
        Self {
            format: PixelFormat::Bgr8,
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            framerate: FrameRate::new(FRAME_RATE, 1),
        }
    }
}

impl CapsConfig {
    pub fn to_caps(&self) -> Result<CapsDescriptor, RelayError> {
        CapsDescriptor::new(self.format, self.width, self.height, self.framerate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureBackend {
    /// Synthetic frames generated in-process
    TestPattern,
    /// Video4Linux device through GStreamer
    Gstreamer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pattern {
    Solid,
    Bars,
    Gradient,
    Checker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: CaptureBackend,
    /// Device node for the GStreamer backend
    pub device: String,
    pub pattern: Pattern,
    /// Intensity of the solid pattern
    pub gray: u8,
    /// Stop with end-of-stream after this many samples
    pub num_buffers: Option<u64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::TestPattern,
            device: "/dev/video0".to_string(),
            pattern: Pattern::Bars,
            gray: 128,
            num_buffers: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransmitBackend {
    /// Raw frames as RTP over UDP
    Udp,
    /// H.264 over RTP through GStreamer
    Gstreamer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmitConfig {
    pub backend: TransmitBackend,
    pub host: String,
    pub port: u16,
    pub bitrate_kbps: u32,
    pub low_latency: bool,
    pub speed_preset: String,
    pub mtu: usize,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            backend: TransmitBackend::Udp,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            low_latency: true,
            speed_preset: DEFAULT_SPEED_PRESET.to_string(),
            mtu: DEFAULT_MTU,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformKind {
    None,
    Edges,
    Square,
}

impl FromStr for TransformKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "passthrough" => Ok(TransformKind::None),
            "edges" | "contours" => Ok(TransformKind::Edges),
            "square" => Ok(TransformKind::Square),
            other => Err(RelayError::Config(format!(
                "unknown transform '{}' (expected none, edges or square)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SquareMethod {
    /// Black bars on both sides of the short dimension
    PadCenter,
    /// Black bars on the right or bottom only
    PadEdge,
    /// Resample to the long dimension
    Stretch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub kind: TransformKind,
    pub square_method: SquareMethod,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            kind: TransformKind::Edges,
            square_method: SquareMethod::PadCenter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub caps: CapsConfig,
    pub capture: CaptureConfig,
    /// `None` relays into nothing: frames are transformed then dropped
    pub transmit: Option<TransmitConfig>,
    pub transform: TransformConfig,
    pub stats_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            caps: CapsConfig::default(),
            capture: CaptureConfig::default(),
            transmit: Some(TransmitConfig::default()),
            transform: TransformConfig::default(),
            stats_interval_secs: STATS_INTERVAL.as_secs(),
        }
    }
}

impl RelayConfig {
    /// Read a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
            .map_err(|e| RelayError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(text: &str) -> Result<Self, RelayError> {
        serde_json::from_str(text).map_err(|e| RelayError::Config(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string_pretty(self).map_err(|e| RelayError::Config(e.to_string()))
    }

    /// Requested capture descriptor
    pub fn to_caps(&self) -> Result<CapsDescriptor, RelayError> {
        self.caps.to_caps()
    }

    /// Zero disables the periodic health log
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        self.to_caps()?;

        if self.capture.num_buffers == Some(0) {
            return Err(RelayError::Config("num_buffers must be positive".to_string()));
        }

        if let Some(transmit) = &self.transmit {
            if transmit.host.trim().is_empty() {
                return Err(RelayError::Config("transmit host is empty".to_string()));
            }
            if transmit.port == 0 {
                return Err(RelayError::Config("transmit port must be positive".to_string()));
            }
            if transmit.bitrate_kbps == 0 {
                return Err(RelayError::Config("bitrate must be positive".to_string()));
            }
            if !X264_SPEED_PRESETS.contains(&transmit.speed_preset.as_str()) {
                return Err(RelayError::Config(format!(
                    "unknown speed preset '{}' (expected one of {})",
                    transmit.speed_preset,
                    X264_SPEED_PRESETS.join(", ")
                )));
            }
            if !(64..=MAX_UDP_PAYLOAD).contains(&transmit.mtu) {
                return Err(RelayError::Config(format!(
                    "mtu {} outside 64..={}",
                    transmit.mtu, MAX_UDP_PAYLOAD
                )));
            }
        }
        Ok(())
    }
}

/// Package version from Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
