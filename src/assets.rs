use std::time::Duration;

pub const FRAME_RATE: u32 = 30;
pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

/// Largest frame any endpoint accepts
pub const MAX_FRAME_WIDTH: u32 = 7680;
pub const MAX_FRAME_HEIGHT: u32 = 4320;

// connections
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_BITRATE_KBPS: u32 = 2000;
pub const DEFAULT_SPEED_PRESET: &str = "ultrafast";
pub const DEFAULT_MTU: usize = 1400;
pub const MAX_UDP_PAYLOAD: usize = 65_507;

// rtp
pub const RTP_PAYLOAD_TYPE: u8 = 96;
pub const RTP_CLOCK_RATE: u32 = 90_000;

/// Pending notifications between the pipelines and the relay loop
pub const BUS_CAPACITY: usize = 32;

pub const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Longest wait for a pipeline to reach a commanded state
pub const STATE_CHANGE_TIMEOUT: Duration = Duration::from_secs(5);

pub const X264_SPEED_PRESETS: [&str; 10] = [
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
    "placebo",
];

#[cfg(target_os = "windows")]
pub const TARGET_OS: &str = "windows";
#[cfg(target_os = "macos")]
pub const TARGET_OS: &str = "macos";
#[cfg(target_os = "linux")]
pub const TARGET_OS: &str = "linux";
#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
pub const TARGET_OS: &str = "unknown";
