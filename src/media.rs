//! Encoding profiles: target resolutions, latency modes and bitrate advice.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FleetError;

/// Standard 16:9 output resolutions, ordered by pixel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "1440p")]
    P1440,
    #[serde(rename = "2160p")]
    P2160,
}

impl Resolution {
    pub const ALL: [Resolution; 6] = [
        Resolution::P360,
        Resolution::P480,
        Resolution::P720,
        Resolution::P1080,
        Resolution::P1440,
        Resolution::P2160,
    ];

    /// Canonical (width, height).
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Resolution::P360 => (640, 360),
            Resolution::P480 => (854, 480),
            Resolution::P720 => (1280, 720),
            Resolution::P1080 => (1920, 1080),
            Resolution::P1440 => (2560, 1440),
            Resolution::P2160 => (3840, 2160),
        }
    }

    pub fn pixel_count(self) -> u64 {
        let (w, h) = self.dimensions();
        w as u64 * h as u64
    }

    /// Only workers flagged for high-resolution output may take these jobs.
    pub fn requires_high_res(self) -> bool {
        matches!(self, Resolution::P2160)
    }

    pub fn label(self) -> &'static str {
        match self {
            Resolution::P360 => "360p",
            Resolution::P480 => "480p",
            Resolution::P720 => "720p",
            Resolution::P1080 => "1080p",
            Resolution::P1440 => "1440p",
            Resolution::P2160 => "2160p",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for Resolution {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "360p" | "360" => Ok(Resolution::P360),
            "480p" | "480" => Ok(Resolution::P480),
            "720p" | "720" | "hd" => Ok(Resolution::P720),
            "1080p" | "1080" | "fullhd" | "fhd" => Ok(Resolution::P1080),
            "1440p" | "1440" | "qhd" => Ok(Resolution::P1440),
            "2160p" | "2160" | "4k" | "uhd" => Ok(Resolution::P2160),
            other => Err(FleetError::InvalidConfig(format!(
                "unknown resolution: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyMode {
    #[default]
    Normal,
    Low,
    UltraLow,
}

impl LatencyMode {
    /// Share of the normal-latency bitrate kept in this mode, in percent.
    fn bitrate_percent(self) -> u32 {
        match self {
            LatencyMode::Normal => 100,
            LatencyMode::Low => 90,
            LatencyMode::UltraLow => 80,
        }
    }
}

impl fmt::Display for LatencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatencyMode::Normal => write!(f, "normal"),
            LatencyMode::Low => write!(f, "low"),
            LatencyMode::UltraLow => write!(f, "ultra_low"),
        }
    }
}

impl FromStr for LatencyMode {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(LatencyMode::Normal),
            "low" => Ok(LatencyMode::Low),
            "ultra_low" | "ultra-low" | "ultralow" => Ok(LatencyMode::UltraLow),
            other => Err(FleetError::InvalidConfig(format!(
                "unknown latency mode: {}",
                other
            ))),
        }
    }
}

/// Advisory target bitrate in kbps. Non-decreasing in pixel count for a
/// given latency mode.
pub fn recommended_bitrate_kbps(resolution: Resolution, latency: LatencyMode) -> u32 {
    let base = match resolution {
        Resolution::P360 => 800,
        Resolution::P480 => 1_400,
        Resolution::P720 => 2_800,
        Resolution::P1080 => 5_000,
        Resolution::P1440 => 8_000,
        Resolution::P2160 => 16_000,
    };
    base * latency.bitrate_percent() / 100
}

/// Adaptive-bitrate rungs for a target: every standard resolution up to and
/// including the target, lowest first.
pub fn abr_ladder(target: Resolution) -> Vec<Resolution> {
    Resolution::ALL
        .iter()
        .copied()
        .filter(|r| *r <= target)
        .collect()
}
