//! # Session Configuration
//!
//! TOML input is deserialized into `*Input` structs whose fields are all
//! optional, then resolved into validated runtime structs. Every component
//! receives the resolved record at construction; nothing reads ambient
//! globals.
//!
//! ```toml
//! version = 1
//!
//! [video]
//! fps = 30
//! frames_per_segment = 30
//! segments = 6
//! tile_count = 200
//!
//! [abr]
//! algorithm = "basic2"
//! ladder_kbps = [3000, 3500, 4000, 4500, 5000, 5500, 6000]
//!
//! [scheduler]
//! discipline = "wfq"
//! high_weight = 2.0
//! low_weight = 1.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tile::{BitrateLadder, PriorityLevels};

pub const CONFIG_VERSION: u32 = 1;

/// Hard ceiling for `framing.max_envelope_bytes`.
pub const MAX_ENVELOPE_CEILING: usize = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

// ─── Enumerated options ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbrAlgorithm {
    /// Throughput of the immediately preceding segment.
    #[default]
    Basic,
    /// EWMA-smoothed throughput over a short window of segments.
    Basic2,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueDiscipline {
    #[default]
    #[serde(rename = "fifo", alias = "FIFO")]
    Fifo,
    #[serde(rename = "sp", alias = "SP")]
    StrictPriority,
    #[serde(rename = "wfq", alias = "WFQ")]
    WeightedFair,
}

/// Which tiles count towards the missing-ratio denominator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Every tile of every frame, whether it was requested or not.
    #[default]
    AllTiles,
    /// Only tiles requested for (or already held at) the segment's bitrate.
    RequestedOnly,
}

/// Which tiles the request generator asks for at each segment boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestScope {
    #[default]
    All,
    FovOnly,
}

// ─── Input (deserialized) ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfigInput {
    pub version: u32,
    pub video: VideoConfigInput,
    pub abr: AbrConfigInput,
    pub scheduler: SchedulerConfigInput,
    pub priority: PriorityConfigInput,
    pub framing: FramingConfigInput,
    pub qoe: QoeConfigInput,
    pub session: SessionTimingInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VideoConfigInput {
    pub fps: Option<u32>,
    pub frames_per_segment: Option<u32>,
    pub segments: Option<u32>,
    pub tile_count: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AbrConfigInput {
    pub algorithm: Option<AbrAlgorithm>,
    pub ladder_kbps: Option<Vec<u32>>,
    pub window: Option<usize>,
    pub alpha: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfigInput {
    pub discipline: Option<QueueDiscipline>,
    pub high_weight: Option<f64>,
    pub low_weight: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PriorityConfigInput {
    pub high: Option<u8>,
    pub low: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FramingConfigInput {
    pub max_envelope_bytes: Option<usize>,
    pub chunk_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QoeConfigInput {
    pub missing_policy: Option<MissingPolicy>,
    pub request_scope: Option<RequestScope>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionTimingInput {
    pub drain_timeout_ms: Option<u64>,
}

// ─── Resolved ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConfig {
    pub fps: u32,
    pub frames_per_segment: u32,
    pub segments: u32,
    /// Tiles are numbered `1..=tile_count`.
    pub tile_count: u16,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            frames_per_segment: 30,
            segments: 6,
            tile_count: 200,
        }
    }
}

impl VideoConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps
    }

    pub fn total_frames(&self) -> u64 {
        u64::from(self.segments) * u64::from(self.frames_per_segment)
    }

    pub fn tiles(&self) -> impl Iterator<Item = u16> {
        1..=self.tile_count
    }
}

#[derive(Debug, Clone)]
pub struct AbrConfig {
    pub algorithm: AbrAlgorithm,
    pub ladder: BitrateLadder,
    /// Number of recent segments `basic2` smooths over.
    pub window: usize,
    /// EWMA smoothing factor for `basic2`, in `(0, 1]`.
    pub alpha: f64,
}

impl Default for AbrConfig {
    fn default() -> Self {
        Self {
            algorithm: AbrAlgorithm::Basic,
            ladder: BitrateLadder::default(),
            window: 3,
            alpha: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    pub discipline: QueueDiscipline,
    pub high_weight: f64,
    pub low_weight: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            discipline: QueueDiscipline::Fifo,
            high_weight: 2.0,
            low_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramingConfig {
    /// Largest accepted envelope payload; longer length prefixes are rejected.
    pub max_envelope_bytes: usize,
    /// Tile payloads are split into chunks of at most this many bytes.
    pub chunk_bytes: usize,
    pub levels: PriorityLevels,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_envelope_bytes: 16 * 1024 * 1024,
            chunk_bytes: 16 * 1024,
            levels: PriorityLevels::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QoeConfig {
    pub missing_policy: MissingPolicy,
    pub request_scope: RequestScope,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub version: u32,
    pub video: VideoConfig,
    pub abr: AbrConfig,
    pub scheduler: SchedulerConfig,
    pub framing: FramingConfig,
    pub qoe: QoeConfig,
    /// How long the client waits for the server to close after end-of-session.
    pub drain_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            video: VideoConfig::default(),
            abr: AbrConfig::default(),
            scheduler: SchedulerConfig::default(),
            framing: FramingConfig::default(),
            qoe: QoeConfig::default(),
            drain_timeout: Duration::from_millis(2000),
        }
    }
}

fn positive(field: &'static str, value: u32) -> Result<u32, ConfigError> {
    if value == 0 {
        Err(ConfigError::invalid(field, "must be greater than zero"))
    } else {
        Ok(value)
    }
}

fn positive_weight(field: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::invalid(field, format!("{value} is not a positive weight")))
    }
}

impl SessionConfigInput {
    pub fn resolve(self) -> Result<SessionConfig, ConfigError> {
        let defaults = SessionConfig::default();

        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let tile_count = self
            .video
            .tile_count
            .unwrap_or(u32::from(defaults.video.tile_count));
        if tile_count == 0 || tile_count >= u32::from(u16::MAX) {
            return Err(ConfigError::invalid(
                "video.tile_count",
                format!("{tile_count} is outside 1..{}", u16::MAX),
            ));
        }
        let video = VideoConfig {
            fps: positive("video.fps", self.video.fps.unwrap_or(defaults.video.fps))?,
            frames_per_segment: positive(
                "video.frames_per_segment",
                self.video
                    .frames_per_segment
                    .unwrap_or(defaults.video.frames_per_segment),
            )?,
            segments: positive(
                "video.segments",
                self.video.segments.unwrap_or(defaults.video.segments),
            )?,
            tile_count: tile_count as u16,
        };

        let ladder = match self.abr.ladder_kbps {
            Some(levels) => BitrateLadder::new(levels)?,
            None => defaults.abr.ladder.clone(),
        };
        let alpha = self.abr.alpha.unwrap_or(defaults.abr.alpha);
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigError::invalid(
                "abr.alpha",
                format!("{alpha} is outside (0, 1]"),
            ));
        }
        let abr = AbrConfig {
            algorithm: self.abr.algorithm.unwrap_or(defaults.abr.algorithm),
            ladder,
            window: self.abr.window.unwrap_or(defaults.abr.window).max(1),
            alpha,
        };

        let scheduler = SchedulerConfig {
            discipline: self
                .scheduler
                .discipline
                .unwrap_or(defaults.scheduler.discipline),
            high_weight: positive_weight(
                "scheduler.high_weight",
                self.scheduler
                    .high_weight
                    .unwrap_or(defaults.scheduler.high_weight),
            )?,
            low_weight: positive_weight(
                "scheduler.low_weight",
                self.scheduler
                    .low_weight
                    .unwrap_or(defaults.scheduler.low_weight),
            )?,
        };

        let levels = PriorityLevels {
            high: self.priority.high.unwrap_or(defaults.framing.levels.high),
            low: self.priority.low.unwrap_or(defaults.framing.levels.low),
        };
        if levels.high >= levels.low {
            return Err(ConfigError::invalid(
                "priority",
                format!(
                    "high level {} must be numerically smaller than low level {}",
                    levels.high, levels.low
                ),
            ));
        }

        let max_envelope_bytes = self
            .framing
            .max_envelope_bytes
            .unwrap_or(defaults.framing.max_envelope_bytes);
        if max_envelope_bytes == 0 || max_envelope_bytes > MAX_ENVELOPE_CEILING {
            return Err(ConfigError::invalid(
                "framing.max_envelope_bytes",
                format!("{max_envelope_bytes} is outside 1..={MAX_ENVELOPE_CEILING}"),
            ));
        }
        let chunk_bytes = self
            .framing
            .chunk_bytes
            .unwrap_or(defaults.framing.chunk_bytes);
        if chunk_bytes == 0 || chunk_bytes > max_envelope_bytes {
            return Err(ConfigError::invalid(
                "framing.chunk_bytes",
                format!("{chunk_bytes} is outside 1..={max_envelope_bytes}"),
            ));
        }
        let framing = FramingConfig {
            max_envelope_bytes,
            chunk_bytes,
            levels,
        };

        let qoe = QoeConfig {
            missing_policy: self.qoe.missing_policy.unwrap_or_default(),
            request_scope: self.qoe.request_scope.unwrap_or_default(),
        };

        let drain_timeout = self
            .session
            .drain_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.drain_timeout);

        Ok(SessionConfig {
            version,
            video,
            abr,
            scheduler,
            framing,
            qoe,
            drain_timeout,
        })
    }
}

impl SessionConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(SessionConfig::default());
        }
        let parsed: SessionConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_toml_config_full() {
        let toml = r#"
            version = 1

            [video]
            fps = 24
            frames_per_segment = 48
            segments = 3
            tile_count = 4

            [abr]
            algorithm = "basic2"
            ladder_kbps = [1000, 2000]
            window = 5
            alpha = 0.25

            [scheduler]
            discipline = "WFQ"
            high_weight = 3.0
            low_weight = 1.5

            [priority]
            high = 0
            low = 9

            [framing]
            max_envelope_bytes = 65536
            chunk_bytes = 1024

            [qoe]
            missing_policy = "requested_only"
            request_scope = "fov_only"

            [session]
            drain_timeout_ms = 500
        "#;

        let cfg = SessionConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.video.fps, 24);
        assert_eq!(cfg.video.frames_per_segment, 48);
        assert_eq!(cfg.video.total_frames(), 144);
        assert_eq!(cfg.video.tiles().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(cfg.abr.algorithm, AbrAlgorithm::Basic2);
        assert_eq!(cfg.abr.ladder.levels(), &[1000, 2000]);
        assert_eq!(cfg.abr.window, 5);
        assert_eq!(cfg.scheduler.discipline, QueueDiscipline::WeightedFair);
        assert!((cfg.scheduler.high_weight - 3.0).abs() < f64::EPSILON);
        assert_eq!(cfg.framing.levels, PriorityLevels { high: 0, low: 9 });
        assert_eq!(cfg.framing.chunk_bytes, 1024);
        assert_eq!(cfg.qoe.missing_policy, MissingPolicy::RequestedOnly);
        assert_eq!(cfg.qoe.request_scope, RequestScope::FovOnly);
        assert_eq!(cfg.drain_timeout, Duration::from_millis(500));
    }

    #[test]
    fn empty_input_yields_defaults() {
        let cfg = SessionConfig::from_toml_str("   ").unwrap();
        assert_eq!(cfg.video, VideoConfig::default());
        assert_eq!(cfg.scheduler.discipline, QueueDiscipline::Fifo);
        assert_eq!(cfg.abr.ladder.len(), 7);
    }

    #[test]
    fn unknown_discipline_is_rejected() {
        let err = SessionConfig::from_toml_str("[scheduler]\ndiscipline = \"drr\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn inverted_priority_levels_are_rejected() {
        let err = SessionConfig::from_toml_str("[priority]\nhigh = 2\nlow = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "priority", .. }));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for bad in [
            "version = 2",
            "[video]\nfps = 0",
            "[video]\ntile_count = 0",
            "[abr]\nladder_kbps = []",
            "[abr]\nladder_kbps = [3000, 2000]",
            "[abr]\nalpha = 0.0",
            "[scheduler]\nlow_weight = 0.0",
            "[framing]\nchunk_bytes = 0",
            "[framing]\nmax_envelope_bytes = 100\nchunk_bytes = 200",
        ] {
            assert!(SessionConfig::from_toml_str(bad).is_err(), "accepted: {bad}");
        }
    }
}
