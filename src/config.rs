use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::{ChartflowResult, ConfigError};

// ================================================================================================
// Retry Policy
// ================================================================================================

/// What the raw source does when a provider fetch fails.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Drop the request. The next pan or compute pass re-requests the gap.
    #[default]
    Never,

    /// Re-issue the failed request a single time.
    Once,
}

// ================================================================================================
// Engine Configuration
// ================================================================================================

/// Tunables of the engine.
///
/// # Example
///
/// ```
/// # use chartflow::prelude::*;
/// let config = EngineConfig::default()
///     .with_fetch_batch_size(250)
///     .with_prefetch_frames(1);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Signed batch size of upstream requests issued by compute tasks.
    pub fetch_batch_size: i64,

    /// Age after which a compute task is evicted on the next raw event.
    pub stale_after_secs: u64,

    // === Viewport ===
    pub min_frame: usize,
    pub max_frame: usize,

    /// Relative slot change per zoom step.
    pub zoom_step: f64,

    /// Frames requested beyond an edge on pan and zoom.
    pub prefetch_frames: usize,

    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_batch_size: 500,
            stale_after_secs: 60,
            min_frame: 1,
            max_frame: 2000,
            zoom_step: 0.1,
            prefetch_frames: 2,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> ChartflowResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn validate(&self) -> ChartflowResult<()> {
        let invalid =
            |msg: String| -> ChartflowResult<()> { Err(ConfigError::Invalid(msg).into()) };

        if self.fetch_batch_size <= 0 {
            return invalid(format!(
                "fetch_batch_size must be positive, got {}",
                self.fetch_batch_size
            ));
        }
        if self.min_frame == 0 || self.min_frame > self.max_frame {
            return invalid(format!(
                "frame bounds must satisfy 0 < min_frame <= max_frame, got [{}, {}]",
                self.min_frame, self.max_frame
            ));
        }
        if !(self.zoom_step.is_finite() && self.zoom_step > 0.0 && self.zoom_step < 1.0) {
            return invalid(format!(
                "zoom_step must lie in (0, 1), got {}",
                self.zoom_step
            ));
        }
        Ok(())
    }
}

// ================================================================================================
// Builder Methods
// ================================================================================================

impl EngineConfig {
    pub fn with_fetch_batch_size(self, fetch_batch_size: i64) -> Self {
        Self {
            fetch_batch_size,
            ..self
        }
    }

    pub fn with_stale_after_secs(self, stale_after_secs: u64) -> Self {
        Self {
            stale_after_secs,
            ..self
        }
    }

    pub fn with_frame_bounds(self, min_frame: usize, max_frame: usize) -> Self {
        Self {
            min_frame,
            max_frame,
            ..self
        }
    }

    pub fn with_zoom_step(self, zoom_step: f64) -> Self {
        Self { zoom_step, ..self }
    }

    pub fn with_prefetch_frames(self, prefetch_frames: usize) -> Self {
        Self {
            prefetch_frames,
            ..self
        }
    }

    pub fn with_retry(self, retry: RetryPolicy) -> Self {
        Self { retry, ..self }
    }
}
