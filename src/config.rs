use std::time::Duration;

use crate::engine::StyleParams;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Deadline for every call that crosses into the engine.
    pub boundary_timeout: Duration,
    /// How long a capture may wait for the camera; `None` waits forever.
    pub capture_timeout: Option<Duration>,
    /// Applied right after `init` when set.
    pub learning_strength: Option<i32>,
    /// Style attached to photos marked as favorites.
    pub favorite_style: StyleParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            boundary_timeout: Duration::from_secs(5),
            capture_timeout: Some(Duration::from_secs(10)),
            learning_strength: None,
            favorite_style: StyleParams::default(),
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct PipelineConfigBuilder {
    boundary_timeout: Option<Duration>,
    capture_timeout: Option<Option<Duration>>,
    learning_strength: Option<Option<i32>>,
    favorite_style: Option<StyleParams>,
}

impl PipelineConfigBuilder {
    pub fn boundary_timeout(mut self, timeout: Duration) -> Self {
        self.boundary_timeout = Some(timeout);
        self
    }

    pub fn capture_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.capture_timeout = Some(timeout);
        self
    }

    pub fn learning_strength(mut self, strength: Option<i32>) -> Self {
        self.learning_strength = Some(strength);
        self
    }

    pub fn favorite_style(mut self, style: StyleParams) -> Self {
        self.favorite_style = Some(style);
        self
    }

    pub fn build(self) -> PipelineConfig {
        let default = PipelineConfig::default();
        PipelineConfig {
            boundary_timeout: self.boundary_timeout.unwrap_or(default.boundary_timeout),
            capture_timeout: self.capture_timeout.unwrap_or(default.capture_timeout),
            learning_strength: self.learning_strength.unwrap_or(default.learning_strength),
            favorite_style: self.favorite_style.unwrap_or(default.favorite_style),
        }
    }
}
