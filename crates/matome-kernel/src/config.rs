//! Runtime configuration.
//!
//! Loaded from a RON file. Every section and field has a default, so an empty
//! file (or no file at all) yields a working configuration:
//!
//! ```ron
//! (
//!     coalesce: (interrupt_policy: Detach),
//!     activity: (interval_ms: 3000, max_duration_ms: 30000),
//!     delivery: (chunk_limit: 4096),
//!     llm: (model: "echo", context_messages: 20),
//! )
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// What to do with an in-flight generation once newer input invalidates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum InterruptPolicy {
    /// Leave the generation running and drop its result when it lands.
    #[default]
    #[strum(serialize = "detach")]
    Detach,
    /// Abort the generation task as soon as the interruption is observed.
    #[strum(serialize = "abort")]
    Abort,
}

/// Coordinator behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalesceConfig {
    pub interrupt_policy: InterruptPolicy,
}

/// Cadence of the "still working" indicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Delay between two activity signals.
    pub interval_ms: u64,
    /// Stop signalling after this long even if the session is still running.
    pub max_duration_ms: u64,
}

impl ActivityConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3_000,
            max_duration_ms: 30_000,
        }
    }
}

/// Outbound message shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Maximum characters per transport message.
    pub chunk_limit: usize,
    /// Sent once when generation fails for a batch.
    pub failure_message: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            chunk_limit: 4096,
            failure_message: "Sorry, something went wrong while answering your message. \
                              Please try again."
                .to_string(),
        }
    }
}

/// Generation request shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model identifier passed to the provider.
    pub model: String,
    /// System prompt, if any.
    pub system_prompt: Option<String>,
    /// How many prior turns of the conversation to send as context.
    pub context_messages: usize,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Artificial latency for the echo provider (demo only).
    pub echo_latency_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "echo".to_string(),
            system_prompt: None,
            context_messages: 20,
            max_tokens: 4096,
            echo_latency_ms: 1_500,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatomeConfig {
    pub coalesce: CoalesceConfig,
    pub activity: ActivityConfig,
    pub delivery: DeliveryConfig,
    pub llm: LlmConfig,
}

impl MatomeConfig {
    /// Parse a configuration from RON text.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: MatomeConfig = ron::from_str(text)?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_ron(&text)
    }
}

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}
