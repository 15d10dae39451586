//! Server configuration constants.

/// Service name reported to OpenTelemetry.
pub const SERVICE_NAME: &str = "matome-server";

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "MATOME_CONFIG";

/// Line body that clears a conversation's history.
pub const FORGET_COMMAND: &str = "/forget";

/// Line body that simulates the recipient blocking the bot.
pub const BLOCK_COMMAND: &str = "/block";

/// Sent after `/forget`.
pub const FORGET_CONFIRMATION: &str = "Conversation history cleared.";
