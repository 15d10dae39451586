//! # matome-kernel
//!
//! Per-conversation message coalescing for chat assistants.
//!
//! A conversation gets at most one generation in flight. Messages that arrive
//! while it runs are buffered and folded into the next request; a result that
//! newer input has overtaken is thrown away rather than delivered. Nothing a
//! user sent is lost along the way.
//!
//! - [`coalesce`]: the state registry and the Session Loop
//! - [`session`]: transport-facing driver with the activity indicator
//! - [`ports`]: traits for generation, settlement, delivery and activity
//! - [`llm`], [`history`], [`delivery`]: in-process implementations of those ports

pub mod coalesce;
pub mod config;
pub mod delivery;
pub mod error;
pub mod history;
pub mod ids;
pub mod llm;
pub mod ports;
pub mod session;

pub use coalesce::{
    Admission, Continuation, Coordinator, RegistryStats, SessionReport, Snapshot, StateRegistry,
};
pub use config::{
    ActivityConfig, CoalesceConfig, ConfigError, DeliveryConfig, InterruptPolicy, LlmConfig,
    MatomeConfig,
};
pub use delivery::{ChunkedDelivery, Transport, chunk_message};
pub use error::{CoalesceError, CoalesceResult, DeliveryError, GenerateError, SettleError};
pub use history::ConversationLog;
pub use ids::{ConversationKey, SessionId};
pub use llm::{
    CompletionRequest, CompletionResponse, EchoProvider, LlmError, LlmGenerator, LlmProvider,
    LlmRegistry, LlmResult, Message as LlmMessage, Role as LlmRole, Usage as LlmUsage,
};
pub use ports::{ActivitySignal, Deliverer, Generator, Payload, Settler};
pub use session::{ActivityPulse, Dispatch, SessionDriver};
