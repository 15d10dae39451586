//! Line-oriented console transport.
//!
//! Input lines look like `key: text`. Deliveries are written as
//! `[key] chunk`, one chunk per line.

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use matome_kernel::{ActivitySignal, ConversationKey, DeliveryError, Transport};

use crate::constants::{BLOCK_COMMAND, FORGET_COMMAND};

/// What an input line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A user message.
    Text(String),
    /// Clear the conversation's history.
    Forget,
    /// The recipient blocks the bot from here on.
    Block,
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleEvent {
    pub key: ConversationKey,
    pub command: Command,
}

/// Parse `key: text`. Returns `None` for blank or malformed lines.
pub fn parse_line(line: &str) -> Option<ConsoleEvent> {
    let (key, body) = line.split_once(':')?;
    let key = key.trim();
    let body = body.trim();
    if key.is_empty() || body.is_empty() {
        return None;
    }

    let command = match body {
        FORGET_COMMAND => Command::Forget,
        BLOCK_COMMAND => Command::Block,
        text => Command::Text(text.to_string()),
    };

    Some(ConsoleEvent {
        key: ConversationKey::new(key),
        command,
    })
}

/// Writes deliveries to an output stream.
///
/// Keys marked blocked refuse delivery with [`DeliveryError::RecipientBlocked`],
/// the way a chat platform answers when a user has blocked the bot.
pub struct ConsoleTransport<W> {
    out: Mutex<W>,
    blocked: DashSet<ConversationKey>,
}

impl<W> std::fmt::Debug for ConsoleTransport<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleTransport")
            .field("blocked", &self.blocked.len())
            .finish()
    }
}

impl ConsoleTransport<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> ConsoleTransport<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            blocked: DashSet::new(),
        }
    }

    /// Refuse all further deliveries to `key`. Returns false if already blocked.
    pub fn block(&self, key: &ConversationKey) -> bool {
        self.blocked.insert(key.clone())
    }

    pub fn is_blocked(&self, key: &ConversationKey) -> bool {
        self.blocked.contains(key)
    }

    /// The underlying writer.
    pub fn output(&self) -> &Mutex<W> {
        &self.out
    }
}

#[async_trait]
impl<W> Transport for ConsoleTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, key: &ConversationKey, text: &str) -> Result<(), DeliveryError> {
        if self.is_blocked(key) {
            return Err(DeliveryError::RecipientBlocked);
        }

        let line = format!("[{key}] {text}\n");
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }
}

#[async_trait]
impl<W> ActivitySignal for ConsoleTransport<W>
where
    W: Send + 'static,
{
    async fn signal(&self, key: &ConversationKey) {
        if !self.is_blocked(key) {
            tracing::debug!(key = %key, "typing");
        }
    }

    fn stop(&self, key: &ConversationKey) {
        tracing::debug!(key = %key, "typing stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text() {
        let event = parse_line("alice: hello there").unwrap();
        assert_eq!(event.key.as_str(), "alice");
        assert_eq!(event.command, Command::Text("hello there".into()));
    }

    #[test]
    fn test_parse_keeps_colons_in_text() {
        let event = parse_line("42: note: buy milk").unwrap();
        assert_eq!(event.key.as_str(), "42");
        assert_eq!(event.command, Command::Text("note: buy milk".into()));
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_line("bob: /forget").unwrap().command, Command::Forget);
        assert_eq!(parse_line("bob:/block").unwrap().command, Command::Block);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_line("").is_none());
        assert!(parse_line("no separator").is_none());
        assert!(parse_line(": text without key").is_none());
        assert!(parse_line("key:   ").is_none());
    }

    #[tokio::test]
    async fn test_send_writes_prefixed_line() {
        let transport = ConsoleTransport::new(Vec::new());
        let key = ConversationKey::new("alice");

        transport.send(&key, "hi").await.unwrap();
        transport.send(&key, "again").await.unwrap();

        let out = transport.output().lock().await;
        assert_eq!(String::from_utf8_lossy(&out), "[alice] hi\n[alice] again\n");
    }

    #[tokio::test]
    async fn test_blocked_key_refuses_delivery() {
        let transport = ConsoleTransport::new(Vec::new());
        let key = ConversationKey::new("alice");

        assert!(transport.block(&key));
        assert!(!transport.block(&key));

        let err = transport.send(&key, "hi").await.unwrap_err();
        assert!(err.is_blocked());
        assert!(transport.output().lock().await.is_empty());
    }
}
