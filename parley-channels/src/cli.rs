//! CLI transport for interactive terminal sessions.
//!
//! Every stdin line is a message from the local user in a single direct
//! conversation with the bot; replies are printed to stdout.

use crate::message::{InboundMessage, OutgoingMessage};
use crate::traits::{ChannelResult, Transport};
use async_trait::async_trait;
use parley_common::util::now_timestamp;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

pub const CLI_CONVERSATION_ID: &str = "cli";
const CLI_USER_ID: &str = "cli-user";

/// CLI transport - stdin/stdout, always available.
pub struct CliTransport {
    bot_name: String,
    user_name: String,
}

impl CliTransport {
    pub fn new(bot_name: impl Into<String>) -> Self {
        Self {
            bot_name: bot_name.into(),
            user_name: std::env::var("USER").unwrap_or_else(|_| "user".into()),
        }
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = name.into();
        self
    }

    fn inbound(&self, text: String) -> InboundMessage {
        InboundMessage {
            conversation_id: CLI_CONVERSATION_ID.into(),
            sender_id: CLI_USER_ID.into(),
            sender_name: self.user_name.clone(),
            is_bot: false,
            is_direct: true,
            text,
            message_id: uuid::Uuid::new_v4().to_string(),
            mentions: Vec::new(),
            reply_to: None,
            timestamp: now_timestamp(),
        }
    }

    /// Read messages from any line source until EOF, `/quit` or `/exit`.
    pub async fn listen_from<R>(&self, reader: R, tx: mpsc::Sender<InboundMessage>) -> ChannelResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if line == "/quit" || line == "/exit" {
                break;
            }
            if tx.send(self.inbound(line)).await.is_err() {
                tracing::debug!("Inbound channel closed, stopping CLI listener");
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for CliTransport {
    fn name(&self) -> &str {
        "cli"
    }

    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String> {
        println!("{}: {}", self.bot_name, message.text);
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn listen(&self, tx: mpsc::Sender<InboundMessage>) -> ChannelResult<()> {
        self.listen_from(BufReader::new(io::stdin()), tx).await
    }

    async fn health_check(&self) -> ChannelResult<()> {
        Ok(())
    }

    async fn shutdown(&self) -> ChannelResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_transport_name() {
        assert_eq!(CliTransport::new("parley").name(), "cli");
    }

    #[tokio::test]
    async fn listen_reads_lines_until_quit() {
        let transport = CliTransport::new("parley").with_user_name("tester");
        let input: &[u8] = b"hello\n\n  second  \n/quit\nnever\n";
        let (tx, mut rx) = mpsc::channel(8);

        transport.listen_from(BufReader::new(input), tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.text, "hello");
        assert_eq!(first.sender_name, "tester");
        assert_eq!(first.conversation_id, CLI_CONVERSATION_ID);
        assert!(first.is_direct);

        assert_eq!(rx.recv().await.unwrap().text, "second");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_returns_unique_ids() {
        let transport = CliTransport::new("parley");
        let a = transport.send(OutgoingMessage::new("cli", "one")).await.unwrap();
        let b = transport.send(OutgoingMessage::new("cli", "two")).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn health_and_shutdown() {
        let transport = CliTransport::new("parley");
        assert!(transport.health_check().await.is_ok());
        assert!(transport.shutdown().await.is_ok());
    }
}
