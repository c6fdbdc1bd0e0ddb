//! Decoded message → command → agent run → chunked replies.

use std::future::Future;

use tracing::{error, info, warn};

use wecomrelay_connectors::{ExecutionEngine, RunOutcome};
use wecomrelay_protocol::{split, InboundMessage};

use crate::command::{status_text, Command, HELP_TEXT, UNKNOWN_TEXT};
use crate::logging::preview;
use crate::wecom::TransportError;

/// Outbound text channel back to a chat user.
pub trait ReplySink: Send + Sync + 'static {
    fn send_text(
        &self,
        user_id: &str,
        content: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

pub struct Pipeline<S> {
    engine: ExecutionEngine,
    sink: S,
    chunk_bytes: usize,
}

impl<S: ReplySink> Pipeline<S> {
    pub fn new(engine: ExecutionEngine, sink: S, chunk_bytes: usize) -> Self {
        Self {
            engine,
            sink,
            chunk_bytes,
        }
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    #[cfg(test)]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Handle one text message end to end. Every failure ends up as a log
    /// line or a chat reply; nothing propagates.
    pub async fn handle(&self, msg: InboundMessage) {
        let user = msg.from_user.as_str();
        let command = Command::parse(&msg.content);
        info!(
            component = "dispatch",
            event = "dispatch.received",
            user_id = %user,
            command = command.name(),
            content = %preview(&msg.content),
            "Message received"
        );

        match command {
            Command::Help => self.reply(user, HELP_TEXT).await,
            Command::New => match self.engine.create_session(user).await {
                Ok(_) => {
                    self.reply(user, "✅ New session started, previous context cleared")
                        .await
                }
                Err(e) => {
                    error!(
                        component = "dispatch",
                        event = "dispatch.reset_failed",
                        user_id = %user,
                        error = %e,
                        "Session reset failed"
                    );
                    self.reply(user, &format!("❌ Could not reset session: {e}"))
                        .await
                }
            },
            Command::Status => {
                let info = self.engine.session_info(user).await;
                self.reply(user, &status_text(self.engine.backend(), &info))
                    .await
            }
            Command::Run(instruction) => self.run(user, &instruction).await,
            Command::Unknown => self.reply(user, UNKNOWN_TEXT).await,
        }
    }

    async fn run(&self, user: &str, instruction: &str) {
        self.reply(user, &format!("⏳ Running: {instruction}")).await;

        match self.engine.execute(user, instruction).await {
            RunOutcome::Succeeded { output } => {
                let body = if output.is_empty() {
                    "Command completed with no output"
                } else {
                    output.as_str()
                };
                self.reply(user, &format!("✅ {body}")).await;
            }
            RunOutcome::Failed { output, exit_code } => {
                let body = if !output.is_empty() {
                    output
                } else {
                    match exit_code {
                        Some(code) => format!("Command failed with exit code {code}"),
                        None => "Command failed".to_string(),
                    }
                };
                self.reply(user, &format!("❌ {body}")).await;
            }
            RunOutcome::NotInstalled { program } => {
                self.reply(
                    user,
                    &format!(
                        "❌ Agent executable `{program}` not found. Install the {} CLI or set AGENT_BIN.",
                        self.engine.backend()
                    ),
                )
                .await;
            }
            RunOutcome::TimedOut { timeout } => {
                self.reply(
                    user,
                    &format!(
                        "⚠️ Timed out after {}s, the task was terminated.",
                        timeout.as_secs()
                    ),
                )
                .await;
                self.reply(user, "📝 Asking the agent for a progress summary...")
                    .await;
                self.summarize(user).await;
            }
        }
    }

    async fn summarize(&self, user: &str) {
        match self.engine.summarize(user).await {
            RunOutcome::Succeeded { output } if !output.is_empty() => {
                self.reply(user, &format!("📋 Summary:\n{output}")).await;
            }
            other => {
                warn!(
                    component = "dispatch",
                    event = "dispatch.summary_failed",
                    user_id = %user,
                    outcome = ?other,
                    "Timeout summary did not produce output"
                );
                self.reply(user, "❌ Summary failed").await;
            }
        }
    }

    /// Send `text`, split to the chunk budget. Chunks after the first carry
    /// an `[i/n] ` label. Send failures are logged, never retried.
    pub async fn reply(&self, user: &str, text: &str) {
        let chunks = split(text, self.chunk_bytes);
        let total = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let content = if i == 0 {
                chunk.to_string()
            } else {
                format!("[{}/{total}] {chunk}", i + 1)
            };
            if let Err(e) = self.sink.send_text(user, &content).await {
                warn!(
                    component = "dispatch",
                    event = "dispatch.reply_failed",
                    user_id = %user,
                    chunk = i + 1,
                    total,
                    error = %e,
                    "Failed to send reply"
                );
            }
        }
    }
}
